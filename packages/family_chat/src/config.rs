use anyhow::{Result, ensure};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chat_relay::{ClientIdentity, GatewayConfig};

// =============================================================================
// File config (figment-deserialized from defaults / config.toml / env vars)
// =============================================================================
//
// Equivalent ways to configure:
//
//   config.toml:     [gateway]
//                    url = "ws://gateway.lan:18789"
//
//   env var:         FAMILY_CHAT_GATEWAY__URL=ws://gateway.lan:18789
//
//   legacy env var:  GATEWAY_WS_URL=ws://gateway.lan:18789
//
//   (single underscore stays within field names: FAMILY_CHAT_SEARCH__MAX_RESULTS)

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerFileConfig,
    #[serde(default)]
    pub gateway: GatewayFileConfig,
    #[serde(default)]
    pub search: SearchFileConfig,
}

impl FileConfig {
    /// Reject values that extract cleanly but can't be run.
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.server.client_queue > 0,
            "server.client_queue must be at least 1"
        );
        Ok(())
    }
}

/// HTTP server knobs (lives under `[server]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerFileConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Directory served for every path that isn't an API route
    #[serde(default = "default_static_dir")]
    pub static_dir: PathBuf,
    /// Server name reported to browsers in `init`
    #[serde(default = "default_server_name")]
    pub name: String,
    /// Outbound queue length per browser connection
    #[serde(default = "default_client_queue")]
    pub client_queue: usize,
}

impl Default for ServerFileConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            static_dir: default_static_dir(),
            name: default_server_name(),
            client_queue: default_client_queue(),
        }
    }
}

/// Gateway link settings (lives under `[gateway]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GatewayFileConfig {
    #[serde(default = "default_gateway_url")]
    pub url: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default = "default_display_name")]
    pub display_name: String,
    #[serde(default = "default_mode")]
    pub mode: String,
    #[serde(default = "default_locale")]
    pub locale: String,
}

impl Default for GatewayFileConfig {
    fn default() -> Self {
        Self {
            url: default_gateway_url(),
            token: None,
            reconnect_delay_secs: default_reconnect_delay_secs(),
            client_id: default_client_id(),
            display_name: default_display_name(),
            mode: default_mode(),
            locale: default_locale(),
        }
    }
}

impl GatewayFileConfig {
    /// Runtime view handed to the relay core.
    pub fn to_gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            url: self.url.clone(),
            token: self.token.clone().filter(|t| !t.is_empty()),
            reconnect_delay: Duration::from_secs(self.reconnect_delay_secs.max(1)),
            identity: ClientIdentity {
                id: self.client_id.clone(),
                display_name: self.display_name.clone(),
                mode: self.mode.clone(),
                locale: self.locale.clone(),
                ..Default::default()
            },
        }
    }
}

/// Music search settings (lives under `[search]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SearchFileConfig {
    /// Without a key, searches return a fixed placeholder result
    #[serde(default)]
    pub youtube_api_key: Option<String>,
    #[serde(default = "default_search_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_max_results")]
    pub max_results: u32,
    #[serde(default = "default_search_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for SearchFileConfig {
    fn default() -> Self {
        Self {
            youtube_api_key: None,
            endpoint: default_search_endpoint(),
            max_results: default_max_results(),
            timeout_secs: default_search_timeout_secs(),
        }
    }
}

impl SearchFileConfig {
    pub fn api_key(&self) -> Option<&str> {
        self.youtube_api_key.as_deref().filter(|k| !k.is_empty())
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    3010
}
fn default_static_dir() -> PathBuf {
    PathBuf::from("public")
}
fn default_server_name() -> String {
    "Family Chat v1.0".to_string()
}
fn default_client_queue() -> usize {
    100
}
fn default_gateway_url() -> String {
    chat_relay::DEFAULT_GATEWAY_URL.to_string()
}
fn default_reconnect_delay_secs() -> u64 {
    chat_relay::DEFAULT_RECONNECT_DELAY.as_secs()
}
fn default_client_id() -> String {
    ClientIdentity::default().id
}
fn default_display_name() -> String {
    ClientIdentity::default().display_name
}
fn default_mode() -> String {
    ClientIdentity::default().mode
}
fn default_locale() -> String {
    ClientIdentity::default().locale
}
fn default_search_endpoint() -> String {
    crate::youtube::DEFAULT_ENDPOINT.to_string()
}
fn default_max_results() -> u32 {
    10
}
fn default_search_timeout_secs() -> u64 {
    10
}

/// Unprefixed environment variables from older deployments and the keys they set.
const LEGACY_ENV: &[(&str, &str)] = &[
    ("PORT", "server.port"),
    ("GATEWAY_WS_URL", "gateway.url"),
    ("GATEWAY_TOKEN", "gateway.token"),
    ("YOUTUBE_API_KEY", "search.youtube_api_key"),
];

fn legacy_env_key(name: &str) -> Option<&'static str> {
    LEGACY_ENV
        .iter()
        .find(|(var, _)| var.eq_ignore_ascii_case(name))
        .map(|(_, key)| *key)
}

/// Defaults → config.toml, without any environment layer.
fn file_figment(config_path: &Path) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Format, Serialized, Toml},
    };

    Figment::from(Serialized::defaults(FileConfig::default())).merge(Toml::file(config_path))
}

/// Build a figment that layers: defaults → config.toml → legacy env vars →
/// FAMILY_CHAT_* env vars.
///
/// A missing config.toml is not an error.
///
/// Env vars use double-underscore for nesting into sections:
///   `FAMILY_CHAT_SERVER__PORT=8080`  →  `server.port = 8080`
///   `FAMILY_CHAT_GATEWAY__RECONNECT_DELAY_SECS=2`  →  `gateway.reconnect_delay_secs = 2`
pub fn load_config(config_path: &Path) -> figment::Figment {
    use figment::providers::Env;

    let names: Vec<&str> = LEGACY_ENV.iter().map(|(var, _)| *var).collect();
    let legacy = Env::raw()
        .only(&names)
        .map(|name| legacy_env_key(name.as_str()).unwrap_or_default().into());

    file_figment(config_path)
        .merge(legacy)
        .merge(Env::prefixed("FAMILY_CHAT_").split("__"))
}
