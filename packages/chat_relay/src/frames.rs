//! Gateway wire protocol.
//!
//! The gateway speaks three frame kinds, tagged by `type`:
//! `req` (a request with an id), `res` (a response correlated by id) and
//! `event` (an unsolicited notification).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lowest gateway protocol version this relay speaks
pub const MIN_PROTOCOL: u32 = 1;
/// Highest gateway protocol version this relay speaks
pub const MAX_PROTOCOL: u32 = 2;

/// Payload tag of the response that marks the link ready
pub const HELLO_OK: &str = "hello-ok";

/// A frame on the gateway link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum GatewayFrame {
    Req {
        id: String,
        method: String,
        #[serde(default)]
        params: Value,
    },
    Res {
        #[serde(default)]
        id: String,
        ok: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
        /// Echo of the request method, present on some responses
        #[serde(default, skip_serializing_if = "Option::is_none")]
        method: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<Value>,
    },
    Event {
        event: String,
        #[serde(default)]
        payload: Value,
    },
}

impl GatewayFrame {
    pub fn request(id: impl Into<String>, method: impl Into<String>, params: Value) -> Self {
        GatewayFrame::Req {
            id: id.into(),
            method: method.into(),
            params,
        }
    }

    /// Whether this is the handshake acknowledgement.
    pub fn is_hello_ok(&self) -> bool {
        match self {
            GatewayFrame::Res {
                ok: true,
                payload: Some(payload),
                ..
            } => payload.get("type").and_then(Value::as_str) == Some(HELLO_OK),
            _ => false,
        }
    }
}

/// A decoded inbound frame together with the exact JSON the gateway sent.
///
/// Clients receive `raw` untouched; `frame` is only used for routing and
/// rendering.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundFrame {
    pub raw: Value,
    pub frame: GatewayFrame,
}

impl InboundFrame {
    pub fn from_value(raw: Value) -> Result<Self, serde_json::Error> {
        let frame = GatewayFrame::deserialize(&raw)?;
        Ok(Self { raw, frame })
    }
}

/// What the gateway link does with an inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Handshake accepted; the link becomes ready
    HelloOk,
    /// Relay to every connected client
    Forward,
    /// Not interesting to clients
    Drop,
}

pub fn classify(frame: &GatewayFrame) -> Disposition {
    if frame.is_hello_ok() {
        return Disposition::HelloOk;
    }
    match frame {
        GatewayFrame::Event { .. } => Disposition::Forward,
        GatewayFrame::Res {
            method: Some(_), ..
        } => Disposition::Forward,
        _ => Disposition::Drop,
    }
}

/// How the relay introduces itself in the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    pub id: String,
    pub display_name: String,
    pub version: String,
    pub platform: String,
    pub mode: String,
    pub locale: String,
    pub caps: Vec<String>,
}

impl Default for ClientIdentity {
    fn default() -> Self {
        Self {
            id: "family-chat".to_string(),
            display_name: "Family Chat".to_string(),
            version: "1.0.0".to_string(),
            platform: "web".to_string(),
            mode: "observer".to_string(),
            locale: "en".to_string(),
            caps: vec![
                "presence".to_string(),
                "health".to_string(),
                "sessions".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct ConnectParams<'a> {
    min_protocol: u32,
    max_protocol: u32,
    client: ClientInfo<'a>,
    caps: &'a [String],
    locale: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    auth: Option<AuthParams<'a>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct ClientInfo<'a> {
    id: &'a str,
    display_name: &'a str,
    version: &'a str,
    platform: &'a str,
    mode: &'a str,
    instance_id: String,
}

#[derive(Debug, Clone, Serialize)]
struct AuthParams<'a> {
    token: &'a str,
}

/// Build the `connect` handshake request.
///
/// `auth` is only included for a non-empty token.
pub fn connect_request(
    identity: &ClientIdentity,
    token: Option<&str>,
    now_millis: i64,
) -> Result<GatewayFrame, serde_json::Error> {
    let params = ConnectParams {
        min_protocol: MIN_PROTOCOL,
        max_protocol: MAX_PROTOCOL,
        client: ClientInfo {
            id: &identity.id,
            display_name: &identity.display_name,
            version: &identity.version,
            platform: &identity.platform,
            mode: &identity.mode,
            instance_id: format!("{}-{}", identity.id, now_millis),
        },
        caps: &identity.caps,
        locale: &identity.locale,
        auth: token
            .filter(|t| !t.is_empty())
            .map(|token| AuthParams { token }),
    };
    Ok(GatewayFrame::request(
        format!("connect-{now_millis}"),
        "connect",
        serde_json::to_value(params)?,
    ))
}
