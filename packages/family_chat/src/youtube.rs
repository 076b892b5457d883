//! YouTube Data API v3 search backend.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chat_relay::{MusicSearch, SearchResult, StubSearch};
use futures::future::{BoxFuture, FutureExt};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::SearchFileConfig;

pub const DEFAULT_ENDPOINT: &str = "https://www.googleapis.com/youtube/v3/search";

pub struct YouTubeSearch {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    max_results: u32,
}

impl YouTubeSearch {
    pub fn new(
        api_key: impl Into<String>,
        endpoint: impl Into<String>,
        max_results: u32,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            max_results,
        })
    }

    async fn fetch(&self, query: &str) -> reqwest::Result<Vec<SearchResult>> {
        let max_results = self.max_results.to_string();
        let response: SearchResponse = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("part", "snippet"),
                ("q", query),
                ("type", "video"),
                ("maxResults", max_results.as_str()),
                ("key", self.api_key.as_str()),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(into_results(response))
    }
}

impl MusicSearch for YouTubeSearch {
    fn search<'a>(&'a self, query: &'a str) -> BoxFuture<'a, Vec<SearchResult>> {
        async move {
            match self.fetch(query).await {
                Ok(results) => {
                    debug!(query, count = results.len(), "YouTube search finished");
                    results
                }
                Err(e) => {
                    warn!(query, "YouTube search failed: {}", e);
                    Vec::new()
                }
            }
        }
        .boxed()
    }
}

/// Pick the search backend for the configuration: YouTube with a key, the
/// stub without one.
pub fn search_backend(config: &SearchFileConfig) -> Result<Arc<dyn MusicSearch>> {
    match config.api_key() {
        Some(key) => {
            info!("Music search: YouTube Data API");
            Ok(Arc::new(YouTubeSearch::new(
                key,
                config.endpoint.clone(),
                config.max_results,
                Duration::from_secs(config.timeout_secs),
            )?))
        }
        None => {
            info!("Music search: no API key configured, using placeholder results");
            Ok(Arc::new(StubSearch))
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Default, Deserialize)]
struct SearchItem {
    #[serde(default)]
    id: ItemId,
    #[serde(default)]
    snippet: Snippet,
}

#[derive(Debug, Default, Deserialize)]
struct ItemId {
    #[serde(rename = "videoId")]
    video_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Snippet {
    #[serde(default)]
    title: String,
    #[serde(rename = "channelTitle")]
    channel_title: Option<String>,
    #[serde(default)]
    thumbnails: Thumbnails,
}

#[derive(Debug, Default, Deserialize)]
struct Thumbnails {
    default: Option<Thumbnail>,
}

#[derive(Debug, Deserialize)]
struct Thumbnail {
    url: String,
}

/// Items without a video id (channels, playlists) are skipped.
fn into_results(response: SearchResponse) -> Vec<SearchResult> {
    response
        .items
        .into_iter()
        .filter_map(|item| {
            let video_id = item.id.video_id?;
            Some(SearchResult {
                title: item.snippet.title,
                video_id,
                thumbnail: item.snippet.thumbnails.default.map(|t| t.url),
                channel: item.snippet.channel_title,
            })
        })
        .collect()
}
