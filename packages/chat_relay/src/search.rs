//! Music search collaborator.

use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};

/// Video returned for every query when no search backend is configured
pub const STUB_VIDEO_ID: &str = "dQw4w9WgXcQ";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub title: String,
    pub video_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
}

/// Something that can turn a query into search results.
///
/// Implementations never fail: backend errors are logged and reported as an
/// empty result list.
pub trait MusicSearch: Send + Sync {
    fn search<'a>(&'a self, query: &'a str) -> BoxFuture<'a, Vec<SearchResult>>;
}

/// Deterministic search used when no API key is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct StubSearch;

impl MusicSearch for StubSearch {
    fn search<'a>(&'a self, query: &'a str) -> BoxFuture<'a, Vec<SearchResult>> {
        let result = SearchResult {
            title: format!("{query} - YouTube Search"),
            video_id: STUB_VIDEO_ID.to_string(),
            thumbnail: None,
            channel: None,
        };
        async move { vec![result] }.boxed()
    }
}
