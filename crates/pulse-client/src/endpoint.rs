//! Streaming and restart address derivation.
//!
//! The backend is configured with one HTTP base address (which may carry an
//! API path such as `/api/v1`). The progress stream lives at the root of the
//! same host, under a WebSocket scheme:
//!
//! | HTTP base                        | Stream base             |
//! |----------------------------------|-------------------------|
//! | `http://localhost:8000`          | `ws://localhost:8000`   |
//! | `https://example.com/api/v1`     | `wss://example.com`     |
//! | `https://example.com:8443/`      | `wss://example.com:8443`|

use std::fmt::Write as _;
use std::sync::LazyLock;

use pulse_core::DocumentId;
use pulse_core::constants::ANALYSIS_STREAM_PATH;
use regex::Regex;
use reqwest::Url;

static API_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(/api.*$|/+$)").expect("valid regex"));

/// Builds the per-document streaming URL and the restart URL.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EndpointResolver {
    http_base: String,
    stream_base: String,
}

impl EndpointResolver {
    /// Resolve from the configured HTTP base address.
    pub fn new(http_base: impl Into<String>) -> Self {
        let http_base = http_base.into().trim().to_owned();
        let stream_base = derive_stream_base(&http_base);
        Self {
            http_base,
            stream_base,
        }
    }

    /// The configured HTTP base address.
    pub fn http_base(&self) -> &str {
        &self.http_base
    }

    /// The derived WebSocket base address.
    pub fn stream_base(&self) -> &str {
        &self.stream_base
    }

    /// `{stream_base}/ws/analysis/{id}`.
    pub fn analysis_url(&self, id: &DocumentId) -> String {
        append_segments(&self.stream_base, &["ws", "analysis", id.as_str()]).unwrap_or_else(
            || {
                format!(
                    "{}{ANALYSIS_STREAM_PATH}/{id}",
                    self.stream_base.trim_end_matches('/')
                )
            },
        )
    }

    /// `{http_base}/api/documents/{id}/reanalyze`.
    pub fn restart_url(&self, id: &DocumentId) -> String {
        let mut url = self.http_base.trim_end_matches('/').to_owned();
        let _ = write!(url, "/api/documents/{id}/reanalyze");
        url
    }
}

/// Derive the WebSocket base address from an HTTP base address.
///
/// Structured parsing keeps `scheme://host[:port]`. When the address does
/// not parse (or has no host), a trailing `/api...` suffix or trailing
/// slashes are stripped instead. The scheme is then swapped `http:` → `ws:`
/// and `https:` → `wss:`.
pub fn derive_stream_base(http_base: &str) -> String {
    let origin = origin_of(http_base)
        .unwrap_or_else(|| API_SUFFIX.replace(http_base, "").into_owned());
    to_ws_scheme(&origin)
}

fn origin_of(base: &str) -> Option<String> {
    let url = Url::parse(base).ok()?;
    let host = url.host_str()?;
    let mut origin = format!("{}://{host}", url.scheme());
    if let Some(port) = url.port() {
        let _ = write!(origin, ":{port}");
    }
    Some(origin)
}

fn to_ws_scheme(base: &str) -> String {
    if let Some(rest) = base.strip_prefix("http:") {
        format!("ws:{rest}")
    } else if let Some(rest) = base.strip_prefix("https:") {
        format!("wss:{rest}")
    } else {
        base.to_owned()
    }
}

/// Append percent-encoded path segments, or `None` if `base` is not a
/// hierarchical URL.
fn append_segments(base: &str, segments: &[&str]) -> Option<String> {
    let mut url = Url::parse(base).ok()?;
    let _ = url
        .path_segments_mut()
        .ok()?
        .pop_if_empty()
        .extend(segments);
    Some(url.into())
}
