//! Page fetch plugin — downloads a URL and returns its readable text.
//!
//! HTML is reduced to text (scripts, styles and tags removed, entities for
//! the common characters decoded, whitespace collapsed) and truncated to a
//! character budget so one page cannot swamp the prompt.

use async_trait::async_trait;
use botloom_core::plugin::{Plugin, PluginFailure};
use std::time::Duration;
use tracing::debug;

pub struct PageFetchPlugin {
    client: reqwest::Client,
    max_chars: usize,
}

impl PageFetchPlugin {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(20))
            .user_agent(concat!("botloom/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();
        Self {
            client,
            max_chars: 4000,
        }
    }

    /// Character budget for the returned text.
    pub fn with_max_chars(mut self, max_chars: usize) -> Self {
        self.max_chars = max_chars;
        self
    }
}

impl Default for PageFetchPlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Plugin for PageFetchPlugin {
    fn name(&self) -> &str {
        "page_fetch"
    }

    fn usage(&self) -> &str {
        "Fetch a web page over HTTP(S) and return its text content."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "url": {
                    "type": "string",
                    "description": "Absolute http:// or https:// URL"
                }
            },
            "required": ["url"],
            "additionalProperties": false
        })
    }

    async fn invoke(&self, arguments: serde_json::Value) -> Result<String, PluginFailure> {
        let url = arguments["url"].as_str().ok_or("missing 'url' argument")?;
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err("url must start with http:// or https://".into());
        }

        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(format!("GET {url} returned {status}").into());
        }

        let is_html = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.contains("html"));
        let body = response.text().await?;
        debug!(url, bytes = body.len(), is_html, "Fetched page");

        let text = if is_html { html_to_text(&body) } else { collapse_whitespace(&body) };
        Ok(truncate_chars(&text, self.max_chars))
    }
}

/// Strip markup from an HTML document.
pub fn html_to_text(html: &str) -> String {
    let mut out = String::with_capacity(html.len() / 2);
    let lower = html.to_ascii_lowercase();
    let mut i = 0;

    while i < html.len() {
        let rest = &lower[i..];
        if rest.starts_with("<script") || rest.starts_with("<style") {
            let close = if rest.starts_with("<script") { "</script>" } else { "</style>" };
            i = match rest.find(close) {
                Some(end) => i + end + close.len(),
                None => html.len(),
            };
            out.push(' ');
        } else if rest.starts_with('<') {
            i = match rest.find('>') {
                Some(end) => i + end + 1,
                None => html.len(),
            };
            out.push(' ');
        } else {
            let next = rest.find('<').map_or(html.len(), |p| i + p);
            out.push_str(&html[i..next]);
            i = next;
        }
    }

    let decoded = out
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");
    collapse_whitespace(&decoded)
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}…", &text[..cut]),
        None => text.to_string(),
    }
}
