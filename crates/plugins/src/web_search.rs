//! Web search plugin — ranked search over a fixed document set.
//!
//! There is no live search backend; the plugin scores a small built-in set
//! of pages (plus any added with [`WebSearchPlugin::with_page`]) by query
//! term overlap. Results are deterministic, which keeps bot scenarios
//! reproducible offline.

use async_trait::async_trait;
use botloom_core::plugin::{Plugin, PluginFailure};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

pub struct WebSearchPlugin {
    pages: Vec<SearchHit>,
}

impl WebSearchPlugin {
    pub fn new() -> Self {
        Self::empty()
            .with_page(
                "The Rust Programming Language",
                "https://doc.rust-lang.org/book/",
                "An introductory book about Rust covering ownership, borrowing, traits and async.",
            )
            .with_page(
                "Tokio - An asynchronous Rust runtime",
                "https://tokio.rs/",
                "Tokio is an event-driven, non-blocking I/O platform for writing asynchronous applications with Rust.",
            )
            .with_page(
                "Thomas Jefferson - The White House",
                "https://www.whitehouse.gov/about-the-white-house/presidents/thomas-jefferson/",
                "Thomas Jefferson, the third president of the United States, authored the Declaration of Independence.",
            )
            .with_page(
                "National Weather Service",
                "https://weather.gov/",
                "Current weather conditions and forecasts for locations across the United States.",
            )
    }

    pub fn empty() -> Self {
        Self { pages: Vec::new() }
    }

    pub fn with_page(
        mut self,
        title: impl Into<String>,
        url: impl Into<String>,
        snippet: impl Into<String>,
    ) -> Self {
        self.pages.push(SearchHit {
            title: title.into(),
            url: url.into(),
            snippet: snippet.into(),
        });
        self
    }

    /// Pages sharing at least one query term, best first. Ties keep insertion order.
    pub fn search(&self, query: &str, limit: usize) -> Vec<SearchHit> {
        let terms = terms(query);
        let mut scored: Vec<(usize, usize)> = self
            .pages
            .iter()
            .enumerate()
            .filter_map(|(i, page)| {
                let haystack = terms_of_page(page);
                let score = terms.iter().filter(|t| haystack.contains(t)).count();
                (score > 0).then_some((score, i))
            })
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
        scored
            .into_iter()
            .take(limit)
            .map(|(_, i)| self.pages[i].clone())
            .collect()
    }
}

impl Default for WebSearchPlugin {
    fn default() -> Self {
        Self::new()
    }
}

const STOP_WORDS: &[&str] = &["a", "an", "the", "of", "for", "and", "is", "to", "in", "what", "who"];

fn terms(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty() && !STOP_WORDS.contains(w))
        .map(str::to_string)
        .collect()
}

fn terms_of_page(page: &SearchHit) -> Vec<String> {
    let mut all = terms(&page.title);
    all.extend(terms(&page.snippet));
    all
}

#[async_trait]
impl Plugin for WebSearchPlugin {
    fn name(&self) -> &str {
        "web_search"
    }

    fn usage(&self) -> &str {
        "Search the web. Returns matching pages with titles, URLs, and snippets."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The search query"
                },
                "num_results": {
                    "type": "integer",
                    "description": "Number of results to return (default 3, max 5)"
                }
            },
            "required": ["query"],
            "additionalProperties": false
        })
    }

    async fn invoke(&self, arguments: serde_json::Value) -> Result<String, PluginFailure> {
        let query = arguments["query"]
            .as_str()
            .ok_or("missing 'query' argument")?;
        let limit = arguments["num_results"].as_u64().unwrap_or(3).clamp(1, 5) as usize;

        let hits = self.search(query, limit);
        if hits.is_empty() {
            return Ok(format!("No results for '{query}'."));
        }
        Ok(serde_json::to_string(&hits)?)
    }
}
