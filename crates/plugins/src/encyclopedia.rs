//! Encyclopedia plugin — offline lookup of short reference articles.
//!
//! Ships with a small built-in article set (US presidents by ordinal, a few
//! programming and science topics). Callers can add their own articles.
//! Lookups are case-insensitive and match a title or any alias; ordinal
//! phrasings like "3rd president" or "third president of the united states"
//! resolve through aliases.

use async_trait::async_trait;
use botloom_core::plugin::{Plugin, PluginFailure};
use std::collections::HashMap;

/// One reference article.
#[derive(Debug, Clone)]
pub struct Article {
    pub title: String,
    pub summary: String,
    pub aliases: Vec<String>,
}

impl Article {
    pub fn new(title: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            summary: summary.into(),
            aliases: Vec::new(),
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }
}

pub struct EncyclopediaPlugin {
    articles: Vec<Article>,
    /// normalized title or alias -> index into `articles`
    index: HashMap<String, usize>,
}

const PRESIDENTS: &[(&str, &str, &str)] = &[
    ("George Washington", "first", "1789 to 1797"),
    ("John Adams", "second", "1797 to 1801"),
    ("Thomas Jefferson", "third", "1801 to 1809"),
    ("James Madison", "fourth", "1809 to 1817"),
    ("James Monroe", "fifth", "1817 to 1825"),
    ("John Quincy Adams", "sixth", "1825 to 1829"),
    ("Andrew Jackson", "seventh", "1829 to 1837"),
];

impl EncyclopediaPlugin {
    /// An encyclopedia with the built-in article set.
    pub fn new() -> Self {
        let mut plugin = Self::empty();
        for (i, (name, ordinal, term)) in PRESIDENTS.iter().enumerate() {
            let n = i + 1;
            let article = Article::new(
                *name,
                format!("{name} was the {ordinal} President of the United States, serving from {term}."),
            )
            .with_alias(format!("{ordinal} president"))
            .with_alias(format!("{ordinal} president of the united states"))
            .with_alias(format!("{}{} president", n, ordinal_suffix(n)))
            .with_alias(format!("{}{} president of the united states", n, ordinal_suffix(n)))
            .with_alias(format!("{}{} us president", n, ordinal_suffix(n)));
            plugin = plugin.with_article(article);
        }

        plugin
            .with_article(
                Article::new(
                    "Rust (programming language)",
                    "Rust is a systems programming language focused on memory safety without \
                     garbage collection, achieved through ownership and borrowing.",
                )
                .with_alias("rust")
                .with_alias("rust language"),
            )
            .with_article(
                Article::new(
                    "Speed of light",
                    "The speed of light in vacuum is exactly 299,792,458 metres per second.",
                )
                .with_alias("light speed"),
            )
            .with_article(
                Article::new(
                    "Water",
                    "Water (H2O) boils at 100 degrees Celsius at sea level and freezes at 0 degrees Celsius.",
                )
                .with_alias("h2o"),
            )
    }

    /// An encyclopedia with no articles.
    pub fn empty() -> Self {
        Self {
            articles: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Add an article. A later article with the same title or alias wins the lookup.
    pub fn with_article(mut self, article: Article) -> Self {
        let pos = self.articles.len();
        self.index.insert(normalize(&article.title), pos);
        for alias in &article.aliases {
            self.index.insert(normalize(alias), pos);
        }
        self.articles.push(article);
        self
    }

    /// Find the article for a topic.
    pub fn lookup(&self, topic: &str) -> Option<&Article> {
        let key = normalize(topic);
        if let Some(&pos) = self.index.get(&key) {
            return self.articles.get(pos);
        }
        // "who was the 3rd president" -> try dropping leading filler words
        let words: Vec<&str> = key.split(' ').collect();
        (1..words.len())
            .map(|skip| words[skip..].join(" "))
            .find_map(|suffix| self.index.get(&suffix))
            .and_then(|&pos| self.articles.get(pos))
    }
}

impl Default for EncyclopediaPlugin {
    fn default() -> Self {
        Self::new()
    }
}

fn ordinal_suffix(n: usize) -> &'static str {
    match (n % 10, n % 100) {
        (_, 11..=13) => "th",
        (1, _) => "st",
        (2, _) => "nd",
        (3, _) => "rd",
        _ => "th",
    }
}

/// Lowercase, strip punctuation, collapse whitespace, drop a leading "the".
fn normalize(text: &str) -> String {
    let cleaned: String = text
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    let words: Vec<&str> = cleaned.split_whitespace().collect();
    let words = match words.first() {
        Some(&"the") => &words[1..],
        _ => &words[..],
    };
    words.join(" ")
}

#[async_trait]
impl Plugin for EncyclopediaPlugin {
    fn name(&self) -> &str {
        "encyclopedia"
    }

    fn usage(&self) -> &str {
        "Look up a short encyclopedia article about a person, place, or concept. \
         Use for factual questions such as who held an office."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "topic": {
                    "type": "string",
                    "description": "What to look up, e.g. 'third president of the united states'"
                }
            },
            "required": ["topic"],
            "additionalProperties": false
        })
    }

    async fn invoke(&self, arguments: serde_json::Value) -> Result<String, PluginFailure> {
        let topic = arguments["topic"]
            .as_str()
            .ok_or("missing 'topic' argument")?;

        match self.lookup(topic) {
            Some(article) => Ok(format!("{}: {}", article.title, article.summary)),
            None => Err(format!("no article found for '{topic}'").into()),
        }
    }
}
