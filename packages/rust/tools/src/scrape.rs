//! `scrape_webpage`: fetch a page and return its main content as Markdown.

use std::sync::LazyLock;

use async_trait::async_trait;
use longform_shared::{LongformError, Result, Tool, required_str};
use regex::Regex;
use reqwest::Client;
use scraper::{Html, Selector};
use serde_json::json;
use tracing::{debug, instrument};
use url::Url;

use crate::net;

pub struct ScrapeWebpageTool {
    client: Client,
    max_chars: usize,
    allow_private: bool,
}

impl ScrapeWebpageTool {
    pub fn new(client: Client, max_chars: usize) -> Self {
        Self {
            client,
            max_chars,
            allow_private: false,
        }
    }

    /// Allow fetching localhost/private IPs (for integration tests).
    #[cfg(test)]
    pub fn allow_private_hosts(mut self) -> Self {
        self.allow_private = true;
        self
    }

    #[instrument(skip(self), fields(url = %url))]
    pub async fn scrape(&self, url: &Url) -> Result<String> {
        if let Some(why) = net::refusal(url).filter(|_| !self.allow_private) {
            return Err(LongformError::Tool(format!(
                "refusing to fetch non-public URL {url}: {why}"
            )));
        }

        let html = net::fetch_text(&self.client, url).await?;
        let markdown = html_to_markdown(&html)?;
        debug!(chars = markdown.len(), "page converted");
        Ok(net::truncate(&markdown, self.max_chars))
    }
}

#[async_trait]
impl Tool for ScrapeWebpageTool {
    fn name(&self) -> &str {
        "scrape_webpage"
    }

    fn description(&self) -> &str {
        "Fetch a webpage and return its main content as Markdown"
    }

    fn parameters(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "url": {"type": "string", "description": "the URL of the webpage to scrape"}
            },
            "required": ["url"]
        })
    }

    async fn execute(&self, params: serde_json::Value) -> Result<String> {
        let raw = required_str(&params, "url")?;
        let url = Url::parse(raw)
            .map_err(|e| LongformError::Tool(format!("invalid url '{raw}': {e}")))?;
        self.scrape(&url).await
    }
}

/// Convert the main content of an HTML page to Markdown.
pub fn html_to_markdown(html: &str) -> Result<String> {
    static BLANK_RUNS: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\n{3,}").expect("valid regex"));

    let content = main_content_html(html);
    let converter = htmd::HtmlToMarkdown::builder()
        .skip_tags(vec![
            "script", "style", "nav", "header", "footer", "aside", "iframe", "noscript", "svg",
            "form",
        ])
        .build();

    let markdown = converter
        .convert(&content)
        .map_err(|e| LongformError::Tool(format!("html conversion failed: {e}")))?;

    Ok(BLANK_RUNS.replace_all(markdown.trim(), "\n\n").into_owned())
}

/// The first semantic content container, falling back to `<body>`.
fn main_content_html(html: &str) -> String {
    let doc = Html::parse_document(html);

    for css in ["article", "main", "[role=\"main\"]", "#content", ".content", "body"] {
        if let Ok(selector) = Selector::parse(css) {
            if let Some(el) = doc.select(&selector).next() {
                return el.inner_html();
            }
        }
    }

    html.to_string()
}
