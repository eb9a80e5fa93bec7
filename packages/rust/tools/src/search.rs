//! `web_search`: DuckDuckGo HTML results, parsed with `scraper`.

use std::fmt::Write as _;

use async_trait::async_trait;
use longform_shared::{LongformError, Result, Tool, required_str};
use reqwest::Client;
use scraper::{Html, Selector};
use serde_json::json;
use tracing::{debug, instrument};
use url::Url;

use crate::net;

const DUCKDUCKGO_HTML: &str = "https://duckduckgo.com/html/";

/// One organic search hit.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub description: String,
}

pub struct WebSearchTool {
    client: Client,
    endpoint: Url,
    max_results: usize,
}

impl WebSearchTool {
    pub fn new(client: Client, max_results: usize) -> Result<Self> {
        let endpoint = Url::parse(DUCKDUCKGO_HTML)
            .map_err(|e| LongformError::config(format!("invalid search endpoint: {e}")))?;
        Ok(Self {
            client,
            endpoint,
            max_results,
        })
    }

    /// Query a different results page (used against mock servers).
    pub fn with_endpoint(mut self, endpoint: Url) -> Self {
        self.endpoint = endpoint;
        self
    }

    #[instrument(skip(self))]
    pub async fn search(&self, query: &str) -> Result<Vec<SearchResult>> {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut().clear().append_pair("q", query);

        let body = net::fetch_text(&self.client, &url).await?;
        let mut results = parse_results(&body, &self.endpoint)?;
        results.truncate(self.max_results);
        debug!(count = results.len(), "search results parsed");
        Ok(results)
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web about a topic and return titles, URLs and snippets"
    }

    fn parameters(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "query": {"type": "string", "description": "the topic or terms to search for"}
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, params: serde_json::Value) -> Result<String> {
        let query = required_str(&params, "query")?;
        let results = self.search(query).await?;
        Ok(format_results(&results))
    }
}

/// Extract results from a DuckDuckGo HTML page. Result links are redirect
/// URLs whose `uddg` parameter holds the target.
pub fn parse_results(html: &str, base: &Url) -> Result<Vec<SearchResult>> {
    let doc = Html::parse_document(html);

    let captcha = selector("#challenge-form")?;
    if doc.select(&captcha).next().is_some() {
        return Err(LongformError::Tool(
            "search engine answered with a captcha".into(),
        ));
    }

    let result_sel = selector(".result")?;
    let title_sel = selector(".result__title")?;
    let link_sel = selector(".result__a")?;
    let snippet_sel = selector(".result__snippet")?;

    let mut results = Vec::new();
    for el in doc.select(&result_sel) {
        let title = text_of(el.select(&title_sel).next());
        let snippet = text_of(el.select(&snippet_sel).next());
        let href = el
            .select(&link_sel)
            .next()
            .and_then(|a| a.value().attr("href"));

        let (Some(title), Some(description), Some(href)) = (title, snippet, href) else {
            continue;
        };
        let Some(url) = resolve_link(base, href) else {
            continue;
        };

        results.push(SearchResult {
            title,
            url,
            description,
        });
    }

    Ok(results)
}

fn resolve_link(base: &Url, href: &str) -> Option<String> {
    let link = base.join(href).ok()?;
    match link.query_pairs().find(|(k, _)| k == "uddg") {
        Some((_, target)) => Some(target.into_owned()),
        None => Some(link.to_string()),
    }
}

fn text_of(el: Option<scraper::ElementRef<'_>>) -> Option<String> {
    let text = el?.text().collect::<String>();
    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
    (!text.is_empty()).then_some(text)
}

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| LongformError::Tool(format!("bad selector {css}: {e}")))
}

pub fn format_results(results: &[SearchResult]) -> String {
    if results.is_empty() {
        return "No search results found.".into();
    }

    let mut out = String::from("# Search results\n\n");
    for (i, r) in results.iter().enumerate() {
        let _ = write!(
            out,
            "## {}. {}\n\n**URL**: {}\n**Description**:\n{}\n\n",
            i + 1,
            r.title,
            r.url,
            r.description
        );
    }
    out
}
