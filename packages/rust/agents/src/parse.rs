//! Pull JSON values out of free-form model output.

use std::sync::LazyLock;

use longform_shared::{LongformError, Result, Source};
use regex::Regex;
use serde::de::DeserializeOwned;

static FENCED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```(?:json|JSON)?\s*\n(.*?)```").expect("valid regex"));

static MARKDOWN_LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^\]]+)\]\((https?://[^)\s]+)\)").expect("valid regex"));

/// Deserialize `T` from model output.
///
/// Tried in order: the whole text, each fenced code block, and the span
/// from the first `{` to the last `}`.
pub fn extract_json<T: DeserializeOwned>(text: &str) -> Result<T> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Ok(value);
    }

    for block in FENCED.captures_iter(trimmed) {
        if let Ok(value) = serde_json::from_str(block[1].trim()) {
            return Ok(value);
        }
    }

    let mut last_error = None;
    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            match serde_json::from_str(&trimmed[start..=end]) {
                Ok(value) => return Ok(value),
                Err(e) => last_error = Some(e.to_string()),
            }
        }
    }

    Err(LongformError::parse(match last_error {
        Some(e) => format!("model output is not valid JSON: {e}"),
        None => "model output contains no JSON object".to_string(),
    }))
}

/// Markdown links to web pages, deduplicated by URL, in order of appearance.
pub fn markdown_links(text: &str) -> Vec<Source> {
    let mut sources: Vec<Source> = Vec::new();
    for cap in MARKDOWN_LINK.captures_iter(text) {
        let url = cap[2].to_string();
        if sources.iter().any(|s| s.url == url) {
            continue;
        }
        sources.push(Source {
            title: cap[1].trim().to_string(),
            url,
            source_type: "web".into(),
            ..Default::default()
        });
    }
    sources
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Answer {
        content: String,
    }

    #[test]
    fn plain_fenced_and_embedded() {
        let plain: Answer = extract_json(r#"{"content":"a"}"#).unwrap();
        assert_eq!(plain.content, "a");

        let fenced: Answer =
            extract_json("Here you go:\n```json\n{\"content\":\"b\"}\n```\nDone.").unwrap();
        assert_eq!(fenced.content, "b");

        let embedded: Answer = extract_json("Sure! {\"content\":\"c\"} hope it helps").unwrap();
        assert_eq!(embedded.content, "c");
    }

    #[test]
    fn no_json_is_a_parse_error() {
        let err = extract_json::<Answer>("just prose").unwrap_err();
        assert!(matches!(err, LongformError::Parse { .. }));
        let err = extract_json::<Answer>("{ broken").unwrap_err();
        assert!(err.to_string().contains("no JSON object"));
    }

    #[test]
    fn links_are_collected_once() {
        let text = "See [Tokio](https://tokio.rs) and [tokio again](https://tokio.rs), \
                    plus [docs](https://docs.rs/tokio) but not [local](./file.md).";
        let links = markdown_links(text);
        assert_eq!(links.len(), 2);
        assert_eq!(links[0].title, "Tokio");
        assert_eq!(links[1].url, "https://docs.rs/tokio");
    }
}
