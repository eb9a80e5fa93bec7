//! Tools over the per-run knowledge base: `add_to_knowledge_base` and
//! `search_knowledge_base`.

use std::fmt::Write as _;
use std::sync::Arc;

use async_trait::async_trait;
use longform_knowledge::KnowledgeBase;
use longform_shared::{ResearchDocument, Result, Tool, required_str};
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use tracing::debug;

/// Results returned by `search_knowledge_base`.
pub const SEARCH_LIMIT: usize = 15;

/// Stable document id: the same title and URL always map to the same entry.
pub fn document_id(title: &str, url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(title.as_bytes());
    hasher.update(b"\n");
    hasher.update(url.as_bytes());
    format!("{:x}", hasher.finalize())
}

pub struct AddToKnowledgeBaseTool {
    kb: Arc<KnowledgeBase>,
}

impl AddToKnowledgeBaseTool {
    pub fn new(kb: Arc<KnowledgeBase>) -> Self {
        Self { kb }
    }
}

#[async_trait]
impl Tool for AddToKnowledgeBaseTool {
    fn name(&self) -> &str {
        "add_to_knowledge_base"
    }

    fn description(&self) -> &str {
        "Store a research finding so writers can cite it later"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "title": {"type": "string", "description": "title of the source"},
                "content": {"type": "string", "description": "the relevant content, summarized or quoted"},
                "source_type": {"type": "string", "description": "web, article, academic, news, ..."},
                "url": {"type": "string", "description": "where the content came from"},
                "keywords": {"type": "string", "description": "comma-separated keywords"},
                "relevance": {"type": "number", "description": "relevance to the subject, 0 to 1"}
            },
            "required": ["title", "content", "source_type", "url"]
        })
    }

    async fn execute(&self, params: Value) -> Result<String> {
        let title = required_str(&params, "title")?.trim().to_string();
        let content = required_str(&params, "content")?.to_string();
        let source_type = required_str(&params, "source_type")?.trim().to_lowercase();
        let url = required_str(&params, "url")?.trim().to_string();
        let keywords = params
            .get("keywords")
            .and_then(Value::as_str)
            .map(|k| {
                k.split(',')
                    .map(str::trim)
                    .filter(|k| !k.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        let relevance = params
            .get("relevance")
            .and_then(Value::as_f64)
            .unwrap_or(0.5);

        let doc = ResearchDocument {
            id: document_id(&title, &url),
            url,
            title,
            content,
            summary: None,
            keywords,
            source_type,
            relevance,
        };
        debug!(id = %doc.id, title = %doc.title, "storing research");
        let reply = format!("Added '{}' to the knowledge base.", doc.title);
        self.kb.add_document(doc).await?;
        Ok(reply)
    }
}

pub struct SearchKnowledgeBaseTool {
    kb: Arc<KnowledgeBase>,
}

impl SearchKnowledgeBaseTool {
    pub fn new(kb: Arc<KnowledgeBase>) -> Self {
        Self { kb }
    }
}

#[async_trait]
impl Tool for SearchKnowledgeBaseTool {
    fn name(&self) -> &str {
        "search_knowledge_base"
    }

    fn description(&self) -> &str {
        "Search collected research for information relevant to a query"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {"type": "string", "description": "what to look for"}
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, params: Value) -> Result<String> {
        let query = required_str(&params, "query")?;
        let hits = self.kb.search(query, SEARCH_LIMIT).await?;
        Ok(format_search_results(&hits))
    }
}

pub fn format_search_results(docs: &[ResearchDocument]) -> String {
    if docs.is_empty() {
        return "No research data found for the specified query.".into();
    }

    let mut out = String::from("# Research Results\n\n");
    for (i, doc) in docs.iter().enumerate() {
        let _ = writeln!(out, "## {}. {}\n", i + 1, doc.title);
        let _ = writeln!(out, "**Source:** {}", doc.url);
        let _ = writeln!(out, "**Type:** {}", doc.source_type);
        let _ = writeln!(out, "**Relevance:** {:.2}\n", doc.relevance);
        let _ = writeln!(out, "**Content:**\n{}\n", doc.content);
        if !doc.keywords.is_empty() {
            let _ = writeln!(out, "**Keywords:** {}\n", doc.keywords.join(", "));
        }
        out.push_str("---\n\n");
    }
    out
}
