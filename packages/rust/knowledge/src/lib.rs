//! In-memory research knowledge base for a single generation run.
//!
//! [`KnowledgeBase`] pairs a libSQL FTS5 index with an ID-keyed map of the
//! full documents. Both live behind one `RwLock`: writers hold it
//! exclusively, readers share it. The map is only updated after the index
//! write commits, so the two never disagree about which IDs exist.

mod schema;

use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;

use libsql::{Connection, Database, params};
use longform_shared::{LongformError, ResearchDocument, Result};
use regex::Regex;
use serde::Serialize;
use tokio::sync::RwLock;

/// Cap on results from [`KnowledgeBase::find_by_keywords`].
pub const KEYWORD_RESULT_LIMIT: usize = 50;

/// Cap on results from [`KnowledgeBase::find_by_source_type`].
pub const SOURCE_TYPE_RESULT_LIMIT: usize = 100;

static TERM: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\w+").expect("valid regex"));

/// Document counts for a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KnowledgeStats {
    pub subject: String,
    pub total_documents: usize,
    pub by_source_type: BTreeMap<String, usize>,
}

struct Index {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
}

struct State {
    index: Option<Index>,
    documents: HashMap<String, ResearchDocument>,
}

impl State {
    fn conn(&self) -> Result<&Connection> {
        self.index
            .as_ref()
            .map(|i| &i.conn)
            .ok_or_else(|| LongformError::Index("knowledge base is closed".into()))
    }
}

/// Shared, queryable store of research findings.
pub struct KnowledgeBase {
    subject: String,
    state: RwLock<State>,
}

impl KnowledgeBase {
    /// Create an empty knowledge base backed by an in-memory index.
    pub async fn open(subject: impl Into<String>) -> Result<Self> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| LongformError::Index(e.to_string()))?;
        let conn = db
            .connect()
            .map_err(|e| LongformError::Index(e.to_string()))?;
        conn.execute_batch(schema::CREATE_INDEX)
            .await
            .map_err(|e| LongformError::Index(format!("failed to create index: {e}")))?;

        let subject = subject.into();
        tracing::debug!(%subject, "opened knowledge base");

        Ok(Self {
            subject,
            state: RwLock::new(State {
                index: Some(Index { db, conn }),
                documents: HashMap::new(),
            }),
        })
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Index a document and store it. Re-adding an existing ID replaces it.
    pub async fn add_document(&self, doc: ResearchDocument) -> Result<()> {
        if doc.id.trim().is_empty() {
            return Err(LongformError::validation("research document must have an id"));
        }

        let mut state = self.state.write().await;
        let conn = state.conn()?;

        let tx = conn
            .transaction()
            .await
            .map_err(|e| LongformError::Index(e.to_string()))?;
        tx.execute(schema::DELETE_DOCUMENT, params![doc.id.as_str()])
            .await
            .map_err(|e| LongformError::Index(format!("failed to index {}: {e}", doc.id)))?;
        tx.execute(
            schema::INSERT_DOCUMENT,
            params![
                doc.id.as_str(),
                doc.source_type.as_str(),
                doc.title.as_str(),
                doc.content.as_str(),
                doc.summary.clone().unwrap_or_default(),
                doc.keywords.join(", "),
            ],
        )
        .await
        .map_err(|e| LongformError::Index(format!("failed to index {}: {e}", doc.id)))?;
        tx.commit()
            .await
            .map_err(|e| LongformError::Index(format!("failed to index {}: {e}", doc.id)))?;

        tracing::debug!(id = %doc.id, title = %doc.title, "indexed research document");
        state.documents.insert(doc.id.clone(), doc);
        Ok(())
    }

    /// Free-text search over title, content, summary and keywords.
    ///
    /// Terms are OR-combined and results ordered by descending relevance.
    /// Relevance scores are only comparable within one query.
    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<ResearchDocument>> {
        let state = self.state.read().await;
        let conn = state.conn()?;

        let Some(expr) = or_query(TERM.find_iter(query).map(|m| m.as_str())) else {
            return Ok(Vec::new());
        };
        if limit == 0 || state.documents.is_empty() {
            return Ok(Vec::new());
        }

        ranked(conn, &state.documents, &expr, limit).await
    }

    /// Documents whose keyword field matches any of `keywords`.
    pub async fn find_by_keywords(&self, keywords: &[String]) -> Result<Vec<ResearchDocument>> {
        let state = self.state.read().await;
        let conn = state.conn()?;

        let Some(expr) = or_query(keywords.iter().map(String::as_str)) else {
            return Ok(Vec::new());
        };
        let expr = format!("keywords : ({expr})");

        ranked(conn, &state.documents, &expr, KEYWORD_RESULT_LIMIT).await
    }

    /// Documents with exactly this source type, relevance fixed at 1.0.
    pub async fn find_by_source_type(&self, source_type: &str) -> Result<Vec<ResearchDocument>> {
        let state = self.state.read().await;
        let conn = state.conn()?;

        let mut rows = conn
            .query(
                schema::BY_SOURCE_TYPE,
                params![source_type, SOURCE_TYPE_RESULT_LIMIT as i64],
            )
            .await
            .map_err(|e| LongformError::Index(e.to_string()))?;

        let mut results = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| LongformError::Index(e.to_string()))?
        {
            let id: String = row.get(0).map_err(|e| LongformError::Index(e.to_string()))?;
            if let Some(doc) = state.documents.get(&id) {
                let mut doc = doc.clone();
                doc.relevance = 1.0;
                results.push(doc);
            }
        }
        Ok(results)
    }

    /// The stored document with this ID.
    pub async fn get_by_id(&self, id: &str) -> Result<ResearchDocument> {
        let state = self.state.read().await;
        state.conn()?;
        state
            .documents
            .get(id)
            .cloned()
            .ok_or_else(|| LongformError::NotFound(format!("research document '{id}'")))
    }

    /// Every stored document, in no particular order.
    pub async fn get_all_documents(&self) -> Result<Vec<ResearchDocument>> {
        let state = self.state.read().await;
        state.conn()?;
        Ok(state.documents.values().cloned().collect())
    }

    pub async fn get_stats(&self) -> Result<KnowledgeStats> {
        let state = self.state.read().await;
        state.conn()?;

        let mut by_source_type = BTreeMap::new();
        for doc in state.documents.values() {
            *by_source_type.entry(doc.source_type.clone()).or_insert(0) += 1;
        }

        Ok(KnowledgeStats {
            subject: self.subject.clone(),
            total_documents: state.documents.len(),
            by_source_type,
        })
    }

    /// Release the index. Every later call fails with an index error.
    pub async fn close(&self) -> Result<()> {
        let mut state = self.state.write().await;
        if state.index.take().is_some() {
            tracing::debug!(subject = %self.subject, "closed knowledge base");
        }
        state.documents.clear();
        Ok(())
    }
}

/// Quote each term as an FTS5 string and join them with OR.
fn or_query<'a>(terms: impl Iterator<Item = &'a str>) -> Option<String> {
    let quoted: Vec<String> = terms
        .map(|t| t.replace('"', " "))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{t}\""))
        .collect();

    if quoted.is_empty() {
        None
    } else {
        Some(quoted.join(" OR "))
    }
}

async fn ranked(
    conn: &Connection,
    documents: &HashMap<String, ResearchDocument>,
    expr: &str,
    limit: usize,
) -> Result<Vec<ResearchDocument>> {
    let mut rows = conn
        .query(schema::SEARCH, params![expr, limit as i64])
        .await
        .map_err(|e| LongformError::Index(format!("search failed: {e}")))?;

    let mut results = Vec::new();
    while let Some(row) = rows
        .next()
        .await
        .map_err(|e| LongformError::Index(e.to_string()))?
    {
        let id: String = row.get(0).map_err(|e| LongformError::Index(e.to_string()))?;
        let score: f64 = row.get(1).unwrap_or(0.0);

        // Present in the index but not the map: skip.
        if let Some(doc) = documents.get(&id) {
            let mut doc = doc.clone();
            doc.relevance = -score;
            results.push(doc);
        }
    }
    Ok(results)
}
