//! SQL for the in-memory research index.
//!
//! The index is a single FTS5 table. `doc_id` and `source_type` are stored
//! but not tokenized, so free-text queries never match them and
//! `source_type` can be compared exactly.

pub(crate) const CREATE_INDEX: &str = r#"
CREATE VIRTUAL TABLE IF NOT EXISTS research_fts USING fts5(
    doc_id UNINDEXED,
    source_type UNINDEXED,
    title,
    content,
    summary,
    keywords,
    tokenize = 'porter unicode61'
);
"#;

pub(crate) const DELETE_DOCUMENT: &str = "DELETE FROM research_fts WHERE doc_id = ?1";

pub(crate) const INSERT_DOCUMENT: &str = "INSERT INTO research_fts \
     (doc_id, source_type, title, content, summary, keywords) \
     VALUES (?1, ?2, ?3, ?4, ?5, ?6)";

/// Ranked full-text match; bm25 is lower for better matches.
pub(crate) const SEARCH: &str = "SELECT doc_id, bm25(research_fts) FROM research_fts \
     WHERE research_fts MATCH ?1 \
     ORDER BY bm25(research_fts) \
     LIMIT ?2";

pub(crate) const BY_SOURCE_TYPE: &str =
    "SELECT doc_id FROM research_fts WHERE source_type = ?1 LIMIT ?2";
