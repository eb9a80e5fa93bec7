//! Core domain types shared by every Longform crate.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{LongformError, Result};

// ---------------------------------------------------------------------------
// Enumerations
// ---------------------------------------------------------------------------

/// How much research the roles are asked to perform.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResearchDepth {
    Basic,
    #[default]
    Deep,
    DeepWeb,
    Academic,
}

impl ResearchDepth {
    /// Wire name used in config files and CLI flags.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Basic => "basic",
            Self::Deep => "deep",
            Self::DeepWeb => "deep_web",
            Self::Academic => "academic",
        }
    }
}

impl std::fmt::Display for ResearchDepth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ResearchDepth {
    type Err = LongformError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "basic" => Ok(Self::Basic),
            "deep" => Ok(Self::Deep),
            "deep_web" => Ok(Self::DeepWeb),
            "academic" => Ok(Self::Academic),
            other => Err(LongformError::validation(format!(
                "unknown research depth '{other}' (expected basic, deep, deep_web or academic)"
            ))),
        }
    }
}

/// The kind of work a role performs in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleKind {
    Planner,
    Writer,
    Editor,
}

impl RoleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Planner => "planner",
            Self::Writer => "writer",
            Self::Editor => "editor",
        }
    }
}

impl std::fmt::Display for RoleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Sources and research documents
// ---------------------------------------------------------------------------

/// A reference cited by a section or the final document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Source {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    /// "web", "article", "academic", "news", ...
    #[serde(default)]
    pub source_type: String,
    #[serde(default)]
    pub relevance: f64,
}

/// A research finding stored in the knowledge base.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResearchDocument {
    pub id: String,
    #[serde(default)]
    pub url: String,
    pub title: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub source_type: String,
    /// Assigned at query time; the stored value carries no meaning.
    #[serde(default)]
    pub relevance: f64,
}

impl From<&ResearchDocument> for Source {
    fn from(doc: &ResearchDocument) -> Self {
        Self {
            id: doc.id.clone(),
            url: doc.url.clone(),
            title: doc.title.clone(),
            keywords: doc.keywords.clone(),
            source_type: doc.source_type.clone(),
            relevance: doc.relevance,
        }
    }
}

// ---------------------------------------------------------------------------
// Plan
// ---------------------------------------------------------------------------

/// One independently writable part of the target document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentSection {
    #[serde(default)]
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub key_points: Vec<String>,
    pub word_count: u32,
}

/// Ordered outline of the document produced by the planner.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentPlan {
    pub title: String,
    pub sections: Vec<DocumentSection>,
    #[serde(default)]
    pub total_words: u32,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

impl DocumentPlan {
    /// Check the plan and normalize it in place.
    ///
    /// Sections without an ID get one derived from their title, and
    /// `total_words` is recomputed from the section word counts.
    pub fn validate(&mut self) -> Result<()> {
        if self.title.trim().is_empty() {
            return Err(LongformError::validation("document plan must have a title"));
        }
        if self.sections.is_empty() {
            return Err(LongformError::validation(
                "document plan must have at least one section",
            ));
        }

        let mut seen = HashSet::new();
        let mut total = 0u32;
        for (index, section) in self.sections.iter().enumerate() {
            if section.title.trim().is_empty() {
                return Err(LongformError::validation(format!(
                    "section {index} must have a title"
                )));
            }
            if section.word_count == 0 {
                return Err(LongformError::validation(format!(
                    "section {index} must have a positive word count"
                )));
            }
            if !section.id.is_empty() && !seen.insert(section.id.clone()) {
                return Err(LongformError::validation(format!(
                    "duplicate section id '{}'",
                    section.id
                )));
            }
            total = total.saturating_add(section.word_count);
        }

        // Generated IDs never collide with supplied ones or each other.
        for (index, section) in self.sections.iter_mut().enumerate() {
            if !section.id.is_empty() {
                continue;
            }
            let mut base = generate_section_id(&section.title);
            if base.is_empty() {
                base = format!("section_{index}");
            }
            let mut id = base.clone();
            let mut n = 2;
            while seen.contains(&id) {
                id = format!("{base}_{n}");
                n += 1;
            }
            seen.insert(id.clone());
            section.id = id;
        }

        self.total_words = total;
        Ok(())
    }
}

/// Derive a section identifier from its title: lowercase, spaces become
/// underscores, anything outside `[a-z0-9_]` is dropped. May be empty.
pub fn generate_section_id(title: &str) -> String {
    title
        .to_lowercase()
        .replace(' ', "_")
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '_')
        .collect()
}

/// Count whitespace-separated words.
pub fn count_words(text: &str) -> usize {
    text.split_whitespace().count()
}

// ---------------------------------------------------------------------------
// Written content
// ---------------------------------------------------------------------------

/// The written text for one planned section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionContent {
    pub section_id: String,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub sources: Vec<Source>,
    pub word_count: usize,
    pub written_by: String,
    pub completed_at: DateTime<Utc>,
}

/// Front-matter metadata of a finished document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub title: String,
    pub word_count: usize,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub sources: Vec<Source>,
}

/// The final edited document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(flatten)]
    pub metadata: DocumentMetadata,
    #[serde(default)]
    pub summary: String,
    pub content: String,
    pub sections: Vec<SectionContent>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn section(title: &str, words: u32) -> DocumentSection {
        DocumentSection {
            title: title.into(),
            word_count: words,
            ..Default::default()
        }
    }

    #[test]
    fn validation_recomputes_total_words() {
        let mut plan = DocumentPlan {
            title: "Rust in production".into(),
            sections: vec![
                section("Intro", 100),
                section("Body", 300),
                section("Conclusion", 100),
            ],
            total_words: 0,
            ..Default::default()
        };

        plan.validate().expect("valid plan");
        assert_eq!(plan.total_words, 500);
        assert_eq!(
            plan.total_words,
            plan.sections.iter().map(|s| s.word_count).sum::<u32>()
        );
    }

    #[test]
    fn validation_overrides_inconsistent_total() {
        let mut plan = DocumentPlan {
            title: "T".into(),
            sections: vec![section("A", 250)],
            total_words: 9000,
            ..Default::default()
        };
        plan.validate().expect("valid plan");
        assert_eq!(plan.total_words, 250);
    }

    #[test]
    fn validation_assigns_missing_ids() {
        let mut plan = DocumentPlan {
            title: "T".into(),
            sections: vec![section("Why It Matters!", 100)],
            ..Default::default()
        };
        plan.validate().expect("valid plan");
        assert_eq!(plan.sections[0].id, "why_it_matters");
    }

    #[test]
    fn validation_rejects_bad_plans() {
        let mut untitled = DocumentPlan {
            sections: vec![section("A", 10)],
            ..Default::default()
        };
        assert!(untitled.validate().is_err());

        let mut empty = DocumentPlan {
            title: "T".into(),
            ..Default::default()
        };
        assert!(empty.validate().unwrap_err().to_string().contains("at least one section"));

        let mut zero = DocumentPlan {
            title: "T".into(),
            sections: vec![section("A", 0)],
            ..Default::default()
        };
        assert!(zero.validate().unwrap_err().to_string().contains("positive word count"));

        let mut dup = DocumentPlan {
            title: "T".into(),
            sections: vec![section("A", 10), section("B", 20)],
            ..Default::default()
        };
        dup.sections[0].id = "same".into();
        dup.sections[1].id = "same".into();
        assert!(dup.validate().unwrap_err().to_string().contains("duplicate section id 'same'"));
    }

    #[test]
    fn non_ascii_titles_get_positional_ids() {
        let mut plan = DocumentPlan {
            title: "所有権".into(),
            sections: vec![section("はじめに", 100), section("まとめ", 100)],
            ..Default::default()
        };
        plan.validate().expect("valid plan");
        let ids: Vec<_> = plan.sections.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, ["section_0", "section_1"]);
    }

    #[test]
    fn colliding_slugs_are_made_unique() {
        let mut plan = DocumentPlan {
            title: "T".into(),
            sections: vec![
                section("Example", 10),
                section("Example!", 10),
                section("Example?", 10),
                section("Other", 10),
            ],
            ..Default::default()
        };
        plan.sections[3].id = "example_2".into();
        plan.validate().expect("valid plan");
        let ids: Vec<_> = plan.sections.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, ["example", "example_3", "example_4", "example_2"]);
    }

    #[test]
    fn research_depth_parsing() {
        assert_eq!("deep-web".parse::<ResearchDepth>().unwrap(), ResearchDepth::DeepWeb);
        assert_eq!(ResearchDepth::default(), ResearchDepth::Deep);
        assert!("shallow".parse::<ResearchDepth>().is_err());
        let json = serde_json::to_string(&ResearchDepth::DeepWeb).unwrap();
        assert_eq!(json, "\"deep_web\"");
    }

    #[test]
    fn document_metadata_is_flattened() {
        let doc = Document {
            metadata: DocumentMetadata {
                title: "Title".into(),
                word_count: 3,
                ..Default::default()
            },
            summary: String::new(),
            content: "one two three".into(),
            sections: vec![],
        };
        let value = serde_json::to_value(&doc).expect("serialize");
        assert_eq!(value["title"], "Title");
        assert_eq!(value["word_count"], 3);
    }

    #[test]
    fn word_counting() {
        assert_eq!(count_words("  one\ttwo\nthree  "), 3);
        assert_eq!(count_words(""), 0);
    }
}
