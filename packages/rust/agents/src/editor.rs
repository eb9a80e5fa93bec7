//! Editor role: turn the written sections into the final document.

use std::fmt::Write as _;
use std::sync::Arc;

use async_trait::async_trait;
use longform_core::progress::{self, EDITING_WEIGHT, Phase, base_phase_progress};
use longform_core::{Event, Payload, RoleContext, RoleHandler};
use longform_shared::{
    Document, DocumentMetadata, DocumentPlan, LongformError, Result, RoleKind, SectionContent,
    Source, count_words,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, instrument};

use crate::completion::{CompletionClient, Message, ResponseSchema};
use crate::parse::{extract_json, markdown_links};
use crate::prompt::{EDITOR_SYSTEM, editing_prompt};
use crate::tool_loop::{LoopOptions, run_tool_loop};
use crate::writer::{CitedSource, into_sources};
use crate::RoleSettings;

/// Default sampling temperature for the editing pass.
pub const EDITOR_TEMPERATURE: f32 = 0.2;

pub struct EditorRole {
    client: Arc<dyn CompletionClient>,
    settings: RoleSettings,
}

impl EditorRole {
    pub fn new(client: Arc<dyn CompletionClient>, settings: RoleSettings) -> Self {
        Self { client, settings }
    }
}

#[derive(Debug, Deserialize)]
struct EditedArticle {
    #[serde(default)]
    title: String,
    #[serde(default)]
    summary: String,
    content: String,
    #[serde(default)]
    sources: Vec<CitedSource>,
}

/// Title from the first `# ` heading, or `fallback`.
pub fn extract_title(content: &str, fallback: &str) -> String {
    content
        .lines()
        .map(str::trim)
        .find_map(|line| line.strip_prefix("# "))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| fallback.to_string())
}

/// Every section source once, first occurrence wins.
pub fn consolidate_sources(sections: &[SectionContent]) -> Vec<Source> {
    let mut sources: Vec<Source> = Vec::new();
    for source in sections.iter().flat_map(|s| &s.sources) {
        if source.url.is_empty() || sources.iter().any(|s| s.url == source.url) {
            continue;
        }
        sources.push(source.clone());
    }
    sources
}

fn sources_section(sources: &[Source]) -> String {
    let mut out = String::from("\n\n## Sources\n\n");
    for (i, s) in sources.iter().enumerate() {
        let _ = writeln!(out, "{}. [{}]({})", i + 1, s.title, s.url);
    }
    out.truncate(out.trim_end().len());
    out
}

/// Build the final document from the editor's answer.
///
/// Falls back to the section sources when the answer cites none, and
/// appends a sources list unless the article already has one.
pub fn assemble_document(answer: &str, plan: &DocumentPlan, sections: Vec<SectionContent>) -> Document {
    let (title, summary, mut content, cited) = match extract_json::<EditedArticle>(answer) {
        Ok(edited) if !edited.content.trim().is_empty() => (
            edited.title,
            edited.summary,
            edited.content.trim().to_string(),
            into_sources(edited.sources),
        ),
        _ => {
            let content = answer.trim().to_string();
            let links = markdown_links(&content);
            (String::new(), String::new(), content, links)
        }
    };

    let sources = if cited.is_empty() {
        consolidate_sources(&sections)
    } else {
        cited
    };

    let title = if title.trim().is_empty() {
        extract_title(&content, &plan.title)
    } else {
        title.trim().to_string()
    };

    if !sources.is_empty() && !content.contains("## Sources") {
        content.push_str(&sources_section(&sources));
    }

    let summary = if summary.trim().is_empty() {
        plan.summary.clone().unwrap_or_default()
    } else {
        summary.trim().to_string()
    };

    Document {
        metadata: DocumentMetadata {
            title,
            word_count: count_words(&content),
            keywords: plan.keywords.clone(),
            sources,
        },
        summary,
        content,
        sections,
    }
}

fn article_schema() -> ResponseSchema {
    ResponseSchema {
        name: "final_article".into(),
        description: "The edited article with its title, summary and sources".into(),
        schema: json!({
            "type": "object",
            "properties": {
                "title": {"type": "string"},
                "summary": {"type": "string"},
                "content": {"type": "string", "description": "the full article in Markdown"},
                "sources": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "title": {"type": "string"},
                            "url": {"type": "string"}
                        },
                        "required": ["title", "url"],
                        "additionalProperties": false
                    }
                }
            },
            "required": ["title", "summary", "content", "sources"],
            "additionalProperties": false
        }),
    }
}

#[async_trait]
impl RoleHandler for EditorRole {
    #[instrument(skip_all, fields(role = ctx.name()))]
    async fn handle(&self, event: Event, ctx: &RoleContext) -> Result<()> {
        let Payload::EditRequest { plan, sections } = event.payload() else {
            return Err(LongformError::protocol(format!(
                "editor cannot handle {} events",
                event.payload().kind()
            )));
        };
        let config = event.config();
        if config.role != RoleKind::Editor {
            return Err(LongformError::protocol(format!(
                "editor received an event addressed to {}",
                config.role
            )));
        }

        let tracker = &config.progress;
        let base = base_phase_progress(Phase::Editing);
        let step = |label: &str, sub: f64, name: &str| {
            tracker.emit_sub_progress(
                Phase::Editing,
                label,
                base,
                sub,
                EDITING_WEIGHT,
                progress::details([("step", json!(name)), ("sections_count", json!(sections.len()))]),
            );
        };

        step("Preparing editing instructions", 0.1, "initialization");
        let messages = vec![
            Message::system(EDITOR_SYSTEM),
            Message::user(editing_prompt(plan, sections, config)),
        ];

        step("Reviewing flow and consistency across sections", 0.4, "editing_execution");
        let answer = run_tool_loop(
            self.client.as_ref(),
            &longform_shared::ToolSet::new(),
            messages,
            &LoopOptions {
                max_iterations: 1,
                min_iterations: 0,
                temperature: self.settings.editor_temperature,
                schema: Some(article_schema()),
            },
            ctx.scope(),
        )
        .await?;

        step("Consolidating sources", 0.7, "content_processing");
        let document = assemble_document(&answer, plan, sections.clone());

        info!(
            title = %document.metadata.title,
            word_count = document.metadata.word_count,
            sources = document.metadata.sources.len(),
            "article edited"
        );
        tracker.emit_sub_progress(
            Phase::Editing,
            format!(
                "Article editing completed: {} words, {} sources",
                document.metadata.word_count,
                document.metadata.sources.len()
            ),
            base,
            1.0,
            EDITING_WEIGHT,
            progress::details([
                ("step", json!("editing_complete")),
                ("final_title", json!(document.metadata.title)),
                ("word_count", json!(document.metadata.word_count)),
            ]),
        );

        ctx.emit(event.reply(Payload::FinalArticle(Box::new(document))));
        Ok(())
    }
}
