//! Writer role: research and write one planned section.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use longform_core::progress::{self, Phase, base_phase_progress};
use longform_core::{Event, Payload, RoleContext, RoleHandler};
use longform_shared::{
    LongformError, Result, RoleKind, SectionContent, Source, ToolSet, count_words,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, instrument};

use crate::completion::{CompletionClient, Message, ResponseSchema};
use crate::parse::{extract_json, markdown_links};
use crate::prompt::{WRITER_SYSTEM, section_prompt};
use crate::tool_loop::{LoopOptions, RESEARCH_MIN_ITERATIONS, run_tool_loop};
use crate::{RoleSettings, tools_for};

pub struct WriterRole {
    client: Arc<dyn CompletionClient>,
    tools: ToolSet,
    settings: RoleSettings,
}

impl WriterRole {
    pub fn new(client: Arc<dyn CompletionClient>, tools: ToolSet, settings: RoleSettings) -> Self {
        Self {
            client,
            tools,
            settings,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SectionAnswer {
    content: String,
    #[serde(default)]
    sources: Vec<CitedSource>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CitedSource {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
}

/// Cited sources with a URL, deduplicated by URL.
pub(crate) fn into_sources(cited: Vec<CitedSource>) -> Vec<Source> {
    let mut sources: Vec<Source> = Vec::new();
    for c in cited {
        let url = c.url.trim().to_string();
        if url.is_empty() || sources.iter().any(|s| s.url == url) {
            continue;
        }
        let title = if c.title.trim().is_empty() {
            url.clone()
        } else {
            c.title.trim().to_string()
        };
        sources.push(Source {
            title,
            url,
            source_type: "web".into(),
            ..Default::default()
        });
    }
    sources
}

/// Split model output into section text and sources.
///
/// Prose that is not JSON is taken as the section body, with its Markdown
/// links as sources.
pub fn parse_section(answer: &str) -> (String, Vec<Source>) {
    match extract_json::<SectionAnswer>(answer) {
        Ok(parsed) if !parsed.content.trim().is_empty() => {
            let content = parsed.content.trim().to_string();
            let mut sources = into_sources(parsed.sources);
            if sources.is_empty() {
                sources = markdown_links(&content);
            }
            (content, sources)
        }
        _ => {
            let content = answer.trim().to_string();
            let sources = markdown_links(&content);
            (content, sources)
        }
    }
}

fn section_schema() -> ResponseSchema {
    ResponseSchema {
        name: "section_content".into(),
        description: "The written section and the sources it cites".into(),
        schema: json!({
            "type": "object",
            "properties": {
                "content": {"type": "string", "description": "section body in Markdown"},
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
            "required": ["content", "sources"],
            "additionalProperties": false
        }),
    }
}

#[async_trait]
impl RoleHandler for WriterRole {
    #[instrument(skip_all, fields(role = ctx.name()))]
    async fn handle(&self, event: Event, ctx: &RoleContext) -> Result<()> {
        let Payload::SectionAssignment {
            index,
            section,
            plan,
        } = event.payload()
        else {
            return Err(LongformError::protocol(format!(
                "writer cannot handle {} events",
                event.payload().kind()
            )));
        };
        let config = event.config();
        if config.role != RoleKind::Writer {
            return Err(LongformError::protocol(format!(
                "writer received an event addressed to {}",
                config.role
            )));
        }

        let writer_id = config.writer_id.as_deref().unwrap_or(ctx.name());
        let tracker = &config.progress;
        let base = base_phase_progress(Phase::Writing);
        let step = |label: String, name: &str| {
            tracker.emit_progress(
                Phase::Writing,
                format!("[{writer_id}] {label}"),
                base,
                progress::details([
                    ("writer_id", json!(writer_id)),
                    ("section_id", json!(section.id)),
                    ("section_index", json!(index)),
                    ("step", json!(name)),
                ]),
            );
        };

        step(format!("Researching section: {}", section.title), "research_start");
        let tools = tools_for(&self.tools, config);
        let messages = vec![
            Message::system(WRITER_SYSTEM),
            Message::user(section_prompt(section, plan, config)),
        ];

        let answer = run_tool_loop(
            self.client.as_ref(),
            &tools,
            messages,
            &LoopOptions {
                max_iterations: self.settings.max_iterations,
                min_iterations: RESEARCH_MIN_ITERATIONS,
                temperature: self.settings.temperature,
                schema: Some(section_schema()),
            },
            ctx.scope(),
        )
        .await?;

        let (content, sources) = parse_section(&answer);
        let word_count = count_words(&content);
        debug!(
            section = %section.id,
            word_count,
            target = section.word_count,
            sources = sources.len(),
            "section written"
        );
        step(
            format!(
                "Completed section: {} ({word_count} words, {} sources)",
                section.title,
                sources.len()
            ),
            "section_complete",
        );

        ctx.emit(event.reply(Payload::SectionContent(SectionContent {
            section_id: section.id.clone(),
            title: section.title.clone(),
            content,
            sources,
            word_count,
            written_by: writer_id.to_string(),
            completed_at: Utc::now(),
        })));
        Ok(())
    }
}
