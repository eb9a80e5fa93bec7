//! Planner role: research the subject and produce a validated plan.

use std::sync::Arc;

use async_trait::async_trait;
use longform_core::progress::{self, PLANNING_WEIGHT, Phase, base_phase_progress};
use longform_core::{Event, Payload, RoleContext, RoleHandler};
use longform_shared::{DocumentPlan, DocumentSection, LongformError, Result, RoleKind, ToolSet};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, instrument};

use crate::completion::{CompletionClient, Message, ResponseSchema};
use crate::parse::extract_json;
use crate::prompt::{PLANNER_SYSTEM, planning_prompt};
use crate::tool_loop::{LoopOptions, RESEARCH_MIN_ITERATIONS, run_tool_loop};
use crate::{RoleSettings, tools_for};

pub struct PlannerRole {
    client: Arc<dyn CompletionClient>,
    tools: ToolSet,
    settings: RoleSettings,
}

impl PlannerRole {
    pub fn new(client: Arc<dyn CompletionClient>, tools: ToolSet, settings: RoleSettings) -> Self {
        Self {
            client,
            tools,
            settings,
        }
    }
}

#[async_trait]
impl RoleHandler for PlannerRole {
    #[instrument(skip_all, fields(role = ctx.name()))]
    async fn handle(&self, event: Event, ctx: &RoleContext) -> Result<()> {
        let Payload::Message(subject) = event.payload() else {
            return Err(LongformError::protocol(format!(
                "planner cannot handle {} events",
                event.payload().kind()
            )));
        };
        let config = event.config();
        if config.role != RoleKind::Planner {
            return Err(LongformError::protocol(format!(
                "planner received an event addressed to {}",
                config.role
            )));
        }

        let tracker = &config.progress;
        let base = base_phase_progress(Phase::Planning);
        let step = |label: &str, sub: f64, name: &str| {
            tracker.emit_sub_progress(
                Phase::Planning,
                label,
                base,
                sub,
                PLANNING_WEIGHT,
                progress::details([("step", json!(name))]),
            );
        };

        step("Preparing research and planning prompt", 0.1, "initialization");
        let tools = tools_for(&self.tools, config);
        let messages = vec![
            Message::system(PLANNER_SYSTEM),
            Message::user(planning_prompt(subject, config)),
        ];

        step("Researching the subject and drafting the structure", 0.2, "research_start");
        let answer = run_tool_loop(
            self.client.as_ref(),
            &tools,
            messages,
            &LoopOptions {
                max_iterations: self.settings.max_iterations,
                min_iterations: RESEARCH_MIN_ITERATIONS,
                temperature: self.settings.temperature,
                schema: Some(plan_schema()),
            },
            ctx.scope(),
        )
        .await?;

        step("Processing research results and finalizing plan", 0.8, "plan_parsing");
        let plan = parse_plan(&answer)?;

        info!(sections = plan.sections.len(), total_words = plan.total_words, "plan ready");
        tracker.emit_sub_progress(
            Phase::Planning,
            format!(
                "Plan completed: {} sections, {} total words",
                plan.sections.len(),
                plan.total_words
            ),
            base,
            1.0,
            PLANNING_WEIGHT,
            progress::details([
                ("step", json!("plan_complete")),
                ("sections_count", json!(plan.sections.len())),
                ("total_words", json!(plan.total_words)),
                ("title", json!(plan.title)),
            ]),
        );

        ctx.emit(event.reply(Payload::Plan(plan)));
        Ok(())
    }
}

/// Plan shape some models produce instead of the requested schema.
#[derive(Debug, Deserialize)]
struct OutlinePlan {
    article_title: String,
    #[serde(default)]
    introduction: Option<OutlinePart>,
    #[serde(default)]
    sections: Vec<OutlinePart>,
    #[serde(default)]
    conclusion: Option<OutlinePart>,
    #[serde(default)]
    keywords: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct OutlinePart {
    #[serde(default)]
    title: String,
    #[serde(default)]
    word_count_target: u32,
    #[serde(default)]
    key_points: Vec<String>,
    #[serde(default)]
    guidance_for_writers: String,
}

impl From<OutlinePart> for DocumentSection {
    fn from(part: OutlinePart) -> Self {
        Self {
            id: String::new(),
            title: part.title,
            description: part.guidance_for_writers,
            key_points: part.key_points,
            word_count: part.word_count_target,
        }
    }
}

impl From<OutlinePlan> for DocumentPlan {
    fn from(outline: OutlinePlan) -> Self {
        let summary = outline
            .introduction
            .as_ref()
            .map(|intro| intro.key_points.join(" "))
            .filter(|s| !s.is_empty());

        let sections = outline
            .introduction
            .into_iter()
            .chain(outline.sections)
            .chain(outline.conclusion)
            .filter(|part| !part.title.trim().is_empty())
            .map(DocumentSection::from)
            .collect();

        Self {
            title: outline.article_title,
            sections,
            total_words: 0,
            keywords: outline.keywords,
            summary,
        }
    }
}

/// Parse and validate a plan from model output, accepting either the
/// requested schema or the outline shape.
pub fn parse_plan(answer: &str) -> Result<DocumentPlan> {
    let first = match extract_json::<DocumentPlan>(answer) {
        Ok(mut plan) => match plan.validate() {
            Ok(()) => return Ok(plan),
            Err(e) => e,
        },
        Err(e) => e,
    };

    match extract_json::<OutlinePlan>(answer) {
        Ok(outline) => {
            let mut plan = DocumentPlan::from(outline);
            plan.validate()?;
            Ok(plan)
        }
        Err(_) => Err(first),
    }
}

pub fn plan_schema() -> ResponseSchema {
    let section = json!({
        "type": "object",
        "properties": {
            "id": {"type": "string", "description": "unique identifier for the section"},
            "title": {"type": "string", "description": "title of the section"},
            "description": {"type": "string", "description": "guidance for writing this section"},
            "key_points": {"type": "array", "items": {"type": "string"}},
            "word_count": {"type": "integer", "minimum": 1}
        },
        "required": ["id", "title", "description", "key_points", "word_count"],
        "additionalProperties": false
    });

    ResponseSchema {
        name: "document_plan".into(),
        description: "A structured article plan with sections, word counts and writer guidance"
            .into(),
        schema: json!({
            "type": "object",
            "properties": {
                "title": {"type": "string"},
                "summary": {"type": "string"},
                "sections": {"type": "array", "items": section},
                "total_words": {"type": "integer", "minimum": 1},
                "keywords": {"type": "array", "items": {"type": "string"}}
            },
            "required": ["title", "summary", "sections", "total_words", "keywords"],
            "additionalProperties": false
        }),
    }
}
