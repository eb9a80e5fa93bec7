//! Plan → concurrent write → edit pipeline for one subject.

use std::sync::Arc;
use std::time::Duration;

use longform_knowledge::KnowledgeBase;
use longform_shared::{Document, GenerationOptions, LongformError, Result, RoleKind, ToolSet};
use serde_json::json;
use tokio::task::JoinSet;
use tracing::{info, instrument, warn};

use crate::event::{Event, EventConfig, Payload};
use crate::pool::WriterPool;
use crate::progress::{self, Phase, ProgressSink, ProgressTracker};
use crate::role::{DEFAULT_STOP_GRACE, Role, RoleHandler};
use crate::scope::Scope;

/// Drives the planner, a writer pool and the editor through one run.
pub struct Orchestrator {
    planner: Arc<Role>,
    writers: WriterPool,
    editor: Arc<Role>,
    options: GenerationOptions,
    tools: ToolSet,
    knowledge: Option<Arc<KnowledgeBase>>,
    progress: Option<Arc<dyn ProgressSink>>,
    stop_grace: Duration,
}

impl Orchestrator {
    /// Wire roles named `planner`, `writer_N` and `editor`.
    pub fn new(
        planner: Arc<dyn RoleHandler>,
        writers: Vec<Arc<dyn RoleHandler>>,
        editor: Arc<dyn RoleHandler>,
        options: GenerationOptions,
    ) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            planner: Arc::new(Role::new(RoleKind::Planner.as_str(), planner)),
            writers: WriterPool::new(writers)?,
            editor: Arc::new(Role::new(RoleKind::Editor.as_str(), editor)),
            options,
            tools: ToolSet::new(),
            knowledge: None,
            progress: None,
            stop_grace: DEFAULT_STOP_GRACE,
        })
    }

    /// Tools forwarded to every role through the event config.
    pub fn with_tools(mut self, tools: ToolSet) -> Self {
        self.tools = tools;
        self
    }

    /// Knowledge base shared by every role for the run.
    pub fn with_knowledge(mut self, knowledge: Arc<KnowledgeBase>) -> Self {
        self.knowledge = Some(knowledge);
        self
    }

    pub fn with_progress(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.progress = Some(sink);
        self
    }

    /// How long [`Orchestrator::stop`] waits for each role's in-flight
    /// handlers.
    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }

    pub fn options(&self) -> &GenerationOptions {
        &self.options
    }

    fn roles(&self) -> impl Iterator<Item = &Arc<Role>> {
        std::iter::once(&self.planner)
            .chain(self.writers.roles())
            .chain(std::iter::once(&self.editor))
    }

    /// Start every role under `scope`. Roles already started are stopped
    /// again if a later one fails to start.
    pub async fn start(&self, scope: &Scope) -> Result<()> {
        for role in self.roles() {
            if let Err(e) = role.start(scope) {
                if let Err(teardown) = self.stop().await {
                    warn!(error = %teardown, "failed to stop roles after start failure");
                }
                return Err(e);
            }
        }
        info!(writers = self.writers.len(), "orchestrator started");
        Ok(())
    }

    /// Stop every started role. All stop failures are collected into one
    /// `Teardown` error.
    pub async fn stop(&self) -> Result<()> {
        let mut stops = JoinSet::new();
        for role in self.roles() {
            let role = Arc::clone(role);
            let grace = self.stop_grace;
            stops.spawn(async move { role.stop_within(grace).await });
        }

        let mut errors = Vec::new();
        while let Some(outcome) = stops.join_next().await {
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => errors.push(e.to_string()),
                Err(e) => errors.push(format!("stop task failed: {e}")),
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(LongformError::Teardown { errors })
        }
    }

    /// Run `subject` through planning, writing and editing.
    ///
    /// The whole run is bounded by the configured timeout. Any error ends
    /// the run; no partial document is returned.
    #[instrument(skip_all, fields(subject = %subject))]
    pub async fn generate(&self, subject: &str, parent: &Scope) -> Result<Document> {
        self.options.validate()?;
        if subject.trim().is_empty() {
            return Err(LongformError::validation("subject must not be empty"));
        }

        let scope = parent.child_with_timeout(self.options.timeout);
        let tracker = ProgressTracker::new(self.progress.clone());
        let config = EventConfig {
            subject: subject.to_string(),
            target_word_count: self.options.target_word_count,
            research_depth: self.options.research_depth,
            style_guidelines: self.options.style_guidelines.clone(),
            additional_context: self.options.additional_context.clone(),
            role: RoleKind::Planner,
            writer_id: None,
            knowledge: self.knowledge.clone(),
            tools: self.tools.clone(),
            progress: tracker.clone(),
        };

        info!(
            target_words = self.options.target_word_count,
            max_writers = self.options.max_concurrent_writers,
            research_depth = %self.options.research_depth,
            "starting document generation"
        );
        tracker.emit_progress(
            Phase::Initializing,
            "Starting document generation",
            0.0,
            progress::details([("subject", json!(subject))]),
        );

        // --- Planning ---
        tracker.emit_phase_start(Phase::Planning, "Planning document structure");
        let request = Event::new(Arc::new(config.clone()), Payload::Message(subject.into()));
        let mut plan = self.planner.call(request, &scope).await?.into_plan()?;
        plan.validate()?;
        info!(
            title = %plan.title,
            sections = plan.sections.len(),
            total_words = plan.total_words,
            "plan ready"
        );
        tracker.emit_phase_complete(
            Phase::Planning,
            format!("Plan ready: {} sections", plan.sections.len()),
        );

        // --- Writing ---
        tracker.emit_phase_start(
            Phase::Writing,
            format!("Writing {} sections", plan.sections.len()),
        );
        let plan = Arc::new(plan);
        let sections = self
            .writers
            .write_sections(&plan, &config, &scope, self.options.max_concurrent_writers)
            .await?;
        tracker.emit_phase_complete(Phase::Writing, "All sections written");

        // --- Editing ---
        tracker.emit_phase_start(Phase::Editing, "Editing document");
        let request = Event::new(
            config.for_role(RoleKind::Editor),
            Payload::EditRequest {
                plan: Arc::clone(&plan),
                sections,
            },
        );
        let document = self.editor.call(request, &scope).await?.into_document()?;

        info!(
            title = %document.metadata.title,
            words = document.metadata.word_count,
            elapsed_ms = tracker.elapsed().as_millis() as u64,
            "document complete"
        );
        tracker.emit_progress(
            Phase::Completed,
            "Document generation complete",
            1.0,
            progress::details([
                ("title", json!(document.metadata.title)),
                ("word_count", json!(document.metadata.word_count)),
            ]),
        );

        Ok(document)
    }
}

/// Start the orchestrator, run `subject`, and always stop it again.
///
/// Teardown failures are logged; they never replace the run's own result.
pub async fn write_document(orchestrator: &Orchestrator, subject: &str) -> Result<Document> {
    let scope = Scope::new();
    orchestrator.start(&scope).await?;

    let result = orchestrator.generate(subject, &scope).await;
    if let Err(teardown) = orchestrator.stop().await {
        warn!(error = %teardown, "role teardown failed");
    }
    scope.cancel();

    result
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::Utc;
    use longform_shared::{
        DocumentMetadata, DocumentPlan, DocumentSection, SectionContent, count_words,
    };

    use super::*;
    use crate::progress::ProgressEvent;
    use crate::role::RoleContext;

    struct Planner {
        delay: Duration,
        sections: Vec<(&'static str, u32)>,
    }

    #[async_trait]
    impl RoleHandler for Planner {
        async fn handle(&self, event: Event, ctx: &RoleContext) -> Result<()> {
            tokio::time::sleep(self.delay).await;
            let plan = DocumentPlan {
                title: format!("On {}", event.config().subject),
                sections: self
                    .sections
                    .iter()
                    .map(|(title, words)| DocumentSection {
                        title: (*title).into(),
                        word_count: *words,
                        ..Default::default()
                    })
                    .collect(),
                total_words: 0,
                ..Default::default()
            };
            ctx.emit(event.reply(Payload::Plan(plan)));
            Ok(())
        }
    }

    #[derive(Clone, Copy, Default)]
    struct Writer {
        fail_on: Option<&'static str>,
        /// Sections the writer sits on, ignoring cancellation.
        stall_on: &'static [&'static str],
    }

    impl Writer {
        fn failing(title: &'static str) -> Self {
            Self {
                fail_on: Some(title),
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl RoleHandler for Writer {
        async fn handle(&self, event: Event, ctx: &RoleContext) -> Result<()> {
            let Payload::SectionAssignment { section, .. } = event.payload() else {
                return Err(LongformError::protocol("expected assignment"));
            };
            if self.fail_on == Some(section.title.as_str()) {
                return Err(LongformError::Completion("model unavailable".into()));
            }
            if self.stall_on.contains(&section.title.as_str()) {
                tokio::time::sleep(Duration::from_secs(10)).await;
                return Ok(());
            }
            let content = format!("Text about {}.", section.title);
            ctx.emit(event.reply(Payload::SectionContent(SectionContent {
                section_id: section.id.clone(),
                title: section.title.clone(),
                word_count: count_words(&content),
                content,
                sources: vec![],
                written_by: event.config().writer_id.clone().unwrap_or_default(),
                completed_at: Utc::now(),
            })));
            Ok(())
        }
    }

    struct Editor;

    #[async_trait]
    impl RoleHandler for Editor {
        async fn handle(&self, event: Event, ctx: &RoleContext) -> Result<()> {
            let Payload::EditRequest { plan, sections } = event.payload() else {
                return Err(LongformError::protocol("expected edit request"));
            };
            let content = sections
                .iter()
                .map(|s| format!("## {}\n\n{}", s.title, s.content))
                .collect::<Vec<_>>()
                .join("\n\n");
            let document = Document {
                metadata: DocumentMetadata {
                    title: plan.title.clone(),
                    word_count: count_words(&content),
                    keywords: plan.keywords.clone(),
                    sources: vec![],
                },
                summary: String::new(),
                content,
                sections: sections.clone(),
            };
            ctx.emit(event.reply(Payload::FinalArticle(Box::new(document))));
            Ok(())
        }
    }

    fn orchestrator(
        planner_delay: Duration,
        writer: Writer,
        options: GenerationOptions,
    ) -> Orchestrator {
        let writers: Vec<Arc<dyn RoleHandler>> = (0..3)
            .map(|_| Arc::new(writer) as Arc<dyn RoleHandler>)
            .collect();
        Orchestrator::new(
            Arc::new(Planner {
                delay: planner_delay,
                sections: vec![("Intro", 100), ("Body", 300), ("Conclusion", 100)],
            }),
            writers,
            Arc::new(Editor),
            options,
        )
        .expect("orchestrator")
    }

    #[tokio::test]
    async fn generates_document_in_plan_order() {
        let events = Arc::new(Mutex::new(Vec::<ProgressEvent>::new()));
        let sink_events = Arc::clone(&events);
        let orch = orchestrator(Duration::ZERO, Writer::default(), GenerationOptions::default())
            .with_progress(Arc::new(move |e: ProgressEvent| {
                sink_events.lock().unwrap().push(e);
            }));

        let doc = write_document(&orch, "rust").await.expect("document");
        assert_eq!(doc.metadata.title, "On rust");
        let ids: Vec<&str> = doc.sections.iter().map(|s| s.section_id.as_str()).collect();
        assert_eq!(ids, ["intro", "body", "conclusion"]);
        assert_eq!(doc.sections[1].written_by, "writer_1");

        let events = events.lock().unwrap();
        let last = events.last().expect("progress events");
        assert_eq!(last.phase, Phase::Completed);
        assert_eq!(last.progress, 1.0);
        assert!(events.iter().any(|e| e.phase == Phase::Writing));
    }

    #[tokio::test]
    async fn section_failure_yields_error_and_no_document() {
        let orch = orchestrator(Duration::ZERO, Writer::failing("Body"), GenerationOptions::default());
        let err = write_document(&orch, "rust").await.unwrap_err();
        assert!(err.to_string().contains("model unavailable"));
        assert!(err.to_string().contains("writer_1"));
    }

    #[tokio::test]
    async fn timeout_shorter_than_planning_returns_timeout() {
        let options = GenerationOptions {
            timeout: Duration::from_millis(30),
            ..Default::default()
        };
        let orch = orchestrator(Duration::from_millis(300), Writer::default(), options);
        let err = write_document(&orch, "rust").await.unwrap_err();
        assert!(matches!(err, LongformError::Timeout));
    }

    #[tokio::test]
    async fn external_cancellation_stops_the_run() {
        let orch = orchestrator(Duration::from_millis(300), Writer::default(), GenerationOptions::default());
        let scope = Scope::new();
        orch.start(&scope).await.expect("start");

        let canceller = scope.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });
        let err = orch.generate("rust", &scope).await.unwrap_err();
        assert!(matches!(err, LongformError::Cancelled));
        orch.stop().await.expect("stop");
    }

    #[tokio::test]
    async fn invalid_options_are_rejected_up_front() {
        let writers: Vec<Arc<dyn RoleHandler>> = vec![Arc::new(Writer::default())];
        let result = Orchestrator::new(
            Arc::new(Planner {
                delay: Duration::ZERO,
                sections: vec![],
            }),
            writers,
            Arc::new(Editor),
            GenerationOptions {
                max_concurrent_writers: 0,
                ..Default::default()
            },
        );
        assert!(matches!(result, Err(LongformError::Validation { .. })));
    }

    #[tokio::test]
    async fn empty_plan_fails_validation() {
        let writers: Vec<Arc<dyn RoleHandler>> = vec![Arc::new(Writer::default())];
        let orch = Orchestrator::new(
            Arc::new(Planner {
                delay: Duration::ZERO,
                sections: vec![],
            }),
            writers,
            Arc::new(Editor),
            GenerationOptions::default(),
        )
        .expect("orchestrator");
        let err = write_document(&orch, "rust").await.unwrap_err();
        assert!(err.to_string().contains("at least one section"));
    }

    #[tokio::test]
    async fn stop_without_start_is_clean() {
        let orch = orchestrator(Duration::ZERO, Writer::default(), GenerationOptions::default());
        orch.stop().await.expect("stop");
    }

    #[tokio::test]
    async fn stop_collects_every_role_that_fails_to_stop() {
        let writer = Writer {
            stall_on: &["Intro", "Conclusion"],
            ..Writer::default()
        };
        let options = GenerationOptions {
            timeout: Duration::from_millis(100),
            ..Default::default()
        };
        let orch = orchestrator(Duration::ZERO, writer, options)
            .with_stop_grace(Duration::from_millis(30));
        let scope = Scope::new();
        orch.start(&scope).await.expect("start");

        let err = orch.generate("rust", &scope).await.unwrap_err();
        assert!(matches!(err, LongformError::Timeout));

        let began = std::time::Instant::now();
        let Err(LongformError::Teardown { mut errors }) = orch.stop().await else {
            panic!("expected a teardown error");
        };
        assert!(began.elapsed() < Duration::from_secs(2));
        errors.sort();
        assert_eq!(errors.len(), 2);
        assert!(errors[0].contains("writer_0") && errors[0].contains("did not stop"));
        assert!(errors[1].contains("writer_2") && errors[1].contains("did not stop"));
    }

    #[tokio::test]
    async fn run_error_survives_a_failed_teardown() {
        let writer = Writer {
            fail_on: Some("Body"),
            stall_on: &["Conclusion"],
        };
        let orch = orchestrator(Duration::ZERO, writer, GenerationOptions::default())
            .with_stop_grace(Duration::from_millis(30));

        let err = write_document(&orch, "rust").await.unwrap_err();
        assert!(err.to_string().contains("model unavailable"));
        assert!(err.to_string().contains("writer_1"));
        assert!(!matches!(err, LongformError::Teardown { .. }));
    }
}
