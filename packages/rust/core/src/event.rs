//! Immutable messages exchanged between the orchestrator and its roles.
//!
//! Every [`Event`] has a fresh [`EventId`]; a response carries the ID of the
//! request it answers as its `origin`. The attached [`EventConfig`] is the
//! run's settings, shared read-only by every event of the run.

use std::sync::Arc;

use longform_knowledge::KnowledgeBase;
use longform_shared::{
    Document, DocumentPlan, DocumentSection, LongformError, ResearchDepth, Result, RoleKind,
    SectionContent, ToolSet,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::progress::ProgressTracker;

/// Time-sortable event identifier (UUID v7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub Uuid);

impl EventId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Run settings attached to every event.
#[derive(Clone)]
pub struct EventConfig {
    pub subject: String,
    pub target_word_count: u32,
    pub research_depth: ResearchDepth,
    pub style_guidelines: Option<String>,
    pub additional_context: Option<String>,
    pub role: RoleKind,
    /// Set on section assignments; names the writer that received it.
    pub writer_id: Option<String>,
    pub knowledge: Option<Arc<KnowledgeBase>>,
    pub tools: ToolSet,
    pub progress: ProgressTracker,
}

impl EventConfig {
    pub fn new(subject: impl Into<String>, role: RoleKind) -> Self {
        Self {
            subject: subject.into(),
            target_word_count: 1500,
            research_depth: ResearchDepth::default(),
            style_guidelines: None,
            additional_context: None,
            role,
            writer_id: None,
            knowledge: None,
            tools: ToolSet::new(),
            progress: ProgressTracker::default(),
        }
    }

    /// Copy of this config addressed to another role.
    pub fn for_role(&self, role: RoleKind) -> Arc<Self> {
        let mut config = self.clone();
        config.role = role;
        config.writer_id = None;
        Arc::new(config)
    }

    /// Copy of this config addressed to a specific writer.
    pub fn for_writer(&self, writer_id: &str) -> Arc<Self> {
        let mut config = self.clone();
        config.role = RoleKind::Writer;
        config.writer_id = Some(writer_id.to_string());
        Arc::new(config)
    }
}

impl std::fmt::Debug for EventConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventConfig")
            .field("subject", &self.subject)
            .field("target_word_count", &self.target_word_count)
            .field("research_depth", &self.research_depth)
            .field("role", &self.role)
            .field("writer_id", &self.writer_id)
            .field("has_knowledge", &self.knowledge.is_some())
            .field("tools", &self.tools)
            .finish_non_exhaustive()
    }
}

/// What an event carries.
#[derive(Debug, Clone)]
pub enum Payload {
    /// Initiating request to the planner; the text is the subject.
    Message(String),
    /// Planner response.
    Plan(DocumentPlan),
    /// Request to write one section; `index` is its position in the plan.
    SectionAssignment {
        index: usize,
        section: DocumentSection,
        plan: Arc<DocumentPlan>,
    },
    /// Writer response.
    SectionContent(SectionContent),
    /// Request to the editor: the plan and every section in plan order.
    EditRequest {
        plan: Arc<DocumentPlan>,
        sections: Vec<SectionContent>,
    },
    /// Editor response.
    FinalArticle(Box<Document>),
}

impl Payload {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Message(_) => "message",
            Self::Plan(_) => "document_plan",
            Self::SectionAssignment { .. } => "section_assignment",
            Self::SectionContent(_) => "section_content",
            Self::EditRequest { .. } => "edit_request",
            Self::FinalArticle(_) => "final_article",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Event {
    id: EventId,
    origin: Option<EventId>,
    config: Arc<EventConfig>,
    payload: Payload,
}

impl Event {
    /// A new request with no origin.
    pub fn new(config: Arc<EventConfig>, payload: Payload) -> Self {
        Self {
            id: EventId::new(),
            origin: None,
            config,
            payload,
        }
    }

    /// A response to this event: fresh ID, origin set to this event's ID.
    pub fn reply(&self, payload: Payload) -> Self {
        Self {
            id: EventId::new(),
            origin: Some(self.id),
            config: Arc::clone(&self.config),
            payload,
        }
    }

    pub fn id(&self) -> EventId {
        self.id
    }

    pub fn origin(&self) -> Option<EventId> {
        self.origin
    }

    pub fn config(&self) -> &Arc<EventConfig> {
        &self.config
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn into_payload(self) -> Payload {
        self.payload
    }

    pub fn into_plan(self) -> Result<DocumentPlan> {
        match self.payload {
            Payload::Plan(plan) => Ok(plan),
            other => Err(unexpected("document_plan", &other)),
        }
    }

    pub fn into_section_content(self) -> Result<SectionContent> {
        match self.payload {
            Payload::SectionContent(content) => Ok(content),
            other => Err(unexpected("section_content", &other)),
        }
    }

    pub fn into_document(self) -> Result<Document> {
        match self.payload {
            Payload::FinalArticle(document) => Ok(*document),
            other => Err(unexpected("final_article", &other)),
        }
    }
}

fn unexpected(expected: &str, got: &Payload) -> LongformError {
    LongformError::protocol(format!(
        "expected {expected} response, got {}",
        got.kind()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_links_to_request() {
        let config = Arc::new(EventConfig::new("subject", RoleKind::Planner));
        let request = Event::new(config, Payload::Message("subject".into()));
        let response = request.reply(Payload::Plan(DocumentPlan::default()));

        assert_eq!(request.origin(), None);
        assert_eq!(response.origin(), Some(request.id()));
        assert_ne!(response.id(), request.id());
        assert!(Arc::ptr_eq(request.config(), response.config()));
    }

    #[test]
    fn wrong_payload_is_a_protocol_error() {
        let config = Arc::new(EventConfig::new("s", RoleKind::Planner));
        let event = Event::new(config, Payload::Message("hi".into()));
        let err = event.into_plan().unwrap_err();
        assert!(matches!(err, LongformError::Protocol { .. }));
        assert!(err.to_string().contains("got message"));
    }

    #[test]
    fn writer_config_carries_identity() {
        let base = EventConfig::new("s", RoleKind::Planner);
        let writer = base.for_writer("writer_2");
        assert_eq!(writer.role, RoleKind::Writer);
        assert_eq!(writer.writer_id.as_deref(), Some("writer_2"));
        assert_eq!(base.for_role(RoleKind::Editor).writer_id, None);
    }
}
