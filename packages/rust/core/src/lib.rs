//! Pipeline orchestration for Longform.
//!
//! This crate coordinates the planner, writer and editor roles: the event
//! protocol they speak, the role runtime they run in, the writer pool that
//! bounds concurrent section writing, weighted progress reporting, and the
//! [`Orchestrator`] that ties them into one run.

pub mod event;
pub mod orchestrator;
pub mod pool;
pub mod progress;
pub mod role;
pub mod scope;

pub use event::{Event, EventConfig, EventId, Payload};
pub use orchestrator::{Orchestrator, write_document};
pub use pool::WriterPool;
pub use progress::{
    EDITING_WEIGHT, PLANNING_WEIGHT, Phase, ProgressEvent, ProgressSink, ProgressTracker,
    WRITING_WEIGHT, base_phase_progress, progress_channel,
};
pub use role::{Role, RoleContext, RoleFailure, RoleHandler};
pub use scope::{CancelReason, Scope};
