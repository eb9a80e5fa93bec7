//! Fixed-size writer pool and the concurrent writing phase.
//!
//! Sections are assigned round-robin by plan index. A semaphore created per
//! run bounds how many assignments are in flight. Each task writes its
//! result into its own pre-sized slot, so the assembled sections are always
//! in plan order regardless of completion order.

use std::sync::{Arc, Mutex, OnceLock};

use longform_shared::{DocumentPlan, LongformError, Result, SectionContent};
use serde_json::json;
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument};

use crate::event::{Event, EventConfig, Payload};
use crate::progress::{self, Phase, WRITING_WEIGHT, base_phase_progress};
use crate::role::{Role, RoleHandler};
use crate::scope::Scope;

/// Shared between section tasks; the lock is never held across a role call.
#[derive(Default)]
struct Tally {
    completed: usize,
    first_error: Option<LongformError>,
}

pub struct WriterPool {
    writers: Vec<Arc<Role>>,
}

impl WriterPool {
    /// Wrap `handlers` as roles named `writer_0`, `writer_1`, ...
    pub fn new(handlers: Vec<Arc<dyn RoleHandler>>) -> Result<Self> {
        if handlers.is_empty() {
            return Err(LongformError::validation(
                "writer pool needs at least one writer",
            ));
        }
        let writers = handlers
            .into_iter()
            .enumerate()
            .map(|(i, handler)| Arc::new(Role::new(format!("writer_{i}"), handler)))
            .collect();
        Ok(Self { writers })
    }

    pub fn len(&self) -> usize {
        self.writers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writers.is_empty()
    }

    pub fn roles(&self) -> &[Arc<Role>] {
        &self.writers
    }

    /// Writer responsible for the section at `index`.
    pub fn select(&self, index: usize) -> &Arc<Role> {
        &self.writers[index % self.writers.len()]
    }

    /// Write every section of `plan` concurrently, at most `max_concurrent`
    /// at a time, and return the results in plan order.
    ///
    /// The first failure cancels the remaining assignments; the phase then
    /// returns that error and discards every partial result.
    #[instrument(skip_all, fields(sections = plan.sections.len(), max_concurrent = max_concurrent))]
    pub async fn write_sections(
        &self,
        plan: &Arc<DocumentPlan>,
        config: &EventConfig,
        scope: &Scope,
        max_concurrent: usize,
    ) -> Result<Vec<SectionContent>> {
        if max_concurrent == 0 {
            return Err(LongformError::validation(
                "max concurrent writers must be at least 1",
            ));
        }

        let total = plan.sections.len();
        let limiter = Arc::new(Semaphore::new(max_concurrent));
        let slots: Arc<Vec<OnceLock<SectionContent>>> =
            Arc::new((0..total).map(|_| OnceLock::new()).collect());
        let tally = Arc::new(Mutex::new(Tally::default()));
        let phase_scope = scope.child();
        let tracker = config.progress.clone();

        let mut handles = Vec::with_capacity(total);
        for (index, section) in plan.sections.iter().enumerate() {
            let writer = Arc::clone(self.select(index));
            let request = Event::new(
                config.for_writer(writer.name()),
                Payload::SectionAssignment {
                    index,
                    section: section.clone(),
                    plan: Arc::clone(plan),
                },
            );
            let expected_id = section.id.clone();
            let limiter = Arc::clone(&limiter);
            let slots = Arc::clone(&slots);
            let tally = Arc::clone(&tally);
            let scope = phase_scope.clone();
            let tracker = tracker.clone();

            handles.push(tokio::spawn(async move {
                let outcome = async {
                    let _permit = tokio::select! {
                        biased;
                        err = scope.cancelled() => return Err(err),
                        permit = limiter.acquire_owned() => permit
                            .map_err(|_| LongformError::protocol("writer limiter closed"))?,
                    };
                    debug!(index, writer = writer.name(), "section assigned");
                    let content = writer.call(request, &scope).await?.into_section_content()?;
                    if content.section_id != expected_id {
                        return Err(LongformError::protocol(format!(
                            "{} answered section '{}' for assignment '{}'",
                            writer.name(),
                            content.section_id,
                            expected_id
                        )));
                    }
                    Ok(content)
                }
                .await;

                let poisoned = || LongformError::protocol("section tally poisoned");
                match outcome {
                    Ok(content) => {
                        let title = content.title.clone();
                        let words = content.word_count;
                        let _ = slots[index].set(content);
                        let completed = {
                            let mut tally = tally.lock().map_err(|_| poisoned())?;
                            tally.completed += 1;
                            tally.completed
                        };
                        tracker.emit_sub_progress(
                            Phase::Writing,
                            format!("Completed section {completed}/{total}: {title}"),
                            base_phase_progress(Phase::Writing),
                            completed as f64 / total as f64,
                            WRITING_WEIGHT,
                            progress::details([
                                ("section_index", json!(index)),
                                ("completed_sections", json!(completed)),
                                ("total_sections", json!(total)),
                                ("word_count", json!(words)),
                            ]),
                        );
                    }
                    Err(e) => {
                        let mut tally = tally.lock().map_err(|_| poisoned())?;
                        if tally.first_error.is_none() {
                            tally.first_error = Some(e);
                            scope.cancel();
                        }
                    }
                }
                Ok::<_, LongformError>(())
            }));
        }

        for handle in handles {
            let failure = match handle.await {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => e,
                Err(e) => LongformError::protocol(format!("section task failed: {e}")),
            };
            phase_scope.cancel();
            let mut tally = tally
                .lock()
                .map_err(|_| LongformError::protocol("section tally poisoned"))?;
            if tally.first_error.is_none() {
                tally.first_error = Some(failure);
            }
        }

        let mut tally = tally
            .lock()
            .map_err(|_| LongformError::protocol("section tally poisoned"))?;
        if let Some(e) = tally.first_error.take() {
            return Err(e);
        }
        drop(tally);

        let sections = slots
            .iter()
            .enumerate()
            .map(|(i, slot)| {
                slot.get()
                    .cloned()
                    .ok_or_else(|| LongformError::protocol(format!("section {i} has no content")))
            })
            .collect::<Result<Vec<_>>>()?;

        info!(sections = sections.len(), "all sections written");
        Ok(sections)
    }
}
