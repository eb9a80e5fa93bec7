//! Role runtime: a handler plus input queue, output stream, error stream,
//! and an explicit start/stop lifecycle.
//!
//! Each submitted event is handled on its own task, so a role may answer
//! requests out of order. Responses are broadcast on [`Role::output`] and
//! failures on [`Role::errors`]; both carry the origin request ID, which
//! [`Role::call`] uses to pick out its own answer.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use longform_shared::{LongformError, Result};
use tokio::sync::{broadcast, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, instrument, warn};

use crate::event::{Event, EventId};
use crate::scope::Scope;

const INPUT_CAPACITY: usize = 64;
const STREAM_CAPACITY: usize = 256;

/// How long [`Role::stop`] waits for in-flight handlers.
pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(5);

/// Work performed by a role for each event it receives.
#[async_trait]
pub trait RoleHandler: Send + Sync + 'static {
    /// Handle one event, emitting responses through `ctx`.
    ///
    /// An `Err` is published on the role's error stream tagged with the
    /// event's ID.
    async fn handle(&self, event: Event, ctx: &RoleContext) -> Result<()>;
}

/// Handle given to a [`RoleHandler`] for each event.
#[derive(Clone)]
pub struct RoleContext {
    name: Arc<str>,
    scope: Scope,
    outputs: broadcast::Sender<Event>,
    request: Option<EventId>,
    replied: Arc<AtomicBool>,
}

impl RoleContext {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The role's scope; cancelled when the role is stopped.
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Publish a response on the role's output stream.
    pub fn emit(&self, event: Event) {
        if self.request.is_some() && event.origin() == self.request {
            self.replied.store(true, Ordering::SeqCst);
        }
        // No subscribers means nobody is waiting for this answer.
        let _ = self.outputs.send(event);
    }

    /// Context for handling `request`, with its own reply flag.
    fn for_request(&self, request: EventId) -> Self {
        Self {
            request: Some(request),
            replied: Arc::new(AtomicBool::new(false)),
            ..self.clone()
        }
    }

    fn has_replied(&self) -> bool {
        self.replied.load(Ordering::SeqCst)
    }
}

/// A failure reported by a role for one request.
#[derive(Debug, Clone)]
pub struct RoleFailure {
    pub origin: EventId,
    pub role: String,
    pub message: String,
}

struct Running {
    scope: Scope,
    input: mpsc::Sender<Event>,
    worker: JoinHandle<()>,
}

pub struct Role {
    name: Arc<str>,
    handler: Arc<dyn RoleHandler>,
    outputs: broadcast::Sender<Event>,
    errors: broadcast::Sender<RoleFailure>,
    running: Mutex<Option<Running>>,
    issued: Mutex<HashSet<EventId>>,
    grace: Duration,
}

impl std::fmt::Debug for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Role")
            .field("name", &self.name)
            .field("running", &self.is_running())
            .finish()
    }
}

impl Role {
    pub fn new(name: impl Into<String>, handler: Arc<dyn RoleHandler>) -> Self {
        let (outputs, _) = broadcast::channel(STREAM_CAPACITY);
        let (errors, _) = broadcast::channel(STREAM_CAPACITY);
        Self {
            name: Arc::from(name.into()),
            handler,
            outputs,
            errors,
            running: Mutex::new(None),
            issued: Mutex::new(HashSet::new()),
            grace: DEFAULT_STOP_GRACE,
        }
    }

    /// Override how long [`Role::stop`] waits for in-flight handlers.
    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .map(|running| running.is_some())
            .unwrap_or(false)
    }

    /// Start accepting events. The role stops when `parent` is cancelled or
    /// [`Role::stop`] is called.
    pub fn start(&self, parent: &Scope) -> Result<()> {
        let mut running = self
            .running
            .lock()
            .map_err(|_| LongformError::role(self.name(), "role state poisoned"))?;
        if running.is_some() {
            return Err(LongformError::role(self.name(), "already started"));
        }

        let scope = parent.child();
        let (input, rx) = mpsc::channel(INPUT_CAPACITY);
        let ctx = RoleContext {
            name: Arc::clone(&self.name),
            scope: scope.clone(),
            outputs: self.outputs.clone(),
            request: None,
            replied: Arc::new(AtomicBool::new(false)),
        };
        let worker = tokio::spawn(run_worker(
            Arc::clone(&self.handler),
            ctx,
            rx,
            self.errors.clone(),
        ));

        if let Ok(mut issued) = self.issued.lock() {
            issued.clear();
        }
        *running = Some(Running {
            scope,
            input,
            worker,
        });
        debug!(role = %self.name, "role started");
        Ok(())
    }

    /// Cancel the role and wait for in-flight handlers to finish.
    ///
    /// Handlers still running after the grace period are left detached and
    /// reported as an error. Stopping a role that is not running is a no-op.
    pub async fn stop(&self) -> Result<()> {
        self.stop_within(self.grace).await
    }

    /// [`Role::stop`] with an explicit grace period.
    pub async fn stop_within(&self, grace: Duration) -> Result<()> {
        let running = self
            .running
            .lock()
            .map_err(|_| LongformError::role(self.name(), "role state poisoned"))?
            .take();
        let Some(Running {
            scope,
            input,
            worker,
        }) = running
        else {
            return Ok(());
        };

        scope.cancel();
        drop(input);

        match tokio::time::timeout(grace, worker).await {
            Ok(Ok(())) => {
                debug!(role = %self.name, "role stopped");
                Ok(())
            }
            Ok(Err(e)) => Err(LongformError::role(
                self.name(),
                format!("worker failed: {e}"),
            )),
            Err(_) => Err(LongformError::role(
                self.name(),
                format!("did not stop within {grace:?}"),
            )),
        }
    }

    /// Queue an event for handling.
    pub async fn submit(&self, event: Event) -> Result<()> {
        let input = self
            .running
            .lock()
            .map_err(|_| LongformError::role(self.name(), "role state poisoned"))?
            .as_ref()
            .map(|r| r.input.clone())
            .ok_or_else(|| LongformError::role(self.name(), "not started"))?;

        if let Ok(mut issued) = self.issued.lock() {
            issued.insert(event.id());
        }
        input
            .send(event)
            .await
            .map_err(|_| LongformError::role(self.name(), "input queue closed"))
    }

    /// Subscribe to responses. Only events emitted after subscribing are seen.
    pub fn output(&self) -> broadcast::Receiver<Event> {
        self.outputs.subscribe()
    }

    /// Subscribe to failures. Only failures after subscribing are seen.
    pub fn errors(&self) -> broadcast::Receiver<RoleFailure> {
        self.errors.subscribe()
    }

    /// Submit `event` and wait for the response whose origin is its ID.
    ///
    /// Races the response, a failure for this request, and `scope`
    /// cancellation; cancellation wins when several are ready. A response
    /// whose origin this role never issued is a protocol error.
    #[instrument(skip_all, fields(role = %self.name, kind = event.payload().kind()))]
    pub async fn call(&self, event: Event, scope: &Scope) -> Result<Event> {
        scope.check()?;

        let request = event.id();
        let mut outputs = self.output();
        let mut errors = self.errors();
        self.submit(event).await?;
        debug!(%request, "request submitted");

        loop {
            tokio::select! {
                biased;
                err = scope.cancelled() => return Err(err),
                failure = errors.recv() => match failure {
                    Ok(failure) if failure.origin == request => {
                        return Err(LongformError::role(failure.role, failure.message));
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "error stream lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(LongformError::role(self.name(), "error stream closed"));
                    }
                },
                response = outputs.recv() => match response {
                    Ok(response) => match response.origin() {
                        Some(origin) if origin == request => {
                            debug!(%request, "response received");
                            return Ok(response);
                        }
                        Some(origin) if self.was_issued(origin) => {}
                        origin => {
                            return Err(LongformError::protocol(format!(
                                "{} answered unknown request {}",
                                self.name,
                                origin.map(|o| o.to_string()).unwrap_or_else(|| "<none>".into())
                            )));
                        }
                    },
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "output stream lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(LongformError::role(self.name(), "output stream closed"));
                    }
                },
            }
        }
    }

    fn was_issued(&self, id: EventId) -> bool {
        self.issued
            .lock()
            .map(|issued| issued.contains(&id))
            .unwrap_or(false)
    }
}

async fn run_worker(
    handler: Arc<dyn RoleHandler>,
    ctx: RoleContext,
    mut rx: mpsc::Receiver<Event>,
    errors: broadcast::Sender<RoleFailure>,
) {
    let mut in_flight = JoinSet::new();
    let scope = ctx.scope.clone();

    loop {
        tokio::select! {
            biased;
            _ = scope.cancelled() => break,
            Some(_) = in_flight.join_next(), if !in_flight.is_empty() => {}
            next = rx.recv() => match next {
                Some(event) => {
                    in_flight.spawn(handle_one(
                        Arc::clone(&handler),
                        ctx.clone(),
                        event,
                        errors.clone(),
                    ));
                }
                None => break,
            },
        }
    }

    while in_flight.join_next().await.is_some() {}
}

async fn handle_one(
    handler: Arc<dyn RoleHandler>,
    ctx: RoleContext,
    event: Event,
    errors: broadcast::Sender<RoleFailure>,
) {
    let origin = event.id();
    let role = ctx.name().to_string();
    let ctx = ctx.for_request(origin);
    let watch = ctx.clone();

    // Inner task so a panicking handler is still reported against its request.
    let outcome = tokio::spawn(async move { handler.handle(event, &ctx).await }).await;

    let message = match outcome {
        Ok(Ok(())) if watch.has_replied() => return,
        Ok(Ok(())) => "finished without replying".to_string(),
        Ok(Err(e)) => e.to_string(),
        Err(e) => format!("handler panicked: {e}"),
    };
    warn!(%role, %origin, error = %message, "role handler failed");
    let _ = errors.send(RoleFailure {
        origin,
        role,
        message,
    });
}
