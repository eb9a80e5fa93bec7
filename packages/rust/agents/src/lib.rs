//! Role agents for Longform: the completion client, the tool loop, and the
//! planner, writer and editor role handlers the orchestrator drives.

pub mod breaker;
pub mod completion;
pub mod editor;
pub mod http;
pub mod limit;
pub mod parse;
pub mod planner;
pub mod prompt;
pub mod retry;
pub mod tool_loop;
pub mod writer;

use std::sync::Arc;

use longform_core::{EventConfig, RoleHandler};
use longform_shared::{AppConfig, CompletionConfig, Result, ToolSet};

pub use breaker::CircuitBreakerClient;
pub use completion::{
    CompletionClient, CompletionRequest, CompletionResponse, Message, MessageRole, ResponseSchema,
    ToolCall,
};
pub use editor::EditorRole;
pub use http::HttpCompletionClient;
pub use limit::RateLimitedClient;
pub use planner::PlannerRole;
pub use retry::{RetryPolicy, RetryingClient};
pub use tool_loop::{LoopOptions, RESEARCH_MIN_ITERATIONS, run_tool_loop};
pub use writer::WriterRole;

/// Sampling and iteration settings shared by the roles.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RoleSettings {
    pub temperature: f32,
    pub editor_temperature: f32,
    pub max_iterations: usize,
}

impl Default for RoleSettings {
    fn default() -> Self {
        Self::from(&CompletionConfig::default())
    }
}

impl From<&CompletionConfig> for RoleSettings {
    fn from(config: &CompletionConfig) -> Self {
        Self {
            temperature: config.temperature,
            editor_temperature: editor::EDITOR_TEMPERATURE,
            max_iterations: config.max_iterations,
        }
    }
}

/// The role's own tools plus whatever the run forwards, plus knowledge
/// base tools when the run has one.
pub(crate) fn tools_for(own: &ToolSet, config: &EventConfig) -> ToolSet {
    let mut tools = own.clone();
    tools.extend(&config.tools);
    if let Some(kb) = &config.knowledge {
        tools.extend(&longform_tools::knowledge_tools(Arc::clone(kb)));
    }
    tools
}

/// Handlers for one run: a planner, `writer_pool_size` writers and an editor.
pub struct RoleSet {
    pub planner: Arc<dyn RoleHandler>,
    pub writers: Vec<Arc<dyn RoleHandler>>,
    pub editor: Arc<dyn RoleHandler>,
}

/// Build every role over the configured HTTP completion client. From the
/// outside in: circuit breaker, rate limit, retries.
pub fn build_roles(config: &AppConfig, api_key: &str, research: ToolSet) -> Result<RoleSet> {
    Ok(roles_with_client(resilient_client(config, api_key)?, config, research))
}

pub fn resilient_client(config: &AppConfig, api_key: &str) -> Result<Arc<dyn CompletionClient>> {
    let completion = &config.completion;
    let http = HttpCompletionClient::from_config(completion, api_key)?;
    let retrying = RetryingClient::new(http, RetryPolicy::from(completion));
    let paced = RateLimitedClient::from_config(retrying, completion);
    Ok(Arc::new(CircuitBreakerClient::from_config(paced, completion)))
}

/// Build every role over an existing client.
pub fn roles_with_client(
    client: Arc<dyn CompletionClient>,
    config: &AppConfig,
    research: ToolSet,
) -> RoleSet {
    let settings = RoleSettings::from(&config.completion);
    let writers = (0..config.defaults.writer_pool_size.max(1))
        .map(|_| {
            Arc::new(WriterRole::new(Arc::clone(&client), research.clone(), settings))
                as Arc<dyn RoleHandler>
        })
        .collect();

    RoleSet {
        planner: Arc::new(PlannerRole::new(Arc::clone(&client), research, settings)),
        writers,
        editor: Arc::new(EditorRole::new(client, settings)),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use longform_core::{ProgressEvent, ProgressSink};
    use longform_shared::{LongformError, Result};

    use crate::completion::{CompletionClient, CompletionRequest, CompletionResponse, Message};

    /// Replays canned assistant messages and records every request.
    pub struct ScriptedClient {
        replies: Mutex<VecDeque<Message>>,
        requests: Mutex<Vec<CompletionRequest>>,
    }

    impl ScriptedClient {
        pub fn new(replies: Vec<Message>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                requests: Mutex::new(Vec::new()),
            }
        }

        pub fn requests(&self) -> Vec<CompletionRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CompletionClient for ScriptedClient {
        async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
            self.requests.lock().unwrap().push(request);
            let message = self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| LongformError::Completion("script exhausted".into()))?;
            Ok(CompletionResponse {
                message,
                finish_reason: Some("stop".into()),
            })
        }
    }

    pub fn collecting_sink() -> (Arc<dyn ProgressSink>, Arc<Mutex<Vec<ProgressEvent>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink_events = Arc::clone(&events);
        let sink = move |event: ProgressEvent| sink_events.lock().unwrap().push(event);
        (Arc::new(sink), events)
    }
}
