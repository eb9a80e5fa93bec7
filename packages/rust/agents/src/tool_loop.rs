//! Completion → tool calls → tool results, until the model answers.

use longform_core::Scope;
use longform_shared::{LongformError, Result, ToolSet};
use tracing::{debug, instrument, warn};

use crate::completion::{CompletionClient, CompletionRequest, Message, ResponseSchema};

/// Rounds the planner and writers spend before their answer is accepted.
pub const RESEARCH_MIN_ITERATIONS: usize = 2;

const KEEP_RESEARCHING: &str = "Before answering, keep researching: use the available tools \
to check and extend what you have, then give your final answer.";

#[derive(Debug, Clone)]
pub struct LoopOptions {
    /// Completion rounds, the final answer included. At least 1.
    pub max_iterations: usize,
    /// An answer arriving before this many rounds is sent back with a
    /// request to keep researching. Ignored without tools, and never
    /// applied to the last round.
    pub min_iterations: usize,
    pub temperature: f32,
    pub schema: Option<ResponseSchema>,
}

/// Drive `client` until it returns an answer without tool calls.
///
/// Tool failures are reported back to the model as the tool result rather
/// than aborting the loop. The last round is sent without tools so the
/// model has to answer. Every completion races `scope`.
#[instrument(skip_all, fields(
    max_iterations = options.max_iterations,
    min_iterations = options.min_iterations,
    tools = tools.len()
))]
pub async fn run_tool_loop(
    client: &dyn CompletionClient,
    tools: &ToolSet,
    mut messages: Vec<Message>,
    options: &LoopOptions,
    scope: &Scope,
) -> Result<String> {
    let rounds = options.max_iterations.max(1);

    for round in 0..rounds {
        scope.check()?;
        let last = round + 1 == rounds;

        let mut request = CompletionRequest::new(messages.clone())
            .with_temperature(options.temperature)
            .with_schema(options.schema.clone());
        if !last && !tools.is_empty() {
            request = request.with_tools(tools.definitions());
        }

        let response = scope.run(client.complete(request)).await?;
        let message = response.message;

        let too_early = round + 1 < options.min_iterations && !last && !tools.is_empty();
        if message.tool_calls.is_empty() && too_early {
            debug!(round, "early answer, asking for more research");
            messages.push(message);
            messages.push(Message::user(KEEP_RESEARCHING));
            continue;
        }

        if message.tool_calls.is_empty() {
            let answer = message.content().trim();
            if answer.is_empty() {
                return Err(LongformError::Completion("model returned an empty answer".into()));
            }
            debug!(round, "final answer received");
            return Ok(answer.to_string());
        }

        let calls = message.tool_calls.clone();
        messages.push(message);
        for call in calls {
            debug!(round, tool = %call.function.name, "tool call");
            let result = scope
                .run(async {
                    Ok(tools
                        .invoke(&call.function.name, &call.function.arguments)
                        .await)
                })
                .await?;
            let content = match result {
                Ok(text) => text,
                Err(e) => {
                    warn!(tool = %call.function.name, error = %e, "tool call failed");
                    format!("Error: {e}")
                }
            };
            messages.push(Message::tool_result(call.id, content));
        }
    }

    Err(LongformError::Completion(format!(
        "no final answer after {rounds} rounds"
    )))
}
