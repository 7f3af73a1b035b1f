use datachat_core::config::AgentDefaults;
use datachat_core::types::{
    FunctionCall, FunctionResponse, ModelRequest, ToolSignature, Turn,
};
use datachat_core::Result;
use datachat_providers::Provider;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Executes tool calls requested by the model. Implementations report
/// execution failures inside the returned payload (`{"error": ...}`) so the
/// model can react; they never abort the loop.
pub trait ToolDispatch: Send + Sync {
    fn dispatch(&self, name: &str, arguments: &Value) -> Value;
}

/// Dispatcher for agents that declare no tools.
pub struct NoTools;

impl ToolDispatch for NoTools {
    fn dispatch(&self, name: &str, _arguments: &Value) -> Value {
        json!({"error": format!("unknown tool: {}", name)})
    }
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub max_tool_iterations: u32,
    pub llm_max_retries: u32,
    pub llm_retry_delay_ms: u64,
}

impl From<&AgentDefaults> for RunOptions {
    fn from(defaults: &AgentDefaults) -> Self {
        Self {
            max_tool_iterations: defaults.max_tool_iterations,
            llm_max_retries: defaults.llm_max_retries,
            llm_retry_delay_ms: defaults.llm_retry_delay_ms,
        }
    }
}

/// Drive one agent to completion: call the model, execute any tool calls it
/// asks for, feed the results back, and repeat until it answers in plain
/// text or the iteration cap is hit.
///
/// Retry of transient model errors lives here, in the caller; the provider
/// itself never retries. When the cap is hit the history ends with the last
/// tool results.
pub async fn run_agent_loop(
    provider: &dyn Provider,
    system: &str,
    history: &mut Vec<Turn>,
    tools: &[ToolSignature],
    dispatch: &dyn ToolDispatch,
    options: &RunOptions,
) -> Result<String> {
    let mut call_counter = 0u64;
    let mut last_content: Option<String> = None;

    for iteration in 0..options.max_tool_iterations {
        debug!(iteration, "Model call iteration");

        let request = ModelRequest {
            system: Some(system.to_string()),
            turns: history.clone(),
            tools: tools.to_vec(),
            temperature: None,
            max_tokens: None,
        };

        let mut reply_opt = None;
        let mut last_error = None;
        for attempt in 0..=options.llm_max_retries {
            if attempt > 0 {
                warn!(attempt, iteration, "Retrying model call");
                tokio::time::sleep(Duration::from_millis(options.llm_retry_delay_ms)).await;
            }
            match provider.chat(&request).await {
                Ok(r) => {
                    reply_opt = Some(r);
                    break;
                }
                Err(e) => {
                    warn!(error = %e, attempt, iteration, "Model call failed");
                    last_error = Some(e);
                }
            }
        }

        let reply = match reply_opt {
            Some(r) => r,
            None => return Err(last_error.expect("no reply and no error")),
        };

        info!(
            content_len = reply.content.as_deref().map(str::len).unwrap_or(0),
            tool_calls_count = reply.tool_calls.len(),
            finish_reason = reply.finish_reason.as_deref().unwrap_or(""),
            "Model reply received"
        );

        if reply.tool_calls.is_empty() {
            let answer = reply.content.unwrap_or_default();
            history.push(Turn::assistant(&answer));
            return Ok(answer);
        }

        let mut calls = Vec::with_capacity(reply.tool_calls.len());
        let mut responses = Vec::with_capacity(reply.tool_calls.len());
        for invocation in &reply.tool_calls {
            let id = format!("call_{}", call_counter);
            call_counter += 1;
            info!(tool = %invocation.name, id = %id, "Executing tool call");
            let result = dispatch.dispatch(&invocation.name, &invocation.arguments);
            calls.push(FunctionCall {
                id: id.clone(),
                name: invocation.name.clone(),
                arguments: invocation.arguments.clone(),
            });
            responses.push(FunctionResponse {
                id,
                name: invocation.name.clone(),
                response: result,
            });
        }
        history.push(Turn::assistant_calls(
            reply.content.as_deref().unwrap_or(""),
            calls,
        ));
        history.push(Turn::tool_results(responses));
        last_content = reply.content;
    }

    warn!(max = options.max_tool_iterations, "Reached max tool iterations");
    Ok(last_content
        .unwrap_or_else(|| "I've reached the maximum number of tool iterations.".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use datachat_core::types::{ModelReply, ToolInvocation, TurnRole};
    use datachat_core::Error;
    use std::sync::Mutex;

    /// Provider that replays a fixed sequence of results.
    struct ScriptedProvider {
        replies: Mutex<Vec<Result<ModelReply>>>,
    }

    impl ScriptedProvider {
        fn new(replies: Vec<Result<ModelReply>>) -> Self {
            Self {
                replies: Mutex::new(replies),
            }
        }
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        async fn chat(&self, _request: &ModelRequest) -> Result<ModelReply> {
            self.replies.lock().unwrap().remove(0)
        }
    }

    struct EchoDispatch;

    impl ToolDispatch for EchoDispatch {
        fn dispatch(&self, name: &str, arguments: &Value) -> Value {
            json!({"tool": name, "args": arguments})
        }
    }

    fn options() -> RunOptions {
        RunOptions {
            max_tool_iterations: 5,
            llm_max_retries: 1,
            llm_retry_delay_ms: 0,
        }
    }

    fn text_reply(content: &str) -> ModelReply {
        ModelReply {
            content: Some(content.to_string()),
            ..Default::default()
        }
    }

    fn tool_reply(name: &str) -> ModelReply {
        ModelReply {
            tool_calls: vec![ToolInvocation {
                name: name.to_string(),
                arguments: json!({}),
            }],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_plain_answer_ends_loop() {
        let provider = ScriptedProvider::new(vec![Ok(text_reply("All done."))]);
        let mut history = vec![Turn::user("hi")];
        let answer = run_agent_loop(&provider, "sys", &mut history, &[], &NoTools, &options())
            .await
            .unwrap();
        assert_eq!(answer, "All done.");
        // User turn plus the recorded assistant answer.
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].role, TurnRole::Assistant);
    }

    #[tokio::test]
    async fn test_tool_calls_recorded_and_fed_back() {
        let provider = ScriptedProvider::new(vec![
            Ok(tool_reply("list_tables")),
            Ok(text_reply("There are 2 tables.")),
        ]);
        let mut history = vec![Turn::user("what tables exist?")];
        let answer = run_agent_loop(
            &provider,
            "sys",
            &mut history,
            &[ToolSignature::new("list_tables", "List all tables")],
            &EchoDispatch,
            &options(),
        )
        .await
        .unwrap();
        assert_eq!(answer, "There are 2 tables.");
        // user, assistant tool-call turn, tool results, final assistant.
        assert_eq!(history.len(), 4);
        assert_eq!(history[1].calls.len(), 1);
        assert_eq!(history[1].calls[0].id, "call_0");
        assert_eq!(history[2].role, TurnRole::Tool);
        assert_eq!(history[2].responses[0].id, "call_0");
        assert_eq!(history[2].responses[0].response["tool"], "list_tables");
    }

    #[tokio::test]
    async fn test_retry_then_success() {
        let provider = ScriptedProvider::new(vec![
            Err(Error::Transport("connection refused".to_string())),
            Ok(text_reply("ok")),
        ]);
        let mut history = vec![Turn::user("hi")];
        let answer = run_agent_loop(&provider, "sys", &mut history, &[], &NoTools, &options())
            .await
            .unwrap();
        assert_eq!(answer, "ok");
    }

    #[tokio::test]
    async fn test_retries_exhausted_propagates_error() {
        let provider = ScriptedProvider::new(vec![
            Err(Error::Transport("down".to_string())),
            Err(Error::Transport("down".to_string())),
        ]);
        let mut history = vec![Turn::user("hi")];
        let err = run_agent_loop(&provider, "sys", &mut history, &[], &NoTools, &options())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
    }

    #[tokio::test]
    async fn test_iteration_cap_leaves_tool_turn_last() {
        let replies = (0..5).map(|_| Ok(tool_reply("list_tables"))).collect();
        let provider = ScriptedProvider::new(replies);
        let mut history = vec![Turn::user("loop forever")];
        let answer = run_agent_loop(&provider, "sys", &mut history, &[], &EchoDispatch, &options())
            .await
            .unwrap();
        assert!(answer.contains("maximum number of tool iterations"));
        assert_eq!(history.last().unwrap().role, TurnRole::Tool);
    }
}
