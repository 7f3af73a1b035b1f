use async_trait::async_trait;
use datachat_core::config::LlmConfig;
use datachat_core::types::{ModelReply, ModelRequest, TokenUsage, ToolInvocation, ToolSignature};
use datachat_core::{Error, Result};
use once_cell::sync::Lazy;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::client::build_http_client;
use crate::Provider;

/// Find the largest byte index <= `max_bytes` that is a valid char boundary.
fn truncate_at_char_boundary(s: &str, max_bytes: usize) -> usize {
    if max_bytes >= s.len() {
        return s.len();
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    end
}

/// Provider for OpenAI-compatible local model servers (LM Studio, llama.cpp
/// server, vLLM, ...). Bridges the internal turn representation onto the
/// chat-completions wire protocol and decodes the response back into text
/// and tool invocations.
pub struct LocalProvider {
    client: Client,
    base_url: String,
    model: String,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
}

impl LocalProvider {
    pub fn new(base_url: &str, model: &str) -> Self {
        Self::with_options(base_url, model, None, None, Duration::from_secs(120))
    }

    pub fn with_options(
        base_url: &str,
        model: &str,
        temperature: Option<f32>,
        max_tokens: Option<u32>,
        timeout: Duration,
    ) -> Self {
        let model = if model.is_empty() { "local-model" } else { model };
        Self {
            client: build_http_client(timeout),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            temperature,
            max_tokens,
        }
    }

    pub fn from_config(cfg: &LlmConfig) -> Self {
        Self::with_options(
            &cfg.base_url,
            &cfg.model,
            cfg.temperature,
            cfg.max_tokens,
            Duration::from_secs(cfg.timeout_secs),
        )
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    /// Always false: one complete response per call.
    stream: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool>,
}

#[derive(Debug, Clone, Serialize)]
struct WireMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl WireMessage {
    fn text(role: &str, content: String) -> Self {
        Self {
            role: role.to_string(),
            content: Some(content),
            tool_calls: None,
            tool_call_id: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireFunctionCall,
}

#[derive(Debug, Clone, Serialize)]
struct WireFunctionCall {
    name: String,
    /// Argument object, JSON-encoded as text per the wire protocol.
    arguments: String,
}

#[derive(Debug, Serialize)]
struct WireTool {
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireFunction,
}

#[derive(Debug, Serialize)]
struct WireFunction {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: WireUsage,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ResponseToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ResponseToolCall {
    function: ResponseFunctionCall,
}

#[derive(Debug, Deserialize)]
struct ResponseFunctionCall {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Default, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}

/// Fallback parameter schemas for the built-in tools, used when a declared
/// signature carries no schema of its own.
static FALLBACK_SCHEMAS: Lazy<HashMap<&'static str, Value>> = Lazy::new(|| {
    let mut schemas = HashMap::new();
    schemas.insert(
        "query_database",
        json!({
            "type": "object",
            "properties": {
                "sql": {
                    "type": "string",
                    "description": "The SQL query to execute"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of rows to return (default: 100)"
                }
            },
            "required": ["sql"]
        }),
    );
    schemas.insert(
        "get_schema",
        json!({
            "type": "object",
            "properties": {
                "table_name": {
                    "type": "string",
                    "description": "The name of the table to get schema for"
                }
            },
            "required": ["table_name"]
        }),
    );
    schemas.insert("list_tables", empty_object_schema());
    schemas.insert("describe_database", empty_object_schema());
    schemas.insert(
        "generate_chart",
        json!({
            "type": "object",
            "properties": {
                "chart_type": {
                    "type": "string",
                    "description": "Type of chart: bar, line, pie"
                },
                "title": {
                    "type": "string",
                    "description": "Chart title"
                },
                "data": {
                    "type": "string",
                    "description": "JSON string containing the chart data"
                }
            },
            "required": ["chart_type", "title", "data"]
        }),
    );
    schemas
});

fn empty_object_schema() -> Value {
    json!({"type": "object", "properties": {}})
}

/// Convert the ordered turn history into wire messages: system instruction
/// first, tool-call messages kept intact, adjacent bare-text messages of the
/// same role merged, one `tool` message per function response.
fn build_messages(request: &ModelRequest) -> Vec<WireMessage> {
    let mut messages: Vec<WireMessage> = Vec::new();

    if let Some(system) = request.system.as_deref() {
        if !system.is_empty() {
            messages.push(WireMessage::text("system", system.to_string()));
        }
    }

    for turn in &request.turns {
        let role = turn.role.wire_name();
        let text = turn.text();

        if !turn.calls.is_empty() {
            // Tool-call messages are never merged with neighbors.
            let calls = turn
                .calls
                .iter()
                .map(|c| WireToolCall {
                    id: c.id.clone(),
                    kind: "function",
                    function: WireFunctionCall {
                        name: c.name.clone(),
                        arguments: c.arguments.to_string(),
                    },
                })
                .collect();
            messages.push(WireMessage {
                role: "assistant".to_string(),
                content: if text.is_empty() { None } else { Some(text) },
                tool_calls: Some(calls),
                tool_call_id: None,
            });
        } else if !text.is_empty() {
            let merged = match messages.last_mut() {
                Some(last)
                    if last.role == role
                        && last.tool_calls.is_none()
                        && last.tool_call_id.is_none() =>
                {
                    let content = last.content.get_or_insert_with(String::new);
                    content.push('\n');
                    content.push_str(&text);
                    true
                }
                _ => false,
            };
            if !merged {
                messages.push(WireMessage::text(role, text));
            }
        }

        for response in &turn.responses {
            messages.push(WireMessage {
                role: "tool".to_string(),
                content: Some(response.response.to_string()),
                tool_calls: None,
                tool_call_id: Some(response.id.clone()),
            });
        }
    }

    repair_alternation(messages)
}

/// Some back ends reject a tool result followed directly by a new user turn.
/// Bridge every tool → user adjacency with a neutral assistant message.
fn repair_alternation(messages: Vec<WireMessage>) -> Vec<WireMessage> {
    let mut repaired: Vec<WireMessage> = Vec::with_capacity(messages.len());
    for msg in messages {
        if msg.role == "user" {
            if let Some(last) = repaired.last() {
                if last.role == "tool" {
                    repaired.push(WireMessage::text("assistant", "Action completed.".to_string()));
                }
            }
        }
        repaired.push(msg);
    }
    repaired
}

fn build_tools(signatures: &[ToolSignature]) -> Vec<WireTool> {
    signatures
        .iter()
        .map(|sig| {
            let parameters = match &sig.parameters {
                Some(schema) => normalize_schema(schema.clone()),
                None => FALLBACK_SCHEMAS
                    .get(sig.name.as_str())
                    .cloned()
                    .unwrap_or_else(empty_object_schema),
            };
            WireTool {
                kind: "function",
                function: WireFunction {
                    name: sig.name.clone(),
                    description: sig.description.clone(),
                    parameters,
                },
            }
        })
        .collect()
}

/// Normalize a declared parameter schema for the wire protocol: lower-case
/// object keys, lower-case the string value under `type`, recurse into
/// nested objects. Property names keep their case; arrays and scalars pass
/// through unchanged.
pub fn normalize_schema(schema: Value) -> Value {
    match schema {
        Value::Object(map) => Value::Object(normalize_object(map)),
        other => other,
    }
}

fn normalize_object(map: Map<String, Value>) -> Map<String, Value> {
    let mut out = Map::new();
    for (key, value) in map {
        let key = key.to_lowercase();
        let value = match value {
            Value::String(s) if key == "type" => Value::String(s.to_lowercase()),
            Value::Object(inner) => {
                if key == "properties" {
                    let mut props = Map::new();
                    for (name, prop) in inner {
                        let prop = match prop {
                            Value::Object(p) => Value::Object(normalize_object(p)),
                            other => other,
                        };
                        props.insert(name, prop);
                    }
                    Value::Object(props)
                } else {
                    Value::Object(normalize_object(inner))
                }
            }
            other => other,
        };
        out.insert(key, value);
    }
    out
}

/// Decode the wire response: first choice only. Zero choices is an empty
/// reply, not an error. Unparsable tool-call argument text degrades to an
/// empty object.
fn decode_response(response: ChatResponse) -> ModelReply {
    let usage = TokenUsage {
        prompt_tokens: response.usage.prompt_tokens,
        completion_tokens: response.usage.completion_tokens,
        total_tokens: response.usage.total_tokens,
    };

    let choice = match response.choices.into_iter().next() {
        Some(c) => c,
        None => {
            return ModelReply {
                usage,
                ..Default::default()
            }
        }
    };

    let content = choice.message.content.filter(|c| !c.is_empty());

    let tool_calls = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|tc| {
            let function = tc.function;
            let arguments = match serde_json::from_str(&function.arguments) {
                Ok(v) => v,
                Err(e) => {
                    warn!(error = %e, tool = %function.name, "Unparsable tool call arguments, using empty object");
                    Value::Object(Map::new())
                }
            };
            ToolInvocation {
                name: function.name,
                arguments,
            }
        })
        .collect();

    ModelReply {
        content,
        tool_calls,
        finish_reason: choice.finish_reason,
        usage,
    }
}

#[async_trait]
impl Provider for LocalProvider {
    async fn chat(&self, request: &ModelRequest) -> Result<ModelReply> {
        let url = format!("{}/v1/chat/completions", self.base_url);

        let wire_request = ChatRequest {
            model: self.model.clone(),
            messages: build_messages(request),
            temperature: request.temperature.or(self.temperature),
            max_tokens: request.max_tokens.or(self.max_tokens),
            stream: false,
            tools: build_tools(&request.tools),
        };

        info!(
            url = %url,
            model = %self.model,
            messages_count = wire_request.messages.len(),
            tools_count = wire_request.tools.len(),
            "Calling local model"
        );

        let body = serde_json::to_string(&wire_request)
            .map_err(|e| Error::RequestEncode(e.to_string()))?;
        debug!(body_len = body.len(), "Request body prepared");

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;

        let status = response.status();
        let raw_body = response
            .text()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;

        if !status.is_success() {
            error!(status = %status, body = %raw_body, "Model server error");
            return Err(Error::BackendStatus {
                status: status.as_u16(),
                body: raw_body,
            });
        }

        debug!(body_len = raw_body.len(), "Raw response received");

        let chat_response: ChatResponse = serde_json::from_str(&raw_body).map_err(|e| {
            let end = truncate_at_char_boundary(&raw_body, 500);
            Error::ResponseDecode(format!("{}. Body: {}", e, &raw_body[..end]))
        })?;

        Ok(decode_response(chat_response))
    }
}
