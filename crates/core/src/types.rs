use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Role of a conversation turn. Maps one-to-one onto the wire roles of the
/// chat-completions protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnRole {
    System,
    User,
    Assistant,
    Tool,
}

impl TurnRole {
    pub fn wire_name(&self) -> &'static str {
        match self {
            TurnRole::System => "system",
            TurnRole::User => "user",
            TurnRole::Assistant => "assistant",
            TurnRole::Tool => "tool",
        }
    }
}

/// A tool call the model asked for, as recorded in conversation history.
#[derive(Debug, Clone)]
pub struct FunctionCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// The result of executing a tool call, keyed back to the call by id.
#[derive(Debug, Clone)]
pub struct FunctionResponse {
    pub id: String,
    pub name: String,
    pub response: Value,
}

/// One unit of conversation history. A turn may carry text segments, tool
/// calls, or tool results, but never mixes roles.
#[derive(Debug, Clone)]
pub struct Turn {
    pub role: TurnRole,
    pub texts: Vec<String>,
    pub calls: Vec<FunctionCall>,
    pub responses: Vec<FunctionResponse>,
}

impl Turn {
    fn empty(role: TurnRole) -> Self {
        Self {
            role,
            texts: Vec::new(),
            calls: Vec::new(),
            responses: Vec::new(),
        }
    }

    pub fn user(text: &str) -> Self {
        let mut t = Self::empty(TurnRole::User);
        t.texts.push(text.to_string());
        t
    }

    pub fn assistant(text: &str) -> Self {
        let mut t = Self::empty(TurnRole::Assistant);
        t.texts.push(text.to_string());
        t
    }

    /// An assistant turn that requested tool calls. `text` may be empty.
    pub fn assistant_calls(text: &str, calls: Vec<FunctionCall>) -> Self {
        let mut t = Self::empty(TurnRole::Assistant);
        if !text.is_empty() {
            t.texts.push(text.to_string());
        }
        t.calls = calls;
        t
    }

    pub fn tool_results(responses: Vec<FunctionResponse>) -> Self {
        let mut t = Self::empty(TurnRole::Tool);
        t.responses = responses;
        t
    }

    /// All text segments of this turn, concatenated.
    pub fn text(&self) -> String {
        self.texts.concat()
    }
}

/// A tool made available to the model. `parameters` is a JSON-schema-like
/// tree; when absent the protocol adapter substitutes a fallback schema.
#[derive(Debug, Clone)]
pub struct ToolSignature {
    pub name: String,
    pub description: String,
    pub parameters: Option<Value>,
}

impl ToolSignature {
    pub fn new(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            parameters: None,
        }
    }

    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.parameters = Some(parameters);
        self
    }
}

/// Everything needed for one model call: ordered history, an optional
/// system instruction, declared tools, and generation parameters.
#[derive(Debug, Clone, Default)]
pub struct ModelRequest {
    pub system: Option<String>,
    pub turns: Vec<Turn>,
    pub tools: Vec<ToolSignature>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

/// A tool invocation decoded from the model's response.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    pub name: String,
    pub arguments: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Decoded result of one model call.
#[derive(Debug, Clone, Default)]
pub struct ModelReply {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolInvocation>,
    pub finish_reason: Option<String>,
    pub usage: TokenUsage,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_turn_text_concatenates_segments() {
        let mut turn = Turn::user("Hello");
        turn.texts.push(" world".to_string());
        assert_eq!(turn.text(), "Hello world");
    }

    #[test]
    fn test_assistant_calls_skips_empty_text() {
        let turn = Turn::assistant_calls(
            "",
            vec![FunctionCall {
                id: "call_0".to_string(),
                name: "list_tables".to_string(),
                arguments: json!({}),
            }],
        );
        assert!(turn.texts.is_empty());
        assert_eq!(turn.calls.len(), 1);
        assert_eq!(turn.role, TurnRole::Assistant);
    }

    #[test]
    fn test_wire_names() {
        assert_eq!(TurnRole::Assistant.wire_name(), "assistant");
        assert_eq!(TurnRole::Tool.wire_name(), "tool");
    }
}
