use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputKind {
    Text,
    ToolUse,
    ToolResult,
    Error,
    Done,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub cache_creation_input_tokens: u64,
    #[serde(default)]
    pub cache_read_input_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.input_tokens
            + self.output_tokens
            + self.cache_creation_input_tokens
            + self.cache_read_input_tokens
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub name: String,
    pub input: Value,
}

/// One classified unit of agent output.
///
/// For `ToolUse` the content is `"<tool>: <json input>"` and `tool` carries the
/// structured form. For `Done` the content is the agent-side session id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentOutput {
    pub kind: OutputKind,
    pub content: String,
    pub tool: Option<ToolInvocation>,
    pub usage: Option<TokenUsage>,
    pub at: DateTime<Utc>,
}

impl AgentOutput {
    pub fn new(kind: OutputKind, content: impl Into<String>) -> Self {
        Self {
            kind,
            content: content.into(),
            tool: None,
            usage: None,
            at: Utc::now(),
        }
    }

    fn with_usage(mut self, usage: Option<TokenUsage>) -> Self {
        self.usage = usage;
        self
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamMessage {
    Result {
        #[serde(default)]
        session_id: String,
        #[serde(default)]
        usage: Option<TokenUsage>,
    },
    Assistant {
        message: AssistantMessage,
    },
    User {
        message: UserMessage,
    },
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    #[serde(default)]
    content: Vec<AssistantBlock>,
    #[serde(default)]
    usage: Option<TokenUsage>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AssistantBlock {
    Text {
        text: String,
    },
    ToolUse {
        name: String,
        #[serde(default)]
        input: Value,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct UserMessage {
    #[serde(default)]
    content: UserContent,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum UserContent {
    Blocks(Vec<UserBlock>),
    Plain(serde::de::IgnoredAny),
}

impl Default for UserContent {
    fn default() -> Self {
        Self::Blocks(Vec::new())
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum UserBlock {
    ToolResult {
        #[serde(default)]
        content: Value,
    },
    #[serde(other)]
    Unknown,
}

/// Classifies one stdout line of the agent's `stream-json` protocol.
///
/// Non-JSON lines come back verbatim as text. JSON that is not one of the
/// known message shapes comes back as text holding its JSON encoding.
pub fn classify_line(line: &str) -> Vec<AgentOutput> {
    let Ok(value) = serde_json::from_str::<Value>(line) else {
        return vec![AgentOutput::new(OutputKind::Text, line)];
    };
    let Ok(message) = serde_json::from_value::<StreamMessage>(value.clone()) else {
        return vec![AgentOutput::new(OutputKind::Text, value.to_string())];
    };
    match message {
        StreamMessage::Result { session_id, usage } => {
            vec![AgentOutput::new(OutputKind::Done, session_id).with_usage(usage)]
        }
        StreamMessage::Assistant { message } => {
            let usage = message.usage;
            message
                .content
                .into_iter()
                .filter_map(|block| match block {
                    AssistantBlock::Text { text } => Some(AgentOutput::new(OutputKind::Text, text)),
                    AssistantBlock::ToolUse { name, input } => {
                        let mut output = AgentOutput::new(
                            OutputKind::ToolUse,
                            format!("{name}: {input}"),
                        );
                        output.tool = Some(ToolInvocation { name, input });
                        Some(output)
                    }
                    AssistantBlock::Unknown => None,
                })
                .map(|output| output.with_usage(usage))
                .collect()
        }
        StreamMessage::User { message } => {
            let results: Vec<AgentOutput> = match message.content {
                UserContent::Blocks(blocks) => blocks
                    .into_iter()
                    .filter_map(|block| match block {
                        UserBlock::ToolResult { content } => Some(AgentOutput::new(
                            OutputKind::ToolResult,
                            flatten_tool_result(&content),
                        )),
                        UserBlock::Unknown => None,
                    })
                    .collect(),
                UserContent::Plain(_) => Vec::new(),
            };
            if results.is_empty() {
                vec![AgentOutput::new(OutputKind::Text, value.to_string())]
            } else {
                results
            }
        }
    }
}

fn flatten_tool_result(content: &Value) -> String {
    match content {
        Value::String(text) => text.clone(),
        Value::Array(parts) => parts
            .iter()
            .map(|part| match part.get("text").and_then(Value::as_str) {
                Some(text) => text.to_string(),
                None => part.to_string(),
            })
            .collect::<Vec<_>>()
            .join("\n"),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
