pub mod openai;
pub mod schema;

pub use openai::OpenAiClassifier;

use async_trait::async_trait;
use derive_more::derive::Display;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Classification oracle boundary. One call covers the whole three-stage
/// protocol (category, request type, priority); retries are the
/// implementation's own concern, a returned error is terminal for the row.
#[async_trait]
pub trait Classify: Send + Sync {
    async fn classify(&self, title: &str, summary: &str) -> Result<Classification, ClassifyError>;
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
pub enum PriorityLevel {
    P1,
    P2,
    P3,
    P4,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub category: String,
    pub request_type: String,
    pub priority: PriorityLevel,
}

#[derive(Debug, Display)]
pub enum ClassifyError {
    /// A stage produced no usable answer after the earlier stages succeeded.
    /// The row is recorded as a failure with all output fields null.
    #[display("classification incomplete at {stage} stage")]
    Incomplete { stage: &'static str },
    #[display("{operation} failed after {attempts} attempts: {last_error}")]
    Exhausted {
        operation: &'static str,
        attempts: u32,
        last_error: String,
    },
    #[display("chat API error: {_0}")]
    Api(String),
}

impl std::error::Error for ClassifyError {}

// ============================================================================
// Chat API wire types
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct PromptUsage {
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub total_tokens: i64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    FunctionCall,
    ToolCalls,
    ContentFilter,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: Option<String>,
    pub function_call: Option<FunctionCall>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatChoice {
    pub index: i32,
    pub message: ChatMessage,
    pub finish_reason: FinishReason,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatApiResponse {
    pub choices: Vec<ChatChoice>,
    pub usage: PromptUsage,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatApiError {
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatApiErrorBody {
    pub error: ChatApiError,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChatApiResponseOrError {
    Response(ChatApiResponse),
    Error(ChatApiErrorBody),
}

// ============================================================================
// Answer parsing
// ============================================================================

/// Pull a string field out of a function-call `arguments` payload. Parses as
/// JSON first; models occasionally return slightly malformed JSON, so fall
/// back to a field-scoped regex like the manual parse path for chat answers.
pub fn parse_answer_field(arguments: &str, field: &str) -> Option<String> {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(arguments) {
        if let Some(answer) = value.get(field).and_then(|v| v.as_str()) {
            return Some(answer.to_string());
        }
    }

    let pattern = format!(r#""{}":\s*"([^"]*)""#, regex::escape(field));
    let re = Regex::new(&pattern).ok()?;
    re.captures(arguments)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}
