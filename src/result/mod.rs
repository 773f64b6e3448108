//! Accumulated outcome of one streamed model response.

mod delta;
mod handle;
mod tokens;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use delta::StreamDelta;
pub use handle::{ResultFuture, StreamHandle, WeakStreamHandle};
pub use tokens::TokenStream;

/// Final value a stream settles with when it completes or is aborted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamResult {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: FinishReason,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    pub aborted: bool,
}

/// A fully assembled tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    #[default]
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
}

impl FinishReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            FinishReason::Stop => "stop",
            FinishReason::Length => "length",
            FinishReason::ToolCalls => "tool_calls",
            FinishReason::ContentFilter => "content_filter",
        }
    }
}

impl fmt::Display for FinishReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown finish reason `{0}`")]
pub struct UnknownFinishReason(pub String);

impl FromStr for FinishReason {
    type Err = UnknownFinishReason;

    /// Accepts the spellings used by the common chat-completion vendors.
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "stop" | "end_turn" | "stop_sequence" | "STOP" => Ok(FinishReason::Stop),
            "length" | "max_tokens" | "MAX_TOKENS" => Ok(FinishReason::Length),
            "tool_calls" | "tool_use" | "function_call" => Ok(FinishReason::ToolCalls),
            "content_filter" | "SAFETY" | "RECITATION" => Ok(FinishReason::ContentFilter),
            other => Err(UnknownFinishReason(other.to_string())),
        }
    }
}

/// Token accounting reported by the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl Usage {
    #[must_use]
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens.saturating_add(completion_tokens),
        }
    }

    /// Combine with a later report. Non-zero values in `reported` win; a
    /// missing total is recomputed from the resolved parts.
    #[must_use]
    pub fn merge(&self, reported: &Usage) -> Usage {
        let pick = |new: u64, old: u64| if new > 0 { new } else { old };
        let prompt_tokens = pick(reported.prompt_tokens, self.prompt_tokens);
        let completion_tokens = pick(reported.completion_tokens, self.completion_tokens);
        let total_tokens = match reported.total_tokens {
            0 => prompt_tokens.saturating_add(completion_tokens),
            total => total,
        };
        Usage {
            prompt_tokens,
            completion_tokens,
            total_tokens,
        }
    }
}

/// Lifecycle of a stream. Every phase except `Streaming` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamPhase {
    Streaming,
    Completed,
    Aborted,
    Errored,
}

impl StreamPhase {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, StreamPhase::Streaming)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            StreamPhase::Streaming => "streaming",
            StreamPhase::Completed => "completed",
            StreamPhase::Aborted => "aborted",
            StreamPhase::Errored => "errored",
        }
    }
}

/// Tool call still being streamed, keyed by its provider index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolCallAccumulator {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

impl ToolCallAccumulator {
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: String::new(),
        }
    }

    /// Parse the buffered arguments. A blank buffer parses as `{}`.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error when the buffer is not valid JSON.
    pub fn parse_arguments(&self) -> Result<Value, serde_json::Error> {
        if self.arguments.trim().is_empty() {
            return Ok(Value::Object(serde_json::Map::new()));
        }
        serde_json::from_str(&self.arguments)
    }
}

/// Partial tool-call update. Present fields are applied; `arguments` is appended.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

impl ToolCallUpdate {
    pub(crate) fn apply_to(self, accumulator: &mut ToolCallAccumulator) {
        if let Some(id) = self.id {
            accumulator.id = id;
        }
        if let Some(name) = self.name {
            accumulator.name = name;
        }
        if let Some(fragment) = self.arguments {
            accumulator.arguments.push_str(&fragment);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_finish_reason_vendor_spellings() {
        assert_eq!("end_turn".parse::<FinishReason>(), Ok(FinishReason::Stop));
        assert_eq!("MAX_TOKENS".parse::<FinishReason>(), Ok(FinishReason::Length));
        assert_eq!("tool_use".parse::<FinishReason>(), Ok(FinishReason::ToolCalls));
        assert_eq!("SAFETY".parse::<FinishReason>(), Ok(FinishReason::ContentFilter));
        assert_eq!(
            "weird".parse::<FinishReason>(),
            Err(UnknownFinishReason("weird".into()))
        );
        assert_eq!(FinishReason::ToolCalls.to_string(), "tool_calls");
    }

    #[test]
    fn test_usage_totals_saturate() {
        let usage = Usage::new(u64::MAX, 5);
        assert_eq!(usage.total_tokens, u64::MAX);
        let merged = Usage::default().merge(&Usage {
            prompt_tokens: u64::MAX - 1,
            completion_tokens: 3,
            total_tokens: 0,
        });
        assert_eq!(merged.total_tokens, u64::MAX);
    }

    #[test]
    fn test_usage_merge_prefers_reported() {
        let streamed = Usage::new(10, 5);
        let reported = Usage {
            prompt_tokens: 12,
            completion_tokens: 0,
            total_tokens: 0,
        };
        assert_eq!(
            streamed.merge(&reported),
            Usage {
                prompt_tokens: 12,
                completion_tokens: 5,
                total_tokens: 17
            }
        );
        assert_eq!(streamed.merge(&Usage::default()), streamed);
    }

    #[test]
    fn test_blank_arguments_parse_as_empty_object() {
        let acc = ToolCallAccumulator::new("c1", "noop");
        assert_eq!(acc.parse_arguments().unwrap(), json!({}));
    }

    #[test]
    fn test_tool_call_update_appends_arguments() {
        let mut acc = ToolCallAccumulator::new("", "");
        ToolCallUpdate {
            id: Some("c1".into()),
            name: Some("search".into()),
            arguments: Some("{\"q\":".into()),
        }
        .apply_to(&mut acc);
        ToolCallUpdate {
            arguments: Some("1}".into()),
            ..ToolCallUpdate::default()
        }
        .apply_to(&mut acc);
        assert_eq!(acc.id, "c1");
        assert_eq!(acc.name, "search");
        assert_eq!(acc.parse_arguments().unwrap(), json!({"q": 1}));
    }

    #[test]
    fn test_result_serializes_snake_case() {
        let result = StreamResult {
            text: "hi".into(),
            finish_reason: FinishReason::ContentFilter,
            ..StreamResult::default()
        };
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["finish_reason"], "content_filter");
        assert!(value.get("usage").is_none());
        assert_eq!(value["aborted"], false);
    }
}
