use super::{FinishReason, ToolCallUpdate, Usage};
use crate::error::StreamError;

/// One provider-agnostic change to a stream.
///
/// Provider glue translates wire events into these values and hands them to
/// [`super::StreamHandle::apply`].
#[derive(Debug, Clone, PartialEq)]
pub enum StreamDelta {
    /// Visible text, appended and published to token subscribers.
    Token(String),
    /// Text appended without publishing.
    Text(String),
    ToolCallStart {
        index: u32,
        id: String,
        name: String,
    },
    ToolCallArguments {
        index: u32,
        fragment: String,
    },
    ToolCallUpdate {
        index: u32,
        update: ToolCallUpdate,
    },
    FinishReason(FinishReason),
    Usage(Usage),
    Complete,
    Error(StreamError),
    Abort,
}

impl StreamDelta {
    /// Whether applying this delta ends the stream.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StreamDelta::Complete | StreamDelta::Error(_) | StreamDelta::Abort
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_settling_deltas_are_terminal() {
        assert!(StreamDelta::Complete.is_terminal());
        assert!(StreamDelta::Abort.is_terminal());
        assert!(StreamDelta::Error(StreamError::Decode("bad".into())).is_terminal());
        assert!(!StreamDelta::Token("x".into()).is_terminal());
        assert!(!StreamDelta::Usage(Usage::new(1, 2)).is_terminal());
    }
}
