use crate::stream::{StreamTarget, StreamTransition};
use crate::turn::AuxiliaryPayload;

#[derive(Debug, Clone, PartialEq)]
pub enum StreamEventPayload {
    Delta(String),
    ReasoningDelta(String),
    /// Side-channel value for the auxiliary payload sequence.
    Data(AuxiliaryPayload),
    Done,
    Error(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct StreamEventMapped {
    pub target: StreamTarget,
    pub payload: StreamEventPayload,
}

impl StreamEventMapped {
    pub fn new(target: StreamTarget, payload: StreamEventPayload) -> Self {
        Self { target, payload }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.payload,
            StreamEventPayload::Done | StreamEventPayload::Error(_)
        )
    }

    /// Content-carrying payloads return `None`; only `Done` and `Error` move the
    /// stream lifecycle.
    pub fn into_transition(self) -> Option<StreamTransition> {
        match self.payload {
            StreamEventPayload::Delta(_)
            | StreamEventPayload::ReasoningDelta(_)
            | StreamEventPayload::Data(_) => None,
            StreamEventPayload::Done => Some(StreamTransition::Complete(self.target)),
            StreamEventPayload::Error(message) => Some(StreamTransition::Fail {
                target: self.target,
                message,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::stream::{ConversationId, StreamSessionId};

    #[test]
    fn only_terminal_payloads_map_to_transitions() {
        let target = StreamTarget::new(ConversationId::new(7), StreamSessionId::new(2));

        let data = StreamEventMapped::new(
            target,
            StreamEventPayload::Data(AuxiliaryPayload::new(json!({ "page": 3 }))),
        );
        assert!(!data.is_terminal());
        assert_eq!(data.into_transition(), None);

        let done = StreamEventMapped::new(target, StreamEventPayload::Done);
        assert_eq!(
            done.into_transition(),
            Some(StreamTransition::Complete(target))
        );

        let failed = StreamEventMapped::new(target, StreamEventPayload::Error("x".into()));
        assert!(failed.is_terminal());
        assert_eq!(
            failed.into_transition(),
            Some(StreamTransition::Fail {
                target,
                message: "x".to_string(),
            })
        );
    }
}
