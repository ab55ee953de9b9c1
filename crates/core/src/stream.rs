use serde::{Deserialize, Serialize};

/// Identifies one conversation thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConversationId(pub u64);

impl ConversationId {
    /// Creates a typed conversation identifier.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

/// Identifies one request/response episode. A fresh value is minted per submit so late
/// chunks from an abandoned request can be told apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StreamSessionId(pub u64);

impl StreamSessionId {
    /// Creates a typed stream session identifier.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the id to use for the following request.
    pub const fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

/// Addresses one request within one conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamTarget {
    pub conversation_id: ConversationId,
    pub session_id: StreamSessionId,
}

impl StreamTarget {
    /// Pairs a conversation with the request being streamed into it.
    pub const fn new(conversation_id: ConversationId, session_id: StreamSessionId) -> Self {
        Self {
            conversation_id,
            session_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum StreamState {
    #[default]
    Idle,
    Streaming(StreamTarget),
    Done(StreamTarget),
    Error {
        target: StreamTarget,
        message: String,
    },
    Cancelled(StreamTarget),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamTransition {
    Start(StreamTarget),
    Complete(StreamTarget),
    Fail {
        target: StreamTarget,
        message: String,
    },
    Cancel(StreamTarget),
    ResetToIdle,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamTransitionRejection {
    AlreadyStreaming {
        active: StreamTarget,
        attempted: StreamTarget,
    },
    NoActiveStream,
    SessionMismatch {
        active: StreamTarget,
        attempted: StreamTarget,
    },
}

pub type StreamTransitionResult = Result<StreamState, StreamTransitionRejection>;

impl StreamState {
    /// The "request outstanding" signal.
    pub fn is_outstanding(&self) -> bool {
        matches!(self, Self::Streaming(_))
    }

    /// Target of the in-flight request, if any.
    pub fn active_target(&self) -> Option<StreamTarget> {
        match self {
            Self::Streaming(target) => Some(*target),
            _ => None,
        }
    }

    /// Only events for the in-flight request may change the conversation.
    pub fn accepts_stream_event(&self, target: StreamTarget) -> bool {
        self.active_target() == Some(target)
    }

    /// Error text when the last request failed.
    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Error { message, .. } => Some(message),
            _ => None,
        }
    }

    /// Any settled state may start a new request; terminal transitions must name the
    /// request that is currently streaming.
    pub fn apply(&self, transition: StreamTransition) -> StreamTransitionResult {
        let attempted = match &transition {
            StreamTransition::ResetToIdle => return Ok(Self::Idle),
            StreamTransition::Start(target) => {
                return match self.active_target() {
                    Some(active) if active != *target => {
                        Err(StreamTransitionRejection::AlreadyStreaming {
                            active,
                            attempted: *target,
                        })
                    }
                    _ => Ok(Self::Streaming(*target)),
                };
            }
            StreamTransition::Complete(target) | StreamTransition::Cancel(target) => *target,
            StreamTransition::Fail { target, .. } => *target,
        };

        let Some(active) = self.active_target() else {
            return Err(StreamTransitionRejection::NoActiveStream);
        };
        if active != attempted {
            return Err(StreamTransitionRejection::SessionMismatch { active, attempted });
        }

        Ok(match transition {
            StreamTransition::Complete(target) => Self::Done(target),
            StreamTransition::Cancel(target) => Self::Cancelled(target),
            StreamTransition::Fail { target, message } => Self::Error { target, message },
            StreamTransition::Start(_) | StreamTransition::ResetToIdle => self.clone(),
        })
    }
}
