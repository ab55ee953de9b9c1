#![deny(unsafe_code)]

//! Conversation model and the two presentational cores of the chat front end:
//! the turn/payload merger and the loading-status rotator.

/// Provider-agnostic stream events mapped into chat domain language.
pub mod events;
/// Positional pairing of turns with side-channel payloads.
pub mod merge;
/// Loading-status rotation driven by a cancellable tokio timer.
pub mod rotator;
/// Stream lifecycle state machine for one conversation.
pub mod stream;
/// Turns, side-channel payloads and the items rendered from them.
pub mod turn;

pub use events::{StreamEventMapped, StreamEventPayload};
pub use merge::{MergedThread, merge_payloads};
pub use rotator::{
    DEFAULT_LOADING_INTERVAL, DEFAULT_LOADING_MESSAGES, LoadingRotator, LoadingState,
    RotatorConfig, RotatorError, RotatorResult, StatusCycle, TimerHandle,
};
pub use stream::{
    ConversationId, StreamSessionId, StreamState, StreamTarget, StreamTransition,
    StreamTransitionRejection, StreamTransitionResult,
};
pub use turn::{AuxiliaryPayload, RenderedItem, Role, Turn, TurnId};
