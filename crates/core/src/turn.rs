use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Stable identifier for one turn, unique within a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TurnId(pub u64);

impl TurnId {
    /// Creates a typed turn identifier.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl std::fmt::Display for TurnId {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

/// Author of a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One exchange unit of a conversation. Never edited after it is appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub id: TurnId,
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn new(id: TurnId, role: Role, content: impl Into<String>) -> Self {
        Self {
            id,
            role,
            content: content.into(),
        }
    }

    pub fn user(id: TurnId, content: impl Into<String>) -> Self {
        Self::new(id, Role::User, content)
    }

    pub fn assistant(id: TurnId, content: impl Into<String>) -> Self {
        Self::new(id, Role::Assistant, content)
    }
}

/// Opaque backend value delivered beside assistant output (citations, tool calls).
///
/// Nothing ties a payload to a turn except its position in the side-channel sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuxiliaryPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    pub value: Value,
}

impl AuxiliaryPayload {
    pub fn new(value: Value) -> Self {
        Self { kind: None, value }
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }
}

/// A turn plus the payloads attached to it for display.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderedItem {
    pub turn: Turn,
    pub payloads: Vec<AuxiliaryPayload>,
}

impl RenderedItem {
    pub fn plain(turn: Turn) -> Self {
        Self {
            turn,
            payloads: Vec::new(),
        }
    }

    pub fn has_payloads(&self) -> bool {
        !self.payloads.is_empty()
    }
}
