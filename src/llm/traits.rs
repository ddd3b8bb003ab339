use async_trait::async_trait;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnRole {
    System,
    User,
    Assistant,
}

impl TurnRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One message in a chat-completion request.
#[derive(Debug, Clone)]
pub struct ChatTurn {
    pub role: TurnRole,
    pub content: String,
}

impl ChatTurn {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Assistant,
            content: content.into(),
        }
    }
}

/// Chat-completion backend. The engine only ever needs one call shape: a
/// full turn list in, a raw JSON document out.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Provider identifier (e.g. "openai").
    fn name(&self) -> &str;

    async fn complete(&self, turns: &[ChatTurn]) -> anyhow::Result<String>;
}

pub type SharedProvider = Arc<dyn ChatProvider>;
