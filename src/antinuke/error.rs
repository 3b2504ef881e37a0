//! Error types for the antinuke engine

use crate::error::ErrorKind;
use thiserror::Error;

/// Errors that can occur while evaluating or punishing a destructive action
#[derive(Debug, Error)]
pub enum AntinukeError {
    /// Discord API error
    #[error("Discord API error: {0}")]
    DiscordApi(#[from] Box<poise::serenity_prelude::Error>),

    /// Failed to get guild or member
    #[error("Failed to get guild or member: {0}")]
    GuildOrMemberNotFound(String),

    /// The configured punishment has no registered handler
    #[error("No handler registered for punishment: {0}")]
    NoHandler(String),

    /// Outbound platform call exceeded its wall-clock budget
    #[error("Platform call timed out after {0}s")]
    Timeout(u64),

    /// Config store failure surfaced to the invoker
    #[error("Config store error: {0}")]
    Store(#[from] crate::store::StoreError),

    /// Generic error
    #[error("Antinuke error: {0}")]
    Other(String),
}

impl From<poise::serenity_prelude::Error> for AntinukeError {
    fn from(error: poise::serenity_prelude::Error) -> Self {
        Self::DiscordApi(Box::new(error))
    }
}

impl AntinukeError {
    /// Platform error kind, if this wraps an API failure.
    #[must_use]
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::DiscordApi(err) => Some(crate::error::classify(err)),
            Self::Timeout(_) => Some(ErrorKind::Transport),
            _ => None,
        }
    }
}

/// Result type for antinuke operations
pub type AntinukeResult<T> = Result<T, AntinukeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = AntinukeError::NoHandler("strip".to_string());
        assert_eq!(
            error.to_string(),
            "No handler registered for punishment: strip"
        );

        let error = AntinukeError::Timeout(15);
        assert_eq!(error.to_string(), "Platform call timed out after 15s");
    }

    #[test]
    fn test_timeout_kind_is_transport() {
        assert_eq!(AntinukeError::Timeout(15).kind(), Some(ErrorKind::Transport));
        assert_eq!(AntinukeError::Other("x".into()).kind(), None);
    }
}
