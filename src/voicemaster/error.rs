//! VoiceMaster error types

use thiserror::Error;

use crate::error::ErrorKind;

pub type VoiceResult<T> = Result<T, VoiceError>;

#[derive(Debug, Error)]
pub enum VoiceError {
    #[error("Discord API error: {0}")]
    DiscordApi(#[from] Box<serenity::Error>),

    #[error("VoiceMaster is not set up in this guild")]
    NotSetUp,

    #[error("you are not in a VoiceMaster channel")]
    NotInChildChannel,

    #[error("you do not own this channel")]
    NotOwner,

    #[error("you cannot target the channel owner")]
    CannotTargetOwner,

    #[error("the platform did not respond in time")]
    Timeout,

    #[error("owner still active")]
    OwnerStillActive,

    #[error("{0} is not in this channel")]
    TargetNotPresent(String),

    #[error("a channel is already registered for {0}")]
    AlreadyRegistered(u64),

    #[error("the lobby channel cannot be claimed")]
    LobbyNotChild,

    #[error("bitrate {0} kbps is out of range (8-96)")]
    InvalidBitrate(u32),

    #[error("user limit {0} is out of range (0-99)")]
    InvalidLimit(u32),

    #[error("unknown voice region: {0}")]
    InvalidRegion(String),

    #[error("config store error: {0}")]
    Store(#[from] crate::store::StoreError),
}

impl From<serenity::Error> for VoiceError {
    fn from(err: serenity::Error) -> Self {
        Self::DiscordApi(Box::new(err))
    }
}

impl VoiceError {
    /// Platform error kind, when the failure came from the API.
    #[must_use]
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::DiscordApi(err) => Some(crate::error::classify(err)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        assert_eq!(VoiceError::OwnerStillActive.to_string(), "owner still active");
        assert_eq!(
            VoiceError::InvalidBitrate(120).to_string(),
            "bitrate 120 kbps is out of range (8-96)"
        );
        assert_eq!(
            VoiceError::TargetNotPresent("mira".into()).to_string(),
            "mira is not in this channel"
        );
    }
}
