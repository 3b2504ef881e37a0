//! Per-guild VoiceMaster configuration and child-channel records.

use serde::{Deserialize, Serialize};

use crate::voicemaster::error::VoiceError;

/// Name template used when a guild has not set one.
pub const DEFAULT_NAME_TEMPLATE: &str = "{user.name}'s channel";

/// Voice region tags the platform accepts for `rtc_region`.
pub const REGIONS: [&str; 13] = [
    "brazil",
    "hongkong",
    "india",
    "japan",
    "rotterdam",
    "russia",
    "singapore",
    "southafrica",
    "sydney",
    "us-central",
    "us-east",
    "us-south",
    "us-west",
];

/// Inclusive bitrate bounds, in kbps.
pub const BITRATE_KBPS: (u32, u32) = (8, 96);

/// Inclusive user-limit bounds; 0 means unlimited.
pub const USER_LIMIT: (u32, u32) = (0, 99);

/// A spawned voice channel and who currently owns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildChannel {
    pub channel_id: u64,
    pub owner_id: u64,
    /// Per-channel role override; falls back to the guild default.
    pub role_id: Option<u64>,
}

/// Everything a guild configures for VoiceMaster. A missing row means the
/// guild has not run setup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoicemasterConfig {
    pub is_setup: bool,
    pub default_category_id: Option<u64>,
    /// Overrides `default_category_id` when set.
    pub custom_category_id: Option<u64>,
    pub interface_channel_id: Option<u64>,
    /// Joining this voice channel spawns a child.
    pub lobby_channel_id: Option<u64>,
    /// Role auto-assigned to anyone joining a child channel.
    pub default_role_id: Option<u64>,
    pub default_name: Option<String>,
    pub default_region: Option<String>,
    pub default_bitrate: Option<u32>,
    pub custom_channels: Vec<ChildChannel>,
}

impl VoicemasterConfig {
    /// Category that spawned channels land under.
    #[must_use]
    pub fn effective_category(&self) -> Option<u64> {
        self.custom_category_id.or(self.default_category_id)
    }

    /// Spawn parameters for a channel owned by `username`.
    #[must_use]
    pub fn child_defaults(&self, username: &str) -> ChildDefaults {
        ChildDefaults {
            category_id: self.effective_category(),
            name: render_name(
                self.default_name.as_deref().unwrap_or(DEFAULT_NAME_TEMPLATE),
                username,
            ),
            region: self.default_region.clone(),
            bitrate: self.default_bitrate,
            role_id: self.default_role_id,
        }
    }

    /// Look up a child record by channel id.
    #[must_use]
    pub fn child(&self, channel_id: u64) -> Option<&ChildChannel> {
        self.custom_channels
            .iter()
            .find(|child| child.channel_id == channel_id)
    }
}

/// Resolved parameters for spawning one child channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildDefaults {
    pub category_id: Option<u64>,
    pub name: String,
    pub region: Option<String>,
    pub bitrate: Option<u32>,
    pub role_id: Option<u64>,
}

/// Expand `{user.name}` in a name template.
#[must_use]
pub fn render_name(template: &str, username: &str) -> String {
    template.replace("{user.name}", username)
}

/// Validate a bitrate given in kbps and convert it to the bps value the
/// platform wants.
///
/// # Errors
///
/// Returns `VoiceError::InvalidBitrate` outside [8, 96] kbps.
pub fn validate_bitrate(kbps: u32) -> Result<u32, VoiceError> {
    if (BITRATE_KBPS.0..=BITRATE_KBPS.1).contains(&kbps) {
        Ok(kbps * 1000)
    } else {
        Err(VoiceError::InvalidBitrate(kbps))
    }
}

/// Validate a user limit; 0 means no limit.
///
/// # Errors
///
/// Returns `VoiceError::InvalidLimit` outside [0, 99].
pub fn validate_limit(limit: u32) -> Result<u32, VoiceError> {
    if limit <= USER_LIMIT.1 {
        Ok(limit)
    } else {
        Err(VoiceError::InvalidLimit(limit))
    }
}

/// Validate a voice region tag against the known set.
///
/// # Errors
///
/// Returns `VoiceError::InvalidRegion` for unknown tags.
pub fn validate_region(region: &str) -> Result<&str, VoiceError> {
    let lowered = region.to_ascii_lowercase();
    REGIONS
        .iter()
        .find(|tag| **tag == lowered)
        .copied()
        .ok_or_else(|| VoiceError::InvalidRegion(region.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_name() {
        assert_eq!(render_name("{user.name}'s channel", "mira"), "mira's channel");
        assert_eq!(render_name("static room", "mira"), "static room");
        assert_eq!(
            render_name("{user.name} / {user.name}", "a"),
            "a / a"
        );
    }

    #[test]
    fn test_bitrate_bounds() {
        assert_eq!(validate_bitrate(8).ok(), Some(8000));
        assert_eq!(validate_bitrate(96).ok(), Some(96_000));
        assert!(validate_bitrate(7).is_err());
        assert!(validate_bitrate(97).is_err());
    }

    #[test]
    fn test_limit_bounds() {
        assert_eq!(validate_limit(0).ok(), Some(0));
        assert_eq!(validate_limit(99).ok(), Some(99));
        assert!(validate_limit(100).is_err());
    }

    #[test]
    fn test_region_tags() {
        assert_eq!(validate_region("us-east").ok(), Some("us-east"));
        assert_eq!(validate_region("Sydney").ok(), Some("sydney"));
        assert!(validate_region("moonbase").is_err());
    }

    #[test]
    fn test_custom_category_overrides_default() {
        let mut config = VoicemasterConfig {
            default_category_id: Some(10),
            ..Default::default()
        };
        assert_eq!(config.effective_category(), Some(10));
        config.custom_category_id = Some(20);
        assert_eq!(config.effective_category(), Some(20));
    }

    #[test]
    fn test_child_defaults_fall_back_to_template() {
        let config = VoicemasterConfig {
            default_bitrate: Some(64_000),
            ..Default::default()
        };
        let defaults = config.child_defaults("mira");
        assert_eq!(defaults.name, "mira's channel");
        assert_eq!(defaults.bitrate, Some(64_000));
        assert_eq!(defaults.role_id, None);
    }
}
