//! Antinuke configuration documents
//!
//! These are the compound values stored in the `antinuke_system` row. Each
//! field group is encoded as its own JSON column; the store validates on read
//! and rejects unknown tags.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Punishment applied to a moderator who trips a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Punishment {
    /// Remove every privileged role the moderator holds.
    #[default]
    Strip,
    /// Remove the moderator from the guild.
    Kick,
    /// Ban the moderator.
    Ban,
}

impl fmt::Display for Punishment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Strip => write!(f, "strip"),
            Self::Kick => write!(f, "kick"),
            Self::Ban => write!(f, "ban"),
        }
    }
}

/// Threshold-counted antinuke modules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Module {
    Ban,
    Kick,
    Role,
    Channel,
    Webhook,
    Emoji,
}

impl Module {
    pub const ALL: [Self; 6] = [
        Self::Ban,
        Self::Kick,
        Self::Role,
        Self::Channel,
        Self::Webhook,
        Self::Emoji,
    ];

    /// Column in `antinuke_system` holding this module's document.
    #[must_use]
    pub fn column(self) -> &'static str {
        match self {
            Self::Ban => "ban",
            Self::Kick => "kick",
            Self::Role => "role",
            Self::Channel => "channel",
            Self::Webhook => "webhook",
            Self::Emoji => "emoji",
        }
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column())
    }
}

/// Per-module settings: `threshold` actions by the same moderator inside the
/// window trigger `punishment`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleConfig {
    pub enabled: bool,
    pub threshold: u32,
    pub punishment: Punishment,
}

impl Default for ModuleConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            threshold: 3,
            punishment: Punishment::default(),
        }
    }
}

impl ModuleConfig {
    /// Thresholds below 1 are rejected at configuration time.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.threshold >= 1
    }
}

/// Vanity-URL watch settings. Single-shot: any change triggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct VanityConfig {
    pub enabled: bool,
    pub punishment: Punishment,
}

/// Watched permission-bit settings. Single-shot on any watched bit change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PermissionsConfig {
    pub enabled: bool,
    /// Permission names whose grant triggers.
    pub watch_grant: BTreeSet<String>,
    /// Permission names whose removal triggers.
    pub watch_remove: BTreeSet<String>,
    pub punishment: Punishment,
}

/// Bot-join gate. Non-whitelisted bots are removed on sight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct BotaddConfig {
    pub enabled: bool,
}

/// Full antinuke configuration for one guild.
///
/// `admins` and `whitelist` are kept as ordered sets so they deduplicate on
/// insert and serialize deterministically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct AntinukeConfig {
    pub admins: BTreeSet<u64>,
    pub whitelist: BTreeSet<u64>,
    pub botadd: BotaddConfig,
    pub vanity: VanityConfig,
    pub permissions: PermissionsConfig,
    pub ban: ModuleConfig,
    pub kick: ModuleConfig,
    pub role: ModuleConfig,
    pub channel: ModuleConfig,
    pub webhook: ModuleConfig,
    pub emoji: ModuleConfig,
}

impl AntinukeConfig {
    #[must_use]
    pub fn module(&self, module: Module) -> &ModuleConfig {
        match module {
            Module::Ban => &self.ban,
            Module::Kick => &self.kick,
            Module::Role => &self.role,
            Module::Channel => &self.channel,
            Module::Webhook => &self.webhook,
            Module::Emoji => &self.emoji,
        }
    }

    pub fn module_mut(&mut self, module: Module) -> &mut ModuleConfig {
        match module {
            Module::Ban => &mut self.ban,
            Module::Kick => &mut self.kick,
            Module::Role => &mut self.role,
            Module::Channel => &mut self.channel,
            Module::Webhook => &mut self.webhook,
            Module::Emoji => &mut self.emoji,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_punishment_tags() {
        assert_eq!(
            serde_json::to_string(&Punishment::Strip).unwrap(),
            "\"strip\""
        );
        assert_eq!(serde_json::to_string(&Punishment::Kick).unwrap(), "\"kick\"");
        assert_eq!(serde_json::to_string(&Punishment::Ban).unwrap(), "\"ban\"");

        let parsed: Punishment = serde_json::from_str("\"ban\"").unwrap();
        assert_eq!(parsed, Punishment::Ban);
    }

    #[test]
    fn test_unknown_punishment_tag_rejected() {
        let result = serde_json::from_str::<Punishment>("\"timeout\"");
        assert!(result.is_err());

        let result = serde_json::from_str::<ModuleConfig>(
            r#"{"enabled":true,"threshold":3,"punishment":"obliterate"}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_module_config_validation() {
        let mut config = ModuleConfig::default();
        assert!(config.is_valid());

        config.threshold = 1;
        assert!(config.is_valid());

        config.threshold = 0;
        assert!(!config.is_valid());
    }

    #[test]
    fn test_admin_set_deduplicates() {
        let mut config = AntinukeConfig::default();
        config.admins.insert(42);
        config.admins.insert(42);
        config.whitelist.insert(7);
        config.whitelist.insert(7);

        assert_eq!(config.admins.len(), 1);
        assert_eq!(config.whitelist.len(), 1);
    }

    #[test]
    fn test_module_accessors_cover_all() {
        let mut config = AntinukeConfig::default();
        for module in Module::ALL {
            config.module_mut(module).enabled = true;
        }
        for module in Module::ALL {
            assert!(config.module(module).enabled, "module {module} not wired");
        }
    }

    #[test]
    fn test_document_round_trip() {
        let mut config = AntinukeConfig::default();
        config.ban = ModuleConfig {
            enabled: true,
            threshold: 5,
            punishment: Punishment::Ban,
        };
        config.permissions.watch_grant.insert("administrator".into());

        let encoded = serde_json::to_string(&config).unwrap();
        let decoded: AntinukeConfig = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, config);
    }
}
