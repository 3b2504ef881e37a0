use std::{
    ops::Deref,
    sync::{Arc, OnceLock},
};

use poise::serenity_prelude as serenity;
use ::serenity::prelude::TypeMapKey;

use crate::antinuke::{EventTracker, PunishmentRegistry};
use crate::store::ConfigStore;
use crate::voicemaster::VoiceRegistry;

/// Centralized data structure for the bot
#[derive(Clone)]
pub struct Data(pub Arc<DataInner>);

// Implement TypeMapKey for Data to allow storing it in Serenity's data map
impl TypeMapKey for Data {
    type Value = Data;
}

impl std::fmt::Debug for Data {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Data")
            .field("persistent", &self.store.is_persistent())
            .field("tracker", &self.tracker)
            .field("voice", &self.voice)
            .field("bot_id", &self.bot_id.get())
            .field("owner_id", &self.owner_id)
            .finish_non_exhaustive()
    }
}

impl Data {
    /// Create a new Data instance around a config store
    #[must_use]
    pub fn new(store: ConfigStore, owner_id: Option<u64>) -> Self {
        Self(Arc::new(DataInner {
            store: Arc::new(store),
            tracker: EventTracker::new(),
            punishments: Arc::new(PunishmentRegistry::new()),
            voice: VoiceRegistry::new(),
            bot_id: OnceLock::new(),
            owner_id,
        }))
    }

    /// Record the bot's own user id once the gateway reports it.
    pub fn set_bot_id(&self, id: serenity::UserId) {
        let _ = self.bot_id.set(id);
    }

    /// The bot's own user id, or 0 before the ready event.
    #[must_use]
    pub fn bot_id(&self) -> u64 {
        self.bot_id.get().map_or(0, |id| id.get())
    }

    /// The bot's own user id for exemption checks. Before the ready event
    /// this is a sentinel that matches no real user.
    #[must_use]
    pub fn bot_user_id(&self) -> serenity::UserId {
        self.bot_id
            .get()
            .copied()
            .unwrap_or(serenity::UserId::new(u64::MAX))
    }
}

impl Deref for Data {
    type Target = DataInner;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Main centralized data structure for the bot
pub struct DataInner {
    // Per-guild configuration, cached in front of Postgres
    pub store: Arc<ConfigStore>,
    // Sliding-window counters for antinuke modules
    pub tracker: EventTracker,
    // Punishment handlers, keyed by punishment kind
    pub punishments: Arc<PunishmentRegistry>,
    // Ownership registry for spawned voice channels
    pub voice: VoiceRegistry,
    // Set on the ready event
    bot_id: OnceLock<serenity::UserId>,
    // Bot operator from the environment, if any
    pub owner_id: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_new() {
        let data = Data::new(ConfigStore::in_memory(), Some(42));
        assert!(data.tracker.is_empty());
        assert!(data.voice.is_empty());
        assert_eq!(data.bot_id(), 0);
        assert_eq!(data.owner_id, Some(42));
    }

    #[test]
    fn test_bot_id_set_once() {
        let data = Data::new(ConfigStore::in_memory(), None);
        data.set_bot_id(serenity::UserId::new(7));
        data.set_bot_id(serenity::UserId::new(8));
        assert_eq!(data.bot_id(), 7);
    }

    #[test]
    fn test_data_debug_impl() {
        let data = Data::new(ConfigStore::in_memory(), None);
        let debug_output = format!("{data:?}");
        assert!(debug_output.contains("Data"));
        assert!(debug_output.contains("tracker"));
    }
}
