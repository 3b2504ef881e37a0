//! In-memory ownership registry for spawned voice channels.
//!
//! The registry is the authoritative runtime view; the config store's
//! `custom_channels` column is a persisted mirror written through after each
//! mutation.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::voicemaster::config::ChildChannel;
use crate::voicemaster::error::{VoiceError, VoiceResult};

/// One registered child channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildRecord {
    pub guild_id: u64,
    pub owner_id: u64,
    pub role_id: Option<u64>,
    /// Registration order within the process, used to keep persisted
    /// snapshots in spawn order.
    seq: u64,
}

/// Registry of all spawned channels, keyed by channel id.
#[derive(Debug, Default)]
pub struct VoiceRegistry {
    children: DashMap<u64, ChildRecord>,
    next_seq: AtomicU64,
}

impl VoiceRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly spawned channel.
    ///
    /// # Errors
    ///
    /// Refuses the lobby channel itself and channels already registered.
    pub fn register(
        &self,
        guild_id: u64,
        channel_id: u64,
        owner_id: u64,
        role_id: Option<u64>,
        lobby_channel_id: Option<u64>,
    ) -> VoiceResult<()> {
        if lobby_channel_id == Some(channel_id) {
            return Err(VoiceError::LobbyNotChild);
        }
        if self.children.contains_key(&channel_id) {
            return Err(VoiceError::AlreadyRegistered(channel_id));
        }
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        self.children.insert(
            channel_id,
            ChildRecord {
                guild_id,
                owner_id,
                role_id,
                seq,
            },
        );
        Ok(())
    }

    /// Load persisted records for a guild, replacing any it already holds.
    pub fn hydrate(&self, guild_id: u64, children: &[ChildChannel]) {
        self.children
            .retain(|_, record| record.guild_id != guild_id);
        for child in children {
            let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
            self.children.insert(
                child.channel_id,
                ChildRecord {
                    guild_id,
                    owner_id: child.owner_id,
                    role_id: child.role_id,
                    seq,
                },
            );
        }
    }

    /// Drop a channel's record, returning it if it existed.
    pub fn remove(&self, channel_id: u64) -> Option<ChildRecord> {
        self.children.remove(&channel_id).map(|(_, record)| record)
    }

    #[must_use]
    pub fn is_child(&self, channel_id: u64) -> bool {
        self.children.contains_key(&channel_id)
    }

    #[must_use]
    pub fn owner_of(&self, channel_id: u64) -> Option<u64> {
        self.children.get(&channel_id).map(|record| record.owner_id)
    }

    #[must_use]
    pub fn role_of(&self, channel_id: u64) -> Option<u64> {
        self.children.get(&channel_id).and_then(|record| record.role_id)
    }

    /// Channel a member currently owns in this guild, if any.
    #[must_use]
    pub fn channel_of(&self, guild_id: u64, member_id: u64) -> Option<u64> {
        self.children.iter().find_map(|entry| {
            let record = entry.value();
            (record.guild_id == guild_id && record.owner_id == member_id)
                .then(|| *entry.key())
        })
    }

    /// Hand ownership to `new_owner`. Transferring to the current owner is a
    /// no-op success.
    ///
    /// # Errors
    ///
    /// Fails if the channel is not registered.
    pub fn transfer(&self, channel_id: u64, new_owner: u64) -> VoiceResult<()> {
        let mut record = self
            .children
            .get_mut(&channel_id)
            .ok_or(VoiceError::NotInChildChannel)?;
        record.owner_id = new_owner;
        Ok(())
    }

    /// Set or clear the per-channel role override.
    ///
    /// # Errors
    ///
    /// Fails if the channel is not registered.
    pub fn set_role(&self, channel_id: u64, role_id: Option<u64>) -> VoiceResult<()> {
        let mut record = self
            .children
            .get_mut(&channel_id)
            .ok_or(VoiceError::NotInChildChannel)?;
        record.role_id = role_id;
        Ok(())
    }

    /// Take ownership of an abandoned channel. Succeeds only when the current
    /// owner is not among `occupants`.
    ///
    /// # Errors
    ///
    /// Fails with `OwnerStillActive` when the owner is still in the channel.
    pub fn claim(&self, channel_id: u64, claimant: u64, occupants: &[u64]) -> VoiceResult<()> {
        let mut record = self
            .children
            .get_mut(&channel_id)
            .ok_or(VoiceError::NotInChildChannel)?;
        if record.owner_id == claimant {
            return Ok(());
        }
        if occupants.contains(&record.owner_id) {
            return Err(VoiceError::OwnerStillActive);
        }
        record.owner_id = claimant;
        Ok(())
    }

    /// Persisted form of one guild's children, in spawn order.
    #[must_use]
    pub fn snapshot(&self, guild_id: u64) -> Vec<ChildChannel> {
        let mut children: Vec<(u64, ChildRecord)> = self
            .children
            .iter()
            .filter(|entry| entry.value().guild_id == guild_id)
            .map(|entry| (*entry.key(), *entry.value()))
            .collect();
        children.sort_by_key(|(_, record)| record.seq);
        children
            .into_iter()
            .map(|(channel_id, record)| ChildChannel {
                channel_id,
                owner_id: record.owner_id,
                role_id: record.role_id,
            })
            .collect()
    }

    /// Channel ids of one guild's children, in spawn order.
    #[must_use]
    pub fn guild_children(&self, guild_id: u64) -> Vec<u64> {
        self.snapshot(guild_id)
            .into_iter()
            .map(|child| child.channel_id)
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.children.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_lookup() {
        let registry = VoiceRegistry::new();
        registry.register(1, 100, 7, None, Some(99)).unwrap();

        assert!(registry.is_child(100));
        assert_eq!(registry.owner_of(100), Some(7));
        assert_eq!(registry.channel_of(1, 7), Some(100));
        assert_eq!(registry.channel_of(2, 7), None);
    }

    #[test]
    fn test_register_rejects_lobby_and_duplicates() {
        let registry = VoiceRegistry::new();
        assert!(matches!(
            registry.register(1, 99, 7, None, Some(99)),
            Err(VoiceError::LobbyNotChild)
        ));

        registry.register(1, 100, 7, None, Some(99)).unwrap();
        assert!(matches!(
            registry.register(1, 100, 8, None, Some(99)),
            Err(VoiceError::AlreadyRegistered(100))
        ));
    }

    #[test]
    fn test_transfer_is_idempotent() {
        let registry = VoiceRegistry::new();
        registry.register(1, 100, 7, None, None).unwrap();

        registry.transfer(100, 8).unwrap();
        assert_eq!(registry.owner_of(100), Some(8));
        registry.transfer(100, 8).unwrap();
        assert_eq!(registry.owner_of(100), Some(8));
    }

    #[test]
    fn test_claim_requires_absent_owner() {
        let registry = VoiceRegistry::new();
        registry.register(1, 100, 7, None, None).unwrap();

        // Owner still sitting in the channel.
        assert!(matches!(
            registry.claim(100, 8, &[7, 8]),
            Err(VoiceError::OwnerStillActive)
        ));
        assert_eq!(registry.owner_of(100), Some(7));

        registry.claim(100, 8, &[8]).unwrap();
        assert_eq!(registry.owner_of(100), Some(8));

        // Claiming your own channel succeeds without checking occupants.
        registry.claim(100, 8, &[7, 8]).unwrap();
    }

    #[test]
    fn test_snapshot_preserves_spawn_order() {
        let registry = VoiceRegistry::new();
        registry.register(1, 300, 7, None, None).unwrap();
        registry.register(1, 100, 8, Some(55), None).unwrap();
        registry.register(2, 200, 9, None, None).unwrap();

        let snapshot = registry.snapshot(1);
        assert_eq!(
            snapshot,
            vec![
                ChildChannel {
                    channel_id: 300,
                    owner_id: 7,
                    role_id: None
                },
                ChildChannel {
                    channel_id: 100,
                    owner_id: 8,
                    role_id: Some(55)
                },
            ]
        );
        assert_eq!(registry.guild_children(2), vec![200]);
    }

    #[test]
    fn test_hydrate_replaces_guild_records() {
        let registry = VoiceRegistry::new();
        registry.register(1, 100, 7, None, None).unwrap();
        registry.register(2, 200, 9, None, None).unwrap();

        registry.hydrate(
            1,
            &[ChildChannel {
                channel_id: 101,
                owner_id: 7,
                role_id: None,
            }],
        );

        assert!(!registry.is_child(100));
        assert!(registry.is_child(101));
        // Other guilds untouched.
        assert!(registry.is_child(200));
    }

    #[test]
    fn test_remove() {
        let registry = VoiceRegistry::new();
        registry.register(1, 100, 7, None, None).unwrap();

        let record = registry.remove(100).unwrap();
        assert_eq!(record.owner_id, 7);
        assert!(registry.remove(100).is_none());
        assert!(registry.is_empty());
    }
}
