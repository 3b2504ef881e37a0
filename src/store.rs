//! Per-guild configuration store
//!
//! Postgres-backed, with a write-through `DashMap` cache in front so event
//! handlers read hot config without touching the pool. Without a
//! `DATABASE_URL` the store runs cache-only: everything works, nothing
//! survives a restart.

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use thiserror::Error;
use tracing::{info, warn};

use crate::antinuke::{AntinukeConfig, Module, Punishment};
use crate::voicemaster::config::{ChildChannel, VoicemasterConfig};
use crate::CONSOLE_TARGET;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("stored document failed to decode: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("threshold {0} is invalid; it must be at least 1")]
    InvalidThreshold(u32),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Partial update for one antinuke module document.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModulePatch {
    pub enabled: Option<bool>,
    pub threshold: Option<u32>,
    pub punishment: Option<Punishment>,
}

/// Category ids are persisted as one compound column.
#[derive(Debug, Serialize, serde::Deserialize, Default)]
struct CategoryIds {
    default: Option<u64>,
    custom: Option<u64>,
}

pub struct ConfigStore {
    pool: Option<PgPool>,
    antinuke: DashMap<u64, AntinukeConfig>,
    voicemaster: DashMap<u64, VoicemasterConfig>,
}

impl ConfigStore {
    /// Cache-only store. Used in tests and when no `DATABASE_URL` is set.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            pool: None,
            antinuke: DashMap::new(),
            voicemaster: DashMap::new(),
        }
    }

    /// Connect to Postgres and create the tables if they are missing.
    ///
    /// # Errors
    ///
    /// Returns a `StoreError` if the pool cannot be established or the schema
    /// statements fail.
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS antinuke_system (
                guild_id BIGINT PRIMARY KEY,
                admins JSONB,
                whitelist JSONB,
                botadd JSONB,
                vanity JSONB,
                perms JSONB,
                ban JSONB,
                kick JSONB,
                role JSONB,
                channel JSONB,
                webhook JSONB,
                emoji JSONB
            )",
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS voicemaster_system (
                guild_id BIGINT PRIMARY KEY,
                category_channel_ids JSONB,
                interface_channel_id BIGINT,
                voice_channel_id BIGINT,
                is_setup BOOLEAN NOT NULL DEFAULT FALSE,
                default_role_id BIGINT,
                default_name TEXT,
                default_region TEXT,
                default_bitrate INT,
                custom_channels JSONB
            )",
        )
        .execute(&pool)
        .await?;

        info!(target: CONSOLE_TARGET, "Config store connected");

        Ok(Self {
            pool: Some(pool),
            antinuke: DashMap::new(),
            voicemaster: DashMap::new(),
        })
    }

    #[must_use]
    pub fn is_persistent(&self) -> bool {
        self.pool.is_some()
    }

    /// Antinuke configuration for a guild; defaults when no row exists.
    ///
    /// # Errors
    ///
    /// Returns a `StoreError` on query or decode failure. A guild whose row
    /// fails to decode is treated as a hard error rather than silently reset.
    pub async fn antinuke(&self, guild_id: u64) -> StoreResult<AntinukeConfig> {
        if let Some(config) = self.antinuke.get(&guild_id) {
            return Ok(config.clone());
        }

        let Some(pool) = &self.pool else {
            return Ok(AntinukeConfig::default());
        };

        let row = sqlx::query(
            "SELECT admins, whitelist, botadd, vanity, perms,
                    ban, kick, role, channel, webhook, emoji
             FROM antinuke_system WHERE guild_id = $1",
        )
        .bind(guild_id as i64)
        .fetch_optional(pool)
        .await?;

        let config = match row {
            Some(row) => decode_antinuke(&row)?,
            None => AntinukeConfig::default(),
        };
        self.antinuke.insert(guild_id, config.clone());
        Ok(config)
    }

    /// Replace a guild's antinuke row. Last writer wins.
    ///
    /// # Errors
    ///
    /// Returns a `StoreError` if the upsert fails; the cache is only updated
    /// after the row is durable.
    pub async fn save_antinuke(&self, guild_id: u64, config: AntinukeConfig) -> StoreResult<()> {
        if let Some(pool) = &self.pool {
            sqlx::query(
                "INSERT INTO antinuke_system
                    (guild_id, admins, whitelist, botadd, vanity, perms,
                     ban, kick, role, channel, webhook, emoji)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                 ON CONFLICT (guild_id) DO UPDATE SET
                    admins = EXCLUDED.admins,
                    whitelist = EXCLUDED.whitelist,
                    botadd = EXCLUDED.botadd,
                    vanity = EXCLUDED.vanity,
                    perms = EXCLUDED.perms,
                    ban = EXCLUDED.ban,
                    kick = EXCLUDED.kick,
                    role = EXCLUDED.role,
                    channel = EXCLUDED.channel,
                    webhook = EXCLUDED.webhook,
                    emoji = EXCLUDED.emoji",
            )
            .bind(guild_id as i64)
            .bind(to_json(&config.admins)?)
            .bind(to_json(&config.whitelist)?)
            .bind(to_json(&config.botadd)?)
            .bind(to_json(&config.vanity)?)
            .bind(to_json(&config.permissions)?)
            .bind(to_json(&config.ban)?)
            .bind(to_json(&config.kick)?)
            .bind(to_json(&config.role)?)
            .bind(to_json(&config.channel)?)
            .bind(to_json(&config.webhook)?)
            .bind(to_json(&config.emoji)?)
            .execute(pool)
            .await?;
        } else {
            warn!(
                target: CONSOLE_TARGET,
                guild_id, "Antinuke config saved to cache only; no database configured"
            );
        }

        self.antinuke.insert(guild_id, config);
        Ok(())
    }

    /// Read-modify-write one module document.
    ///
    /// # Errors
    ///
    /// Rejects thresholds below 1 before touching the store.
    pub async fn update_module(
        &self,
        guild_id: u64,
        module: Module,
        patch: ModulePatch,
    ) -> StoreResult<AntinukeConfig> {
        if let Some(threshold) = patch.threshold {
            if threshold < 1 {
                return Err(StoreError::InvalidThreshold(threshold));
            }
        }

        let mut config = self.antinuke(guild_id).await?;
        let doc = config.module_mut(module);
        if let Some(enabled) = patch.enabled {
            doc.enabled = enabled;
        }
        if let Some(threshold) = patch.threshold {
            doc.threshold = threshold;
        }
        if let Some(punishment) = patch.punishment {
            doc.punishment = punishment;
        }

        self.save_antinuke(guild_id, config.clone()).await?;
        Ok(config)
    }

    /// VoiceMaster configuration, or `None` when the guild never ran setup.
    ///
    /// # Errors
    ///
    /// Returns a `StoreError` on query or decode failure.
    pub async fn voicemaster(&self, guild_id: u64) -> StoreResult<Option<VoicemasterConfig>> {
        if let Some(config) = self.voicemaster.get(&guild_id) {
            return Ok(Some(config.clone()));
        }

        let Some(pool) = &self.pool else {
            return Ok(None);
        };

        let row = sqlx::query(
            "SELECT category_channel_ids, interface_channel_id, voice_channel_id,
                    is_setup, default_role_id, default_name, default_region,
                    default_bitrate, custom_channels
             FROM voicemaster_system WHERE guild_id = $1",
        )
        .bind(guild_id as i64)
        .fetch_optional(pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let config = decode_voicemaster(&row)?;
        self.voicemaster.insert(guild_id, config.clone());
        Ok(Some(config))
    }

    /// Replace a guild's VoiceMaster row.
    ///
    /// # Errors
    ///
    /// Returns a `StoreError` if the upsert fails.
    pub async fn save_voicemaster(
        &self,
        guild_id: u64,
        config: VoicemasterConfig,
    ) -> StoreResult<()> {
        if let Some(pool) = &self.pool {
            let categories = CategoryIds {
                default: config.default_category_id,
                custom: config.custom_category_id,
            };
            sqlx::query(
                "INSERT INTO voicemaster_system
                    (guild_id, category_channel_ids, interface_channel_id,
                     voice_channel_id, is_setup, default_role_id, default_name,
                     default_region, default_bitrate, custom_channels)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                 ON CONFLICT (guild_id) DO UPDATE SET
                    category_channel_ids = EXCLUDED.category_channel_ids,
                    interface_channel_id = EXCLUDED.interface_channel_id,
                    voice_channel_id = EXCLUDED.voice_channel_id,
                    is_setup = EXCLUDED.is_setup,
                    default_role_id = EXCLUDED.default_role_id,
                    default_name = EXCLUDED.default_name,
                    default_region = EXCLUDED.default_region,
                    default_bitrate = EXCLUDED.default_bitrate,
                    custom_channels = EXCLUDED.custom_channels",
            )
            .bind(guild_id as i64)
            .bind(to_json(&categories)?)
            .bind(config.interface_channel_id.map(|id| id as i64))
            .bind(config.lobby_channel_id.map(|id| id as i64))
            .bind(config.is_setup)
            .bind(config.default_role_id.map(|id| id as i64))
            .bind(config.default_name.as_deref())
            .bind(config.default_region.as_deref())
            .bind(config.default_bitrate.map(|b| b as i32))
            .bind(to_json(&config.custom_channels)?)
            .execute(pool)
            .await?;
        } else {
            warn!(
                target: CONSOLE_TARGET,
                guild_id, "VoiceMaster config saved to cache only; no database configured"
            );
        }

        self.voicemaster.insert(guild_id, config);
        Ok(())
    }

    /// Persist the current child-channel list for a guild. No-op when the
    /// guild has no VoiceMaster row.
    ///
    /// # Errors
    ///
    /// Returns a `StoreError` if the update fails.
    pub async fn update_child_channels(
        &self,
        guild_id: u64,
        children: &[ChildChannel],
    ) -> StoreResult<()> {
        if let Some(pool) = &self.pool {
            sqlx::query(
                "UPDATE voicemaster_system SET custom_channels = $2 WHERE guild_id = $1",
            )
            .bind(guild_id as i64)
            .bind(to_json(&children)?)
            .execute(pool)
            .await?;
        }

        if let Some(mut config) = self.voicemaster.get_mut(&guild_id) {
            config.custom_channels = children.to_vec();
        }
        Ok(())
    }

    /// Drop a guild's VoiceMaster row entirely.
    ///
    /// # Errors
    ///
    /// Returns a `StoreError` if the delete fails.
    pub async fn delete_voicemaster(&self, guild_id: u64) -> StoreResult<()> {
        if let Some(pool) = &self.pool {
            sqlx::query("DELETE FROM voicemaster_system WHERE guild_id = $1")
                .bind(guild_id as i64)
                .execute(pool)
                .await?;
        }
        self.voicemaster.remove(&guild_id);
        Ok(())
    }
}

fn to_json<T: Serialize>(value: &T) -> StoreResult<serde_json::Value> {
    Ok(serde_json::to_value(value)?)
}

fn json_column<T: DeserializeOwned>(row: &PgRow, name: &str) -> StoreResult<Option<T>> {
    let value: Option<serde_json::Value> = row.try_get(name)?;
    Ok(value.map(serde_json::from_value).transpose()?)
}

fn decode_antinuke(row: &PgRow) -> StoreResult<AntinukeConfig> {
    Ok(AntinukeConfig {
        admins: json_column(row, "admins")?.unwrap_or_default(),
        whitelist: json_column(row, "whitelist")?.unwrap_or_default(),
        botadd: json_column(row, "botadd")?.unwrap_or_default(),
        vanity: json_column(row, "vanity")?.unwrap_or_default(),
        permissions: json_column(row, "perms")?.unwrap_or_default(),
        ban: json_column(row, "ban")?.unwrap_or_default(),
        kick: json_column(row, "kick")?.unwrap_or_default(),
        role: json_column(row, "role")?.unwrap_or_default(),
        channel: json_column(row, "channel")?.unwrap_or_default(),
        webhook: json_column(row, "webhook")?.unwrap_or_default(),
        emoji: json_column(row, "emoji")?.unwrap_or_default(),
    })
}

fn decode_voicemaster(row: &PgRow) -> StoreResult<VoicemasterConfig> {
    let categories: CategoryIds = json_column(row, "category_channel_ids")?.unwrap_or_default();
    Ok(VoicemasterConfig {
        is_setup: row.try_get("is_setup")?,
        default_category_id: categories.default,
        custom_category_id: categories.custom,
        interface_channel_id: row
            .try_get::<Option<i64>, _>("interface_channel_id")?
            .map(|id| id as u64),
        lobby_channel_id: row
            .try_get::<Option<i64>, _>("voice_channel_id")?
            .map(|id| id as u64),
        default_role_id: row
            .try_get::<Option<i64>, _>("default_role_id")?
            .map(|id| id as u64),
        default_name: row.try_get("default_name")?,
        default_region: row.try_get("default_region")?,
        default_bitrate: row
            .try_get::<Option<i32>, _>("default_bitrate")?
            .map(|b| b as u32),
        custom_channels: json_column(row, "custom_channels")?.unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::antinuke::Punishment;

    #[tokio::test]
    async fn test_in_memory_defaults() {
        let store = ConfigStore::in_memory();
        assert!(!store.is_persistent());

        let config = store.antinuke(1).await.unwrap();
        assert_eq!(config, AntinukeConfig::default());
        assert!(store.voicemaster(1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_in_memory_write_through() {
        let store = ConfigStore::in_memory();
        let mut config = AntinukeConfig::default();
        config.admins.insert(42);
        config.ban.enabled = true;

        store.save_antinuke(1, config.clone()).await.unwrap();
        assert_eq!(store.antinuke(1).await.unwrap(), config);
        // Other guilds keep defaults.
        assert_eq!(store.antinuke(2).await.unwrap(), AntinukeConfig::default());
    }

    #[tokio::test]
    async fn test_update_module_patch() {
        let store = ConfigStore::in_memory();
        let config = store
            .update_module(
                1,
                Module::Webhook,
                ModulePatch {
                    enabled: Some(true),
                    threshold: Some(5),
                    punishment: Some(Punishment::Ban),
                },
            )
            .await
            .unwrap();

        assert!(config.webhook.enabled);
        assert_eq!(config.webhook.threshold, 5);
        assert_eq!(config.webhook.punishment, Punishment::Ban);
        // Untouched fields keep their values.
        assert_eq!(config.ban, crate::antinuke::ModuleConfig::default());
    }

    #[tokio::test]
    async fn test_update_module_rejects_zero_threshold() {
        let store = ConfigStore::in_memory();
        let err = store
            .update_module(
                1,
                Module::Ban,
                ModulePatch {
                    threshold: Some(0),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidThreshold(0)));
        // Nothing was written.
        assert_eq!(store.antinuke(1).await.unwrap(), AntinukeConfig::default());
    }

    #[tokio::test]
    async fn test_voicemaster_lifecycle() {
        let store = ConfigStore::in_memory();
        let config = VoicemasterConfig {
            is_setup: true,
            lobby_channel_id: Some(99),
            ..Default::default()
        };
        store.save_voicemaster(1, config.clone()).await.unwrap();
        assert_eq!(store.voicemaster(1).await.unwrap(), Some(config));

        let children = vec![ChildChannel {
            channel_id: 100,
            owner_id: 7,
            role_id: None,
        }];
        store.update_child_channels(1, &children).await.unwrap();
        assert_eq!(
            store.voicemaster(1).await.unwrap().map(|c| c.custom_channels),
            Some(children)
        );

        store.delete_voicemaster(1).await.unwrap();
        assert!(store.voicemaster(1).await.unwrap().is_none());
    }
}
