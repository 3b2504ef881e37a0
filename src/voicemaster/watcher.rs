//! Voice lobby watcher
//!
//! Reacts to voice-state updates: spawns a child channel when someone joins
//! the lobby, assigns the configured role on child joins, and deletes child
//! channels the moment they empty out.

use std::collections::HashSet;

use poise::serenity_prelude as serenity;
use serenity::{
    ChannelId, ChannelType, CreateChannel, EditChannel, EditMember, GuildChannel, GuildId,
    PermissionOverwrite, PermissionOverwriteType, Permissions, UserId, VoiceState,
};
use tokio::time::Duration;
use tracing::{error, info, warn};

use crate::data::Data;
use crate::error;
use crate::voicemaster::config::{ChildChannel, VoicemasterConfig};
use crate::voicemaster::error::{VoiceError, VoiceResult};
use crate::VOICE_TARGET;

/// Wall-clock bound on any single platform call made from the watcher.
const API_TIMEOUT: Duration = Duration::from_secs(15);

/// Run one platform call under [`API_TIMEOUT`].
async fn bounded<T>(
    fut: impl std::future::Future<Output = Result<T, ::serenity::Error>>,
) -> VoiceResult<T> {
    match tokio::time::timeout(API_TIMEOUT, fut).await {
        Ok(result) => result.map_err(Into::into),
        Err(_) => Err(VoiceError::Timeout),
    }
}

/// Entry point for every gateway voice-state change. Logs and swallows its
/// own errors so a failure never aborts sibling handlers.
pub async fn on_voice_state_update(
    ctx: &serenity::Context,
    data: &Data,
    old: Option<&VoiceState>,
    new: &VoiceState,
) {
    if let Err(e) = handle_voice_state(ctx, data, old, new).await {
        error!(
            target: VOICE_TARGET,
            user_id = %new.user_id,
            error = %e,
            "Voice watcher failed"
        );
    }
}

async fn handle_voice_state(
    ctx: &serenity::Context,
    data: &Data,
    old: Option<&VoiceState>,
    new: &VoiceState,
) -> VoiceResult<()> {
    let Some(guild_id) = new.guild_id.or_else(|| old.and_then(|o| o.guild_id)) else {
        return Ok(());
    };

    let config = data.store.voicemaster(guild_id.get()).await?;
    let config = match config {
        Some(config) if config.is_setup => config,
        _ => return Ok(()),
    };

    // Joins are handled before the empty-check so moving lobby->child never
    // deletes the channel we just spawned.
    if let Some(joined) = new.channel_id {
        if Some(joined.get()) == config.lobby_channel_id {
            handle_lobby_join(ctx, data, guild_id, new.user_id, &config).await?;
        } else if data.voice.is_child(joined.get()) {
            assign_child_role(ctx, data, guild_id, new.user_id, joined.get(), &config).await;
        }
    }

    if let Some(left) = old.and_then(|o| o.channel_id) {
        if Some(left) != new.channel_id && data.voice.is_child(left.get()) {
            reap_if_empty(ctx, data, guild_id, left).await?;
        }
    }

    Ok(())
}

async fn handle_lobby_join(
    ctx: &serenity::Context,
    data: &Data,
    guild_id: GuildId,
    user_id: UserId,
    config: &VoicemasterConfig,
) -> VoiceResult<()> {
    // Someone who already owns a child gets moved back into it instead of
    // spawning a second one.
    if let Some(existing) = data.voice.channel_of(guild_id.get(), user_id.get()) {
        bounded(guild_id.edit_member(
            &ctx.http,
            user_id,
            EditMember::new().voice_channel(ChannelId::new(existing)),
        ))
        .await?;
        return Ok(());
    }

    let username = match bounded(guild_id.member(&ctx.http, user_id)).await {
        Ok(member) => member.user.name.clone(),
        Err(_) => user_id.to_string(),
    };
    let defaults = config.child_defaults(&username);

    let mut builder = CreateChannel::new(defaults.name.clone())
        .kind(ChannelType::Voice)
        .permissions(vec![PermissionOverwrite {
            allow: Permissions::CONNECT | Permissions::VIEW_CHANNEL,
            deny: Permissions::empty(),
            kind: PermissionOverwriteType::Member(user_id),
        }]);
    if let Some(category) = defaults.category_id {
        builder = builder.category(ChannelId::new(category));
    }
    if let Some(bitrate) = defaults.bitrate {
        builder = builder.bitrate(bitrate);
    }

    let channel = bounded(guild_id.create_channel(&ctx.http, builder)).await?;

    if let Some(region) = defaults.region.clone() {
        if let Err(e) = bounded(
            channel
                .id
                .edit(&ctx.http, EditChannel::new().voice_region(Some(region))),
        )
        .await
        {
            warn!(
                target: VOICE_TARGET,
                channel_id = %channel.id,
                error = %e,
                "Failed to set voice region on spawned channel"
            );
        }
    }

    // Record before the move so the janitor can reap the channel even if the
    // move fails and leaves it orphaned.
    data.voice.register(
        guild_id.get(),
        channel.id.get(),
        user_id.get(),
        defaults.role_id,
        config.lobby_channel_id,
    )?;
    persist_children(data, guild_id.get()).await;

    if let Err(e) = bounded(guild_id.edit_member(
        &ctx.http,
        user_id,
        EditMember::new().voice_channel(channel.id),
    ))
    .await
    {
        warn!(
            target: VOICE_TARGET,
            guild_id = %guild_id,
            user_id = %user_id,
            channel_id = %channel.id,
            error = %e,
            "Failed to move owner into spawned channel"
        );
        return Ok(());
    }

    info!(
        target: VOICE_TARGET,
        guild_id = %guild_id,
        owner_id = %user_id,
        channel_id = %channel.id,
        name = %defaults.name,
        "Spawned voice channel"
    );
    Ok(())
}

async fn assign_child_role(
    ctx: &serenity::Context,
    data: &Data,
    guild_id: GuildId,
    user_id: UserId,
    channel_id: u64,
    config: &VoicemasterConfig,
) {
    let Some(role_id) = data.voice.role_of(channel_id).or(config.default_role_id) else {
        return;
    };
    if let Err(e) = bounded(ctx.http.add_member_role(
        guild_id,
        user_id,
        serenity::RoleId::new(role_id),
        Some("VoiceMaster role assignment"),
    ))
    .await
    {
        warn!(
            target: VOICE_TARGET,
            guild_id = %guild_id,
            user_id = %user_id,
            role_id,
            error = %e,
            "Failed to assign voice role"
        );
    }
}

/// Delete a child channel once it has no occupants left.
async fn reap_if_empty(
    ctx: &serenity::Context,
    data: &Data,
    guild_id: GuildId,
    channel_id: ChannelId,
) -> VoiceResult<()> {
    if !channel_occupants(ctx, guild_id, channel_id).is_empty() {
        return Ok(());
    }

    match bounded(channel_id.delete(&ctx.http)).await {
        Ok(_) => {}
        // Already gone, usually deleted by hand; just drop the record.
        Err(VoiceError::DiscordApi(e)) if error::is_not_found(&e) => {}
        Err(e) => return Err(e),
    }

    data.voice.remove(channel_id.get());
    persist_children(data, guild_id.get()).await;
    info!(
        target: VOICE_TARGET,
        guild_id = %guild_id,
        channel_id = %channel_id,
        "Reaped empty voice channel"
    );
    Ok(())
}

/// Drop the record for a child channel deleted out from under us.
pub async fn on_channel_delete(data: &Data, channel: &GuildChannel) {
    if data.voice.remove(channel.id.get()).is_some() {
        persist_children(data, channel.guild_id.get()).await;
        info!(
            target: VOICE_TARGET,
            guild_id = %channel.guild_id,
            channel_id = %channel.id,
            "Dropped record for externally deleted channel"
        );
    }
}

/// Members currently connected to `channel_id`, read from the gateway cache.
#[must_use]
pub fn channel_occupants(
    ctx: &serenity::Context,
    guild_id: GuildId,
    channel_id: ChannelId,
) -> Vec<u64> {
    // Copy out of the cache guard before any await point.
    ctx.cache
        .guild(guild_id)
        .map(|guild| {
            guild
                .voice_states
                .values()
                .filter(|state| state.channel_id == Some(channel_id))
                .map(|state| state.user_id.get())
                .collect()
        })
        .unwrap_or_default()
}

/// Write the registry's view of a guild back to the store.
pub async fn persist_children(data: &Data, guild_id: u64) {
    let snapshot = data.voice.snapshot(guild_id);
    if let Err(e) = data.store.update_child_channels(guild_id, &snapshot).await {
        warn!(
            target: VOICE_TARGET,
            guild_id,
            error = %e,
            "Failed to persist child channel records"
        );
    }
}

/// Persisted records whose channels still exist in the guild.
fn live_children(persisted: &[ChildChannel], existing: &HashSet<u64>) -> Vec<ChildChannel> {
    persisted
        .iter()
        .filter(|child| existing.contains(&child.channel_id))
        .copied()
        .collect()
}

/// Reload a guild's persisted child records into the registry after a
/// restart. Records whose channels were deleted while the process was down
/// are dropped, and channels that emptied out in the meantime are reaped.
pub async fn hydrate_guild(ctx: &serenity::Context, data: &Data, guild_id: GuildId) {
    let config = match data.store.voicemaster(guild_id.get()).await {
        Ok(Some(config)) => config,
        Ok(None) => return,
        Err(e) => {
            warn!(
                target: VOICE_TARGET,
                guild_id = %guild_id,
                error = %e,
                "Failed to load voice configuration for hydration"
            );
            return;
        }
    };
    if config.custom_channels.is_empty() {
        return;
    }

    // Copy the channel set out of the cache guard before any await point.
    let existing: HashSet<u64> = ctx
        .cache
        .guild(guild_id)
        .map(|guild| guild.channels.keys().map(|id| id.get()).collect())
        .unwrap_or_default();

    let live = live_children(&config.custom_channels, &existing);
    let dropped = config.custom_channels.len() - live.len();
    data.voice.hydrate(guild_id.get(), &live);
    if dropped > 0 {
        persist_children(data, guild_id.get()).await;
    }
    info!(
        target: VOICE_TARGET,
        guild_id = %guild_id,
        children = live.len(),
        dropped,
        "Hydrated voice registry"
    );

    for child in live {
        if let Err(e) = reap_if_empty(ctx, data, guild_id, ChannelId::new(child.channel_id)).await {
            warn!(
                target: VOICE_TARGET,
                guild_id = %guild_id,
                channel_id = child.channel_id,
                error = %e,
                "Failed to reap stale channel during hydration"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn child(channel_id: u64, owner_id: u64) -> ChildChannel {
        ChildChannel {
            channel_id,
            owner_id,
            role_id: None,
        }
    }

    #[test]
    fn test_live_children_drops_deleted_channels() {
        let persisted = [child(100, 7), child(101, 8), child(102, 9)];
        let existing: HashSet<u64> = [100, 102].into();

        let live = live_children(&persisted, &existing);
        assert_eq!(live, vec![child(100, 7), child(102, 9)]);
    }

    #[test]
    fn test_live_children_empty_cache_drops_everything() {
        let persisted = [child(100, 7)];
        assert!(live_children(&persisted, &HashSet::new()).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_passes_results_through() {
        let value = bounded(async { Ok::<u32, ::serenity::Error>(42) }).await;
        assert_eq!(value.ok(), Some(42));
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_times_out_stalled_calls() {
        let result: VoiceResult<u32> = bounded(std::future::pending()).await;
        assert!(matches!(result, Err(VoiceError::Timeout)));
    }
}
