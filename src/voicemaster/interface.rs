//! Owner control surface for spawned voice channels.
//!
//! Every operation resolves the caller's session first: the caller must be
//! sitting in a registered child channel, and (except for claim) must own it.
//! Overwrite edits merge into the existing overwrite for the target instead
//! of clobbering unrelated bits.

use poise::serenity_prelude as serenity;
use serenity::{
    ChannelId, EditChannel, EditMember, GuildChannel, GuildId, PermissionOverwrite,
    PermissionOverwriteType, Permissions, RoleId, UserId,
};
use tracing::info;

use crate::data::Data;
use crate::voicemaster::config::{self, USER_LIMIT};
use crate::voicemaster::error::{VoiceError, VoiceResult};
use crate::voicemaster::watcher::{self, channel_occupants};
use crate::VOICE_TARGET;

/// The caller's position in a child channel.
#[derive(Debug, Clone, Copy)]
pub struct Session {
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
    pub caller: UserId,
    pub owner_id: u64,
}

impl Session {
    /// # Errors
    ///
    /// Fails when the caller does not own the channel.
    pub fn require_owner(&self) -> VoiceResult<()> {
        if self.owner_id == self.caller.get() {
            Ok(())
        } else {
            Err(VoiceError::NotOwner)
        }
    }
}

/// Locate the caller inside a child channel.
///
/// # Errors
///
/// Fails when the caller is not connected to a registered child channel.
pub fn resolve(
    ctx: &serenity::Context,
    data: &Data,
    guild_id: GuildId,
    caller: UserId,
) -> VoiceResult<Session> {
    // Copy the channel id out of the cache guard before any await point.
    let channel_id = ctx
        .cache
        .guild(guild_id)
        .and_then(|guild| {
            guild
                .voice_states
                .get(&caller)
                .and_then(|state| state.channel_id)
        })
        .ok_or(VoiceError::NotInChildChannel)?;

    let owner_id = data
        .voice
        .owner_of(channel_id.get())
        .ok_or(VoiceError::NotInChildChannel)?;

    Ok(Session {
        guild_id,
        channel_id,
        caller,
        owner_id,
    })
}

/// Merge `bits` into the deny side of an overwrite.
#[must_use]
pub fn merge_deny(
    allow: Permissions,
    deny: Permissions,
    bits: Permissions,
) -> (Permissions, Permissions) {
    (allow & !bits, deny | bits)
}

/// Reset `bits` to inherit. `None` means the whole overwrite is now empty
/// and should be deleted.
#[must_use]
pub fn clear_bits(
    allow: Permissions,
    deny: Permissions,
    bits: Permissions,
) -> Option<(Permissions, Permissions)> {
    let allow = allow & !bits;
    let deny = deny & !bits;
    if allow.is_empty() && deny.is_empty() {
        None
    } else {
        Some((allow, deny))
    }
}

/// Adjust a user limit by `delta`, clamped to the valid range.
#[must_use]
pub fn bump_limit(current: u32, delta: i64) -> u32 {
    i64::from(current)
        .saturating_add(delta)
        .clamp(0, i64::from(USER_LIMIT.1)) as u32
}

async fn fetch_channel(ctx: &serenity::Context, channel_id: ChannelId) -> VoiceResult<GuildChannel> {
    match channel_id.to_channel(&ctx.http).await? {
        serenity::Channel::Guild(channel) => Ok(channel),
        _ => Err(VoiceError::NotInChildChannel),
    }
}

fn overwrite_for(channel: &GuildChannel, kind: PermissionOverwriteType) -> (Permissions, Permissions) {
    channel
        .permission_overwrites
        .iter()
        .find(|overwrite| overwrite.kind == kind)
        .map_or((Permissions::empty(), Permissions::empty()), |overwrite| {
            (overwrite.allow, overwrite.deny)
        })
}

async fn deny_for_everyone(
    ctx: &serenity::Context,
    session: &Session,
    bits: Permissions,
) -> VoiceResult<()> {
    let kind = PermissionOverwriteType::Role(RoleId::new(session.guild_id.get()));
    let channel = fetch_channel(ctx, session.channel_id).await?;
    let (allow, deny) = overwrite_for(&channel, kind);
    let (allow, deny) = merge_deny(allow, deny, bits);
    session
        .channel_id
        .create_permission(&ctx.http, PermissionOverwrite { allow, deny, kind })
        .await?;
    Ok(())
}

async fn reset_for_everyone(
    ctx: &serenity::Context,
    session: &Session,
    bits: Permissions,
) -> VoiceResult<()> {
    let kind = PermissionOverwriteType::Role(RoleId::new(session.guild_id.get()));
    let channel = fetch_channel(ctx, session.channel_id).await?;
    let (allow, deny) = overwrite_for(&channel, kind);
    match clear_bits(allow, deny, bits) {
        Some((allow, deny)) => {
            session
                .channel_id
                .create_permission(&ctx.http, PermissionOverwrite { allow, deny, kind })
                .await?;
        }
        None => {
            session.channel_id.delete_permission(&ctx.http, kind).await?;
        }
    }
    Ok(())
}

/// Deny connect for the default role.
pub async fn lock(ctx: &serenity::Context, session: &Session) -> VoiceResult<()> {
    deny_for_everyone(ctx, session, Permissions::CONNECT).await
}

/// Reset connect for the default role to inherit.
pub async fn unlock(ctx: &serenity::Context, session: &Session) -> VoiceResult<()> {
    reset_for_everyone(ctx, session, Permissions::CONNECT).await
}

/// Deny view and connect for the default role.
pub async fn ghost(ctx: &serenity::Context, session: &Session) -> VoiceResult<()> {
    deny_for_everyone(ctx, session, Permissions::VIEW_CHANNEL | Permissions::CONNECT).await
}

/// Reset view and connect for the default role to inherit.
pub async fn reveal(ctx: &serenity::Context, session: &Session) -> VoiceResult<()> {
    reset_for_everyone(ctx, session, Permissions::VIEW_CHANNEL | Permissions::CONNECT).await
}

/// Deny or reset speak for the default role.
pub async fn music_only(ctx: &serenity::Context, session: &Session, on: bool) -> VoiceResult<()> {
    if on {
        deny_for_everyone(ctx, session, Permissions::SPEAK).await
    } else {
        reset_for_everyone(ctx, session, Permissions::SPEAK).await
    }
}

/// Nudge the user limit by `delta`, returning the new limit.
///
/// # Errors
///
/// Surfaces platform errors from the channel edit.
pub async fn adjust_limit(
    ctx: &serenity::Context,
    session: &Session,
    delta: i64,
) -> VoiceResult<u32> {
    let channel = fetch_channel(ctx, session.channel_id).await?;
    let limit = bump_limit(channel.user_limit.unwrap_or(0), delta);
    session
        .channel_id
        .edit(&ctx.http, EditChannel::new().user_limit(limit))
        .await?;
    Ok(limit)
}

/// Set the user limit outright.
///
/// # Errors
///
/// Rejects limits outside [0, 99].
pub async fn set_limit(ctx: &serenity::Context, session: &Session, limit: u32) -> VoiceResult<u32> {
    let limit = config::validate_limit(limit)?;
    session
        .channel_id
        .edit(&ctx.http, EditChannel::new().user_limit(limit))
        .await?;
    Ok(limit)
}

/// Rename the channel. The platform rate-limits channel renames hard; the
/// error surfaces to the caller.
pub async fn rename(ctx: &serenity::Context, session: &Session, name: &str) -> VoiceResult<()> {
    session
        .channel_id
        .edit(&ctx.http, EditChannel::new().name(name))
        .await?;
    Ok(())
}

/// Set the bitrate, given in kbps.
///
/// # Errors
///
/// Rejects bitrates outside [8, 96] kbps.
pub async fn set_bitrate(ctx: &serenity::Context, session: &Session, kbps: u32) -> VoiceResult<u32> {
    let bps = config::validate_bitrate(kbps)?;
    session
        .channel_id
        .edit(&ctx.http, EditChannel::new().bitrate(bps))
        .await?;
    Ok(kbps)
}

/// Pin the channel to a voice region.
///
/// # Errors
///
/// Rejects unknown region tags.
pub async fn set_region(
    ctx: &serenity::Context,
    session: &Session,
    region: &str,
) -> VoiceResult<String> {
    let tag = config::validate_region(region)?.to_string();
    session
        .channel_id
        .edit(&ctx.http, EditChannel::new().voice_region(Some(tag.clone())))
        .await?;
    Ok(tag)
}

/// Set or clear the channel's ephemeral status text.
pub async fn set_status(
    ctx: &serenity::Context,
    session: &Session,
    text: Option<String>,
) -> VoiceResult<()> {
    session
        .channel_id
        .edit(&ctx.http, EditChannel::new().status(text.unwrap_or_default()))
        .await?;
    Ok(())
}

/// Reject and disconnect act on other occupants; the owner (and the caller,
/// for claimed sessions) is off limits.
fn guard_target(session: &Session, target: UserId) -> VoiceResult<()> {
    if target.get() == session.owner_id || target == session.caller {
        return Err(VoiceError::CannotTargetOwner);
    }
    Ok(())
}

/// Grant a user connect and view on the channel.
pub async fn permit(ctx: &serenity::Context, session: &Session, user: UserId) -> VoiceResult<()> {
    session
        .channel_id
        .create_permission(
            &ctx.http,
            PermissionOverwrite {
                allow: Permissions::CONNECT | Permissions::VIEW_CHANNEL,
                deny: Permissions::empty(),
                kind: PermissionOverwriteType::Member(user),
            },
        )
        .await?;
    Ok(())
}

/// Deny a user connect and view; if they are in the channel, disconnect them.
pub async fn reject(ctx: &serenity::Context, session: &Session, user: UserId) -> VoiceResult<()> {
    guard_target(session, user)?;
    session
        .channel_id
        .create_permission(
            &ctx.http,
            PermissionOverwrite {
                allow: Permissions::empty(),
                deny: Permissions::CONNECT | Permissions::VIEW_CHANNEL,
                kind: PermissionOverwriteType::Member(user),
            },
        )
        .await?;

    if channel_occupants(ctx, session.guild_id, session.channel_id).contains(&user.get()) {
        session
            .guild_id
            .edit_member(&ctx.http, user, EditMember::new().disconnect_member())
            .await?;
    }
    Ok(())
}

/// Hand the channel to another occupant.
///
/// # Errors
///
/// The target must currently be in the channel.
pub async fn transfer(
    ctx: &serenity::Context,
    data: &Data,
    session: &Session,
    target: UserId,
) -> VoiceResult<()> {
    if !channel_occupants(ctx, session.guild_id, session.channel_id).contains(&target.get()) {
        return Err(VoiceError::TargetNotPresent(format!("<@{target}>")));
    }

    data.voice.transfer(session.channel_id.get(), target.get())?;
    watcher::persist_children(data, session.guild_id.get()).await;
    info!(
        target: VOICE_TARGET,
        guild_id = %session.guild_id,
        channel_id = %session.channel_id,
        new_owner = %target,
        "Transferred channel ownership"
    );
    Ok(())
}

/// Take ownership of a channel whose owner has left.
///
/// # Errors
///
/// Fails with `OwnerStillActive` while the owner remains connected.
pub async fn claim(ctx: &serenity::Context, data: &Data, session: &Session) -> VoiceResult<()> {
    let occupants = channel_occupants(ctx, session.guild_id, session.channel_id);
    data.voice
        .claim(session.channel_id.get(), session.caller.get(), &occupants)?;
    watcher::persist_children(data, session.guild_id.get()).await;
    info!(
        target: VOICE_TARGET,
        guild_id = %session.guild_id,
        channel_id = %session.channel_id,
        new_owner = %session.caller,
        "Claimed abandoned channel"
    );
    Ok(())
}

/// Disconnect another occupant from the channel. The owner cannot disconnect
/// themselves this way, and moving the owner out is refused.
pub async fn disconnect(
    ctx: &serenity::Context,
    session: &Session,
    target: UserId,
) -> VoiceResult<()> {
    guard_target(session, target)?;
    if !channel_occupants(ctx, session.guild_id, session.channel_id).contains(&target.get()) {
        return Err(VoiceError::TargetNotPresent(format!("<@{target}>")));
    }
    session
        .guild_id
        .edit_member(&ctx.http, target, EditMember::new().disconnect_member())
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_deny_moves_bits_off_allow() {
        let (allow, deny) = merge_deny(
            Permissions::CONNECT | Permissions::SPEAK,
            Permissions::empty(),
            Permissions::CONNECT,
        );
        assert_eq!(allow, Permissions::SPEAK);
        assert_eq!(deny, Permissions::CONNECT);
    }

    #[test]
    fn test_clear_bits_keeps_unrelated_overwrite() {
        let cleared = clear_bits(
            Permissions::empty(),
            Permissions::CONNECT | Permissions::VIEW_CHANNEL,
            Permissions::CONNECT,
        );
        assert_eq!(
            cleared,
            Some((Permissions::empty(), Permissions::VIEW_CHANNEL))
        );
    }

    #[test]
    fn test_clear_bits_signals_empty_overwrite() {
        let cleared = clear_bits(
            Permissions::empty(),
            Permissions::CONNECT,
            Permissions::CONNECT | Permissions::VIEW_CHANNEL,
        );
        assert_eq!(cleared, None);
    }

    #[test]
    fn test_bump_limit_clamps() {
        assert_eq!(bump_limit(0, -1), 0);
        assert_eq!(bump_limit(5, 1), 6);
        assert_eq!(bump_limit(99, 1), 99);
        assert_eq!(bump_limit(50, -60), 0);
    }

    #[test]
    fn test_guard_target_shields_owner_and_caller() {
        let session = Session {
            guild_id: GuildId::new(1),
            channel_id: ChannelId::new(100),
            caller: UserId::new(7),
            owner_id: 7,
        };
        assert!(matches!(
            guard_target(&session, UserId::new(7)),
            Err(VoiceError::CannotTargetOwner)
        ));
        assert!(guard_target(&session, UserId::new(8)).is_ok());

        // After a claim the caller may differ from the recorded owner; both
        // stay off limits.
        let claimed = Session {
            caller: UserId::new(9),
            ..session
        };
        assert!(matches!(
            guard_target(&claimed, UserId::new(7)),
            Err(VoiceError::CannotTargetOwner)
        ));
        assert!(matches!(
            guard_target(&claimed, UserId::new(9)),
            Err(VoiceError::CannotTargetOwner)
        ));
    }

    #[test]
    fn test_session_owner_gate() {
        let session = Session {
            guild_id: GuildId::new(1),
            channel_id: ChannelId::new(100),
            caller: UserId::new(7),
            owner_id: 7,
        };
        assert!(session.require_owner().is_ok());

        let intruder = Session {
            caller: UserId::new(8),
            ..session
        };
        assert!(matches!(intruder.require_owner(), Err(VoiceError::NotOwner)));
    }
}
