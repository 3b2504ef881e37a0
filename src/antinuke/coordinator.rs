//! Antinuke coordinator
//!
//! Routes destructive gateway events through the pipeline: load config,
//! attribute the action via the audit log, check exemptions, count it in the
//! sliding window, and punish when the threshold trips. Single-shot watches
//! (vanity, botadd, permissions) skip the window.

use ::serenity::model::guild::audit_log::Action;
use poise::serenity_prelude as serenity;
use serenity::{CreateMessage, GuildId, Member, PartialGuild, Permissions, Role, UserId};
use tracing::{debug, error, info, warn};

use crate::antinuke::config::{AntinukeConfig, Module, PermissionsConfig, Punishment};
use crate::antinuke::error::AntinukeResult;
use crate::antinuke::executor::PunishOutcome;
use crate::antinuke::{correlator, resolver};
use crate::data::Data;
use crate::ANTINUKE_TARGET;

/// A destructive action observed on the gateway, before attribution.
#[derive(Debug, Clone, Copy)]
pub struct ModeratorAction {
    pub module: Module,
    /// Audit-log action kind to correlate against.
    pub audit: Action,
    /// Target entity id, when the event names one.
    pub target_id: Option<u64>,
    /// Gateway arrival time, unix seconds.
    pub observed_unix: i64,
}

/// Threshold-counted module pipeline. Logs and swallows its own errors so a
/// failure here never aborts sibling handlers.
pub async fn on_destructive(
    ctx: &serenity::Context,
    data: &Data,
    guild_id: GuildId,
    action: ModeratorAction,
) {
    if let Err(e) = handle_destructive(ctx, data, guild_id, action).await {
        error!(
            target: ANTINUKE_TARGET,
            guild_id = %guild_id,
            module = %action.module,
            error = %e,
            "Antinuke pipeline failed"
        );
    }
}

async fn handle_destructive(
    ctx: &serenity::Context,
    data: &Data,
    guild_id: GuildId,
    action: ModeratorAction,
) -> AntinukeResult<()> {
    let config = data.store.antinuke(guild_id.get()).await?;
    let module_config = *config.module(action.module);
    if !module_config.enabled {
        return Ok(());
    }

    let Some(moderator) = correlator::correlate(
        &ctx.http,
        guild_id,
        action.audit,
        action.target_id,
        action.observed_unix,
    )
    .await
    else {
        debug!(
            target: ANTINUKE_TARGET,
            guild_id = %guild_id,
            module = %action.module,
            "No audit entry matched; not acting"
        );
        return Ok(());
    };

    let owner_id = guild_owner(ctx, guild_id).await?;
    if !resolver::should_act_on(&config, owner_id, data.bot_user_id(), moderator) {
        return Ok(());
    }

    let recorded = data.tracker.record(
        guild_id.get(),
        moderator.get(),
        action.module,
        action.observed_unix * 1000,
        module_config.threshold,
    );
    info!(
        target: ANTINUKE_TARGET,
        guild_id = %guild_id,
        moderator = %moderator,
        module = %action.module,
        count = recorded.count,
        threshold = module_config.threshold,
        "Recorded destructive action"
    );
    if !recorded.triggered {
        return Ok(());
    }

    let reason = format!(
        "antinuke: {} threshold {} exceeded",
        action.module, module_config.threshold
    );
    punish(ctx, data, guild_id, moderator, module_config.punishment, &reason).await
}

/// Vanity-URL watch. Fires on any change of the vanity code, including
/// setting or clearing it. `old_vanity` is `None` when the gateway cache had
/// no prior copy of the guild; without a baseline nothing fires.
pub async fn on_guild_update(
    ctx: &serenity::Context,
    data: &Data,
    old_vanity: Option<Option<String>>,
    new: &PartialGuild,
) {
    if let Err(e) = handle_guild_update(ctx, data, old_vanity, new).await {
        error!(
            target: ANTINUKE_TARGET,
            guild_id = %new.id,
            error = %e,
            "Vanity watch failed"
        );
    }
}

async fn handle_guild_update(
    ctx: &serenity::Context,
    data: &Data,
    old_vanity: Option<Option<String>>,
    new: &PartialGuild,
) -> AntinukeResult<()> {
    if !vanity_changed(
        old_vanity.as_ref().map(Option::as_deref),
        new.vanity_url_code.as_deref(),
    ) {
        return Ok(());
    }
    let old_vanity = old_vanity.unwrap_or_default();

    let config = data.store.antinuke(new.id.get()).await?;
    if !config.vanity.enabled {
        return Ok(());
    }

    let observed = chrono::Utc::now().timestamp();
    let Some(moderator) =
        correlator::correlate(&ctx.http, new.id, Action::GuildUpdate, None, observed).await
    else {
        return Ok(());
    };

    let message = format!(
        "Vanity URL changed from {} to {} by <@{}>",
        old_vanity.as_deref().unwrap_or("(none)"),
        new.vanity_url_code.as_deref().unwrap_or("(none)"),
        moderator
    );
    notify_admins(ctx, &config, new.owner_id, &message).await;

    if !resolver::should_act_on(&config, new.owner_id, data.bot_user_id(), moderator) {
        return Ok(());
    }

    punish(
        ctx,
        data,
        new.id,
        moderator,
        config.vanity.punishment,
        "antinuke: vanity url changed",
    )
    .await
}

/// Botadd gate: non-whitelisted bot accounts are removed on sight. No
/// moderator is punished because the inviter is not reliably identifiable.
pub async fn on_member_join(ctx: &serenity::Context, data: &Data, member: &Member) {
    if let Err(e) = handle_member_join(ctx, data, member).await {
        error!(
            target: ANTINUKE_TARGET,
            guild_id = %member.guild_id,
            user_id = %member.user.id,
            error = %e,
            "Botadd gate failed"
        );
    }
}

async fn handle_member_join(
    ctx: &serenity::Context,
    data: &Data,
    member: &Member,
) -> AntinukeResult<()> {
    if !member.user.bot {
        return Ok(());
    }

    let config = data.store.antinuke(member.guild_id.get()).await?;
    if !config.botadd.enabled || config.whitelist.contains(&member.user.id.get()) {
        return Ok(());
    }

    member
        .kick_with_reason(&ctx.http, "botadd antinuke enabled")
        .await?;
    info!(
        target: ANTINUKE_TARGET,
        guild_id = %member.guild_id,
        bot_id = %member.user.id,
        "Removed non-whitelisted bot"
    );
    Ok(())
}

/// Permissions watch: single-shot on any watched bit appearing in a role's
/// grant or removal diff.
pub async fn on_role_update(
    ctx: &serenity::Context,
    data: &Data,
    old: Option<&Role>,
    new: &Role,
) {
    if let Err(e) = handle_role_update(ctx, data, old, new).await {
        error!(
            target: ANTINUKE_TARGET,
            guild_id = %new.guild_id,
            role_id = %new.id,
            error = %e,
            "Permissions watch failed"
        );
    }
}

async fn handle_role_update(
    ctx: &serenity::Context,
    data: &Data,
    old: Option<&Role>,
    new: &Role,
) -> AntinukeResult<()> {
    // Without the cached previous role there is nothing to diff against.
    let Some(old) = old else {
        return Ok(());
    };

    let config = data.store.antinuke(new.guild_id.get()).await?;
    if !config.permissions.enabled {
        return Ok(());
    }

    let granted = new.permissions & !old.permissions;
    let removed = old.permissions & !new.permissions;
    if !watched_hit(&config.permissions, granted, removed) {
        return Ok(());
    }

    let observed = chrono::Utc::now().timestamp();
    let Some(moderator) = correlator::correlate(
        &ctx.http,
        new.guild_id,
        Action::Role(::serenity::model::guild::audit_log::RoleAction::Update),
        Some(new.id.get()),
        observed,
    )
    .await
    else {
        return Ok(());
    };

    let owner_id = guild_owner(ctx, new.guild_id).await?;
    if !resolver::should_act_on(&config, owner_id, data.bot_user_id(), moderator) {
        return Ok(());
    }

    punish(
        ctx,
        data,
        new.guild_id,
        moderator,
        config.permissions.punishment,
        "antinuke: watched permission change",
    )
    .await
}

async fn punish(
    ctx: &serenity::Context,
    data: &Data,
    guild_id: GuildId,
    moderator: UserId,
    punishment: Punishment,
    reason: &str,
) -> AntinukeResult<()> {
    let outcome = data
        .punishments
        .execute(&ctx.http, guild_id, moderator, punishment, reason)
        .await?;

    match &outcome {
        PunishOutcome::Applied {
            hierarchy_skipped,
            failed,
        } => {
            info!(
                target: ANTINUKE_TARGET,
                guild_id = %guild_id,
                moderator = %moderator,
                punishment = %punishment,
                skipped = hierarchy_skipped.len(),
                failed = failed.len(),
                "Punishment applied"
            );
        }
        PunishOutcome::SkippedExempt => {}
        PunishOutcome::SkippedHierarchy => {
            warn!(
                target: ANTINUKE_TARGET,
                guild_id = %guild_id,
                moderator = %moderator,
                punishment = %punishment,
                "Punishment blocked by role hierarchy"
            );
        }
        PunishOutcome::Failed { kind } => {
            warn!(
                target: ANTINUKE_TARGET,
                guild_id = %guild_id,
                moderator = %moderator,
                punishment = %punishment,
                kind = %kind,
                "Punishment failed"
            );
        }
    }
    Ok(())
}

/// DM the guild owner and every configured admin. Individual delivery
/// failures are logged and skipped.
async fn notify_admins(
    ctx: &serenity::Context,
    config: &AntinukeConfig,
    owner_id: UserId,
    message: &str,
) {
    let mut recipients: Vec<u64> = vec![owner_id.get()];
    recipients.extend(config.admins.iter().filter(|id| **id != owner_id.get()));

    for recipient in recipients {
        let user_id = UserId::new(recipient);
        let result = match user_id.create_dm_channel(&ctx.http).await {
            Ok(channel) => channel
                .id
                .send_message(&ctx.http, CreateMessage::new().content(message))
                .await
                .map(|_| ()),
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            warn!(
                target: ANTINUKE_TARGET,
                user_id = recipient,
                error = %e,
                "Failed to deliver admin notification"
            );
        }
    }
}

async fn guild_owner(ctx: &serenity::Context, guild_id: GuildId) -> AntinukeResult<UserId> {
    if let Some(guild) = ctx.cache.guild(guild_id) {
        return Ok(guild.owner_id);
    }
    let guild = guild_id.to_partial_guild(&ctx.http).await?;
    Ok(guild.owner_id)
}

/// Did the vanity code change, counting set and clear transitions. The outer
/// `None` on `old` means the prior state is unknown (cache miss); an unknown
/// baseline never counts as a change, or any unrelated guild edit would look
/// like one.
#[must_use]
pub fn vanity_changed(old: Option<Option<&str>>, new: Option<&str>) -> bool {
    match old {
        None => false,
        Some(old) => old != new,
    }
}

/// Does the permission diff touch any watched bit.
#[must_use]
pub fn watched_hit(
    config: &PermissionsConfig,
    granted: Permissions,
    removed: Permissions,
) -> bool {
    let hit = |perms: Permissions, watched: &std::collections::BTreeSet<String>| {
        perms
            .iter_names()
            .any(|(name, _)| watched.contains(&name.to_ascii_lowercase()))
    };
    hit(granted, &config.watch_grant) || hit(removed, &config.watch_remove)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vanity_changed() {
        assert!(!vanity_changed(Some(None), None));
        assert!(!vanity_changed(Some(Some("cool")), Some("cool")));
        assert!(vanity_changed(Some(None), Some("cool")));
        assert!(vanity_changed(Some(Some("cool")), None));
        assert!(vanity_changed(Some(Some("cool")), Some("cooler")));
    }

    /// An uncached guild gives no baseline; name or icon edits on a guild
    /// that happens to have a vanity URL must not register as a change.
    #[test]
    fn test_vanity_unknown_baseline_never_fires() {
        assert!(!vanity_changed(None, Some("cool")));
        assert!(!vanity_changed(None, None));
    }

    #[test]
    fn test_watched_hit_grant_side() {
        let config = PermissionsConfig {
            enabled: true,
            watch_grant: ["administrator".to_string()].into(),
            watch_remove: Default::default(),
            punishment: Punishment::Strip,
        };

        assert!(watched_hit(
            &config,
            Permissions::ADMINISTRATOR,
            Permissions::empty()
        ));
        // A watched bit on the wrong side does not trip.
        assert!(!watched_hit(
            &config,
            Permissions::empty(),
            Permissions::ADMINISTRATOR
        ));
        assert!(!watched_hit(
            &config,
            Permissions::SEND_MESSAGES,
            Permissions::empty()
        ));
    }

    #[test]
    fn test_watched_hit_remove_side() {
        let config = PermissionsConfig {
            enabled: true,
            watch_grant: Default::default(),
            watch_remove: ["ban_members".to_string()].into(),
            punishment: Punishment::Strip,
        };

        assert!(watched_hit(
            &config,
            Permissions::empty(),
            Permissions::BAN_MEMBERS | Permissions::SEND_MESSAGES
        ));
        assert!(!watched_hit(
            &config,
            Permissions::BAN_MEMBERS,
            Permissions::empty()
        ));
    }
}
