//! `/antinuke` configuration commands.
//!
//! Authority is resolver-based, not permission-based: only the guild owner
//! may edit the admin set, and only antinuke admins (plus the owner) may
//! touch anything else.

use poise::serenity_prelude as serenity;
use poise::ChoiceParameter;
use serenity::Permissions;

use crate::antinuke::{resolver, AntinukeConfig, Module, Punishment};
use crate::store::{ModulePatch, StoreError};
use crate::{Context, Error};

#[derive(Debug, Clone, Copy, poise::ChoiceParameter)]
pub enum Toggle {
    #[name = "on"]
    On,
    #[name = "off"]
    Off,
}

impl Toggle {
    fn as_bool(self) -> bool {
        matches!(self, Self::On)
    }
}

#[derive(Debug, Clone, Copy, poise::ChoiceParameter)]
pub enum PunishmentChoice {
    #[name = "strip"]
    Strip,
    #[name = "kick"]
    Kick,
    #[name = "ban"]
    Ban,
}

impl From<PunishmentChoice> for Punishment {
    fn from(choice: PunishmentChoice) -> Self {
        match choice {
            PunishmentChoice::Strip => Self::Strip,
            PunishmentChoice::Kick => Self::Kick,
            PunishmentChoice::Ban => Self::Ban,
        }
    }
}

#[derive(Debug, Clone, Copy, poise::ChoiceParameter)]
pub enum SetAction {
    #[name = "add"]
    Add,
    #[name = "remove"]
    Remove,
}

#[derive(Debug, Clone, Copy, poise::ChoiceParameter)]
pub enum WatchList {
    #[name = "grant"]
    Grant,
    #[name = "remove"]
    Remove,
}

/// Antinuke protection against destructive moderators
#[poise::command(
    slash_command,
    guild_only,
    subcommands(
        "ban", "kick", "role", "channel", "webhook", "emoji", "vanity", "botadd",
        "permissions", "watch", "admin", "whitelist", "admins", "list", "config"
    )
)]
pub async fn antinuke(ctx: Context<'_>) -> Result<(), Error> {
    ctx.say("Use one of the `/antinuke` subcommands.").await?;
    Ok(())
}

/// Punish moderators who mass-ban members
#[poise::command(slash_command, guild_only)]
pub async fn ban(
    ctx: Context<'_>,
    #[description = "Enable or disable the module"] state: Toggle,
    #[description = "Bans inside the window before punishing"] threshold: Option<u32>,
    #[description = "Punishment when the threshold trips"] punishment: Option<PunishmentChoice>,
) -> Result<(), Error> {
    set_module(ctx, Module::Ban, state, threshold, punishment).await
}

/// Punish moderators who mass-kick members
#[poise::command(slash_command, guild_only)]
pub async fn kick(
    ctx: Context<'_>,
    #[description = "Enable or disable the module"] state: Toggle,
    #[description = "Kicks inside the window before punishing"] threshold: Option<u32>,
    #[description = "Punishment when the threshold trips"] punishment: Option<PunishmentChoice>,
) -> Result<(), Error> {
    set_module(ctx, Module::Kick, state, threshold, punishment).await
}

/// Punish moderators who mass-delete roles
#[poise::command(slash_command, guild_only)]
pub async fn role(
    ctx: Context<'_>,
    #[description = "Enable or disable the module"] state: Toggle,
    #[description = "Role deletions inside the window before punishing"] threshold: Option<u32>,
    #[description = "Punishment when the threshold trips"] punishment: Option<PunishmentChoice>,
) -> Result<(), Error> {
    set_module(ctx, Module::Role, state, threshold, punishment).await
}

/// Punish moderators who mass-create or mass-delete channels
#[poise::command(slash_command, guild_only)]
pub async fn channel(
    ctx: Context<'_>,
    #[description = "Enable or disable the module"] state: Toggle,
    #[description = "Channel changes inside the window before punishing"] threshold: Option<u32>,
    #[description = "Punishment when the threshold trips"] punishment: Option<PunishmentChoice>,
) -> Result<(), Error> {
    set_module(ctx, Module::Channel, state, threshold, punishment).await
}

/// Punish moderators who tamper with webhooks
#[poise::command(slash_command, guild_only)]
pub async fn webhook(
    ctx: Context<'_>,
    #[description = "Enable or disable the module"] state: Toggle,
    #[description = "Webhook changes inside the window before punishing"] threshold: Option<u32>,
    #[description = "Punishment when the threshold trips"] punishment: Option<PunishmentChoice>,
) -> Result<(), Error> {
    set_module(ctx, Module::Webhook, state, threshold, punishment).await
}

/// Punish moderators who mass-delete emojis
#[poise::command(slash_command, guild_only)]
pub async fn emoji(
    ctx: Context<'_>,
    #[description = "Enable or disable the module"] state: Toggle,
    #[description = "Emoji deletions inside the window before punishing"] threshold: Option<u32>,
    #[description = "Punishment when the threshold trips"] punishment: Option<PunishmentChoice>,
) -> Result<(), Error> {
    set_module(ctx, Module::Emoji, state, threshold, punishment).await
}

/// Punish whoever changes the vanity URL
#[poise::command(slash_command, guild_only)]
pub async fn vanity(
    ctx: Context<'_>,
    #[description = "Enable or disable the watch"] state: Toggle,
    #[description = "Punishment applied on a change"] punishment: Option<PunishmentChoice>,
) -> Result<(), Error> {
    let Some((config, guild_id)) = load_authorized(&ctx).await? else {
        return Ok(());
    };
    let mut config = config;
    config.vanity.enabled = state.as_bool();
    if let Some(punishment) = punishment {
        config.vanity.punishment = punishment.into();
    }
    let summary = format!(
        "Vanity watch is now {} (punishment: {})",
        onoff(config.vanity.enabled),
        config.vanity.punishment
    );
    ctx.data().store.save_antinuke(guild_id, config).await?;
    ctx.say(summary).await?;
    Ok(())
}

/// Remove non-whitelisted bots the moment they join
#[poise::command(slash_command, guild_only)]
pub async fn botadd(
    ctx: Context<'_>,
    #[description = "Enable or disable the gate"] state: Toggle,
) -> Result<(), Error> {
    let Some((mut config, guild_id)) = load_authorized(&ctx).await? else {
        return Ok(());
    };
    config.botadd.enabled = state.as_bool();
    let summary = format!("Botadd gate is now {}", onoff(config.botadd.enabled));
    ctx.data().store.save_antinuke(guild_id, config).await?;
    ctx.say(summary).await?;
    Ok(())
}

/// Watch for dangerous permission grants and removals on roles
#[poise::command(slash_command, guild_only)]
pub async fn permissions(
    ctx: Context<'_>,
    #[description = "Enable or disable the watch"] state: Toggle,
    #[description = "Punishment applied on a watched change"] punishment: Option<PunishmentChoice>,
) -> Result<(), Error> {
    let Some((mut config, guild_id)) = load_authorized(&ctx).await? else {
        return Ok(());
    };
    config.permissions.enabled = state.as_bool();
    if let Some(punishment) = punishment {
        config.permissions.punishment = punishment.into();
    }
    let summary = format!(
        "Permissions watch is now {} (punishment: {})",
        onoff(config.permissions.enabled),
        config.permissions.punishment
    );
    ctx.data().store.save_antinuke(guild_id, config).await?;
    ctx.say(summary).await?;
    Ok(())
}

/// Edit the watched permission lists for the permissions module
#[poise::command(slash_command, guild_only)]
pub async fn watch(
    ctx: Context<'_>,
    #[description = "Which list to edit"] list: WatchList,
    #[description = "Add or remove"] action: SetAction,
    #[description = "Permission name, e.g. ban_members"] permission: String,
) -> Result<(), Error> {
    let Some((mut config, guild_id)) = load_authorized(&ctx).await? else {
        return Ok(());
    };

    let normalized = permission.trim().to_ascii_lowercase();
    if !known_permission(&normalized) {
        ctx.say(format!("Unknown permission name: `{normalized}`"))
            .await?;
        return Ok(());
    }

    let set = match list {
        WatchList::Grant => &mut config.permissions.watch_grant,
        WatchList::Remove => &mut config.permissions.watch_remove,
    };
    let summary = match action {
        SetAction::Add => {
            set.insert(normalized.clone());
            format!("Now watching `{normalized}` on the {} list", list.name())
        }
        SetAction::Remove => {
            set.remove(&normalized);
            format!("No longer watching `{normalized}` on the {} list", list.name())
        }
    };
    ctx.data().store.save_antinuke(guild_id, config).await?;
    ctx.say(summary).await?;
    Ok(())
}

/// Grant or revoke antinuke admin authority (guild owner only)
#[poise::command(slash_command, guild_only)]
pub async fn admin(
    ctx: Context<'_>,
    #[description = "Add or remove"] action: SetAction,
    #[description = "The user"] user: serenity::User,
) -> Result<(), Error> {
    let guild_id = require_guild(&ctx)?;
    let owner_id = guild_owner(&ctx).await?;
    if !resolver::can_edit_admins(owner_id, ctx.author().id) {
        ctx.say("Only the guild owner can edit antinuke admins.")
            .await?;
        return Ok(());
    }

    let mut config = ctx.data().store.antinuke(guild_id).await?;
    let summary = match action {
        SetAction::Add => {
            config.admins.insert(user.id.get());
            format!("{} is now an antinuke admin", user.name)
        }
        SetAction::Remove => {
            config.admins.remove(&user.id.get());
            format!("{} is no longer an antinuke admin", user.name)
        }
    };
    ctx.data().store.save_antinuke(guild_id, config).await?;
    ctx.say(summary).await?;
    Ok(())
}

/// Exempt a user or bot from every antinuke trigger
#[poise::command(slash_command, guild_only)]
pub async fn whitelist(
    ctx: Context<'_>,
    #[description = "Add or remove"] action: SetAction,
    #[description = "The user or bot"] user: serenity::User,
) -> Result<(), Error> {
    let Some((mut config, guild_id)) = load_authorized(&ctx).await? else {
        return Ok(());
    };
    let summary = match action {
        SetAction::Add => {
            config.whitelist.insert(user.id.get());
            format!("{} is now whitelisted", user.name)
        }
        SetAction::Remove => {
            config.whitelist.remove(&user.id.get());
            format!("{} is no longer whitelisted", user.name)
        }
    };
    ctx.data().store.save_antinuke(guild_id, config).await?;
    ctx.say(summary).await?;
    Ok(())
}

/// List the configured antinuke admins
#[poise::command(slash_command, guild_only)]
pub async fn admins(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = require_guild(&ctx)?;
    let config = ctx.data().store.antinuke(guild_id).await?;
    if config.admins.is_empty() {
        ctx.say("No antinuke admins are configured; only the guild owner has authority.")
            .await?;
    } else {
        let mentions: Vec<String> = config.admins.iter().map(|id| format!("<@{id}>")).collect();
        ctx.say(format!("Antinuke admins: {}", mentions.join(", ")))
            .await?;
    }
    Ok(())
}

/// List the whitelisted users and bots
#[poise::command(slash_command, guild_only)]
pub async fn list(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = require_guild(&ctx)?;
    let config = ctx.data().store.antinuke(guild_id).await?;
    if config.whitelist.is_empty() {
        ctx.say("The whitelist is empty.").await?;
    } else {
        let mentions: Vec<String> = config.whitelist.iter().map(|id| format!("<@{id}>")).collect();
        ctx.say(format!("Whitelisted: {}", mentions.join(", ")))
            .await?;
    }
    Ok(())
}

/// Show the full antinuke configuration for this guild
#[poise::command(slash_command, guild_only)]
pub async fn config(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = require_guild(&ctx)?;
    let config = ctx.data().store.antinuke(guild_id).await?;
    ctx.say(render_config(&config)).await?;
    Ok(())
}

/// Shared setter for the six threshold-counted modules.
async fn set_module(
    ctx: Context<'_>,
    module: Module,
    state: Toggle,
    threshold: Option<u32>,
    punishment: Option<PunishmentChoice>,
) -> Result<(), Error> {
    let Some((_, guild_id)) = load_authorized(&ctx).await? else {
        return Ok(());
    };

    let patch = ModulePatch {
        enabled: Some(state.as_bool()),
        threshold,
        punishment: punishment.map(Into::into),
    };
    match ctx.data().store.update_module(guild_id, module, patch).await {
        Ok(updated) => {
            let doc = updated.module(module);
            ctx.say(format!(
                "`{module}` module is now {}: threshold {}, punishment {}",
                onoff(doc.enabled),
                doc.threshold,
                doc.punishment
            ))
            .await?;
        }
        Err(StoreError::InvalidThreshold(value)) => {
            ctx.say(format!("Threshold {value} is invalid; it must be at least 1."))
                .await?;
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

/// Load the guild config after checking the caller may configure antinuke.
/// Returns `None` (after replying) when the caller lacks authority.
async fn load_authorized(ctx: &Context<'_>) -> Result<Option<(AntinukeConfig, u64)>, Error> {
    let guild_id = require_guild(ctx)?;
    let config = ctx.data().store.antinuke(guild_id).await?;
    let owner_id = guild_owner(ctx).await?;
    if !resolver::can_configure(&config, owner_id, ctx.author().id) {
        ctx.say("You need antinuke admin authority to do that.").await?;
        return Ok(None);
    }
    Ok(Some((config, guild_id)))
}

fn require_guild(ctx: &Context<'_>) -> Result<u64, Error> {
    ctx.guild_id()
        .map(|id| id.get())
        .ok_or_else(|| Error::from("this command only works in a guild"))
}

async fn guild_owner(ctx: &Context<'_>) -> Result<serenity::UserId, Error> {
    if let Some(guild) = ctx.guild() {
        return Ok(guild.owner_id);
    }
    let guild_id = ctx
        .guild_id()
        .ok_or_else(|| Error::from("this command only works in a guild"))?;
    let guild = guild_id.to_partial_guild(ctx.http()).await?;
    Ok(guild.owner_id)
}

fn onoff(enabled: bool) -> &'static str {
    if enabled { "on" } else { "off" }
}

fn known_permission(name: &str) -> bool {
    Permissions::all()
        .iter_names()
        .any(|(known, _)| known.eq_ignore_ascii_case(name))
}

fn render_config(config: &AntinukeConfig) -> String {
    let mut lines = vec!["**Antinuke configuration**".to_string()];
    for module in Module::ALL {
        let doc = config.module(module);
        lines.push(format!(
            "`{module}`: {} (threshold {}, punishment {})",
            onoff(doc.enabled),
            doc.threshold,
            doc.punishment
        ));
    }
    lines.push(format!(
        "`vanity`: {} (punishment {})",
        onoff(config.vanity.enabled),
        config.vanity.punishment
    ));
    lines.push(format!("`botadd`: {}", onoff(config.botadd.enabled)));
    lines.push(format!(
        "`permissions`: {} (punishment {}; grant watch: {}; remove watch: {})",
        onoff(config.permissions.enabled),
        config.permissions.punishment,
        render_set(&config.permissions.watch_grant),
        render_set(&config.permissions.watch_remove),
    ));
    lines.push(format!(
        "admins: {}; whitelisted: {}",
        config.admins.len(),
        config.whitelist.len()
    ));
    lines.join("\n")
}

fn render_set(set: &std::collections::BTreeSet<String>) -> String {
    if set.is_empty() {
        "(none)".to_string()
    } else {
        set.iter().cloned().collect::<Vec<_>>().join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_punishment_choice_mapping() {
        assert_eq!(Punishment::from(PunishmentChoice::Strip), Punishment::Strip);
        assert_eq!(Punishment::from(PunishmentChoice::Kick), Punishment::Kick);
        assert_eq!(Punishment::from(PunishmentChoice::Ban), Punishment::Ban);
    }

    #[test]
    fn test_known_permission_names() {
        assert!(known_permission("ban_members"));
        assert!(known_permission("administrator"));
        assert!(!known_permission("fly_helicopters"));
    }

    #[test]
    fn test_render_config_covers_every_module() {
        let config = AntinukeConfig::default();
        let rendered = render_config(&config);
        for module in Module::ALL {
            assert!(rendered.contains(&format!("`{module}`")));
        }
        assert!(rendered.contains("`vanity`"));
        assert!(rendered.contains("`botadd`"));
        assert!(rendered.contains("`permissions`"));
    }

    #[test]
    fn test_subcommand_definitions() {
        let cmd = antinuke();
        let names: Vec<&str> = cmd.subcommands.iter().map(|c| c.name.as_str()).collect();
        for expected in [
            "ban", "kick", "role", "channel", "webhook", "emoji", "vanity", "botadd",
            "permissions", "watch", "admin", "whitelist", "admins", "list", "config",
        ] {
            assert!(names.contains(&expected), "missing subcommand {expected}");
        }
    }
}
