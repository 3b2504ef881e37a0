//! `/voicemaster` commands.
//!
//! Owner-level channel controls go through the interface controller, which
//! enforces the in-channel and ownership checks. Guild-level settings
//! (setup, reset, category, defaults) require Manage Guild.

use poise::serenity_prelude as serenity;
use serenity::{ChannelType, CreateChannel, GuildChannel};

use crate::commands::antinuke::Toggle;
use crate::voicemaster::config::{self, VoicemasterConfig};
use crate::voicemaster::error::VoiceError;
use crate::voicemaster::{interface, watcher};
use crate::{Context, Error};

#[derive(Debug, Clone, Copy, poise::ChoiceParameter)]
pub enum LimitAction {
    #[name = "up"]
    Up,
    #[name = "down"]
    Down,
    #[name = "set"]
    Set,
}

/// Personal voice channels spawned from a lobby
#[poise::command(
    slash_command,
    guild_only,
    subcommands(
        "setup", "reset", "lock", "unlock", "ghost", "unghost", "claim", "transfer",
        "limit", "bitrate", "name", "permit", "reject", "role", "music", "region",
        "status", "disconnect", "category", "defaults", "configuration"
    )
)]
pub async fn voicemaster(ctx: Context<'_>) -> Result<(), Error> {
    ctx.say("Use one of the `/voicemaster` subcommands.").await?;
    Ok(())
}

/// Posted in the interface channel so owners can find their controls.
const INTERFACE_GUIDE: &str = "**VoiceMaster controls**\n\
    Join the lobby to get a channel of your own, then manage it here:\n\
    `/voicemaster lock` `unlock` `ghost` `unghost` `music` — who can see, join and speak\n\
    `/voicemaster limit` `bitrate` `region` `name` `status` — channel settings\n\
    `/voicemaster permit` `reject` `disconnect` — manage occupants\n\
    `/voicemaster transfer` `claim` — channel ownership";

/// Designate (or create) the join-to-create lobby
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_GUILD")]
pub async fn setup(
    ctx: Context<'_>,
    #[description = "Existing voice channel to use as the lobby"]
    #[channel_types("Voice")]
    lobby: Option<GuildChannel>,
    #[description = "Category that spawned channels land under"]
    #[channel_types("Category")]
    category: Option<GuildChannel>,
) -> Result<(), Error> {
    let guild_id = require_guild(&ctx)?;
    let guild = serenity::GuildId::new(guild_id);
    let data = ctx.data();

    let mut config = data
        .store
        .voicemaster(guild_id)
        .await?
        .unwrap_or_default();

    let (lobby_id, category_id) = match lobby {
        Some(channel) => {
            let category_id = category
                .map(|c| c.id.get())
                .or_else(|| channel.parent_id.map(|id| id.get()));
            (channel.id.get(), category_id)
        }
        None => {
            // Build a fresh category and lobby from scratch.
            let category_id = match category {
                Some(channel) => channel.id.get(),
                None => {
                    let created = guild
                        .create_channel(
                            ctx.http(),
                            CreateChannel::new("Voice Channels").kind(ChannelType::Category),
                        )
                        .await?;
                    created.id.get()
                }
            };
            let created = guild
                .create_channel(
                    ctx.http(),
                    CreateChannel::new("Join to Create")
                        .kind(ChannelType::Voice)
                        .category(serenity::ChannelId::new(category_id)),
                )
                .await?;
            (created.id.get(), Some(category_id))
        }
    };

    // The interface channel hosts the control-surface reference; reuse it
    // across repeated setups rather than spawning a second one.
    let interface_id = match config.interface_channel_id {
        Some(id) => id,
        None => {
            let mut builder = CreateChannel::new("voice-interface").kind(ChannelType::Text);
            if let Some(category) = category_id {
                builder = builder.category(serenity::ChannelId::new(category));
            }
            let created = guild.create_channel(ctx.http(), builder).await?;
            created
                .id
                .send_message(
                    ctx.http(),
                    serenity::CreateMessage::new().content(INTERFACE_GUIDE),
                )
                .await?;
            created.id.get()
        }
    };

    config.is_setup = true;
    config.lobby_channel_id = Some(lobby_id);
    config.default_category_id = category_id;
    config.interface_channel_id = Some(interface_id);
    data.store.save_voicemaster(guild_id, config).await?;

    ctx.say(format!(
        "VoiceMaster is set up. Joining <#{lobby_id}> now spawns a personal channel; \
         the controls are listed in <#{interface_id}>."
    ))
    .await?;
    Ok(())
}

/// Tear down VoiceMaster, deleting every spawned channel
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_GUILD")]
pub async fn reset(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = require_guild(&ctx)?;
    let data = ctx.data();

    let children = data.voice.guild_children(guild_id);
    let mut deleted = 0usize;
    for channel_id in children {
        let id = serenity::ChannelId::new(channel_id);
        match id.delete(ctx.http()).await {
            Ok(_) => deleted += 1,
            // Already gone; the record is stale.
            Err(e) if crate::error::is_not_found(&e) => {}
            Err(e) => return Err(e.into()),
        }
        data.voice.remove(channel_id);
    }

    // The interface channel goes down with the configuration.
    if let Some(config) = data.store.voicemaster(guild_id).await? {
        if let Some(id) = config.interface_channel_id {
            match serenity::ChannelId::new(id).delete(ctx.http()).await {
                Ok(_) => {}
                Err(e) if crate::error::is_not_found(&e) => {}
                Err(e) => return Err(e.into()),
            }
        }
    }
    data.store.delete_voicemaster(guild_id).await?;

    ctx.say(format!(
        "VoiceMaster reset; {deleted} spawned channel(s) deleted."
    ))
    .await?;
    Ok(())
}

/// Lock your channel so the default role cannot connect
#[poise::command(slash_command, guild_only)]
pub async fn lock(ctx: Context<'_>) -> Result<(), Error> {
    let session = match owner_session(&ctx) {
        Ok(session) => session,
        Err(e) => return warn_reply(ctx, e).await,
    };
    if let Err(e) = interface::lock(ctx.serenity_context(), &session).await {
        return warn_reply(ctx, e).await;
    }
    ctx.say("Your channel is locked.").await?;
    Ok(())
}

/// Unlock your channel
#[poise::command(slash_command, guild_only)]
pub async fn unlock(ctx: Context<'_>) -> Result<(), Error> {
    let session = match owner_session(&ctx) {
        Ok(session) => session,
        Err(e) => return warn_reply(ctx, e).await,
    };
    if let Err(e) = interface::unlock(ctx.serenity_context(), &session).await {
        return warn_reply(ctx, e).await;
    }
    ctx.say("Your channel is unlocked.").await?;
    Ok(())
}

/// Hide your channel from the default role
#[poise::command(slash_command, guild_only)]
pub async fn ghost(ctx: Context<'_>) -> Result<(), Error> {
    let session = match owner_session(&ctx) {
        Ok(session) => session,
        Err(e) => return warn_reply(ctx, e).await,
    };
    if let Err(e) = interface::ghost(ctx.serenity_context(), &session).await {
        return warn_reply(ctx, e).await;
    }
    ctx.say("Your channel is hidden.").await?;
    Ok(())
}

/// Reveal your channel to the default role again
#[poise::command(slash_command, guild_only)]
pub async fn unghost(ctx: Context<'_>) -> Result<(), Error> {
    let session = match owner_session(&ctx) {
        Ok(session) => session,
        Err(e) => return warn_reply(ctx, e).await,
    };
    if let Err(e) = interface::reveal(ctx.serenity_context(), &session).await {
        return warn_reply(ctx, e).await;
    }
    ctx.say("Your channel is visible again.").await?;
    Ok(())
}

/// Take over a channel whose owner has left
#[poise::command(slash_command, guild_only)]
pub async fn claim(ctx: Context<'_>) -> Result<(), Error> {
    // Claim deliberately skips the ownership check.
    let session = match interface::resolve(
        ctx.serenity_context(),
        ctx.data(),
        guild_id_of(&ctx)?,
        ctx.author().id,
    ) {
        Ok(session) => session,
        Err(e) => return warn_reply(ctx, e).await,
    };
    if let Err(e) = interface::claim(ctx.serenity_context(), ctx.data(), &session).await {
        return warn_reply(ctx, e).await;
    }
    ctx.say("This channel is yours now.").await?;
    Ok(())
}

/// Hand your channel to another occupant
#[poise::command(slash_command, guild_only)]
pub async fn transfer(
    ctx: Context<'_>,
    #[description = "The new owner; must be in the channel"] user: serenity::User,
) -> Result<(), Error> {
    let session = match owner_session(&ctx) {
        Ok(session) => session,
        Err(e) => return warn_reply(ctx, e).await,
    };
    if let Err(e) =
        interface::transfer(ctx.serenity_context(), ctx.data(), &session, user.id).await
    {
        return warn_reply(ctx, e).await;
    }
    ctx.say(format!("{} now owns this channel.", user.name))
        .await?;
    Ok(())
}

/// Adjust your channel's user limit
#[poise::command(slash_command, guild_only)]
pub async fn limit(
    ctx: Context<'_>,
    #[description = "Nudge up or down, or set outright"] action: LimitAction,
    #[description = "The limit, for set (0 removes the limit)"] value: Option<u32>,
) -> Result<(), Error> {
    let session = match owner_session(&ctx) {
        Ok(session) => session,
        Err(e) => return warn_reply(ctx, e).await,
    };

    let result = match action {
        LimitAction::Up => interface::adjust_limit(ctx.serenity_context(), &session, 1).await,
        LimitAction::Down => interface::adjust_limit(ctx.serenity_context(), &session, -1).await,
        LimitAction::Set => match value {
            Some(value) => interface::set_limit(ctx.serenity_context(), &session, value).await,
            None => {
                ctx.say("`set` needs a value.").await?;
                return Ok(());
            }
        },
    };
    match result {
        Ok(0) => ctx.say("User limit removed.").await?,
        Ok(limit) => ctx.say(format!("User limit is now {limit}.")).await?,
        Err(e) => return warn_reply(ctx, e).await,
    };
    Ok(())
}

/// Set your channel's bitrate, in kbps
#[poise::command(slash_command, guild_only)]
pub async fn bitrate(
    ctx: Context<'_>,
    #[description = "Bitrate in kbps (8-96)"] kbps: u32,
) -> Result<(), Error> {
    let session = match owner_session(&ctx) {
        Ok(session) => session,
        Err(e) => return warn_reply(ctx, e).await,
    };
    match interface::set_bitrate(ctx.serenity_context(), &session, kbps).await {
        Ok(kbps) => ctx.say(format!("Bitrate is now {kbps} kbps.")).await?,
        Err(e) => return warn_reply(ctx, e).await,
    };
    Ok(())
}

/// Rename your channel
#[poise::command(slash_command, guild_only)]
pub async fn name(
    ctx: Context<'_>,
    #[description = "The new name"] text: String,
) -> Result<(), Error> {
    let session = match owner_session(&ctx) {
        Ok(session) => session,
        Err(e) => return warn_reply(ctx, e).await,
    };
    if let Err(e) = interface::rename(ctx.serenity_context(), &session, &text).await {
        return warn_reply(ctx, e).await;
    }
    ctx.say(format!("Channel renamed to {text}.")).await?;
    Ok(())
}

/// Let a user into your channel
#[poise::command(slash_command, guild_only)]
pub async fn permit(
    ctx: Context<'_>,
    #[description = "The user to let in"] user: serenity::User,
) -> Result<(), Error> {
    let session = match owner_session(&ctx) {
        Ok(session) => session,
        Err(e) => return warn_reply(ctx, e).await,
    };
    if let Err(e) = interface::permit(ctx.serenity_context(), &session, user.id).await {
        return warn_reply(ctx, e).await;
    }
    ctx.say(format!("{} may join your channel.", user.name))
        .await?;
    Ok(())
}

/// Keep a user out of your channel, disconnecting them if present
#[poise::command(slash_command, guild_only)]
pub async fn reject(
    ctx: Context<'_>,
    #[description = "The user to keep out"] user: serenity::User,
) -> Result<(), Error> {
    let session = match owner_session(&ctx) {
        Ok(session) => session,
        Err(e) => return warn_reply(ctx, e).await,
    };
    if let Err(e) = interface::reject(ctx.serenity_context(), &session, user.id).await {
        return warn_reply(ctx, e).await;
    }
    ctx.say(format!("{} is kept out of your channel.", user.name))
        .await?;
    Ok(())
}

/// Set or clear the role granted to people joining your channel
#[poise::command(slash_command, guild_only)]
pub async fn role(
    ctx: Context<'_>,
    #[description = "The role; omit to clear the override"] role: Option<serenity::Role>,
) -> Result<(), Error> {
    let session = match owner_session(&ctx) {
        Ok(session) => session,
        Err(e) => return warn_reply(ctx, e).await,
    };
    let role_id = role.as_ref().map(|r| r.id.get());
    if let Err(e) = ctx.data().voice.set_role(session.channel_id.get(), role_id) {
        return warn_reply(ctx, e).await;
    }
    watcher::persist_children(ctx.data(), session.guild_id.get()).await;
    match role {
        Some(role) => ctx.say(format!("Joiners now receive {}.", role.name)).await?,
        None => ctx.say("Role override cleared.").await?,
    };
    Ok(())
}

/// Music mode: the default role can listen but not speak
#[poise::command(slash_command, guild_only)]
pub async fn music(
    ctx: Context<'_>,
    #[description = "Turn music mode on or off"] state: Toggle,
) -> Result<(), Error> {
    let session = match owner_session(&ctx) {
        Ok(session) => session,
        Err(e) => return warn_reply(ctx, e).await,
    };
    let on = matches!(state, Toggle::On);
    if let Err(e) = interface::music_only(ctx.serenity_context(), &session, on).await {
        return warn_reply(ctx, e).await;
    }
    ctx.say(if on {
        "Music mode on; only permitted users can speak."
    } else {
        "Music mode off."
    })
    .await?;
    Ok(())
}

/// Pin your channel to a voice region
#[poise::command(slash_command, guild_only)]
pub async fn region(
    ctx: Context<'_>,
    #[description = "Region tag, e.g. us-east"] tag: String,
) -> Result<(), Error> {
    let session = match owner_session(&ctx) {
        Ok(session) => session,
        Err(e) => return warn_reply(ctx, e).await,
    };
    match interface::set_region(ctx.serenity_context(), &session, &tag).await {
        Ok(tag) => ctx.say(format!("Voice region pinned to {tag}.")).await?,
        Err(e) => return warn_reply(ctx, e).await,
    };
    Ok(())
}

/// Set or clear your channel's status text
#[poise::command(slash_command, guild_only)]
pub async fn status(
    ctx: Context<'_>,
    #[description = "The status text; omit to clear"] text: Option<String>,
) -> Result<(), Error> {
    let session = match owner_session(&ctx) {
        Ok(session) => session,
        Err(e) => return warn_reply(ctx, e).await,
    };
    let cleared = text.is_none();
    if let Err(e) = interface::set_status(ctx.serenity_context(), &session, text).await {
        return warn_reply(ctx, e).await;
    }
    ctx.say(if cleared {
        "Channel status cleared."
    } else {
        "Channel status set."
    })
    .await?;
    Ok(())
}

/// Disconnect another occupant from your channel
#[poise::command(slash_command, guild_only)]
pub async fn disconnect(
    ctx: Context<'_>,
    #[description = "The occupant to disconnect"] user: serenity::User,
) -> Result<(), Error> {
    let session = match owner_session(&ctx) {
        Ok(session) => session,
        Err(e) => return warn_reply(ctx, e).await,
    };
    if let Err(e) = interface::disconnect(ctx.serenity_context(), &session, user.id).await {
        return warn_reply(ctx, e).await;
    }
    ctx.say(format!("{} was disconnected.", user.name)).await?;
    Ok(())
}

/// Override the category that spawned channels land under
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_GUILD")]
pub async fn category(
    ctx: Context<'_>,
    #[description = "The category; omit to clear the override"]
    #[channel_types("Category")]
    category: Option<GuildChannel>,
) -> Result<(), Error> {
    let guild_id = require_guild(&ctx)?;
    let Some(mut config) = ctx.data().store.voicemaster(guild_id).await? else {
        return warn_reply(ctx, VoiceError::NotSetUp).await;
    };

    config.custom_category_id = category.as_ref().map(|c| c.id.get());
    ctx.data().store.save_voicemaster(guild_id, config).await?;
    match category {
        Some(channel) => {
            ctx.say(format!("Spawned channels now land under {}.", channel.name))
                .await?
        }
        None => ctx.say("Category override cleared.").await?,
    };
    Ok(())
}

/// Set the defaults applied to newly spawned channels
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_GUILD")]
pub async fn defaults(
    ctx: Context<'_>,
    #[description = "Role auto-assigned to joiners"] role: Option<serenity::Role>,
    #[description = "Name template; {user.name} expands to the owner"] name: Option<String>,
    #[description = "Voice region tag"] region: Option<String>,
    #[description = "Bitrate in kbps (8-96)"] bitrate: Option<u32>,
) -> Result<(), Error> {
    let guild_id = require_guild(&ctx)?;
    let Some(mut config) = ctx.data().store.voicemaster(guild_id).await? else {
        return warn_reply(ctx, VoiceError::NotSetUp).await;
    };

    if let Some(region) = &region {
        if let Err(e) = config::validate_region(region) {
            return warn_reply(ctx, e).await;
        }
    }
    if let Some(kbps) = bitrate {
        if let Err(e) = config::validate_bitrate(kbps) {
            return warn_reply(ctx, e).await;
        }
    }

    if let Some(role) = &role {
        config.default_role_id = Some(role.id.get());
    }
    if let Some(name) = name {
        config.default_name = Some(name);
    }
    if let Some(region) = region {
        config.default_region = Some(region.to_ascii_lowercase());
    }
    if let Some(kbps) = bitrate {
        config.default_bitrate = Some(kbps * 1000);
    }

    let summary = render_defaults(&config);
    ctx.data().store.save_voicemaster(guild_id, config).await?;
    ctx.say(summary).await?;
    Ok(())
}

/// Show the VoiceMaster configuration for this guild
#[poise::command(slash_command, guild_only)]
pub async fn configuration(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = require_guild(&ctx)?;
    let Some(config) = ctx.data().store.voicemaster(guild_id).await? else {
        return warn_reply(ctx, VoiceError::NotSetUp).await;
    };

    let active = ctx.data().voice.guild_children(guild_id).len();
    ctx.say(render_overview(&config, active)).await?;
    Ok(())
}

/// Resolve the caller's session and check they own the channel.
fn owner_session(ctx: &Context<'_>) -> Result<interface::Session, VoiceError> {
    let guild_id = ctx
        .guild_id()
        .ok_or(VoiceError::NotInChildChannel)?;
    let session = interface::resolve(
        ctx.serenity_context(),
        ctx.data(),
        guild_id,
        ctx.author().id,
    )?;
    session.require_owner()?;
    Ok(session)
}

fn guild_id_of(ctx: &Context<'_>) -> Result<serenity::GuildId, VoiceError> {
    ctx.guild_id().ok_or(VoiceError::NotInChildChannel)
}

fn require_guild(ctx: &Context<'_>) -> Result<u64, Error> {
    ctx.guild_id()
        .map(|id| id.get())
        .ok_or_else(|| Error::from("this command only works in a guild"))
}

/// Reply with a typed warning for expected failures; propagate the rest.
async fn warn_reply(ctx: Context<'_>, error: VoiceError) -> Result<(), Error> {
    match error {
        VoiceError::DiscordApi(_) | VoiceError::Store(_) | VoiceError::Timeout => Err(error.into()),
        other => {
            ctx.say(format!("\u{26a0} {other}")).await?;
            Ok(())
        }
    }
}

fn render_overview(config: &VoicemasterConfig, active: usize) -> String {
    let channel_line = |label: &str, id: Option<u64>| match id {
        Some(id) => format!("{label}: <#{id}>"),
        None => format!("{label}: (none)"),
    };
    [
        "**VoiceMaster configuration**".to_string(),
        channel_line("lobby", config.lobby_channel_id),
        channel_line("interface", config.interface_channel_id),
        channel_line("category", config.effective_category()),
        render_defaults(config),
        format!("active channels: {active}"),
    ]
    .join("\n")
}

fn render_defaults(config: &VoicemasterConfig) -> String {
    format!(
        "defaults: name `{}`, region {}, bitrate {}, role {}",
        config
            .default_name
            .as_deref()
            .unwrap_or(config::DEFAULT_NAME_TEMPLATE),
        config.default_region.as_deref().unwrap_or("(automatic)"),
        config
            .default_bitrate
            .map_or("(default)".to_string(), |b| format!("{} kbps", b / 1000)),
        config
            .default_role_id
            .map_or("(none)".to_string(), |id| format!("<@&{id}>")),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subcommand_definitions() {
        let cmd = voicemaster();
        let names: Vec<&str> = cmd.subcommands.iter().map(|c| c.name.as_str()).collect();
        for expected in [
            "setup", "reset", "lock", "unlock", "ghost", "unghost", "claim", "transfer",
            "limit", "bitrate", "name", "permit", "reject", "role", "music", "region",
            "status", "disconnect", "category", "defaults", "configuration",
        ] {
            assert!(names.contains(&expected), "missing subcommand {expected}");
        }
    }

    #[test]
    fn test_render_defaults_uses_template_fallback() {
        let rendered = render_defaults(&VoicemasterConfig::default());
        assert!(rendered.contains(config::DEFAULT_NAME_TEMPLATE));
        assert!(rendered.contains("(automatic)"));
    }

    #[test]
    fn test_render_overview_lists_interface_channel() {
        let config = VoicemasterConfig {
            lobby_channel_id: Some(100),
            interface_channel_id: Some(200),
            ..Default::default()
        };
        let rendered = render_overview(&config, 3);
        assert!(rendered.contains("lobby: <#100>"));
        assert!(rendered.contains("interface: <#200>"));
        assert!(rendered.contains("category: (none)"));
        assert!(rendered.contains("active channels: 3"));
    }
}
