//! Punishment executor
//!
//! One handler per punishment kind, looked up through a registry. Every
//! operation is idempotent in effect: redoing an already-applied punishment
//! is a no-op.

use crate::antinuke::config::Punishment;
use crate::antinuke::error::{AntinukeError, AntinukeResult};
use crate::error::{self, ErrorKind};
use crate::ANTINUKE_TARGET;
use poise::serenity_prelude::{GuildId, Http, Permissions, RoleId, UserId};
use std::collections::HashMap;
use tokio::time::Duration;
use tracing::{info, warn};

/// Wall-clock budget for one outbound platform call.
pub const PLATFORM_TIMEOUT: Duration = Duration::from_secs(15);

/// Permissions that make a role "staff" for the purposes of strip-staff.
pub const PRIVILEGED: Permissions = Permissions::from_bits_truncate(
    Permissions::ADMINISTRATOR.bits()
        | Permissions::BAN_MEMBERS.bits()
        | Permissions::KICK_MEMBERS.bits()
        | Permissions::MANAGE_CHANNELS.bits()
        | Permissions::MANAGE_GUILD.bits()
        | Permissions::MANAGE_ROLES.bits()
        | Permissions::MANAGE_WEBHOOKS.bits()
        | Permissions::MANAGE_GUILD_EXPRESSIONS.bits()
        | Permissions::MODERATE_MEMBERS.bits()
        | Permissions::MANAGE_MESSAGES.bits()
        | Permissions::MANAGE_NICKNAMES.bits()
        | Permissions::MENTION_EVERYONE.bits()
        | Permissions::VIEW_AUDIT_LOG.bits(),
);

/// Result of applying one punishment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PunishOutcome {
    /// The punishment took effect. For strip-staff, roles that could not be
    /// touched are reported rather than aborting the operation.
    Applied {
        hierarchy_skipped: Vec<RoleId>,
        failed: Vec<RoleId>,
    },
    /// The resolver exempted the subject; nothing was done.
    SkippedExempt,
    /// Role hierarchy blocked every part of the operation.
    SkippedHierarchy,
    /// The platform rejected the operation outright.
    Failed { kind: ErrorKind },
}

impl PunishOutcome {
    fn applied() -> Self {
        Self::Applied {
            hierarchy_skipped: Vec::new(),
            failed: Vec::new(),
        }
    }
}

/// A role as seen by the strip planner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StripRole {
    pub id: RoleId,
    pub position: u16,
    pub managed: bool,
    pub permissions: Permissions,
}

/// Which held roles to remove and which to report as untouchable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StripPlan {
    pub remove: Vec<RoleId>,
    pub hierarchy_skipped: Vec<RoleId>,
}

/// Decide which of the subject's roles strip-staff may remove: those granting
/// a privileged permission, sitting strictly below the bot's top role, and
/// not managed by an integration.
#[must_use]
pub fn plan_strip(held: &[StripRole], bot_top_position: u16) -> StripPlan {
    let mut plan = StripPlan::default();
    for role in held {
        if !role.permissions.intersects(PRIVILEGED) {
            continue;
        }
        if role.managed || role.position >= bot_top_position {
            plan.hierarchy_skipped.push(role.id);
        } else {
            plan.remove.push(role.id);
        }
    }
    plan
}

/// Trait for applying a punishment to a moderator
#[async_trait::async_trait]
pub trait PunishmentHandler: Send + Sync {
    async fn apply(
        &self,
        http: &Http,
        guild_id: GuildId,
        user_id: UserId,
        reason: &str,
    ) -> AntinukeResult<PunishOutcome>;
}

/// Registry of punishment handlers
pub struct PunishmentRegistry {
    handlers: HashMap<Punishment, Box<dyn PunishmentHandler>>,
}

impl Default for PunishmentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PunishmentRegistry {
    /// Create a new registry with all handlers registered
    #[must_use]
    pub fn new() -> Self {
        let mut registry = Self {
            handlers: HashMap::new(),
        };

        registry.register(Punishment::Strip, Box::new(StripStaffHandler));
        registry.register(Punishment::Kick, Box::new(KickHandler));
        registry.register(Punishment::Ban, Box::new(BanHandler));

        registry
    }

    /// Register a handler for a punishment kind
    pub fn register(&mut self, punishment: Punishment, handler: Box<dyn PunishmentHandler>) {
        self.handlers.insert(punishment, handler);
    }

    /// Apply `punishment` to `user_id`, bounded by the platform-call timeout.
    ///
    /// # Errors
    ///
    /// Returns an `AntinukeError` if no handler is registered or the call
    /// exceeds its wall-clock budget.
    pub async fn execute(
        &self,
        http: &Http,
        guild_id: GuildId,
        user_id: UserId,
        punishment: Punishment,
        reason: &str,
    ) -> AntinukeResult<PunishOutcome> {
        let Some(handler) = self.handlers.get(&punishment) else {
            return Err(AntinukeError::NoHandler(punishment.to_string()));
        };

        match tokio::time::timeout(
            PLATFORM_TIMEOUT,
            handler.apply(http, guild_id, user_id, reason),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(AntinukeError::Timeout(PLATFORM_TIMEOUT.as_secs())),
        }
    }
}

/// Handler for the strip-staff punishment
struct StripStaffHandler;

#[async_trait::async_trait]
impl PunishmentHandler for StripStaffHandler {
    async fn apply(
        &self,
        http: &Http,
        guild_id: GuildId,
        user_id: UserId,
        reason: &str,
    ) -> AntinukeResult<PunishOutcome> {
        let guild = guild_id.to_partial_guild(http).await.map_err(|e| {
            AntinukeError::GuildOrMemberNotFound(format!("Failed to get guild {guild_id}: {e}"))
        })?;

        let member = match guild.member(http, user_id).await {
            Ok(member) => member,
            // Subject already left; a redo is a no-op.
            Err(e) if error::is_not_found(&e) => return Ok(PunishOutcome::applied()),
            Err(e) => return Err(e.into()),
        };

        let bot_id = http.get_current_user().await?.id;
        let bot_member = guild.member(http, bot_id).await.map_err(|e| {
            AntinukeError::GuildOrMemberNotFound(format!(
                "Failed to get own member in guild {guild_id}: {e}"
            ))
        })?;
        let bot_top_position = bot_member
            .roles
            .iter()
            .filter_map(|id| guild.roles.get(id))
            .map(|role| role.position)
            .max()
            .unwrap_or(0);

        let held: Vec<StripRole> = member
            .roles
            .iter()
            .filter_map(|id| guild.roles.get(id))
            .map(|role| StripRole {
                id: role.id,
                position: role.position,
                managed: role.managed,
                permissions: role.permissions,
            })
            .collect();

        let plan = plan_strip(&held, bot_top_position);
        if plan.remove.is_empty() && !plan.hierarchy_skipped.is_empty() {
            return Ok(PunishOutcome::SkippedHierarchy);
        }

        let mut failed = Vec::new();
        for role_id in &plan.remove {
            if let Err(e) = http
                .remove_member_role(guild_id, user_id, *role_id, Some(reason))
                .await
            {
                warn!(
                    target: ANTINUKE_TARGET,
                    guild_id = %guild_id,
                    user_id = %user_id,
                    role_id = %role_id,
                    error = %e,
                    "Failed to remove staff role"
                );
                failed.push(*role_id);
            }
        }

        info!(
            target: ANTINUKE_TARGET,
            guild_id = %guild_id,
            user_id = %user_id,
            removed = plan.remove.len() - failed.len(),
            skipped = plan.hierarchy_skipped.len(),
            "Stripped staff roles"
        );

        Ok(PunishOutcome::Applied {
            hierarchy_skipped: plan.hierarchy_skipped,
            failed,
        })
    }
}

/// Handler for the kick punishment
struct KickHandler;

#[async_trait::async_trait]
impl PunishmentHandler for KickHandler {
    async fn apply(
        &self,
        http: &Http,
        guild_id: GuildId,
        user_id: UserId,
        reason: &str,
    ) -> AntinukeResult<PunishOutcome> {
        let guild = guild_id.to_partial_guild(http).await.map_err(|e| {
            AntinukeError::GuildOrMemberNotFound(format!("Failed to get guild {guild_id}: {e}"))
        })?;

        let member = match guild.member(http, user_id).await {
            Ok(member) => member,
            // Already gone; kicking again is a no-op.
            Err(e) if error::is_not_found(&e) => return Ok(PunishOutcome::applied()),
            Err(e) => return Err(e.into()),
        };

        match member.kick_with_reason(http, reason).await {
            Ok(()) => {
                info!(
                    target: ANTINUKE_TARGET,
                    guild_id = %guild_id,
                    user_id = %user_id,
                    "Kicked moderator"
                );
                Ok(PunishOutcome::applied())
            }
            Err(e) => match error::classify(&e) {
                ErrorKind::NotFound => Ok(PunishOutcome::applied()),
                ErrorKind::Forbidden => Ok(PunishOutcome::SkippedHierarchy),
                kind => {
                    warn!(
                        target: ANTINUKE_TARGET,
                        guild_id = %guild_id,
                        user_id = %user_id,
                        error = %e,
                        "Kick failed"
                    );
                    Ok(PunishOutcome::Failed { kind })
                }
            },
        }
    }
}

/// Handler for the ban punishment
struct BanHandler;

#[async_trait::async_trait]
impl PunishmentHandler for BanHandler {
    async fn apply(
        &self,
        http: &Http,
        guild_id: GuildId,
        user_id: UserId,
        reason: &str,
    ) -> AntinukeResult<PunishOutcome> {
        // Recent-message deletion is deliberately 0 days here.
        match guild_id.ban_with_reason(http, user_id, 0, reason).await {
            Ok(()) => {
                info!(
                    target: ANTINUKE_TARGET,
                    guild_id = %guild_id,
                    user_id = %user_id,
                    "Banned moderator"
                );
                Ok(PunishOutcome::applied())
            }
            Err(e) => match error::classify(&e) {
                ErrorKind::Forbidden => Ok(PunishOutcome::SkippedHierarchy),
                kind => {
                    warn!(
                        target: ANTINUKE_TARGET,
                        guild_id = %guild_id,
                        user_id = %user_id,
                        error = %e,
                        "Ban failed"
                    );
                    Ok(PunishOutcome::Failed { kind })
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn role(id: u64, position: u16, managed: bool, permissions: Permissions) -> StripRole {
        StripRole {
            id: RoleId::new(id),
            position,
            managed,
            permissions,
        }
    }

    #[test]
    fn test_strip_plan_hierarchy() {
        // R1: admin perm below the bot, R2: admin perm above, R3: harmless.
        let held = [
            role(1, 5, false, Permissions::ADMINISTRATOR),
            role(2, 20, false, Permissions::ADMINISTRATOR),
            role(3, 2, false, Permissions::SEND_MESSAGES),
        ];
        let plan = plan_strip(&held, 10);

        assert_eq!(plan.remove, vec![RoleId::new(1)]);
        assert_eq!(plan.hierarchy_skipped, vec![RoleId::new(2)]);
    }

    #[test]
    fn test_strip_is_idempotent() {
        let held = [
            role(1, 5, false, Permissions::BAN_MEMBERS),
            role(3, 2, false, Permissions::SEND_MESSAGES),
        ];
        let plan = plan_strip(&held, 10);
        assert_eq!(plan.remove, vec![RoleId::new(1)]);

        // After the first pass only the harmless role remains; a second pass
        // has nothing to do.
        let after = [role(3, 2, false, Permissions::SEND_MESSAGES)];
        let plan = plan_strip(&after, 10);
        assert!(plan.remove.is_empty());
        assert!(plan.hierarchy_skipped.is_empty());
    }

    #[test]
    fn test_strip_skips_managed_and_equal_position() {
        let held = [
            role(1, 5, true, Permissions::MANAGE_GUILD),
            role(2, 10, false, Permissions::MANAGE_ROLES),
        ];
        let plan = plan_strip(&held, 10);
        assert!(plan.remove.is_empty());
        assert_eq!(
            plan.hierarchy_skipped,
            vec![RoleId::new(1), RoleId::new(2)]
        );
    }

    #[test]
    fn test_privileged_set_membership() {
        assert!(PRIVILEGED.contains(Permissions::ADMINISTRATOR));
        assert!(PRIVILEGED.contains(Permissions::BAN_MEMBERS));
        assert!(PRIVILEGED.contains(Permissions::MANAGE_WEBHOOKS));
        assert!(PRIVILEGED.contains(Permissions::MODERATE_MEMBERS));
        assert!(!PRIVILEGED.contains(Permissions::SEND_MESSAGES));
        assert!(!PRIVILEGED.contains(Permissions::CONNECT));
    }

    #[test]
    fn test_registry_has_all_punishments() {
        let registry = PunishmentRegistry::new();
        for punishment in [Punishment::Strip, Punishment::Kick, Punishment::Ban] {
            assert!(registry.handlers.contains_key(&punishment));
        }
    }
}
