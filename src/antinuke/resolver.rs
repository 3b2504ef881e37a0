//! Whitelist/admin resolver
//!
//! Pure decision functions: whether a subject is exempt from punishment, and
//! who is allowed to change antinuke configuration.

use crate::antinuke::config::AntinukeConfig;
use serenity::all::UserId;

/// Whether the antinuke engine may punish `subject`.
///
/// The guild owner, the bot itself, whitelisted ids, and antinuke admins are
/// always exempt.
#[must_use]
pub fn should_act_on(
    config: &AntinukeConfig,
    owner_id: UserId,
    bot_id: UserId,
    subject: UserId,
) -> bool {
    if subject == owner_id || subject == bot_id {
        return false;
    }
    if config.whitelist.contains(&subject.get()) {
        return false;
    }
    if config.admins.contains(&subject.get()) {
        return false;
    }
    true
}

/// Whether `user` holds antinuke admin authority. The guild owner is an
/// implicit admin.
#[must_use]
pub fn is_admin(config: &AntinukeConfig, owner_id: UserId, user: UserId) -> bool {
    user == owner_id || config.admins.contains(&user.get())
}

/// Only the guild owner may edit the admin set.
#[must_use]
pub fn can_edit_admins(owner_id: UserId, caller: UserId) -> bool {
    caller == owner_id
}

/// Admins and the owner may edit module parameters.
#[must_use]
pub fn can_configure(config: &AntinukeConfig, owner_id: UserId, caller: UserId) -> bool {
    is_admin(config, owner_id, caller)
}

#[cfg(test)]
mod tests {
    use super::*;

    const OWNER: UserId = UserId::new(1);
    const BOT: UserId = UserId::new(2);

    fn config_with(admins: &[u64], whitelist: &[u64]) -> AntinukeConfig {
        let mut config = AntinukeConfig::default();
        config.admins.extend(admins.iter().copied());
        config.whitelist.extend(whitelist.iter().copied());
        config
    }

    #[test]
    fn test_exemption_monotonicity() {
        let config = config_with(&[10], &[20]);

        // Owner, bot, whitelist, admins: never acted on.
        assert!(!should_act_on(&config, OWNER, BOT, OWNER));
        assert!(!should_act_on(&config, OWNER, BOT, BOT));
        assert!(!should_act_on(&config, OWNER, BOT, UserId::new(10)));
        assert!(!should_act_on(&config, OWNER, BOT, UserId::new(20)));

        // Everyone else is fair game.
        assert!(should_act_on(&config, OWNER, BOT, UserId::new(30)));
    }

    #[test]
    fn test_owner_exempt_even_with_empty_config() {
        let config = AntinukeConfig::default();
        assert!(!should_act_on(&config, OWNER, BOT, OWNER));
        assert!(!should_act_on(&config, OWNER, BOT, BOT));
        assert!(should_act_on(&config, OWNER, BOT, UserId::new(99)));
    }

    #[test]
    fn test_owner_is_implicit_admin() {
        let config = AntinukeConfig::default();
        assert!(is_admin(&config, OWNER, OWNER));
        assert!(!is_admin(&config, OWNER, UserId::new(5)));

        let config = config_with(&[5], &[]);
        assert!(is_admin(&config, OWNER, UserId::new(5)));
    }

    #[test]
    fn test_authority_gates() {
        let config = config_with(&[5], &[]);

        // Only the owner edits the admin set.
        assert!(can_edit_admins(OWNER, OWNER));
        assert!(!can_edit_admins(OWNER, UserId::new(5)));

        // Admins and the owner edit module parameters.
        assert!(can_configure(&config, OWNER, OWNER));
        assert!(can_configure(&config, OWNER, UserId::new(5)));
        assert!(!can_configure(&config, OWNER, UserId::new(6)));
    }
}
