//! Audit-log correlator
//!
//! Given a destructive event, identify the moderator responsible by scanning
//! the guild's recent audit entries. Audit entries arrive slightly delayed,
//! so the fetch retries a bounded number of times; "unknown moderator" is a
//! normal outcome that simply ends the handler.

use crate::ANTINUKE_TARGET;
use poise::serenity_prelude::{GuildId, Http, UserId};
use serenity::model::guild::audit_log::Action;
use tokio::time::Duration;
use tracing::{debug, warn};

/// Maximum clock skew between the gateway event and its audit entry.
pub const MAX_SKEW_SECS: i64 = 10;
/// Audit entries fetched per attempt, newest first.
pub const FETCH_LIMIT: u8 = 10;
/// Fetch attempts before giving up.
const ATTEMPTS: u32 = 3;
/// Delay between attempts; three attempts stay inside the 2s budget.
const RETRY_DELAY: Duration = Duration::from_millis(600);

/// One audit entry reduced to the fields matching cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuditCandidate {
    pub moderator_id: u64,
    pub target_id: Option<u64>,
    pub at_unix: i64,
}

/// Select the newest entry whose target matches and whose timestamp is within
/// the skew of the event. Entries must be ordered newest first.
#[must_use]
pub fn match_target(
    entries: &[AuditCandidate],
    target_id: u64,
    event_unix: i64,
) -> Option<u64> {
    entries
        .iter()
        .find(|entry| {
            entry.target_id == Some(target_id)
                && (entry.at_unix - event_unix).abs() <= MAX_SKEW_SECS
        })
        .map(|entry| entry.moderator_id)
}

/// Select the newest entry within the skew regardless of target, for action
/// kinds whose gateway events carry no usable target id (webhook and emoji
/// deletions, vanity updates).
#[must_use]
pub fn match_newest(entries: &[AuditCandidate], event_unix: i64) -> Option<u64> {
    entries
        .iter()
        .find(|entry| (entry.at_unix - event_unix).abs() <= MAX_SKEW_SECS)
        .map(|entry| entry.moderator_id)
}

/// Fetch recent audit entries of `action` and attribute the event to a
/// moderator. `target_id = None` matches on recency alone.
///
/// Returns `None` when no entry matches after the retry budget; the caller
/// must then take no punitive action.
pub async fn correlate(
    http: &Http,
    guild_id: GuildId,
    action: Action,
    target_id: Option<u64>,
    event_unix: i64,
) -> Option<UserId> {
    for attempt in 0..ATTEMPTS {
        match guild_id
            .audit_logs(http, Some(action), None, None, Some(FETCH_LIMIT))
            .await
        {
            Ok(logs) => {
                let candidates: Vec<AuditCandidate> = logs
                    .entries
                    .iter()
                    .map(|entry| AuditCandidate {
                        moderator_id: entry.user_id.get(),
                        target_id: entry.target_id.map(|t| t.get()),
                        at_unix: entry.id.created_at().unix_timestamp(),
                    })
                    .collect();

                let matched = match target_id {
                    Some(target) => match_target(&candidates, target, event_unix),
                    None => match_newest(&candidates, event_unix),
                };
                if let Some(moderator) = matched {
                    return Some(UserId::new(moderator));
                }
            }
            Err(e) => {
                warn!(
                    target: ANTINUKE_TARGET,
                    guild_id = %guild_id,
                    attempt,
                    error = %e,
                    "Audit log fetch failed"
                );
            }
        }

        if attempt + 1 < ATTEMPTS {
            tokio::time::sleep(RETRY_DELAY).await;
        }
    }

    debug!(
        target: ANTINUKE_TARGET,
        guild_id = %guild_id,
        ?target_id,
        "No matching audit entry; moderator unknown"
    );
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(moderator_id: u64, target_id: Option<u64>, at_unix: i64) -> AuditCandidate {
        AuditCandidate {
            moderator_id,
            target_id,
            at_unix,
        }
    }

    #[test]
    fn test_match_target_picks_newest_matching() {
        // Newest first: an older action against the same target by a
        // different moderator must not win.
        let entries = [
            entry(1, Some(500), 1_000),
            entry(2, Some(500), 950),
            entry(3, Some(600), 1_000),
        ];
        assert_eq!(match_target(&entries, 500, 1_000), Some(1));
        assert_eq!(match_target(&entries, 600, 1_000), Some(3));
    }

    #[test]
    fn test_match_target_respects_skew() {
        let entries = [entry(1, Some(500), 1_000)];

        // Exactly at the boundary still matches.
        assert_eq!(match_target(&entries, 500, 1_000 - MAX_SKEW_SECS), Some(1));
        assert_eq!(match_target(&entries, 500, 1_000 + MAX_SKEW_SECS), Some(1));

        // One second past the skew does not.
        assert_eq!(match_target(&entries, 500, 1_000 + MAX_SKEW_SECS + 1), None);
    }

    #[test]
    fn test_match_target_unmatched_is_none() {
        let entries = [entry(1, Some(500), 1_000), entry(2, None, 1_000)];
        assert_eq!(match_target(&entries, 999, 1_000), None);
        assert_eq!(match_target(&[], 500, 1_000), None);
    }

    #[test]
    fn test_match_newest_ignores_target() {
        let entries = [entry(7, None, 1_000), entry(8, Some(4), 995)];
        assert_eq!(match_newest(&entries, 1_002), Some(7));
        assert_eq!(match_newest(&entries, 2_000), None);
    }
}
