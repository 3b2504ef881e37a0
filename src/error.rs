//! Platform error classification
//!
//! Maps serenity API failures onto the small set of error kinds the rest of
//! the bot makes decisions on.

use derive_more::Display;
use serenity::all::HttpError;

/// Broad categories of platform failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum ErrorKind {
    /// Target entity (member, channel, role, audit entry) is gone.
    #[display("not_found")]
    NotFound,
    /// The platform rejected the mutation for permission or hierarchy reasons.
    #[display("forbidden")]
    Forbidden,
    /// Transient rate limit; serenity's HTTP client already defers once with
    /// the suggested delay, so seeing this means the bucket is exhausted.
    #[display("rate_limited")]
    RateLimited,
    /// Network or IO level failure.
    #[display("transport")]
    Transport,
    #[display("unknown")]
    Unknown,
}

/// Classify a serenity error into an [`ErrorKind`].
#[must_use]
pub fn classify(err: &serenity::Error) -> ErrorKind {
    match err {
        serenity::Error::Http(HttpError::UnsuccessfulRequest(resp)) => {
            match resp.status_code.as_u16() {
                404 => ErrorKind::NotFound,
                401 | 403 => ErrorKind::Forbidden,
                429 => ErrorKind::RateLimited,
                _ => ErrorKind::Unknown,
            }
        }
        serenity::Error::Http(HttpError::RateLimitI64F64 | HttpError::RateLimitUtf8) => {
            ErrorKind::RateLimited
        }
        serenity::Error::Http(_) | serenity::Error::Tungstenite(_) => ErrorKind::Transport,
        _ => ErrorKind::Unknown,
    }
}

/// Whether the failure definitively means the target no longer exists.
#[must_use]
pub fn is_not_found(err: &serenity::Error) -> bool {
    classify(err) == ErrorKind::NotFound
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_display() {
        assert_eq!(ErrorKind::NotFound.to_string(), "not_found");
        assert_eq!(ErrorKind::Forbidden.to_string(), "forbidden");
        assert_eq!(ErrorKind::RateLimited.to_string(), "rate_limited");
        assert_eq!(ErrorKind::Transport.to_string(), "transport");
    }

    #[test]
    fn test_non_http_error_is_unknown() {
        let err = serenity::Error::Other("boom");
        assert_eq!(classify(&err), ErrorKind::Unknown);
        assert!(!is_not_found(&err));
    }
}
