//! Token freshness classification.
//!
//! Every decision about whether a token is still usable goes through
//! [`classify`], so the inline path and the proactive scheduler agree on the
//! meaning of "fresh" and only differ in the threshold they pass.

use chrono::{DateTime, Duration, Utc};

/// Freshness of a token relative to a refresh threshold.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenState {
    /// Comfortably inside its lifetime; serve it as-is.
    Valid,
    /// Still usable, but within the threshold of expiry; refresh now.
    ExpiringSoon,
    /// Past its expiry; must refresh before use.
    Expired,
}

impl TokenState {
    /// True for the states that should trigger a refresh.
    pub fn needs_refresh(&self) -> bool {
        matches!(self, TokenState::ExpiringSoon | TokenState::Expired)
    }
}

/// Classifies a token against a refresh threshold.
///
/// `now` is passed explicitly so callers and tests share one clock. A token
/// expiring exactly at `now` counts as `Expired`; remaining life exactly
/// equal to the threshold counts as `ExpiringSoon`.
pub fn classify(now: DateTime<Utc>, expires_at: DateTime<Utc>, threshold: Duration) -> TokenState {
    if now >= expires_at {
        TokenState::Expired
    } else if expires_at - now <= threshold {
        TokenState::ExpiringSoon
    } else {
        TokenState::Valid
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_valid() {
        let now = Utc::now();
        let state = classify(now, now + Duration::hours(1), Duration::minutes(5));
        assert_eq!(state, TokenState::Valid);
        assert!(!state.needs_refresh());
    }

    #[test]
    fn test_classify_expiring_soon() {
        let now = Utc::now();
        let state = classify(now, now + Duration::minutes(3), Duration::minutes(5));
        assert_eq!(state, TokenState::ExpiringSoon);
        assert!(state.needs_refresh());
    }

    #[test]
    fn test_classify_expired() {
        let now = Utc::now();
        let state = classify(now, now - Duration::seconds(1), Duration::minutes(5));
        assert_eq!(state, TokenState::Expired);
        assert!(state.needs_refresh());
    }

    #[test]
    fn test_expiry_boundary_is_expired() {
        let now = Utc::now();
        assert_eq!(classify(now, now, Duration::minutes(5)), TokenState::Expired);
    }

    #[test]
    fn test_threshold_boundary_is_expiring_soon() {
        let now = Utc::now();
        let state = classify(now, now + Duration::minutes(5), Duration::minutes(5));
        assert_eq!(state, TokenState::ExpiringSoon);
    }

    #[test]
    fn test_wider_threshold_flags_earlier() {
        let now = Utc::now();
        let expires_at = now + Duration::minutes(90);

        // The inline path with a narrow threshold sees a healthy token;
        // the proactive scheduler with a wide one already wants a refresh.
        assert_eq!(
            classify(now, expires_at, Duration::minutes(5)),
            TokenState::Valid
        );
        assert_eq!(
            classify(now, expires_at, Duration::hours(2)),
            TokenState::ExpiringSoon
        );
    }
}
