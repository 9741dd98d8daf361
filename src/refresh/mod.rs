//! Provider refresh protocols.
//!
//! Two flows mint fresh tokens:
//! - [`modern`]: standard OAuth2 refresh-token grant against a provider
//!   token endpoint
//! - [`legacy`]: cookie-based session chain for providers that never issued
//!   refresh tokens (browser cookies -> OAuth access token -> session JWT)
//!
//! Both flows are plain HTTP clients with no caching or locking; the vault
//! layer decides when to call them and persists what they return.

use thiserror::Error;

pub mod legacy;
pub mod modern;

pub use legacy::{LegacyRefreshChain, SessionToken};
pub use modern::{ModernRefreshClient, RefreshedToken};

/// Errors from a refresh attempt, modern or legacy.
#[derive(Debug, Error)]
pub enum RefreshError {
    /// The upstream account session is gone. Only a human re-capturing
    /// cookies can fix this; retrying would just burn requests.
    #[error("upstream session is logged out; re-setup required")]
    SessionLoggedOut,

    /// The session exchange answered without an access token.
    /// The stored cookies are no longer accepted as a live session.
    #[error("session exchange response carried no access token")]
    NoAccessToken,

    /// The upstream endpoint rejected the request.
    #[error("upstream returned status {status}: {body}")]
    Upstream { status: u16, body: String },

    /// Connection, timeout, or response decoding failure.
    #[error("transport failure: {0}")]
    Transport(#[from] reqwest::Error),
}

impl RefreshError {
    /// True for failures that a single immediate retry can plausibly fix.
    ///
    /// Logged-out sessions and token-less responses are terminal until an
    /// operator intervenes, so retrying them is never useful.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RefreshError::Upstream { .. } | RefreshError::Transport(_)
        )
    }
}
