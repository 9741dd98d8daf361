//! Sealed credential storage for camera providers.
//!
//! This module provides the at-rest half of the vault: credential payloads
//! are serialized to JSON, sealed with AES-256-GCM, and stored in SQLite as
//! opaque base64 blobs.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │       Vault (vault module)               │
//! │  - serializes CameraCredentials          │
//! │  - seals / opens envelopes               │
//! └─────────────────────────────────────────┘
//!          ↓ (seal)            ↑ (open)
//! ┌─────────────────────────────────────────┐
//! │       Envelope Codec                     │
//! │  - AES-256-GCM, 16-byte nonce            │
//! │  - base64(nonce || ciphertext || tag)    │
//! └─────────────────────────────────────────┘
//!          ↓                    ↑
//! ┌─────────────────────────────────────────┐
//! │       CredentialStore (SQLite)           │
//! │  - one sealed row per provider           │
//! │  - ACID guarantees                       │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use camvault::credentials::{open, seal, CameraCredentials, CredentialStore, EnvelopeKey, ModernCredentials};
//! use chrono::{Duration, Utc};
//!
//! # fn main() -> anyhow::Result<()> {
//! // Master key comes from the environment, never from disk
//! let key = EnvelopeKey::from_hex(&std::env::var("CAMVAULT_ENCRYPTION_KEY")?)?;
//! let store = CredentialStore::open("camera_credentials.db")?;
//!
//! // Seal and store a payload
//! let creds = CameraCredentials::Modern(ModernCredentials {
//!     access_token: "ya29.initial-token".to_string(),
//!     refresh_token: "1//refresh-token".to_string(),
//!     expires_at: Utc::now() + Duration::hours(1),
//! });
//! let blob = seal(&serde_json::to_string(&creds)?, &key)?;
//! store.put("nest", &blob)?;
//!
//! // Read it back
//! if let Some(record) = store.get("nest")? {
//!     let payload = open(&record.ciphertext_blob, &key)?;
//!     let creds: CameraCredentials = serde_json::from_str(&payload)?;
//!     println!("expires at: {:?}", creds.expires_at());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Security
//!
//! - All payloads sealed at rest with AES-256-GCM (tampering detected)
//! - Each envelope gets a unique 16-byte nonce (never reused)
//! - Master key is 32 bytes, held in memory only (from env var)
//! - SQLite ACID guarantees prevent partial updates

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

mod envelope;
mod store;

pub use envelope::{open, seal, EnvelopeKey, OpenError};
pub use store::{CredentialRecord, CredentialStore};

/// Credentials for a provider on the OAuth2 refresh-token flow.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModernCredentials {
    /// Current access token (used for API requests)
    pub access_token: String,

    /// Long-lived refresh token. Not rotated by the refresh grant.
    pub refresh_token: String,

    /// When the access token expires (UTC)
    pub expires_at: DateTime<Utc>,
}

/// Credentials for a provider on the cookie-based legacy session flow.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LegacyCredentials {
    /// Per-account token issuance URL captured from a browser session
    pub issue_token_url: String,

    /// Raw Cookie header value captured from the same session
    pub cookie_header: String,

    /// When the browser session artifacts were captured (UTC)
    pub setup_at: DateTime<Utc>,

    /// Most recent session JWT minted from the cookies, if any
    #[serde(default)]
    pub cached_session_token: Option<String>,

    /// When the cached session JWT expires (UTC)
    #[serde(default)]
    pub cached_session_token_expires_at: Option<DateTime<Utc>>,
}

/// Decrypted credential payload for one camera provider.
///
/// The `kind` tag in the stored JSON selects the refresh flow the provider
/// uses. Everything the flow needs to mint a fresh token lives in the
/// payload itself; the database row around it stays opaque.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CameraCredentials {
    Modern(ModernCredentials),
    Legacy(LegacyCredentials),
}

impl CameraCredentials {
    /// The flow this payload belongs to, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            CameraCredentials::Modern(_) => "modern",
            CameraCredentials::Legacy(_) => "legacy",
        }
    }

    /// The token callers would present right now, if one exists.
    ///
    /// Legacy payloads have no token until the session chain has run once.
    pub fn current_token(&self) -> Option<&str> {
        match self {
            CameraCredentials::Modern(m) => Some(&m.access_token),
            CameraCredentials::Legacy(l) => l.cached_session_token.as_deref(),
        }
    }

    /// Absolute expiry of the current token, if one exists.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        match self {
            CameraCredentials::Modern(m) => Some(m.expires_at),
            CameraCredentials::Legacy(l) => l.cached_session_token_expires_at,
        }
    }
}
