//! Credential vault: the single public entry point for tokens.
//!
//! Callers ask for a token; the vault decides whether the sealed record
//! already holds a fresh one or whether a refresh flow has to run first.
//! Refreshes are single-flight per provider: one tokio mutex per provider
//! name, taken only on the stale path, with a re-check after acquisition so
//! waiters queued behind an in-flight refresh reuse its result instead of
//! firing their own.
//!
//! Persistence is write-through: a refresh result is sealed and written to
//! the store before the token is handed back, so every caller observes the
//! record of the most recently completed refresh. On failure nothing is
//! persisted.


mod retry;

use crate::config::{ProviderFlavor, VaultConfig};
use crate::credentials::{
    open, seal, CameraCredentials, CredentialStore, EnvelopeKey, ModernCredentials,
};
use crate::freshness::{classify, TokenState};
use crate::refresh::{LegacyRefreshChain, ModernRefreshClient, RefreshError};
use anyhow::Context;
use chrono::{Duration, Utc};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Errors surfaced to vault callers.
#[derive(Debug, Error)]
pub enum VaultError {
    /// No stored credentials, or no refresh configuration for this provider.
    #[error("no credentials configured for provider '{provider}'")]
    NotConfigured { provider: String },

    /// The stored record cannot be used: envelope failed to open, payload
    /// failed to parse, or the payload kind contradicts the configuration.
    /// An operator has to re-install credentials.
    #[error("stored credentials for provider '{provider}' are unusable; re-setup required")]
    Corrupt { provider: String },

    /// The upstream account session is logged out. An operator has to
    /// re-capture cookies.
    #[error("session for provider '{provider}' is logged out; re-setup required")]
    SessionLoggedOut { provider: String },

    /// A refresh attempt failed. The stored record is unchanged.
    #[error("refresh failed for provider '{provider}': {reason}")]
    RefreshFailed {
        provider: String,
        #[source]
        reason: RefreshError,
    },

    /// A wrapped API call got 401 even with a freshly minted token.
    #[error("provider '{provider}' still rejected the token after a forced refresh")]
    StillUnauthorized { provider: String },

    /// A wrapped API call failed at the transport level.
    #[error("API call for provider '{provider}' failed: {source}")]
    CallFailed {
        provider: String,
        #[source]
        source: reqwest::Error,
    },

    /// Credential store failure.
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl VaultError {
    /// True when retrying cannot help and an operator has to re-install
    /// credentials for the provider.
    pub fn requires_resetup(&self) -> bool {
        match self {
            VaultError::Corrupt { .. } | VaultError::SessionLoggedOut { .. } => true,
            VaultError::RefreshFailed { reason, .. } => !reason.is_retryable(),
            _ => false,
        }
    }
}

/// The refresh flow wired up for one provider.
enum ProviderHandle {
    Modern(ModernRefreshClient),
    Legacy(LegacyRefreshChain),
}

impl ProviderHandle {
    fn flavor_name(&self) -> &'static str {
        match self {
            ProviderHandle::Modern(_) => "modern",
            ProviderHandle::Legacy(_) => "legacy",
        }
    }
}

/// Credential vault over the sealed store and the provider refresh flows.
pub struct Vault {
    store: Arc<CredentialStore>,
    key: EnvelopeKey,
    providers: HashMap<String, ProviderHandle>,
    locks: DashMap<String, Arc<Mutex<()>>>,
    inline_threshold: Duration,
}

impl Vault {
    /// Builds the vault from configuration.
    ///
    /// Providers whose endpoints or OAuth client credentials cannot be
    /// resolved are skipped with a warning rather than failing startup;
    /// asking for their tokens later yields `NotConfigured`.
    pub fn new(
        store: Arc<CredentialStore>,
        key: EnvelopeKey,
        config: &VaultConfig,
    ) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(config.refresh.http_timeout())
            .build()
            .context("Failed to build HTTP client")?;

        let mut providers = HashMap::new();
        for provider in &config.providers {
            match provider.flavor {
                ProviderFlavor::Modern => {
                    let token_url = match provider.resolved_token_url() {
                        Some(url) => url,
                        None => {
                            warn!(
                                provider = %provider.name,
                                "No token endpoint known for provider, skipping"
                            );
                            continue;
                        }
                    };
                    let (client_id, client_secret) = match (
                        provider.resolved_client_id(),
                        provider.resolved_client_secret(),
                    ) {
                        (Some(id), Some(secret)) => (id, secret),
                        _ => {
                            warn!(
                                provider = %provider.name,
                                "OAuth client credentials not set. Set CAMVAULT_OAUTH_{}_CLIENT_ID and CAMVAULT_OAUTH_{}_CLIENT_SECRET to enable this provider",
                                provider.name.to_uppercase(),
                                provider.name.to_uppercase()
                            );
                            continue;
                        }
                    };
                    providers.insert(
                        provider.name.clone(),
                        ProviderHandle::Modern(ModernRefreshClient::new(
                            http_client.clone(),
                            token_url,
                            client_id,
                            client_secret,
                        )),
                    );
                }
                ProviderFlavor::Legacy => {
                    providers.insert(
                        provider.name.clone(),
                        ProviderHandle::Legacy(LegacyRefreshChain::new(
                            http_client.clone(),
                            provider.resolved_jwt_url(),
                            config.refresh.session_exchange_timeout(),
                        )),
                    );
                }
            }
        }

        Ok(Self {
            store,
            key,
            providers,
            locks: DashMap::new(),
            inline_threshold: config.refresh.inline_threshold(),
        })
    }

    /// Providers the vault can actually refresh, sorted by name.
    pub fn configured_providers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn is_configured(&self, provider: &str) -> bool {
        self.providers.contains_key(provider)
    }

    /// A token fresh enough for immediate use, refreshing inline if needed.
    ///
    /// Uses the narrow inline threshold; this is the call sites' entry point.
    pub async fn get_valid_token(&self, provider: &str) -> Result<String, VaultError> {
        self.ensure_fresh(provider, self.inline_threshold).await
    }

    /// A token whose remaining life exceeds `threshold`, refreshing if needed.
    ///
    /// The proactive scheduler calls this with its wide threshold; the
    /// inline path with the narrow one. Both funnel through the same
    /// single-flight lock.
    pub async fn ensure_fresh(
        &self,
        provider: &str,
        threshold: Duration,
    ) -> Result<String, VaultError> {
        let handle = self.handle(provider)?;

        // Fast path: no lock while the cached token is comfortably fresh
        let creds = self.load(provider)?;
        if let Some(token) = usable_token(&creds, threshold) {
            return Ok(token);
        }

        let lock = self.lock_for(provider);
        let _guard = lock.lock().await;

        // A caller queued behind an in-flight refresh finds its result here
        let creds = self.load(provider)?;
        if let Some(token) = usable_token(&creds, threshold) {
            debug!(provider = %provider, "Token already refreshed by concurrent caller");
            return Ok(token);
        }

        self.refresh_locked(provider, handle, creds).await
    }

    /// Refreshes unconditionally, ignoring the cached token's freshness.
    ///
    /// For callers whose API request just came back 401: the cached token
    /// looks fresh by the clock but the provider has revoked it.
    pub async fn force_refresh(&self, provider: &str) -> Result<String, VaultError> {
        let handle = self.handle(provider)?;

        let lock = self.lock_for(provider);
        let _guard = lock.lock().await;

        let creds = self.load(provider)?;
        self.refresh_locked(provider, handle, creds).await
    }

    /// Seals and stores a credential payload. Operator setup entry point.
    pub fn install_credentials(
        &self,
        provider: &str,
        creds: &CameraCredentials,
    ) -> Result<(), VaultError> {
        if !self.providers.contains_key(provider) {
            warn!(
                provider = %provider,
                "Installing credentials for a provider with no refresh configuration"
            );
        }
        self.persist(provider, creds)?;
        info!(provider = %provider, kind = creds.kind(), "Credentials installed");
        Ok(())
    }

    /// Runs the provider's refresh flow and persists the result.
    ///
    /// Caller must hold the provider lock.
    async fn refresh_locked(
        &self,
        provider: &str,
        handle: &ProviderHandle,
        creds: CameraCredentials,
    ) -> Result<String, VaultError> {
        match (handle, creds) {
            (ProviderHandle::Modern(client), CameraCredentials::Modern(current)) => {
                info!(provider = %provider, "Refreshing access token");
                let refreshed = client
                    .refresh(&current.refresh_token)
                    .await
                    .map_err(|e| refresh_failure(provider, e))?;

                let updated = CameraCredentials::Modern(ModernCredentials {
                    access_token: refreshed.access_token.clone(),
                    // The grant does not rotate the refresh token
                    refresh_token: current.refresh_token,
                    expires_at: refreshed.expires_at,
                });
                self.persist(provider, &updated)?;

                info!(
                    provider = %provider,
                    expires_at = %refreshed.expires_at,
                    "Access token refreshed"
                );
                Ok(refreshed.access_token)
            }
            (ProviderHandle::Legacy(chain), CameraCredentials::Legacy(mut current)) => {
                info!(provider = %provider, "Minting session token via legacy chain");
                let session = chain
                    .run(&current.issue_token_url, &current.cookie_header)
                    .await
                    .map_err(|e| refresh_failure(provider, e))?;

                current.cached_session_token = Some(session.jwt.clone());
                current.cached_session_token_expires_at = Some(session.expires_at);
                self.persist(provider, &CameraCredentials::Legacy(current))?;

                info!(
                    provider = %provider,
                    expires_at = %session.expires_at,
                    "Session token minted"
                );
                Ok(session.jwt)
            }
            (handle, creds) => {
                error!(
                    provider = %provider,
                    stored_kind = creds.kind(),
                    configured_flavor = handle.flavor_name(),
                    "Stored payload kind does not match the configured refresh flow"
                );
                Err(VaultError::Corrupt {
                    provider: provider.to_string(),
                })
            }
        }
    }

    /// Loads and opens the stored record for a provider.
    fn load(&self, provider: &str) -> Result<CameraCredentials, VaultError> {
        let record = self
            .store
            .get(provider)?
            .ok_or_else(|| VaultError::NotConfigured {
                provider: provider.to_string(),
            })?;

        let payload = open(&record.ciphertext_blob, &self.key).map_err(|e| {
            error!(provider = %provider, error = %e, "Stored credential blob failed to open");
            VaultError::Corrupt {
                provider: provider.to_string(),
            }
        })?;

        serde_json::from_str(&payload).map_err(|e| {
            error!(provider = %provider, error = %e, "Stored credential payload is not valid JSON");
            VaultError::Corrupt {
                provider: provider.to_string(),
            }
        })
    }

    /// Seals and writes a credential payload.
    fn persist(&self, provider: &str, creds: &CameraCredentials) -> Result<(), VaultError> {
        let payload =
            serde_json::to_string(creds).context("Failed to serialize credential payload")?;
        let blob = seal(&payload, &self.key)?;
        self.store.put(provider, &blob)?;
        Ok(())
    }

    fn handle(&self, provider: &str) -> Result<&ProviderHandle, VaultError> {
        self.providers
            .get(provider)
            .ok_or_else(|| VaultError::NotConfigured {
                provider: provider.to_string(),
            })
    }

    fn lock_for(&self, provider: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(provider.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

/// The cached token, if it classifies as `Valid` against the threshold.
fn usable_token(creds: &CameraCredentials, threshold: Duration) -> Option<String> {
    let token = creds.current_token()?;
    let expires_at = creds.expires_at()?;
    match classify(Utc::now(), expires_at, threshold) {
        TokenState::Valid => Some(token.to_string()),
        _ => None,
    }
}

fn refresh_failure(provider: &str, error: RefreshError) -> VaultError {
    match error {
        RefreshError::SessionLoggedOut => VaultError::SessionLoggedOut {
            provider: provider.to_string(),
        },
        reason => VaultError::RefreshFailed {
            provider: provider.to_string(),
            reason,
        },
    }
}
