//! Retry-on-401 wrapper for downstream API calls.
//!
//! A 401 is the provider telling us the token died early, whatever the
//! clock says. The wrapper turns that signal into exactly one forced
//! refresh and one retry, so callers never loop on authorization failures.

use super::{Vault, VaultError};
use reqwest::StatusCode;
use std::future::Future;
use tracing::warn;

impl Vault {
    /// Runs an API call with a valid token, retrying once on 401.
    ///
    /// `call` receives the token and performs the request; it runs at most
    /// twice. Statuses other than 401 pass through untouched, including
    /// server errors: only authorization failures are the vault's problem.
    ///
    /// # Returns
    /// * `Ok(Response)` - First non-401 response
    /// * `Err(VaultError::StillUnauthorized)` - 401 even after a forced
    ///   refresh; credentials are revoked upstream
    /// * `Err(...)` - Token acquisition or transport failure
    pub async fn call_with_auth_retry<F, Fut>(
        &self,
        provider: &str,
        call: F,
    ) -> Result<reqwest::Response, VaultError>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = reqwest::Result<reqwest::Response>>,
    {
        let token = self.get_valid_token(provider).await?;
        let response = call(token).await.map_err(|e| VaultError::CallFailed {
            provider: provider.to_string(),
            source: e,
        })?;

        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        warn!(
            provider = %provider,
            "API call rejected with 401, forcing refresh and retrying once"
        );

        let token = self.force_refresh(provider).await?;
        let response = call(token).await.map_err(|e| VaultError::CallFailed {
            provider: provider.to_string(),
            source: e,
        })?;

        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(VaultError::StillUnauthorized {
                provider: provider.to_string(),
            });
        }

        Ok(response)
    }
}
