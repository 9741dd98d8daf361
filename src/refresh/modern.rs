//! OAuth2 refresh-token grant client.
//!
//! POSTs to the provider token endpoint with `grant_type=refresh_token` and
//! exchanges a long-lived refresh token for a short-lived access token. The
//! refresh token itself is not rotated by this grant.

use super::RefreshError;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use tracing::debug;

/// Token response from an OAuth token refresh endpoint.
#[derive(Deserialize)]
struct TokenGrantResponse {
    access_token: String,
    expires_in: i64,
}

/// A freshly minted access token with its absolute expiry.
#[derive(Debug, Clone)]
pub struct RefreshedToken {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
}

/// Client for one provider's OAuth2 token endpoint.
///
/// Holds the endpoint and client credentials; the refresh token travels with
/// each call because it lives in the sealed credential payload, not here.
pub struct ModernRefreshClient {
    http_client: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
}

impl ModernRefreshClient {
    pub fn new(
        http_client: reqwest::Client,
        token_url: String,
        client_id: String,
        client_secret: String,
    ) -> Self {
        Self {
            http_client,
            token_url,
            client_id,
            client_secret,
        }
    }

    /// Performs one refresh-token grant.
    ///
    /// Exactly one request; there is no retry here. The caller decides
    /// whether and when to try again.
    ///
    /// # Returns
    /// * `Ok(RefreshedToken)` - New access token, expiry computed from
    ///   `expires_in` against the local clock
    /// * `Err(RefreshError)` - Non-2xx response, transport failure, or a
    ///   response body missing the required fields
    pub async fn refresh(&self, refresh_token: &str) -> Result<RefreshedToken, RefreshError> {
        let mut form: HashMap<&str, &str> = HashMap::new();
        form.insert("grant_type", "refresh_token");
        form.insert("refresh_token", refresh_token);
        form.insert("client_id", &self.client_id);
        form.insert("client_secret", &self.client_secret);

        debug!(token_url = %self.token_url, "Sending refresh-token grant");

        let response = self
            .http_client
            .post(&self.token_url)
            .header("Accept", "application/json")
            .form(&form)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<failed to read body>".to_string());
            return Err(RefreshError::Upstream { status, body });
        }

        let grant: TokenGrantResponse = response.json().await?;

        Ok(RefreshedToken {
            access_token: grant.access_token,
            expires_at: Utc::now() + chrono::Duration::seconds(grant.expires_in),
        })
    }
}
