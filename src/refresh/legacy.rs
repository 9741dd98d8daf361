//! Cookie-based legacy session chain.
//!
//! Providers on this flow never issued refresh tokens. What we hold instead
//! is a browser session: a per-account token issuance URL and the raw Cookie
//! header captured alongside it. Minting a usable token takes two hops:
//!
//! 1. Session exchange: GET the issuance URL with the stored cookies, posing
//!    as the browser the cookies came from, to receive a short-lived OAuth
//!    access token.
//! 2. JWT issuance: trade that access token at the vendor session proxy for
//!    a session JWT valid for one hour.
//!
//! The JWT is what camera endpoints actually accept. Callers present it as a
//! cookie value (`user_token=<jwt>`).

use super::RefreshError;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

/// Session JWT lifetime requested from the proxy.
pub const SESSION_TOKEN_TTL_SECS: i64 = 3600;

/// Literal marker the exchange endpoint embeds when the account session is
/// dead. Can appear with any status code, so it is checked before anything
/// else.
const LOGGED_OUT_MARKER: &str = "USER_LOGGED_OUT";

/// The browser identity the captured cookies belong to. The exchange
/// endpoint rejects cookie auth from clients that do not look like a
/// browser session.
const BROWSER_USER_AGENT: &str =
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36";

const SESSION_EXCHANGE_REFERER: &str = "https://accounts.google.com/o/oauth2/iframe";
const JWT_ISSUE_REFERER: &str = "https://home.nest.com";
const JWT_POLICY_ID: &str = "authproxy-oauth-policy";

#[derive(Deserialize)]
struct SessionExchangeResponse {
    #[serde(default)]
    access_token: Option<String>,
}

#[derive(Deserialize)]
struct JwtIssueResponse {
    jwt: String,
}

/// A session JWT minted by the chain, with its absolute expiry.
#[derive(Debug, Clone)]
pub struct SessionToken {
    pub jwt: String,
    pub expires_at: DateTime<Utc>,
}

/// The two-hop refresh chain for cookie-based providers.
///
/// Holds only the fixed half of the protocol (proxy endpoint, timeout). The
/// per-account half (issuance URL, cookies) lives in the sealed credential
/// payload and travels with each call.
pub struct LegacyRefreshChain {
    http_client: reqwest::Client,
    jwt_url: String,
    session_exchange_timeout: Duration,
}

impl LegacyRefreshChain {
    pub fn new(
        http_client: reqwest::Client,
        jwt_url: String,
        session_exchange_timeout: Duration,
    ) -> Self {
        Self {
            http_client,
            jwt_url,
            session_exchange_timeout,
        }
    }

    /// Runs the full chain, retrying the whole thing exactly once if the
    /// first attempt fails with a retryable error.
    ///
    /// The retry restarts from the session exchange rather than resuming
    /// mid-chain: a failed JWT hop usually means the access token from the
    /// first hop is no longer good either.
    ///
    /// `SessionLoggedOut` and `NoAccessToken` are reported immediately; no
    /// retry can mint a token out of a dead session.
    pub async fn run(
        &self,
        issue_token_url: &str,
        cookie_header: &str,
    ) -> Result<SessionToken, RefreshError> {
        match self.run_once(issue_token_url, cookie_header).await {
            Ok(token) => Ok(token),
            Err(e) if e.is_retryable() => {
                warn!(error = %e, "Legacy session chain failed, retrying once");
                self.run_once(issue_token_url, cookie_header).await
            }
            Err(e) => Err(e),
        }
    }

    async fn run_once(
        &self,
        issue_token_url: &str,
        cookie_header: &str,
    ) -> Result<SessionToken, RefreshError> {
        let access_token = self.exchange_session(issue_token_url, cookie_header).await?;
        debug!("Session exchange succeeded, issuing session JWT");
        self.issue_jwt(&access_token).await
    }

    /// Step one: cookies -> short-lived OAuth access token.
    async fn exchange_session(
        &self,
        issue_token_url: &str,
        cookie_header: &str,
    ) -> Result<String, RefreshError> {
        let response = self
            .http_client
            .get(issue_token_url)
            .timeout(self.session_exchange_timeout)
            .header("Cookie", cookie_header)
            .header("User-Agent", BROWSER_USER_AGENT)
            .header("Referer", SESSION_EXCHANGE_REFERER)
            .header("X-Requested-With", "XmlHttpRequest")
            .header("Sec-Fetch-Mode", "cors")
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        // The logged-out marker can ride on any status code, so it wins
        // over the status check.
        if body.contains(LOGGED_OUT_MARKER) {
            return Err(RefreshError::SessionLoggedOut);
        }

        if !status.is_success() {
            return Err(RefreshError::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: SessionExchangeResponse =
            serde_json::from_str(&body).map_err(|_| RefreshError::NoAccessToken)?;

        parsed.access_token.ok_or(RefreshError::NoAccessToken)
    }

    /// Step two: access token -> one-hour session JWT.
    async fn issue_jwt(&self, access_token: &str) -> Result<SessionToken, RefreshError> {
        let body = serde_json::json!({
            "embed_google_oauth_access_token": true,
            "expire_after": format!("{}s", SESSION_TOKEN_TTL_SECS),
            "google_oauth_access_token": access_token,
            "policy_id": JWT_POLICY_ID,
        });

        let response = self
            .http_client
            .post(&self.jwt_url)
            .header("Authorization", format!("Bearer {}", access_token))
            .header("User-Agent", BROWSER_USER_AGENT)
            .header("Referer", JWT_ISSUE_REFERER)
            .json(&body)
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

        let issued: JwtIssueResponse = response.json().await?;

        Ok(SessionToken {
            jwt: issued.jwt,
            expires_at: Utc::now() + chrono::Duration::seconds(SESSION_TOKEN_TTL_SECS),
        })
    }
}
