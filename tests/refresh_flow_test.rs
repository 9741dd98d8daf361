// Integration tests for the credential refresh flows: sealed storage, the
// modern OAuth grant, the legacy session chain, the proactive scheduler, and
// the retry-on-401 wrapper, all against a mock HTTP upstream.

use camvault::alert::{AlertSink, LogAlertSink};
use camvault::config::{ProviderConfig, ProviderFlavor, RefreshConfig, StoreConfig, VaultConfig};
use camvault::credentials::{
    CameraCredentials, CredentialStore, EnvelopeKey, LegacyCredentials, ModernCredentials,
};
use camvault::scheduler::RefreshScheduler;
use camvault::vault::{Vault, VaultError};
use chrono::{Duration, Utc};
use mockito::{Matcher, Server};
use std::sync::Arc;

fn test_key() -> EnvelopeKey {
    EnvelopeKey::from_hex(&"ab".repeat(32)).unwrap()
}

fn modern_provider(name: &str, server: &Server) -> ProviderConfig {
    ProviderConfig {
        name: name.to_string(),
        flavor: ProviderFlavor::Modern,
        token_url: Some(format!("{}/{}/token", server.url(), name)),
        jwt_url: None,
        client_id: Some("test_client_id".to_string()),
        client_secret: Some("test_client_secret".to_string()),
        refresh_interval_secs: None,
    }
}

fn vault_config(server: &Server) -> VaultConfig {
    VaultConfig {
        store: StoreConfig::default(),
        refresh: RefreshConfig::default(),
        providers: vec![
            modern_provider("nest", server),
            modern_provider("dropbox", server),
            ProviderConfig {
                name: "nest_legacy".to_string(),
                flavor: ProviderFlavor::Legacy,
                token_url: None,
                jwt_url: Some(format!("{}/v1/issue_jwt", server.url())),
                client_id: None,
                client_secret: None,
                refresh_interval_secs: None,
            },
        ],
    }
}

fn expired_modern() -> CameraCredentials {
    CameraCredentials::Modern(ModernCredentials {
        access_token: "expired-token".to_string(),
        refresh_token: "refresh-token-1".to_string(),
        expires_at: Utc::now() - Duration::hours(1),
    })
}

fn legacy_creds(server: &Server) -> CameraCredentials {
    CameraCredentials::Legacy(LegacyCredentials {
        issue_token_url: format!("{}/issue_token", server.url()),
        cookie_header: "SID=abc; HSID=def".to_string(),
        setup_at: Utc::now() - Duration::days(30),
        cached_session_token: None,
        cached_session_token_expires_at: None,
    })
}

/// Installed credentials refresh through the real grant shape, and the
/// refreshed record is visible to a second vault over the same store.
#[tokio::test]
async fn test_modern_refresh_survives_vault_restart() {
    let mut server = Server::new_async().await;
    let token_mock = server
        .mock("POST", "/nest/token")
        .match_body(Matcher::AllOf(vec![
            Matcher::UrlEncoded("grant_type".into(), "refresh_token".into()),
            Matcher::UrlEncoded("refresh_token".into(), "refresh-token-1".into()),
            Matcher::UrlEncoded("client_id".into(), "test_client_id".into()),
            Matcher::UrlEncoded("client_secret".into(), "test_client_secret".into()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"access_token":"minted-token","expires_in":10800}"#)
        .expect(1)
        .create_async()
        .await;

    let store = Arc::new(CredentialStore::open(":memory:").unwrap());
    let config = vault_config(&server);

    let vault = Vault::new(Arc::clone(&store), test_key(), &config).unwrap();
    vault.install_credentials("nest", &expired_modern()).unwrap();
    assert_eq!(vault.get_valid_token("nest").await.unwrap(), "minted-token");

    // A fresh vault over the same store serves the refreshed record without
    // touching the endpoint again
    let restarted = Vault::new(Arc::clone(&store), test_key(), &config).unwrap();
    assert_eq!(
        restarted.get_valid_token("nest").await.unwrap(),
        "minted-token"
    );

    token_mock.assert_async().await;
}

/// The legacy exchange hop presents the browser identity the cookies came
/// from; the JWT hop presents the vendor referer. Both hops run once and the
/// minted JWT comes back.
#[tokio::test]
async fn test_legacy_chain_presents_browser_identity() {
    let mut server = Server::new_async().await;

    let exchange_mock = server
        .mock("GET", "/issue_token")
        .match_header("cookie", "SID=abc; HSID=def")
        .match_header(
            "user-agent",
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36",
        )
        .match_header("referer", "https://accounts.google.com/o/oauth2/iframe")
        .match_header("x-requested-with", "XmlHttpRequest")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"access_token":"ya29.exchange-token"}"#)
        .expect(1)
        .create_async()
        .await;

    let jwt_mock = server
        .mock("POST", "/v1/issue_jwt")
        .match_header("authorization", "Bearer ya29.exchange-token")
        .match_header("referer", "https://home.nest.com")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"jwt":"session-jwt-value"}"#)
        .expect(1)
        .create_async()
        .await;

    let store = Arc::new(CredentialStore::open(":memory:").unwrap());
    let config = vault_config(&server);
    let vault = Vault::new(Arc::clone(&store), test_key(), &config).unwrap();

    vault
        .install_credentials("nest_legacy", &legacy_creds(&server))
        .unwrap();

    assert_eq!(
        vault.get_valid_token("nest_legacy").await.unwrap(),
        "session-jwt-value"
    );

    exchange_mock.assert_async().await;
    jwt_mock.assert_async().await;
}

/// Providers refresh independently and concurrently; each endpoint is hit
/// exactly once.
#[tokio::test]
async fn test_providers_refresh_independently() {
    let mut server = Server::new_async().await;
    let nest_mock = server
        .mock("POST", "/nest/token")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"access_token":"nest-token","expires_in":3600}"#)
        .expect(1)
        .create_async()
        .await;
    let dropbox_mock = server
        .mock("POST", "/dropbox/token")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"access_token":"dropbox-token","expires_in":3600}"#)
        .expect(1)
        .create_async()
        .await;

    let store = Arc::new(CredentialStore::open(":memory:").unwrap());
    let config = vault_config(&server);
    let vault = Arc::new(Vault::new(Arc::clone(&store), test_key(), &config).unwrap());

    vault.install_credentials("nest", &expired_modern()).unwrap();
    vault
        .install_credentials("dropbox", &expired_modern())
        .unwrap();

    let (nest_token, dropbox_token) = tokio::join!(
        vault.get_valid_token("nest"),
        vault.get_valid_token("dropbox"),
    );

    assert_eq!(nest_token.unwrap(), "nest-token");
    assert_eq!(dropbox_token.unwrap(), "dropbox-token");

    nest_mock.assert_async().await;
    dropbox_mock.assert_async().await;
}

/// The scheduler's first cycle refreshes an expired token on its own, with
/// no caller on the interactive path.
#[tokio::test]
async fn test_scheduler_refreshes_expired_token() {
    let mut server = Server::new_async().await;
    // 3-hour lifetime puts the minted token outside the proactive window,
    // so exactly one refresh happens
    let token_mock = server
        .mock("POST", "/nest/token")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"access_token":"minted-token","expires_in":10800}"#)
        .expect(1)
        .create_async()
        .await;

    let store = Arc::new(CredentialStore::open(":memory:").unwrap());
    let config = vault_config(&server);
    let vault = Arc::new(Vault::new(Arc::clone(&store), test_key(), &config).unwrap());
    vault.install_credentials("nest", &expired_modern()).unwrap();

    let alerts: Arc<dyn AlertSink> = Arc::new(LogAlertSink);
    let mut scheduler = RefreshScheduler::new(Arc::clone(&vault), alerts, &config);
    let started = scheduler.start(&["nest".to_string()]);
    assert_eq!(started, 1);

    // The first cycle fires immediately; poll the status map until it lands
    let status = scheduler.status();
    let mut refreshed = false;
    for _ in 0..100 {
        if let Some(entry) = status.get("nest") {
            if entry.refresh_count >= 1 {
                refreshed = true;
                break;
            }
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }
    assert!(refreshed, "scheduler never completed a refresh cycle");

    scheduler.shutdown();
    token_mock.assert_async().await;

    // The interactive path now serves the scheduler's token from the store
    assert_eq!(vault.get_valid_token("nest").await.unwrap(), "minted-token");
}

/// A downstream camera call that hits 401 recovers through one forced
/// refresh; a key that cannot open the stored record is terminal.
#[tokio::test]
async fn test_snapshot_fetch_recovers_from_revoked_token() {
    let mut server = Server::new_async().await;

    let snapshot_rejected = server
        .mock("GET", "/camera/snapshot")
        .match_header("authorization", "Bearer revoked-token")
        .with_status(401)
        .expect(1)
        .create_async()
        .await;
    let snapshot_ok = server
        .mock("GET", "/camera/snapshot")
        .match_header("authorization", "Bearer minted-token")
        .with_status(200)
        .with_body("jpeg-bytes")
        .expect(1)
        .create_async()
        .await;
    let token_mock = server
        .mock("POST", "/nest/token")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"access_token":"minted-token","expires_in":3600}"#)
        .expect(1)
        .create_async()
        .await;

    let store = Arc::new(CredentialStore::open(":memory:").unwrap());
    let config = vault_config(&server);
    let vault = Vault::new(Arc::clone(&store), test_key(), &config).unwrap();

    // Fresh by the clock, revoked upstream
    vault
        .install_credentials(
            "nest",
            &CameraCredentials::Modern(ModernCredentials {
                access_token: "revoked-token".to_string(),
                refresh_token: "refresh-token-1".to_string(),
                expires_at: Utc::now() + Duration::hours(1),
            }),
        )
        .unwrap();

    let http = reqwest::Client::new();
    let url = format!("{}/camera/snapshot", server.url());
    let response = vault
        .call_with_auth_retry("nest", |token| {
            let http = http.clone();
            let url = url.clone();
            async move { http.get(&url).bearer_auth(token).send().await }
        })
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "jpeg-bytes");

    snapshot_rejected.assert_async().await;
    snapshot_ok.assert_async().await;
    token_mock.assert_async().await;
}

/// Records sealed under one key are unusable under another: key rotation
/// without re-installing credentials surfaces as a re-setup condition.
#[tokio::test]
async fn test_rotated_key_cannot_open_stored_records() {
    let server = Server::new_async().await;
    let store = Arc::new(CredentialStore::open(":memory:").unwrap());
    let config = vault_config(&server);

    let vault = Vault::new(Arc::clone(&store), test_key(), &config).unwrap();
    vault.install_credentials("nest", &expired_modern()).unwrap();

    let rotated_key = EnvelopeKey::from_hex(&"cd".repeat(32)).unwrap();
    let rotated = Vault::new(Arc::clone(&store), rotated_key, &config).unwrap();

    let err = rotated.get_valid_token("nest").await.unwrap_err();
    assert!(matches!(err, VaultError::Corrupt { .. }));
    assert!(err.requires_resetup());
}
