//! Configuration for the credential vault daemon.
//!
//! Layout mirrors the TOML file: a `[store]` section, a `[refresh]` section
//! with the thresholds and cadences, and a `[[providers]]` array. Everything
//! has a default, so a missing or partial file still yields a runnable
//! configuration for the builtin providers.
//!
//! Secrets never live in the file. OAuth client credentials resolve from
//! `CAMVAULT_OAUTH_{PROVIDER}_CLIENT_ID` / `_CLIENT_SECRET` environment
//! variables unless a test injects them directly.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Default session-proxy endpoint for legacy JWT issuance
pub const DEFAULT_JWT_URL: &str = "https://nestauthproxyservice-pa.googleapis.com/v1/issue_jwt";

/// Complete camvault configuration
#[derive(Debug, Clone, Deserialize)]
pub struct VaultConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub refresh: RefreshConfig,
    #[serde(default = "default_providers")]
    pub providers: Vec<ProviderConfig>,
}

/// Credential store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Path to the SQLite database file
    #[serde(default = "default_database_path")]
    pub database_path: String,
}

fn default_database_path() -> String {
    "camera_credentials.db".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

/// Refresh thresholds and cadences
#[derive(Debug, Clone, Deserialize)]
pub struct RefreshConfig {
    /// Narrow threshold for the inline token path (seconds)
    #[serde(default = "default_inline_threshold_secs")]
    pub inline_threshold_secs: i64,

    /// Wide threshold for the proactive scheduler (minutes)
    #[serde(default = "default_proactive_threshold_minutes")]
    pub proactive_threshold_minutes: i64,

    /// How often each provider's scheduler cycle runs (seconds)
    #[serde(default = "default_scheduler_interval_secs")]
    pub scheduler_interval_secs: u64,

    /// How long a failure episode may last before the operator alert (hours)
    #[serde(default = "default_alert_after_hours")]
    pub alert_after_hours: i64,

    /// Request timeout for the legacy session exchange hop (seconds)
    #[serde(default = "default_session_exchange_timeout_secs")]
    pub session_exchange_timeout_secs: u64,

    /// Overall HTTP client timeout (seconds)
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
}

fn default_inline_threshold_secs() -> i64 {
    300
}

fn default_proactive_threshold_minutes() -> i64 {
    120
}

fn default_scheduler_interval_secs() -> u64 {
    1800
}

fn default_alert_after_hours() -> i64 {
    4
}

fn default_session_exchange_timeout_secs() -> u64 {
    10
}

fn default_http_timeout_secs() -> u64 {
    30
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            inline_threshold_secs: default_inline_threshold_secs(),
            proactive_threshold_minutes: default_proactive_threshold_minutes(),
            scheduler_interval_secs: default_scheduler_interval_secs(),
            alert_after_hours: default_alert_after_hours(),
            session_exchange_timeout_secs: default_session_exchange_timeout_secs(),
            http_timeout_secs: default_http_timeout_secs(),
        }
    }
}

impl RefreshConfig {
    pub fn inline_threshold(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.inline_threshold_secs)
    }

    pub fn proactive_threshold(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.proactive_threshold_minutes)
    }

    pub fn alert_after(&self) -> chrono::Duration {
        chrono::Duration::hours(self.alert_after_hours)
    }

    pub fn scheduler_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.scheduler_interval_secs)
    }

    pub fn session_exchange_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.session_exchange_timeout_secs)
    }

    pub fn http_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.http_timeout_secs)
    }
}

/// Which refresh flow a provider uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderFlavor {
    /// OAuth2 refresh-token grant
    Modern,
    /// Cookie-based session chain
    Legacy,
}

/// One camera provider entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Provider name (e.g., "nest", "nest_legacy", "dropbox")
    pub name: String,

    /// Refresh flow for this provider
    pub flavor: ProviderFlavor,

    /// OAuth token endpoint (modern). Falls back to the builtin URL for
    /// known provider names.
    #[serde(default)]
    pub token_url: Option<String>,

    /// Session-proxy JWT endpoint (legacy). Falls back to [`DEFAULT_JWT_URL`].
    #[serde(default)]
    pub jwt_url: Option<String>,

    /// OAuth client ID (modern). Normally resolved from the environment;
    /// settable here for tests.
    #[serde(default)]
    pub client_id: Option<String>,

    /// OAuth client secret (modern). Same resolution as `client_id`.
    #[serde(default)]
    pub client_secret: Option<String>,

    /// Per-provider override of the scheduler cycle (seconds)
    #[serde(default)]
    pub refresh_interval_secs: Option<u64>,
}

impl ProviderConfig {
    fn env_prefix(&self) -> String {
        self.name.to_uppercase()
    }

    /// Client ID: inline value first, then `CAMVAULT_OAUTH_{NAME}_CLIENT_ID`.
    pub fn resolved_client_id(&self) -> Option<String> {
        self.client_id.clone().or_else(|| {
            std::env::var(format!("CAMVAULT_OAUTH_{}_CLIENT_ID", self.env_prefix())).ok()
        })
    }

    /// Client secret: inline value first, then `CAMVAULT_OAUTH_{NAME}_CLIENT_SECRET`.
    pub fn resolved_client_secret(&self) -> Option<String> {
        self.client_secret.clone().or_else(|| {
            std::env::var(format!("CAMVAULT_OAUTH_{}_CLIENT_SECRET", self.env_prefix())).ok()
        })
    }

    /// Token endpoint: inline value first, then the builtin URL for known
    /// provider names. `None` means the provider cannot be used as modern.
    pub fn resolved_token_url(&self) -> Option<String> {
        self.token_url
            .clone()
            .or_else(|| builtin_token_url(&self.name).map(|url| url.to_string()))
    }

    /// JWT endpoint: inline value first, then the vendor default.
    pub fn resolved_jwt_url(&self) -> String {
        self.jwt_url
            .clone()
            .unwrap_or_else(|| DEFAULT_JWT_URL.to_string())
    }
}

/// Builtin token endpoints by provider name
fn builtin_token_url(name: &str) -> Option<&'static str> {
    match name {
        "nest" => Some("https://www.googleapis.com/oauth2/v4/token"),
        "dropbox" => Some("https://api.dropboxapi.com/oauth2/token"),
        _ => None,
    }
}

/// The providers a bare deployment knows about
fn default_providers() -> Vec<ProviderConfig> {
    vec![
        ProviderConfig {
            name: "nest".to_string(),
            flavor: ProviderFlavor::Modern,
            token_url: None,
            jwt_url: None,
            client_id: None,
            client_secret: None,
            refresh_interval_secs: None,
        },
        ProviderConfig {
            name: "nest_legacy".to_string(),
            flavor: ProviderFlavor::Legacy,
            token_url: None,
            jwt_url: None,
            client_id: None,
            client_secret: None,
            refresh_interval_secs: None,
        },
        ProviderConfig {
            name: "dropbox".to_string(),
            flavor: ProviderFlavor::Modern,
            token_url: None,
            jwt_url: None,
            client_id: None,
            client_secret: None,
            refresh_interval_secs: None,
        },
    ]
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            refresh: RefreshConfig::default(),
            providers: default_providers(),
        }
    }
}

impl VaultConfig {
    /// The configuration entry for a provider, if one exists.
    pub fn provider(&self, name: &str) -> Option<&ProviderConfig> {
        self.providers.iter().find(|p| p.name == name)
    }
}

/// Load configuration from TOML file
pub fn load_config(path: &str) -> Result<VaultConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path))?;
    let config: VaultConfig =
        toml::from_str(&contents).with_context(|| format!("Failed to parse config file {}", path))?;
    Ok(config)
}
