use anyhow::{Context, Result};
use camvault::alert::{AlertSink, LogAlertSink};
use camvault::config::{load_config, VaultConfig};
use camvault::credentials::{CredentialStore, EnvelopeKey};
use camvault::scheduler::RefreshScheduler;
use camvault::vault::Vault;
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "camvault=info".into()),
        )
        .init();

    info!("Camvault starting...");

    // Read configuration: optional TOML file, required key from the environment
    let config = match std::env::var("CAMVAULT_CONFIG") {
        Ok(path) => load_config(&path)?,
        Err(_) if std::path::Path::new("camvault.toml").exists() => load_config("camvault.toml")?,
        Err(_) => VaultConfig::default(),
    };

    let key_hex = std::env::var("CAMVAULT_ENCRYPTION_KEY")
        .context("CAMVAULT_ENCRYPTION_KEY is required (hex-encoded 32-byte key)")?;
    let key = EnvelopeKey::from_hex(&key_hex).context("Invalid CAMVAULT_ENCRYPTION_KEY")?;

    info!(
        database_path = %config.store.database_path,
        provider_count = config.providers.len(),
        "Configuration loaded"
    );

    // Initialize credential store (shared by the vault and any setup tooling)
    let store = Arc::new(
        CredentialStore::open(&config.store.database_path)
            .context("Failed to open credential store")?,
    );
    info!("Credential store opened");

    let vault = Arc::new(Vault::new(Arc::clone(&store), key, &config)?);

    // Schedule providers that are refresh-configured and have a stored record
    let stored = store
        .list_providers()
        .context("Failed to enumerate stored credentials")?;

    let mut scheduled = Vec::new();
    for provider in &stored {
        if vault.is_configured(provider) {
            scheduled.push(provider.clone());
        } else {
            warn!(
                provider = %provider,
                "Stored credentials have no refresh configuration, skipping"
            );
        }
    }
    for provider in vault.configured_providers() {
        if !stored.contains(&provider) {
            info!(provider = %provider, "No stored credentials yet - waiting for setup");
        }
    }

    let alerts: Arc<dyn AlertSink> = Arc::new(LogAlertSink);
    let mut scheduler = RefreshScheduler::new(Arc::clone(&vault), alerts, &config);
    let started = scheduler.start(&scheduled);
    info!(schedulers_started = started, "Refresh scheduler started");

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl_c signal")?;
    info!("Shutdown signal received");

    // Graceful shutdown
    scheduler.shutdown();
    info!("Camvault stopped");

    Ok(())
}
