//! Proactive refresh scheduler.
//!
//! One background task per provider calls the vault's ensure-fresh entry
//! point on an interval, with the wide proactive threshold, so interactive
//! callers almost never pay for a refresh inline. A failed cycle is recorded
//! and the loop keeps running; when failures persist past the alert window
//! the operator is notified through the [`AlertSink`], exactly once per
//! failure episode.

use crate::alert::AlertSink;
use crate::config::VaultConfig;
use crate::vault::Vault;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

/// Status information for one provider's refresh loop.
#[derive(Clone, Debug)]
pub struct RefreshStatus {
    /// Last successful refresh cycle timestamp
    pub last_refresh: Option<DateTime<Utc>>,
    /// Last error message (if any)
    pub last_error: Option<String>,
    /// Total number of successful cycles
    pub refresh_count: u64,
    /// Total number of failed cycles
    pub error_count: u64,
}

impl Default for RefreshStatus {
    fn default() -> Self {
        Self {
            last_refresh: None,
            last_error: None,
            refresh_count: 0,
            error_count: 0,
        }
    }
}

/// One uninterrupted run of refresh failures for a provider.
///
/// Opens on the first failed cycle, closes on the next success. The operator
/// alert fires at most once per episode, the first time a failed cycle lands
/// past the alert window.
struct FailureEpisode {
    since: DateTime<Utc>,
    alerted: bool,
}

impl FailureEpisode {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            since: now,
            alerted: false,
        }
    }

    /// True exactly once: the first failure observed at or past the window.
    fn should_alert(&mut self, now: DateTime<Utc>, alert_after: chrono::Duration) -> bool {
        if self.alerted || now - self.since < alert_after {
            return false;
        }
        self.alerted = true;
        true
    }
}

/// Per-provider proactive refresh scheduler.
///
/// # Responsibilities
/// - Run a refresh cycle per provider on its configured interval
/// - Track status (last refresh, errors) per provider
/// - Escalate persistent failures to the alert sink
/// - Graceful shutdown
pub struct RefreshScheduler {
    vault: Arc<Vault>,
    alerts: Arc<dyn AlertSink>,
    /// Wide freshness threshold handed to `ensure_fresh`
    proactive_threshold: chrono::Duration,
    /// How long an episode may run before the operator alert
    alert_after: chrono::Duration,
    /// Cycle cadence unless a provider overrides it
    default_interval_secs: u64,
    /// Per-provider cadence overrides from configuration
    interval_overrides: HashMap<String, u64>,
    /// Spawned per-provider task handles
    handles: Vec<JoinHandle<()>>,
    /// Status tracking per provider
    status: Arc<DashMap<String, RefreshStatus>>,
    /// Open failure episodes per provider
    episodes: Arc<DashMap<String, FailureEpisode>>,
}

impl RefreshScheduler {
    /// Creates a scheduler over the vault. Thresholds and cadences come from
    /// the `[refresh]` section; per-provider interval overrides from the
    /// provider entries.
    pub fn new(vault: Arc<Vault>, alerts: Arc<dyn AlertSink>, config: &VaultConfig) -> Self {
        let interval_overrides = config
            .providers
            .iter()
            .filter_map(|p| p.refresh_interval_secs.map(|secs| (p.name.clone(), secs)))
            .collect();

        Self {
            vault,
            alerts,
            proactive_threshold: config.refresh.proactive_threshold(),
            alert_after: config.refresh.alert_after(),
            default_interval_secs: config.refresh.scheduler_interval_secs,
            interval_overrides,
            handles: Vec::new(),
            status: Arc::new(DashMap::new()),
            episodes: Arc::new(DashMap::new()),
        }
    }

    /// Returns a clone of the status map for external monitoring.
    pub fn status(&self) -> Arc<DashMap<String, RefreshStatus>> {
        Arc::clone(&self.status)
    }

    /// Starts one refresh loop per provider (non-blocking).
    ///
    /// Providers the vault cannot refresh are skipped with a warning.
    /// Returns the number of loops started.
    pub fn start(&mut self, providers: &[String]) -> usize {
        let mut started = 0;
        for provider in providers {
            if !self.vault.is_configured(provider) {
                warn!(
                    provider = %provider,
                    "Skipping scheduler for provider with no refresh configuration"
                );
                continue;
            }
            self.spawn_provider_loop(provider);
            started += 1;
        }

        if started == 0 {
            info!("No providers scheduled - waiting for credential installation");
        }

        started
    }

    /// Aborts all refresh loops.
    pub fn shutdown(&mut self) {
        info!(task_count = self.handles.len(), "Shutting down refresh scheduler");
        for handle in self.handles.drain(..) {
            handle.abort();
        }
    }

    fn interval_secs_for(&self, provider: &str) -> u64 {
        self.interval_overrides
            .get(provider)
            .copied()
            .unwrap_or(self.default_interval_secs)
    }

    fn spawn_provider_loop(&mut self, provider: &str) {
        let interval_secs = self.interval_secs_for(provider);
        let vault = Arc::clone(&self.vault);
        let alerts = Arc::clone(&self.alerts);
        let status = Arc::clone(&self.status);
        let episodes = Arc::clone(&self.episodes);
        let proactive_threshold = self.proactive_threshold;
        let alert_after = self.alert_after;
        let provider = provider.to_string();

        let handle = tokio::spawn(async move {
            info!(
                provider = %provider,
                interval_secs,
                "Starting refresh scheduler"
            );

            let mut interval = interval(Duration::from_secs(interval_secs));

            loop {
                interval.tick().await;

                debug!(provider = %provider, "Running proactive refresh cycle");

                run_refresh_cycle(
                    &provider,
                    &vault,
                    &alerts,
                    &status,
                    &episodes,
                    proactive_threshold,
                    alert_after,
                )
                .await;
            }
        });

        self.handles.push(handle);
    }
}

impl Drop for RefreshScheduler {
    fn drop(&mut self) {
        for handle in self.handles.drain(..) {
            handle.abort();
        }
    }
}

/// One scheduler cycle for one provider.
///
/// Success updates the status entry and closes any open failure episode.
/// Failure is logged and recorded; the first failure at or past the alert
/// window notifies the operator. Never panics the loop.
async fn run_refresh_cycle(
    provider: &str,
    vault: &Vault,
    alerts: &Arc<dyn AlertSink>,
    status: &DashMap<String, RefreshStatus>,
    episodes: &DashMap<String, FailureEpisode>,
    proactive_threshold: chrono::Duration,
    alert_after: chrono::Duration,
) {
    match vault.ensure_fresh(provider, proactive_threshold).await {
        Ok(_) => {
            let mut entry = status.entry(provider.to_string()).or_default();
            entry.last_refresh = Some(Utc::now());
            entry.last_error = None;
            entry.refresh_count += 1;
            drop(entry);

            if let Some((_, episode)) = episodes.remove(provider) {
                info!(
                    provider = %provider,
                    failing_since = %episode.since,
                    "Refresh recovered, failure episode closed"
                );
            }
        }
        Err(e) => {
            error!(provider = %provider, error = %e, "Proactive refresh failed");

            let mut entry = status.entry(provider.to_string()).or_default();
            entry.last_error = Some(e.to_string());
            entry.error_count += 1;
            drop(entry);

            let now = Utc::now();
            // The map guard must not be held across the notify await
            let alert_since = {
                let mut episode = episodes
                    .entry(provider.to_string())
                    .or_insert_with(|| FailureEpisode::new(now));
                if episode.should_alert(now, alert_after) {
                    Some(episode.since)
                } else {
                    None
                }
            };

            if let Some(since) = alert_since {
                warn!(
                    provider = %provider,
                    failing_since = %since,
                    "Refresh failures crossed the alert window, notifying operator"
                );
                alerts
                    .notify(
                        &format!("Credential refresh failing: {}", provider),
                        &format!(
                            "Provider '{}' has not refreshed successfully since {}. \
                             Latest error: {}. Re-setup may be required.",
                            provider,
                            since.to_rfc3339(),
                            e
                        ),
                    )
                    .await;
            }
        }
    }
}
