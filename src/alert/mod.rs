//! Operator alerting seam.
//!
//! The scheduler escalates persistent refresh failures through this trait.
//! The default sink writes to the log stream; deployments wire in whatever
//! paging channel they actually use.

use async_trait::async_trait;
use tracing::error;

/// Destination for operator escalations.
///
/// Implementations must be cheap to call and must not fail loudly: an alert
/// that cannot be delivered is logged and dropped, never retried into the
/// refresh path.
#[async_trait]
pub trait AlertSink: Send + Sync {
    /// Delivers one alert. `subject` is a short headline, `message` carries
    /// the detail an operator needs to act.
    async fn notify(&self, subject: &str, message: &str);
}

/// Default sink: alerts land in the log stream at ERROR level.
pub struct LogAlertSink;

#[async_trait]
impl AlertSink for LogAlertSink {
    async fn notify(&self, subject: &str, message: &str) {
        error!(subject = %subject, "OPERATOR ALERT: {}", message);
    }
}
