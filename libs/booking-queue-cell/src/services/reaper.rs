use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{error, info, instrument, warn};

use shared_config::AppConfig;

use crate::services::lifecycle::RegistrationLifecycleService;
use crate::services::periodic::spawn_periodic;
use crate::services::quota::SlotQuotaManager;
use crate::services::store::RegistrationStore;
use crate::{BookingQueueError, SweepReport};

/// Cancels registrations left unpaid past the payment timeout.
pub struct ExpiryReaper {
    registrations: Arc<dyn RegistrationStore>,
    lifecycle: Arc<RegistrationLifecycleService>,
    quota: Arc<SlotQuotaManager>,
    payment_timeout: chrono::Duration,
    interval: Duration,
}

impl ExpiryReaper {
    pub fn new(
        registrations: Arc<dyn RegistrationStore>,
        lifecycle: Arc<RegistrationLifecycleService>,
        quota: Arc<SlotQuotaManager>,
        payment_timeout: chrono::Duration,
        interval: Duration,
    ) -> Self {
        Self { registrations, lifecycle, quota, payment_timeout, interval }
    }

    pub fn from_config(
        config: &AppConfig,
        registrations: Arc<dyn RegistrationStore>,
        lifecycle: Arc<RegistrationLifecycleService>,
        quota: Arc<SlotQuotaManager>,
    ) -> Self {
        Self::new(
            registrations,
            lifecycle,
            quota,
            chrono::Duration::minutes(config.payment_timeout_minutes),
            Duration::from_secs(config.reaper_interval_seconds.max(1)),
        )
    }

    /// One pass over stale pending registrations, after retrying any place
    /// returns that were deferred. Per-item failures are logged and counted;
    /// they never stop the sweep.
    #[instrument(skip(self))]
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport, BookingQueueError> {
        let released = self.quota.retry_deferred_releases().await;

        let cutoff = now - self.payment_timeout;
        let stale = self.registrations.list_pending_created_before(cutoff).await?;

        let mut report = SweepReport {
            examined: stale.len(),
            released,
            ..SweepReport::default()
        };

        for registration in stale {
            match self.lifecycle.cancel(registration.id).await {
                Ok(_) => {
                    info!(
                        "Expired unpaid registration {} (created {})",
                        registration.id, registration.created_at
                    );
                    report.cancelled += 1;
                }
                Err(e) => {
                    warn!("Failed to expire registration {}: {}", registration.id, e);
                    report.failed += 1;
                }
            }
        }

        if report.examined > 0 || report.released > 0 {
            info!(
                "Expiry sweep: {} examined, {} cancelled, {} failed, {} deferred places returned",
                report.examined, report.cancelled, report.failed, report.released
            );
        }
        Ok(report)
    }

    pub fn start(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let period = self.interval;
        spawn_periodic("expiry-reaper", period, shutdown, move || {
            let reaper = Arc::clone(&self);
            async move {
                if let Err(e) = reaper.sweep(Utc::now()).await {
                    error!("Expiry sweep failed: {}", e);
                }
            }
        })
    }
}
