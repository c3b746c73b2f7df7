//! Periodic sweep that fails payments the payer abandoned.

use crate::services::payment_service::PaymentService;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct PaymentCleanupConfig {
    /// How often the sweep runs.
    pub interval: Duration,
    /// Open payments older than this are failed.
    pub payment_timeout: Duration,
}

impl Default for PaymentCleanupConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3600),
            payment_timeout: Duration::from_secs(24 * 3600),
        }
    }
}

impl PaymentCleanupConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.interval = Duration::from_secs(
            std::env::var("PAYMENT_CLEANUP_INTERVAL_SECONDS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(cfg.interval.as_secs()),
        );
        cfg.payment_timeout = Duration::from_secs(
            std::env::var("PAYMENT_CLEANUP_TIMEOUT_SECONDS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(cfg.payment_timeout.as_secs()),
        );
        cfg
    }
}

pub struct PaymentCleanupWorker {
    payments: Arc<PaymentService>,
    config: PaymentCleanupConfig,
}

impl PaymentCleanupWorker {
    pub fn new(payments: Arc<PaymentService>, config: PaymentCleanupConfig) -> Self {
        Self { payments, config }
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            payment_timeout_secs = self.config.payment_timeout.as_secs(),
            "payment cleanup worker started"
        );

        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    // A dropped sender can never signal again.
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("payment cleanup worker stopping");
                        break;
                    }
                }
                _ = tokio::time::sleep(self.config.interval) => {
                    if let Err(e) = self.run_cycle().await {
                        warn!(error = %e, "payment cleanup cycle failed");
                    }
                }
            }
        }

        info!("payment cleanup worker stopped");
    }

    /// One sweep. Returns the number of payments failed.
    pub async fn run_cycle(&self) -> anyhow::Result<usize> {
        let timeout = chrono::Duration::from_std(self.config.payment_timeout)?;
        Ok(self.payments.cleanup_stale_payments(timeout).await?)
    }
}
