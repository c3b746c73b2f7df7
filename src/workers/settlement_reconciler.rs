//! Retries driver settlement for captured payments that were never marked
//! settled, e.g. because the ledger was unreachable at capture time.

use crate::services::settlement::{ReconcileReport, SettlementService};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct SettlementReconcilerConfig {
    pub interval: Duration,
    /// Payments captured more recently than this are left to the inline path.
    pub grace_period: Duration,
    pub batch_size: i64,
}

impl Default for SettlementReconcilerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
            grace_period: Duration::from_secs(120),
            batch_size: 100,
        }
    }
}

impl SettlementReconcilerConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.interval = Duration::from_secs(
            std::env::var("SETTLEMENT_RECONCILE_INTERVAL_SECONDS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(cfg.interval.as_secs()),
        );
        cfg.grace_period = Duration::from_secs(
            std::env::var("SETTLEMENT_RECONCILE_GRACE_SECONDS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(cfg.grace_period.as_secs()),
        );
        cfg.batch_size = std::env::var("SETTLEMENT_RECONCILE_BATCH_SIZE")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(cfg.batch_size);
        cfg
    }
}

pub struct SettlementReconciler {
    settlement: Arc<SettlementService>,
    config: SettlementReconcilerConfig,
}

impl SettlementReconciler {
    pub fn new(settlement: Arc<SettlementService>, config: SettlementReconcilerConfig) -> Self {
        Self { settlement, config }
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            grace_secs = self.config.grace_period.as_secs(),
            batch_size = self.config.batch_size,
            "settlement reconciler started"
        );

        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    // A dropped sender can never signal again.
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("settlement reconciler stopping");
                        break;
                    }
                }
                _ = tokio::time::sleep(self.config.interval) => {
                    if let Err(e) = self.run_cycle().await {
                        warn!(error = %e, "settlement reconciliation cycle failed");
                    }
                }
            }
        }

        info!("settlement reconciler stopped");
    }

    pub async fn run_cycle(&self) -> anyhow::Result<ReconcileReport> {
        let grace = chrono::Duration::from_std(self.config.grace_period)?;
        Ok(self
            .settlement
            .reconcile_unsettled(grace, self.config.batch_size)
            .await?)
    }
}
