pub mod payment_cleanup;
pub mod settlement_reconciler;

pub use payment_cleanup::{PaymentCleanupConfig, PaymentCleanupWorker};
pub use settlement_reconciler::{SettlementReconciler, SettlementReconcilerConfig};
