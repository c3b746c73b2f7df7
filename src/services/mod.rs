//! Services module for business logic and integrations

pub mod notification;
pub mod payment_service;
pub mod settlement;
pub mod wallet_ledger;
pub mod webhook_processor;


pub use notification::{Notification, NotificationService, NotificationType, Notifier};
pub use payment_service::{PaymentService, PaymentServiceError};
pub use settlement::{FareSplit, SettlementService};
pub use wallet_ledger::{LedgerError, PostingOutcome, WalletLedger};
pub use webhook_processor::{WebhookOutcome, WebhookProcessor, WebhookProcessorError};
