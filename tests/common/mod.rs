//! Shared wiring for integration tests: in-memory stores, a sandbox gateway
//! and a clock the test controls.

#![allow(dead_code)]

use bigdecimal::BigDecimal;
use chrono::Utc;
use ridepay_backend::clock::ManualClock;
use ridepay_backend::database::booking_repository::BookingSummary;
use ridepay_backend::database::memory::{
    InMemoryBookingDirectory, InMemoryPaymentRepository, InMemoryWalletRepository,
};
use ridepay_backend::payments::providers::{RazorpayConfig, RazorpayGateway};
use ridepay_backend::payments::utils::hmac_sha256_hex;
use ridepay_backend::services::notification::NotificationService;
use ridepay_backend::services::payment_service::PaymentService;
use ridepay_backend::services::settlement::SettlementService;
use ridepay_backend::services::wallet_ledger::WalletLedger;
use ridepay_backend::services::webhook_processor::WebhookProcessor;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

pub const KEY_SECRET: &str = "it_key_secret";
pub const WEBHOOK_SECRET: &str = "it_webhook_secret";

pub fn dec(s: &str) -> BigDecimal {
    BigDecimal::from_str(s).unwrap()
}

/// Checkout signature as the gateway would compute it.
pub fn checkout_signature(order_id: &str, payment_id: &str) -> String {
    hmac_sha256_hex(format!("{}|{}", order_id, payment_id).as_bytes(), KEY_SECRET).unwrap()
}

pub fn webhook_signature(body: &[u8]) -> String {
    hmac_sha256_hex(body, WEBHOOK_SECRET).unwrap()
}

pub struct TestApp {
    pub payments: Arc<PaymentService>,
    pub settlement: Arc<SettlementService>,
    pub ledger: Arc<WalletLedger>,
    pub webhooks: Arc<WebhookProcessor>,
    pub gateway: Arc<RazorpayGateway>,
    pub wallet_store: Arc<InMemoryWalletRepository>,
    pub bookings: Arc<InMemoryBookingDirectory>,
    pub clock: Arc<ManualClock>,
}

pub struct Ride {
    pub booking_id: Uuid,
    pub passenger_id: Uuid,
    pub driver_id: Uuid,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_commission("0.10")
    }

    pub fn with_commission(rate: &str) -> Self {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let payment_store = Arc::new(InMemoryPaymentRepository::new());
        let wallet_store = Arc::new(InMemoryWalletRepository::new());
        let bookings = Arc::new(InMemoryBookingDirectory::new());
        let notifier = Arc::new(NotificationService::new());
        let gateway = Arc::new(
            RazorpayGateway::new(RazorpayConfig {
                key_id: "rzp_test_it".to_string(),
                key_secret: KEY_SECRET.to_string(),
                webhook_secret: WEBHOOK_SECRET.to_string(),
                test_mode: true,
                ..RazorpayConfig::default()
            })
            .unwrap(),
        );

        let ledger = Arc::new(WalletLedger::new(wallet_store.clone(), clock.clone()));
        let settlement = Arc::new(SettlementService::new(
            ledger.clone(),
            payment_store.clone(),
            bookings.clone(),
            notifier.clone(),
            clock.clone(),
            dec(rate),
        ));
        let payments = Arc::new(PaymentService::new(
            payment_store,
            bookings.clone(),
            gateway.clone(),
            ledger.clone(),
            settlement.clone(),
            notifier,
            clock.clone(),
            "INR",
        ));
        let webhooks = Arc::new(WebhookProcessor::new(gateway.clone(), payments.clone()));

        Self {
            payments,
            settlement,
            ledger,
            webhooks,
            gateway,
            wallet_store,
            bookings,
            clock,
        }
    }

    pub async fn book_ride(&self, fare: &str) -> Ride {
        self.book_ride_for(Uuid::new_v4(), fare).await
    }

    pub async fn book_ride_for(&self, driver_id: Uuid, fare: &str) -> Ride {
        let ride = Ride {
            booking_id: Uuid::new_v4(),
            passenger_id: Uuid::new_v4(),
            driver_id,
        };
        self.bookings
            .insert(BookingSummary {
                booking_id: ride.booking_id,
                passenger_id: ride.passenger_id,
                driver_id: ride.driver_id,
                total_fare: dec(fare),
                route: "Pune → Mumbai".to_string(),
                confirmed: false,
            })
            .await;
        ride
    }

    /// Create an order for the ride and confirm it with a valid signature.
    pub async fn pay(&self, ride: &Ride, amount: &str, gateway_payment_id: &str) -> Uuid {
        let order = self
            .payments
            .create_payment(ride.booking_id, ride.passenger_id, &dec(amount))
            .await
            .unwrap();
        let signature = checkout_signature(&order.gateway_order_id, gateway_payment_id);
        self.payments
            .process_payment(gateway_payment_id, &order.gateway_order_id, &signature)
            .await
            .unwrap();
        order.payment_id
    }
}
