use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use dotenv::dotenv;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

use ridepay_backend::api::{self, AppServices};
use ridepay_backend::clock::{Clock, SystemClock};
use ridepay_backend::config::AppConfig;
use ridepay_backend::database::booking_repository::{BookingDirectory, PgBookingDirectory};
use ridepay_backend::database::memory::{
    InMemoryBookingDirectory, InMemoryPaymentRepository, InMemoryWalletRepository,
};
use ridepay_backend::database::payment_repository::{PaymentRepository, PgPaymentRepository};
use ridepay_backend::database::wallet_repository::{PgWalletRepository, WalletRepository};
use ridepay_backend::database::{init_pool_from_config, run_migrations};
use ridepay_backend::health::HealthChecker;
use ridepay_backend::logging::init_tracing_with;
use ridepay_backend::payments::providers::RazorpayGateway;
use ridepay_backend::payments::PaymentGateway;
use ridepay_backend::services::notification::{NotificationService, Notifier};
use ridepay_backend::services::payment_service::PaymentService;
use ridepay_backend::services::settlement::SettlementService;
use ridepay_backend::services::wallet_ledger::WalletLedger;
use ridepay_backend::services::webhook_processor::WebhookProcessor;
use ridepay_backend::workers::{
    PaymentCleanupConfig, PaymentCleanupWorker, SettlementReconciler, SettlementReconcilerConfig,
};

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}

async fn shutdown_signal_with_notify(shutdown_tx: watch::Sender<bool>) {
    shutdown_signal().await;
    let _ = shutdown_tx.send(true);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let config = AppConfig::from_env()?;
    init_tracing_with(&config.logging);
    config.validate().map_err(|e| {
        error!("Invalid configuration: {}", e);
        e
    })?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
        "🚀 Starting ridepay backend service"
    );

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    // Persistence: Postgres, or in-memory stores when SKIP_EXTERNALS=true
    let (db_pool, payments, wallets, bookings) = match &config.database {
        Some(db_config) => {
            info!("📊 Initializing database connection pool...");
            let pool = init_pool_from_config(db_config).await.map_err(|e| {
                error!("Failed to initialize database pool: {}", e);
                e
            })?;
            run_migrations(&pool).await?;
            info!(
                max_connections = pool.options().get_max_connections(),
                "✅ Database connection pool initialized"
            );
            (
                Some(pool.clone()),
                Arc::new(PgPaymentRepository::new(pool.clone())) as Arc<dyn PaymentRepository>,
                Arc::new(PgWalletRepository::new(pool.clone())) as Arc<dyn WalletRepository>,
                Arc::new(PgBookingDirectory::new(pool)) as Arc<dyn BookingDirectory>,
            )
        }
        None => {
            warn!("⏭️  Skipping database initialization (SKIP_EXTERNALS=true); state is in-memory");
            (
                None,
                Arc::new(InMemoryPaymentRepository::new()) as Arc<dyn PaymentRepository>,
                Arc::new(InMemoryWalletRepository::new()) as Arc<dyn WalletRepository>,
                Arc::new(InMemoryBookingDirectory::new()) as Arc<dyn BookingDirectory>,
            )
        }
    };

    let gateway: Arc<dyn PaymentGateway> = Arc::new(RazorpayGateway::new(config.gateway.clone())?);
    let notifier: Arc<dyn Notifier> = Arc::new(NotificationService::new());

    let ledger = Arc::new(WalletLedger::new(wallets, clock.clone()));
    let settlement = Arc::new(SettlementService::new(
        ledger.clone(),
        payments.clone(),
        bookings.clone(),
        notifier.clone(),
        clock.clone(),
        config.settlement.commission_rate.clone(),
    ));
    let payment_service = Arc::new(PaymentService::new(
        payments,
        bookings,
        gateway.clone(),
        ledger.clone(),
        settlement.clone(),
        notifier,
        clock,
        config.settlement.currency.clone(),
    ));
    let webhook_processor = Arc::new(WebhookProcessor::new(gateway.clone(), payment_service.clone()));
    info!(
        commission_rate = %config.settlement.commission_rate,
        currency = %config.settlement.currency,
        "✅ Payment services initialized"
    );

    // Background workers
    let (worker_shutdown_tx, worker_shutdown_rx) = watch::channel(false);
    let cleanup_handle = tokio::spawn(
        PaymentCleanupWorker::new(payment_service.clone(), PaymentCleanupConfig::from_env())
            .run(worker_shutdown_rx.clone()),
    );
    let reconciler_handle = tokio::spawn(
        SettlementReconciler::new(settlement, SettlementReconcilerConfig::from_env())
            .run(worker_shutdown_rx),
    );

    let app = api::router(AppServices {
        payment_service,
        ledger,
        webhook_processor,
        health_checker: HealthChecker::new(db_pool, gateway),
    });
    info!("✅ Routes configured");

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!("❌ Failed to bind to address {}: {}", addr, e);
        e
    })?;

    info!(address = %addr, "🚀 Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal_with_notify(worker_shutdown_tx.clone()))
        .await?;

    let _ = worker_shutdown_tx.send(true);
    let workers = futures::future::join_all([
        ("payment cleanup", cleanup_handle),
        ("settlement reconciler", reconciler_handle),
    ]
    .into_iter()
    .map(|(name, handle)| async move {
        if tokio::time::timeout(Duration::from_secs(5), handle).await.is_err() {
            error!(worker = name, "Timed out waiting for worker shutdown");
        }
    }));
    workers.await;

    info!("👋 Server shutdown complete");

    Ok(())
}
