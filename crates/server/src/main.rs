//! Surplus server entry point.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use apalis::layers::retry::RetryPolicy;
use apalis::prelude::*;
use axum::{Router, middleware};
use surplus_api::{
    AppState,
    middleware::metrics_middleware,
    rate_limit::{RateLimiterState, rate_limit_middleware},
    router as api_router,
};
use surplus_common::{Config, SharedClock, SystemClock, config::RedisConfig};
use surplus_core::{
    CooldownService, ForgivenessService, MissedPickupService, NotificationService, NotifierService,
    PenaltyService, PickupService, ReservationService,
};
use surplus_db::repositories::{
    NotificationRepository, OfferRepository, PenaltyRepository, PointsRepository,
    ReservationRepository,
};
use surplus_queue::{
    NotifyJob, RedisNotifier, SchedulerConfig, ServiceJobExecutor, run_scheduler,
    workers::{NotifyContext, notify_worker},
};
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Attempts per notification before apalis gives up on it.
const NOTIFY_MAX_RETRIES: usize = 5;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
///
/// On Unix systems, this listens for both SIGINT (Ctrl+C) and SIGTERM.
/// On Windows, this only listens for Ctrl+C.
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
            Ok(mut stream) => {
                stream.recv().await;
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
        () = ctrl_c => {
            info!("Received SIGINT, initiating graceful shutdown...");
        },
        () = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown...");
        },
    }
}

/// Connect the notification queue and start its worker.
async fn start_notification_queue(
    redis_config: &RedisConfig,
    notification_service: NotificationService,
) -> Result<NotifierService, Box<dyn std::error::Error>> {
    info!("Connecting to Redis...");
    let redis_client = redis::Client::open(redis_config.url.as_str())?;
    let redis_conn = redis::aio::ConnectionManager::new(redis_client).await?;
    let queue_config =
        apalis_redis::Config::default().set_namespace(&format!("{}:notify", redis_config.prefix));
    let storage =
        apalis_redis::RedisStorage::<NotifyJob>::new_with_config(redis_conn, queue_config);
    info!("Connected to Redis job queue");

    let worker_storage = storage.clone();
    let notify_ctx = NotifyContext::new(notification_service);
    tokio::spawn(async move {
        let monitor = Monitor::new().register({
            WorkerBuilder::new("notify")
                .retry(RetryPolicy::retries(NOTIFY_MAX_RETRIES))
                .data(notify_ctx)
                .backend(worker_storage)
                .build_fn(notify_worker)
        });

        if let Err(e) = monitor.run().await {
            error!(error = %e, "Notification worker failed");
        }
    });
    info!("Notification worker started");

    Ok(Arc::new(RedisNotifier::new(storage)))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "surplus=debug,tower_http=debug".into()),
        )
        .init();

    info!("Starting surplus server...");

    // Load configuration
    let config = Config::load()?;

    // Connect to database
    let db = surplus_db::init(&config).await?;
    info!("Connected to database");

    // Run migrations
    info!("Running database migrations...");
    surplus_db::migrate(&db).await?;
    info!("Migrations completed");

    let db = Arc::new(db);
    let clock: SharedClock = Arc::new(SystemClock);
    let policy = config.policy.clone();

    // Initialize repositories
    let reservation_repo = ReservationRepository::new(Arc::clone(&db));
    let offer_repo = OfferRepository::new(Arc::clone(&db));
    let penalty_repo = PenaltyRepository::new(Arc::clone(&db));
    let points_repo = PointsRepository::new(Arc::clone(&db));
    let notification_repo = NotificationRepository::new(Arc::clone(&db));

    let notification_service = NotificationService::new(notification_repo, clock.clone());

    let notifier: NotifierService = if let Some(redis_config) = &config.redis {
        start_notification_queue(redis_config, notification_service.clone()).await?
    } else {
        info!("Redis not configured, storing notifications inline");
        Arc::new(notification_service.clone())
    };

    // Initialize services
    let mut penalty_service =
        PenaltyService::new(penalty_repo.clone(), policy.clone(), clock.clone());
    penalty_service.set_notifier(notifier.clone());

    let mut reservation_service = ReservationService::new(
        reservation_repo.clone(),
        offer_repo.clone(),
        penalty_service.clone(),
        policy.clone(),
        clock.clone(),
    );
    reservation_service.set_notifier(notifier.clone());

    let mut pickup_service =
        PickupService::new(reservation_repo.clone(), offer_repo, clock.clone());
    pickup_service.set_notifier(notifier.clone());

    let mut forgiveness_service = ForgivenessService::new(
        reservation_repo.clone(),
        penalty_repo.clone(),
        policy.clone(),
        clock.clone(),
    );
    forgiveness_service.set_notifier(notifier.clone());
    forgiveness_service.set_batch_size(config.scheduler.sweep_batch_size);

    let mut cooldown_service =
        CooldownService::new(penalty_repo, points_repo, policy, clock.clone());
    cooldown_service.set_notifier(notifier.clone());

    let mut missed_pickup_service = MissedPickupService::new(
        reservation_repo,
        penalty_service.clone(),
        config.scheduler.sweep_batch_size,
        clock,
    );
    missed_pickup_service.set_notifier(notifier);

    // Start background jobs
    let scheduler_handles = run_scheduler(
        &SchedulerConfig::from(&config.scheduler),
        Arc::new(ServiceJobExecutor::new(
            missed_pickup_service,
            forgiveness_service.clone(),
        )),
    );

    let rate_limiter = RateLimiterState::new(&config.rate_limit);
    if config.rate_limit.trust_proxy_headers {
        info!("Rate limiting by forwarded client address");
    }
    let cleanup_limiter = rate_limiter.clone();
    let rate_limit_cleanup = tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(300));
        loop {
            interval.tick().await;
            cleanup_limiter.evict_idle().await;
        }
    });

    let state = AppState {
        db,
        reservation_service,
        pickup_service,
        forgiveness_service,
        cooldown_service,
        penalty_service,
        notification_service,
    };

    // Build router
    let app = Router::new()
        .nest("/api", api_router(rate_limiter.clone()))
        .layer(middleware::from_fn_with_state(
            rate_limiter,
            rate_limit_middleware,
        ))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state);

    // Start server with graceful shutdown
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    for handle in scheduler_handles {
        handle.abort();
    }
    rate_limit_cleanup.abort();

    info!("Server shutdown complete");
    Ok(())
}
