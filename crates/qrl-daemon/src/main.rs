//! qrl-daemon entry point.
//!
//! Thin by design: read the environment, construct every service, spawn
//! the background workers, and serve HTTP. All route handlers live in
//! `routes.rs`; all shared state in `state.rs`.
//!
//! Exit codes: 0 normal shutdown, 1 startup failure, 2 fatal runtime error
//! after startup.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{error, info, Level};

use qrl_alerts::{
    spawn_delivery_hub, AlertService, EmailChannel, HubConfig, NotificationChannel, PgAlertStore,
    RoutingConfig, WebhookChannel,
};
use qrl_audit::{AuditService, RedactionRules};
use qrl_broker::{BrokerAdapter, PaperBroker, PaperBrokerConfig, PaperMarketData};
use qrl_config::{CoreConfig, EnvSettings, TradeEnv};
use qrl_daemon::{health, ports, routes, sweeps, state::AppState, wiring};
use qrl_db::audit_store::PgAuditStore;
use qrl_db::stream::{EventStream, MemoryStream, RedisStream};
use qrl_orders::{run_order_manager, FillIngress, OrderManager, PgOrderStore};
use qrl_outbox::{run_outbox_cleaner, run_outbox_worker, OutboxWorker, PgCloseAccess, PgOutboxAccess};
use qrl_reconcile::{NoopLock, PgAdvisoryLock, ReconcileService};
use qrl_risk::RiskEngine;
use qrl_state::{ModeMachine, StateBus, TradingStateManager};

const ACCOUNT_ID: &str = "primary";
const IDEMPOTENCY_TTL_HOURS: i64 = 24;

#[tokio::main]
async fn main() {
    // Dev convenience; production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");
    init_tracing();

    let running = match startup().await {
        Ok(running) => running,
        Err(err) => {
            error!(error = ?err, "startup failed");
            std::process::exit(1);
        }
    };

    if let Err(err) = serve(running).await {
        error!(error = ?err, "fatal runtime error");
        std::process::exit(2);
    }

    info!("shutdown complete");
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

struct Running {
    router: axum::Router,
    addr: SocketAddr,
    shutdown_tx: tokio::sync::watch::Sender<bool>,
}

async fn startup() -> Result<Running> {
    let env = EnvSettings::from_env().context("environment contract")?;
    let config = load_config()?;
    let now = Utc::now();

    // --- persistence -------------------------------------------------------
    let pool = qrl_db::connect(&env.db_url).await?;
    qrl_db::migrate(&pool).await?;

    let stream: Arc<dyn EventStream> = match &env.redis_url {
        Some(url) => Arc::new(RedisStream::connect(url).await?),
        None => Arc::new(MemoryStream::new()),
    };

    // --- broker ------------------------------------------------------------
    let (broker, market_data) = match env.trade_env {
        TradeEnv::Simulate => {
            let broker = Arc::new(PaperBroker::new(PaperBrokerConfig::default()));
            let market_data = Arc::new(PaperMarketData::new());
            (broker, market_data)
        }
        TradeEnv::Prod => {
            // Venue adapters are external collaborators; the core ships only
            // the simulated broker.
            bail!("TRADE_ENV=PROD requires a venue broker adapter; none is configured");
        }
    };

    // --- services ----------------------------------------------------------
    let bus = StateBus::new(config.degradation.bus_capacity);

    let audit = Arc::new(AuditService::new(
        Arc::new(PgAuditStore::new(pool.clone())),
        RedactionRules::default(),
    ));
    let audit_tx = qrl_audit::spawn_batch_writer(Arc::clone(&audit), 512);

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.alerts.delivery_timeout_secs))
        .build()
        .context("http client")?;
    let mut channels: BTreeMap<String, Arc<dyn NotificationChannel>> = BTreeMap::new();
    channels.insert("webhook".into(), Arc::new(WebhookChannel::new(http.clone())));
    channels.insert(
        "email".into(),
        Arc::new(EmailChannel::new(http, env.email_gateway.clone())),
    );
    let alert_store = Arc::new(PgAlertStore::new(pool.clone()));
    let hub = spawn_delivery_hub(
        alert_store.clone(),
        RoutingConfig::default(),
        env.alert_destinations.clone(),
        channels,
        HubConfig {
            workers: config.alerts.workers,
            max_in_flight: config.alerts.max_in_flight,
            delivery_timeout: Duration::from_secs(config.alerts.delivery_timeout_secs),
            queue_capacity: config.alerts.queue_capacity,
        },
    );
    let alerts = Arc::new(AlertService::new(alert_store, Some(hub)));

    // --- order lifecycle ---------------------------------------------------
    let (ingress, fill_rx) = FillIngress::new(1024);
    broker.subscribe_fills(ingress.as_callback());
    let order_manager = OrderManager::new(
        Arc::clone(&broker),
        Arc::new(PgOrderStore::new(pool.clone())),
        Arc::new(pool.clone()),
        Arc::clone(&stream),
        ACCOUNT_ID,
        env.timeouts.broker,
    );
    let orders = run_order_manager(order_manager, fill_rx, 256);

    // --- outbox workers ----------------------------------------------------
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let outbox_access = Arc::new(PgOutboxAccess::new(pool.clone()));
    let worker = Arc::new(OutboxWorker::new(
        outbox_access.clone(),
        Arc::new(PgCloseAccess::new(pool.clone())),
        market_data.clone(),
        Arc::new(wiring::OrderManagerSubmitter::new(orders.clone())),
        config.outbox.clone(),
        env.timeouts.market_data,
    ));
    for _ in 0..config.outbox.workers.max(1) {
        run_outbox_worker(
            Arc::clone(&worker),
            Duration::from_secs(config.outbox.poll_interval_secs),
            shutdown_rx.clone(),
        );
    }
    run_outbox_cleaner(
        outbox_access,
        config.outbox.retention_days,
        Duration::from_secs(3600),
        shutdown_rx.clone(),
    );

    // --- reconciliation ----------------------------------------------------
    let lock: Arc<dyn qrl_reconcile::LockProvider> = if config.reconcile.distributed {
        Arc::new(PgAdvisoryLock::new(pool.clone()))
    } else {
        Arc::new(NoopLock)
    };
    let reconciler = Arc::new(ReconcileService::new(
        Arc::new(wiring::PgPortfolioView::new(pool.clone(), ACCOUNT_ID)),
        Arc::clone(&broker),
        Arc::new(pool.clone()),
        Arc::clone(&stream),
        lock,
        config.reconcile.clone(),
        ACCOUNT_ID,
        hostname(),
    ));

    // --- app state + router ------------------------------------------------
    let mut risk = RiskEngine::new(config.risk.clone());
    risk.set_governance(config.governance.clone());

    let app = AppState::new(
        TradingStateManager::new(now),
        ModeMachine::new(config.degradation.clone(), now),
        risk,
        Arc::clone(&audit),
        Arc::clone(&alerts),
        bus,
        Arc::new(ports::PgClosePosition::new(
            pool.clone(),
            config.outbox.max_retries,
        )),
        Arc::new(ports::PgIdempotency::new(pool.clone(), IDEMPOTENCY_TTL_HOURS)),
        Arc::new(wiring::BrokerEmergency::new(
            pool.clone(),
            Arc::clone(&broker),
            ACCOUNT_ID,
            config.outbox.max_retries,
        )),
    );

    // --- background sweeps -------------------------------------------------
    let checkers: Vec<Arc<dyn health::ComponentChecker>> = vec![
        Arc::new(health::DatabaseChecker::new(pool.clone())),
        Arc::new(health::BrokerChecker::new(Arc::clone(&broker), ACCOUNT_ID)),
    ];
    health::spawn_health_monitor(checkers, app.clone(), Duration::from_secs(15));
    sweeps::spawn_reconcile_tick(
        reconciler,
        Arc::clone(&alerts),
        Duration::from_secs(config.reconcile.interval_secs),
    );
    sweeps::spawn_discrepancy_subscriber(Arc::clone(&stream), app.clone());
    sweeps::spawn_state_audit_subscriber(app.bus.subscribe(), audit_tx);
    sweeps::spawn_audit_integrity_sweep(app.clone(), Duration::from_secs(300));
    sweeps::spawn_expiry_sweep(
        pool.clone(),
        Arc::clone(&alerts),
        ACCOUNT_ID.to_string(),
        Duration::from_secs(6 * 3600),
    );
    sweeps::spawn_idempotency_purge(pool.clone(), Duration::from_secs(3600));
    sweeps::spawn_signal_consumer(
        Arc::clone(&stream),
        app.clone(),
        orders,
        pool.clone(),
        ACCOUNT_ID.to_string(),
        None, // Greeks gate installs when a pricing collaborator is wired
    );

    let router = routes::build_router(Arc::new(app))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors_localhost_only());

    let addr = bind_addr_from_env().unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 8710)));
    Ok(Running {
        router,
        addr,
        shutdown_tx,
    })
}

async fn serve(running: Running) -> Result<()> {
    info!("qrl-daemon listening on http://{}", running.addr);
    let listener = tokio::net::TcpListener::bind(running.addr)
        .await
        .context("bind failed")?;

    axum::serve(listener, running.router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server crashed")?;

    // Let workers finish their in-flight rows.
    let _ = running.shutdown_tx.send(true);
    tokio::time::sleep(Duration::from_millis(200)).await;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}

fn load_config() -> Result<CoreConfig> {
    let mut paths: Vec<&str> = Vec::new();
    for candidate in ["config/base.yaml", "config/local.yaml"] {
        if std::path::Path::new(candidate).exists() {
            paths.push(candidate);
        }
    }
    if paths.is_empty() {
        return Ok(CoreConfig::default());
    }
    let loaded = qrl_config::load_layered_yaml(&paths)?;
    info!(config_hash = %loaded.config_hash, "configuration loaded");
    qrl_config::typed_config(&loaded)
}

fn bind_addr_from_env() -> Option<SocketAddr> {
    std::env::var("QRL_DAEMON_ADDR").ok()?.parse().ok()
}

fn hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "instance-1".to_string())
}

/// CORS: allow only localhost origins.
fn cors_localhost_only() -> CorsLayer {
    let allowed_origins = [
        "http://localhost",
        "http://127.0.0.1",
        "http://localhost:3000",
        "http://127.0.0.1:3000",
        "http://localhost:5173",
        "http://127.0.0.1:5173",
    ];

    let origins: Vec<axum::http::HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| axum::http::HeaderValue::from_str(o).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
        .allow_headers(tower_http::cors::Any)
}
