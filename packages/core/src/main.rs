use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use dotenvy::dotenv;
use tokio::signal;

use title_rotator::api;
use title_rotator::api::tests::TestsApiState;
use title_rotator::cli::Cli;
use title_rotator::config::Config;
use title_rotator::credentials::{CredentialBroker, SqliteCredentialStore};
use title_rotator::db;
use title_rotator::gateway::{PlatformGateway, QuotaTracker, RateLimitedGateway, RetryPolicy};
use title_rotator::logging::init_logging;
use title_rotator::metrics::AppMetrics;
use title_rotator::repository::TestRepository;
use title_rotator::rotation::executor::RotationExecutor;
use title_rotator::rotation::poller::{AnalyticsPoller, PollCadence};
use title_rotator::scheduler::Scheduler;
use title_rotator::services::platform::PlatformClient;

#[tokio::main]
async fn main() {
    dotenv().ok();
    init_logging();

    let cli = Cli::parse();
    let mut config = Config::from_env().unwrap_or_else(|err| {
        tracing::error!("Config error: {}", err);
        std::process::exit(1);
    });
    if let Some(database_url) = cli.database_url {
        config.database_url = database_url;
    }
    if let Some(bind_addr) = cli.bind_addr {
        config.bind_addr = bind_addr;
    }
    if let Some(platform_url) = cli.platform_url {
        config.platform_api_url = platform_url;
    }
    if let Some(poll_interval) = cli.poll_interval {
        config.poll_interval_minutes = poll_interval;
    }

    let pool = match db::create_pool(&config.database_url).await {
        Ok(pool) => pool,
        Err(err) => {
            tracing::error!("Failed to open database {}: {}", config.database_url, err);
            std::process::exit(1);
        }
    };

    let metrics = match AppMetrics::new() {
        Ok(metrics) => Arc::new(metrics),
        Err(err) => {
            tracing::error!("Failed to register metrics: {}", err);
            std::process::exit(1);
        }
    };

    let repo = Arc::new(TestRepository::new(pool.clone()));
    let credential_store = Arc::new(SqliteCredentialStore::new(
        pool,
        config.platform_token_url.clone(),
    ));
    let broker = Arc::new(CredentialBroker::new(credential_store));
    let quota = Arc::new(QuotaTracker::new(
        config.daily_quota_budget,
        config.quota_reset_hour_utc,
    ));
    let gateway: Arc<dyn PlatformGateway> = Arc::new(RateLimitedGateway::new(
        PlatformClient::new(config.platform_api_url.clone()),
        broker,
        quota.clone(),
        RetryPolicy::default(),
    ));

    let executor = Arc::new(RotationExecutor::new(
        repo.clone(),
        gateway.clone(),
        metrics.clone(),
    ));
    let poller = Arc::new(AnalyticsPoller::new(
        repo.clone(),
        gateway,
        metrics.clone(),
    ));
    let cadence = PollCadence {
        active: Duration::from_secs(config.poll_interval_minutes * 60),
        idle: Duration::from_secs(config.idle_poll_interval_minutes * 60),
    };
    let scheduler = Arc::new(Scheduler::new(
        repo.clone(),
        executor,
        poller,
        cadence,
        metrics.clone(),
    ));

    // Re-arm whatever was running before the last shutdown.
    if let Err(err) = scheduler.resume_active_tests().await {
        tracing::error!("Failed to resume active tests from storage: {}", err);
    }

    let sweep = scheduler
        .clone()
        .spawn_sweep(Duration::from_secs(config.sweep_interval_minutes * 60));

    // Keep the quota gauge in step with the shared tracker.
    let quota_gauge = {
        let metrics = metrics.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_secs(60)).await;
                metrics.quota_used.set(quota.used() as f64);
            }
        })
    };

    let state = Arc::new(TestsApiState::new(repo, scheduler.clone()));
    let app = api::build_router(state, metrics);

    let listener = match tokio::net::TcpListener::bind(&config.bind_addr).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!("Failed to bind {}: {}", config.bind_addr, err);
            std::process::exit(1);
        }
    };
    tracing::info!("HTTP API listening on {}", config.bind_addr);

    let serve_result = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            signal::ctrl_c().await.ok();
            tracing::info!("Shutdown signal received");
        })
        .await;

    sweep.abort();
    quota_gauge.abort();
    scheduler.shutdown();

    if let Err(err) = serve_result {
        tracing::error!("HTTP server error: {}", err);
        std::process::exit(1);
    }
    tracing::info!("Title rotator stopped cleanly");
}
