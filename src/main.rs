use chrono::Utc;
use furriyadh_keeper::config::Config;
use furriyadh_keeper::db::CredentialsStorage;
use furriyadh_keeper::router::{KeeperState, keeper_router};
use furriyadh_keeper::service::{Sweeper, credential_loader};
use mimalloc::MiMalloc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let cfg = Config::load()?;

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cfg.loglevel.clone()));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_level(true)
                .with_target(false),
        )
        .init();

    info!(
        database_url = %cfg.database_url,
        proxy = %cfg.proxy.as_ref().map(|u| u.as_str()).unwrap_or("<none>"),
        loglevel = %cfg.loglevel,
        token_url = %cfg.google.token_url,
        lookahead_secs = cfg.sweep.lookahead_secs,
        always_refresh = cfg.bridge.always_refresh,
    );
    if cfg.google.client_id.is_empty() || cfg.google.client_secret.is_empty() {
        warn!("google.client_id / google.client_secret not configured; every refresh will fail");
    }
    if cfg.app_key.is_empty() || cfg.cron_secret.is_empty() {
        warn!("app_key / cron_secret not configured; protected routes will reject every request");
    }

    let storage = CredentialsStorage::connect(&cfg.database_url, 5).await?;

    if let Some(cred_path) = cfg.cred_path.as_ref() {
        match credential_loader::load_from_dir(cred_path, Utc::now()) {
            Ok(records) if !records.is_empty() => {
                info!(
                    path = %cred_path.display(),
                    count = records.len(),
                    "importing credentials loaded from filesystem"
                );
                for record in &records {
                    if let Err(e) = storage.upsert(record).await {
                        warn!(subject = %record.subject_id, error = %e, "credential import failed");
                    }
                }
            }
            Ok(_) => {
                info!(path = %cred_path.display(), "no credential files discovered");
            }
            Err(e) => {
                warn!(
                    path = %cred_path.display(),
                    error = %e,
                    "failed to load credentials from directory"
                );
            }
        }
    }

    let listen_addr = cfg.listen_addr.clone();
    let interval_secs = cfg.sweep.interval_secs;
    let state = KeeperState::new(cfg, storage).await?;

    if let Some(secs) = interval_secs.filter(|s| *s > 0) {
        spawn_sweep_schedule(state.sweeper.clone(), Duration::from_secs(secs));
    }

    let app = keeper_router(state);
    let listener = TcpListener::bind(&listen_addr).await?;
    info!("HTTP server listening on {}", listen_addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

fn spawn_sweep_schedule(sweeper: Sweeper, period: Duration) {
    info!(period_secs = period.as_secs(), "in-process token sweep scheduled");
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            if let Err(e) = sweeper.sweep(Utc::now()).await {
                error!("scheduled token sweep failed: {}", e);
            }
        }
    });
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
