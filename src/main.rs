use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{error, info};

mod config;
mod dashboard;
mod db;
mod engine;

use config::Config;
use dashboard::AppState;
use db::Database;
use engine::{RecomputeSettings, Recomputer};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise tracing / logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse();
    config.validate()?;

    let db = Database::open(&config.database_path)?;
    info!("Database opened: {}", config.database_path);

    let recomputer = Recomputer::new(RecomputeSettings::from_config(&config), db);
    info!(
        "Ensemble weights ft={:.2} ht={:.2} pt={:.2}, conflict threshold {:.3}, model version {}",
        config.weight_full_time,
        config.weight_half_time,
        config.weight_pattern,
        config.conflict_threshold,
        config.model_version
    );

    if config.once {
        recomputer.tick(Utc::now())?;
        return Ok(());
    }

    let app = dashboard::router(AppState {
        recomputer: recomputer.clone(),
        min_expected_value: config.min_expected_value,
        significance_alpha: config.significance_alpha,
    });
    let addr: SocketAddr = config.dashboard_addr.parse()?;
    info!("Admin API listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Background recompute scheduler
    let freshness_every = Duration::from_secs(config.freshness_interval_secs);
    let crowd_every = Duration::from_secs(config.crowd_interval_secs);
    tokio::spawn(async move {
        let mut freshness_interval = tokio::time::interval(freshness_every);
        let mut crowd_interval = tokio::time::interval(crowd_every);

        loop {
            tokio::select! {
                _ = freshness_interval.tick() => {
                    let now = Utc::now();
                    if let Err(e) = recomputer.recompute_predictions(now) {
                        error!("Error recomputing predictions: {}", e);
                    }
                    if let Err(e) = recomputer.refresh_freshness(now) {
                        error!("Error refreshing freshness scores: {}", e);
                    }
                    if let Err(e) = recomputer.recompute_value_bets(now) {
                        error!("Error recomputing value bets: {}", e);
                    }
                }
                _ = crowd_interval.tick() => {
                    if let Err(e) = recomputer.recompute_all_crowds(Utc::now()) {
                        error!("Error recomputing crowd wisdom: {}", e);
                    }
                }
            }
        }
    });

    // Run API server (blocks until shutdown)
    axum::serve(listener, app).await?;

    Ok(())
}
