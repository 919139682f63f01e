mod collections;
mod problem;
mod router;
mod telemetry;
mod transfer;

#[cfg(test)]
mod test_support;

use std::net::SocketAddr;

use collections_storage::Database;
use collections_util::{load_env_file, AppConfig};
use tracing::info;

const DEMO_COMPANY_COUNT: usize = 1_000;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    load_env_file();
    let config = AppConfig::from_env()?;

    telemetry::init_tracing(&config)?;
    let metrics = telemetry::init_metrics()?;

    let database = Database::connect(&config.database_url).await?;
    database.run_migrations().await?;
    if config.seed_demo_data {
        database
            .seed_demo_data(DEMO_COMPANY_COUNT, chrono::Utc::now())
            .await?;
    }

    let (state, transfer_worker) = router::AppState::new(metrics, database, config.transfer);
    transfer_worker.spawn();

    let addr: SocketAddr = config.bind_addr;
    info!(
        stage = "app",
        %addr,
        env = %config.environment.as_str(),
        batch_size = config.transfer.batch_size,
        max_concurrent_jobs = config.transfer.max_concurrent_jobs,
        "starting HTTP server"
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router::app_router(state))
        .await
        .map_err(|err| err.into())
}
