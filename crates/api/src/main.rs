use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{info, warn};

use osas_api::app::{self, services};
use osas_infra::config::EngineConfig;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_DAILY_PASS_SECS: u64 = 3600;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    osas_observability::init();

    let config = EngineConfig::load().context("loading engine configuration")?;

    let jwt_secret = std::env::var("JWT_SECRET").unwrap_or_else(|_| {
        warn!("JWT_SECRET not set; using insecure dev default");
        "dev-secret".to_string()
    });
    let bind_addr = std::env::var("OSAS_BIND_ADDR").unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string());
    let daily_pass_secs = match std::env::var("OSAS_DAILY_PASS_INTERVAL_SECS") {
        Ok(raw) => raw
            .parse::<u64>()
            .with_context(|| format!("OSAS_DAILY_PASS_INTERVAL_SECS={raw:?} is not a number"))?,
        Err(_) => DEFAULT_DAILY_PASS_SECS,
    };

    let services = Arc::new(services::build_services(config).await?);
    let scheduler = services::spawn_daily_pass(services.clone(), Duration::from_secs(daily_pass_secs))
        .context("starting daily pass scheduler")?;

    let app = app::build_app_with(jwt_secret, services);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;
    info!(addr = %listener.local_addr()?, daily_pass_secs, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("server error")?;

    info!("shutting down");
    tokio::task::spawn_blocking(move || scheduler.shutdown())
        .await
        .context("stopping daily pass scheduler")?;
    Ok(())
}
