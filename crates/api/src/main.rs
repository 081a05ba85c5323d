use anyhow::Context;

use taller_api::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env().context("invalid configuration")?;
    taller_observability::init(config.log_format);

    let services = taller_api::app::services::AppServices::in_memory(config.service_config());
    let _sweeper = services.spawn_idempotency_sweeper(config.idempotency_sweep_interval());
    let app = taller_api::app::build_app(services);

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!(
        addr = %listener.local_addr()?,
        lock_timeout_ms = config.lock_timeout.as_millis() as u64,
        idempotency_ttl_secs = config.idempotency_ttl.as_secs(),
        "listening"
    );

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
