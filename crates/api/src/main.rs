use anyhow::Context;

use cornucopia_infra::LedgerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cornucopia_observability::init();

    let config = LedgerConfig::from_env().context("failed to load configuration")?;
    if config.api_keys.is_empty() {
        tracing::warn!("API_KEYS not set; API key authentication is disabled");
    }

    let services = cornucopia_api::app::services::build_services(&config)
        .await
        .context("failed to initialise ledger storage")?;
    let app = cornucopia_api::app::build_app(services, config.api_keys.clone());

    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;
    Ok(())
}
