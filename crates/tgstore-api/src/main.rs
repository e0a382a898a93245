use tgstore_api::setup;
use tgstore_core::Config;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let config = Config::from_env()?;

    tgstore_infra::init_telemetry(
        config.base.log_format,
        env!("CARGO_PKG_NAME"),
        &config.base.environment,
    )
    .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {}", e))?;

    config.validate()?;

    let app = setup::initialize_app(&config).await?;
    let router = app.router.clone();

    let served = setup::server::start_server(&config, router).await;
    app.shutdown().await;
    served
}
