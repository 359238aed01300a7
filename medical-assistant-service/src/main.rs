use medical_assistant_service::{Config, create_app, telemetry::init_tracing};
use tokio::net::TcpListener;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    init_tracing(&config)?;

    if config.openrouter_api_key.is_none() {
        error!("OPENROUTER_API_KEY not set");
        std::process::exit(1);
    }

    let app = create_app(&config).await?;
    let listener = TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    let addr = listener.local_addr()?;

    info!("Medical assistant service starting on {}", addr);
    info!("Ask endpoint: POST http://{}/ask", addr);
    info!("Health check endpoint: http://{}/health", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
