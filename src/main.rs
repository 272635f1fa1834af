use llm_gateway::api;
use llm_gateway::config::Settings;
use llm_gateway::state::AppState;
use std::net::SocketAddr;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = Settings::from_env()?;
    let addr: SocketAddr = format!("{}:{}", settings.host, settings.port).parse()?;

    let state = AppState::from_settings(settings).await?;
    let app = api::build_router(state);

    tracing::info!(%addr, "llm-gateway listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}
