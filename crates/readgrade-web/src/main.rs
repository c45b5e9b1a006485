use env_logger::Env;
use readgrade_core::Config;
use readgrade_web::{AppState, ServerConfig, router};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = Config::load(None)?;
    env_logger::Builder::from_env(Env::default().default_filter_or(&config.log_level)).init();

    let server = ServerConfig::from_env(|key| std::env::var(key).ok())?;
    let state = AppState::from_config(config)?;
    let app = router(state, &server);

    let listener = tokio::net::TcpListener::bind(server.bind_addr()).await?;
    log::info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            log::info!("Shutting down");
        })
        .await?;
    Ok(())
}
