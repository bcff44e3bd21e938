use dandani::{digest, load_data, router, AppState, Config};
use std::net::SocketAddr;
use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let config = Config::from_env();
    if let Some(parent) = config.data_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await?;
    }

    let data = load_data(&config.data_path).await;
    info!(
        challenges = data.challenges.len(),
        practices = data.practices.len(),
        feedback = data.feedback.len(),
        events = data.events.len(),
        "data loaded"
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let digest_enabled = config.digest_enabled;
    let state = AppState::new(config, data);

    let shutdown = CancellationToken::new();
    let scheduler = digest_enabled.then(|| digest::spawn_scheduler(state.clone(), shutdown.clone()));

    let app = router(state);
    info!("listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    shutdown.cancel();
    if let Some(scheduler) = scheduler {
        let _ = scheduler.await;
    }

    Ok(())
}

async fn shutdown_signal(token: CancellationToken) {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("shutdown requested"),
        _ = token.cancelled() => {}
    }
    token.cancel();
}
