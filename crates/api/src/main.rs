use std::sync::Arc;

use anyhow::Context;

use coursegen_infra::{GenerationRuntime, RuntimeConfig, RuntimeDeps, http_generator};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    coursegen_observability::init();

    let config = RuntimeConfig::from_env().context("invalid configuration")?;
    let generator = http_generator(&config)?
        .context("GENERATOR_BASE_URL must point at an OpenAI-compatible endpoint")?;
    let deps = RuntimeDeps::connect(&config, generator)
        .await
        .context("failed to connect storage backends")?;

    let runtime = Arc::new(GenerationRuntime::new(&config, deps));
    runtime.start();

    let app = coursegen_api::app::build_app(runtime.clone());
    let listener = tokio::net::TcpListener::bind(&config.http_bind)
        .await
        .with_context(|| format!("failed to bind {}", config.http_bind))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("server stopped accepting connections, draining workers");
    runtime.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to install ctrl-c handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
