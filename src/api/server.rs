use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    routing::{delete, get, post},
};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use super::{
    services::{cancel_task, clear_completed, events, get_task, health, list_tasks, submit_task},
    state::AppState,
};
use crate::config::Config;
use crate::messaging::BroadcastSink;
use crate::tasks::TaskService;

type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/tasks", post(submit_task).get(list_tasks))
        .route("/api/tasks/completed", delete(clear_completed))
        .route("/api/tasks/{id}", get(get_task))
        .route("/api/tasks/{id}/cancel", post(cancel_task))
        .route("/api/events", get(events))
        .route("/health", get(health))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Start the task service and serve the API until Ctrl+C or SIGTERM
///
/// `address` overrides `server.bind_addr`.
pub async fn run(address: Option<SocketAddr>, config: Config) -> Result<(), AnyError> {
    let address = address.unwrap_or(config.server.bind_addr);

    let events = BroadcastSink::new(config.server.event_buffer);
    let (service, handle) = TaskService::builder(&config)
        .sink(Arc::new(events.clone()))
        .start()
        .map_err(|e| format!("Failed to start task service: {}", e))?;

    let state = AppState::new(config, service, events);
    let shutdown = state.shutdown.clone();
    let app = build_router(state);

    let listener = TcpListener::bind(address).await?;
    info!(%address, "taskbox API listening");

    let served = axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            shutdown.cancel();
        })
        .await;

    if !handle.shutdown_timeout(SHUTDOWN_GRACE).await {
        warn!(grace = ?SHUTDOWN_GRACE, "Task service did not stop in time");
    }

    served?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
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

    info!("Shutdown signal received");
}
