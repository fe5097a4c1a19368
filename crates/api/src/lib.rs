mod auth;
pub mod routes;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use common::Result;
use engine::{EngineHandle, StrategyControl};
use paper::Ledger;
use strategy::StrategyRegistry;

/// Shared application state injected into every route handler.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<StrategyRegistry>,
    pub ledger: Arc<Ledger>,
    pub engine: EngineHandle,
    /// Operator pause, activate and retire.
    pub control: StrategyControl,
    /// Protected routes answer 401 while no token is configured.
    pub dashboard_token: Option<String>,
    /// Threshold used to flag depleted accounts.
    pub min_trade_size: f64,
}

/// Build the inspection router.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_headers(Any)
        .allow_methods(Any);

    Router::new()
        .merge(routes::api_router(state.clone()))
        .merge(routes::health_router())
        .with_state(state)
        .layer(cors)
}

/// Serve the inspection API until `shutdown` flips to `true`.
pub async fn serve(state: AppState, port: u16, mut shutdown: watch::Receiver<bool>) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "Inspection API listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            while !*shutdown.borrow() {
                if shutdown.changed().await.is_err() {
                    break;
                }
            }
        })
        .await?;
    info!("Inspection API stopped");
    Ok(())
}
