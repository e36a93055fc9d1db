//! HTTP surface: the event stream over SSE plus document and credential routes.

mod error;
mod routes;
mod sse;
mod state;

use std::net::SocketAddr;

use axum::Router;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::error::Result;

pub use error::HttpError;
pub use routes::{
    DocumentBody, ModelsResponse, RenameRequest, SaveModelsRequest, SaveRequest, TokenRequest, TokenStatus,
};
pub use sse::GenerateQuery;
pub use state::{AppState, ClientFactory, FixedClient, OpenRouterFactory};

/// Full application with CORS
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    routes::router().layer(cors).with_state(state)
}

/// Serve until `shutdown` fires. The active run is stopped on shutdown.
pub async fn serve(state: AppState, addr: SocketAddr, shutdown: CancellationToken) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "listening");

    let stopper = state.clone();
    axum::serve(listener, app(state))
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
            stopper.stop_run();
        })
        .await?;
    Ok(())
}
