use crate::traits::Ledger;
use crate::types::{PersistedRecord, Result};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Read-only view over the ledger for HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    ledger: Arc<dyn Ledger>,
    max_items: usize,
}

impl AppState {
    pub fn new(ledger: Arc<dyn Ledger>, max_items: usize) -> Self {
        Self { ledger, max_items }
    }

    /// Most recent relevant records, capped at `limit`.
    pub async fn get_relevant(&self, limit: usize) -> Result<Vec<PersistedRecord>> {
        self.ledger.list_recent(true, limit).await
    }
}

#[derive(Debug, Deserialize)]
pub struct ItemsQuery {
    limit: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ItemsResponse {
    pub count: usize,
    pub items: Vec<PersistedRecord>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/items", get(list_items))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn healthz() -> &'static str {
    "ok"
}

async fn list_items(State(state): State<AppState>, Query(query): Query<ItemsQuery>) -> Response {
    // requested limits are clamped to the configured maximum
    let limit = query
        .limit
        .filter(|l| *l > 0)
        .map_or(state.max_items, |l| l.min(state.max_items));

    match state.get_relevant(limit).await {
        Ok(items) => Json(ItemsResponse {
            count: items.len(),
            items,
        })
        .into_response(),
        Err(e) => {
            error!("list relevant failed: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response()
        }
    }
}

/// Serve until `shutdown` resolves, then let in-flight requests finish.
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!("HTTP server listening on {}", addr);
    }
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}
