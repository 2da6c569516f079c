use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

use crate::coordinator::Coordinator;
use crate::error::QtrixError;
use crate::namespace::Namespace;
use crate::scheduler::{Row, StoredWeights};
use crate::store::Store;

/// Read-only view over one store. Nothing served here mutates state.
pub struct DashboardState<S> {
    pub coordinator: Arc<Coordinator<S, StoredWeights<S>>>,
}

impl<S> Clone for DashboardState<S> {
    fn clone(&self) -> Self {
        Self {
            coordinator: self.coordinator.clone(),
        }
    }
}

#[derive(Serialize)]
struct NamespaceResponse {
    current: String,
}

#[derive(Serialize)]
struct MatrixResponse {
    namespace: String,
    rows: Vec<Row>,
}

#[derive(Serialize)]
struct OverrideResponse {
    id: String,
    queues: Vec<String>,
    processes: u32,
    host: Option<String>,
    claims: Vec<String>,
}

#[derive(Serialize)]
struct HostResponse {
    hostname: String,
    slots: u32,
}

#[derive(Serialize)]
struct QueueResponse {
    name: String,
    weight: u64,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

struct ApiError(StatusCode, String);

impl From<QtrixError> for ApiError {
    fn from(e: QtrixError) -> Self {
        let status = match e {
            QtrixError::Validation(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::SERVICE_UNAVAILABLE,
        };
        ApiError(status, e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(ErrorResponse { error: self.1 })).into_response()
    }
}

/// Run a store call off the async workers; the file store blocks on I/O
/// and a lock.
async fn blocking<S, T, F>(state: &DashboardState<S>, f: F) -> Result<T, ApiError>
where
    S: Store + 'static,
    T: Send + 'static,
    F: FnOnce(&Coordinator<S, StoredWeights<S>>) -> crate::error::Result<T> + Send + 'static,
{
    let coordinator = state.coordinator.clone();
    match tokio::task::spawn_blocking(move || f(&coordinator)).await {
        Ok(result) => result.map_err(ApiError::from),
        Err(e) => {
            tracing::error!(error = %e, "Dashboard task failed");
            Err(ApiError(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
        }
    }
}

pub fn router<S: Store + 'static>(state: DashboardState<S>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/namespace", get(namespace_handler::<S>))
        .route("/api/namespaces/:ns/matrix", get(matrix_handler::<S>))
        .route("/api/namespaces/:ns/overrides", get(overrides_handler::<S>))
        .route("/api/namespaces/:ns/hosts", get(hosts_handler::<S>))
        .route("/api/namespaces/:ns/queues", get(queues_handler::<S>))
        .layer(cors)
        .with_state(state)
}

pub async fn run_dashboard<S: Store + 'static>(
    addr: SocketAddr,
    state: DashboardState<S>,
    shutdown: CancellationToken,
) {
    let app = router(state);

    tracing::info!(addr = %addr, "Starting dashboard server");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(addr = %addr, error = %e, "Failed to bind dashboard server");
            return;
        }
    };

    let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
        shutdown.cancelled().await;
    });
    if let Err(e) = serve.await {
        tracing::error!(error = %e, "Dashboard server failed");
    }
    tracing::info!("Dashboard server stopped");
}

async fn namespace_handler<S: Store + 'static>(
    State(state): State<DashboardState<S>>,
) -> Result<Json<NamespaceResponse>, ApiError> {
    let current = blocking(&state, |c| c.namespacing().current(c.store().as_ref())).await?;
    Ok(Json(NamespaceResponse { current }))
}

async fn matrix_handler<S: Store + 'static>(
    State(state): State<DashboardState<S>>,
    Path(ns): Path<String>,
) -> Result<Json<MatrixResponse>, ApiError> {
    let (namespace, rows) = blocking(&state, move |c| {
        let ns = c.namespacing().pin(c.store().as_ref(), &Namespace::from(ns))?;
        let rows = c.matrix.to_table(&ns)?;
        Ok((ns.to_string(), rows))
    })
    .await?;
    Ok(Json(MatrixResponse { namespace, rows }))
}

async fn overrides_handler<S: Store + 'static>(
    State(state): State<DashboardState<S>>,
    Path(ns): Path<String>,
) -> Result<Json<Vec<OverrideResponse>>, ApiError> {
    let records = blocking(&state, move |c| c.overrides.all(ns)).await?;
    Ok(Json(
        records
            .into_iter()
            .map(|r| OverrideResponse {
                id: r.id.to_string(),
                host: r.host().map(str::to_string),
                queues: r.queues,
                processes: r.processes,
                claims: r.claims,
            })
            .collect(),
    ))
}

async fn hosts_handler<S: Store + 'static>(
    State(state): State<DashboardState<S>>,
    Path(ns): Path<String>,
) -> Result<Json<Vec<HostResponse>>, ApiError> {
    let hosts = blocking(&state, move |c| c.hosts.all(ns)).await?;
    Ok(Json(
        hosts
            .into_iter()
            .map(|h| HostResponse {
                hostname: h.hostname,
                slots: h.slots,
            })
            .collect(),
    ))
}

async fn queues_handler<S: Store + 'static>(
    State(state): State<DashboardState<S>>,
    Path(ns): Path<String>,
) -> Result<Json<Vec<QueueResponse>>, ApiError> {
    let queues = blocking(&state, move |c| c.weights().all_queues(ns)).await?;
    Ok(Json(
        queues
            .into_iter()
            .map(|q| QueueResponse {
                name: q.name,
                weight: q.weight,
            })
            .collect(),
    ))
}
