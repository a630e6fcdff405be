use axum::{
    Json, Router,
    body::Body,
    extract::{Extension, Path},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::router::service::{CacheRouter, PutError};
use crate::store::types::{Blob, Spool};

/// Forward budget carried on internal peer requests.
pub const HOP_HEADER: &str = "x-cache-hops";

/// Node health/occupancy summary served at `/status`.
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub node_id: String,
    pub view_generation: u64,
    pub alive_members: usize,
    pub entry_count: usize,
    pub occupied_bytes: u64,
}

pub fn app(router: Arc<CacheRouter>) -> Router {
    Router::new()
        .route("/status", get(handle_status))
        .route("/internal/get/:key", get(handle_internal_get))
        .route("/internal/put/:key", post(handle_internal_put))
        .route("/internal/delete/:key", delete(handle_internal_delete))
        .route(
            "/:key",
            get(handle_get).post(handle_put).delete(handle_delete),
        )
        .layer(Extension(router))
}

async fn handle_get(
    Extension(router): Extension<Arc<CacheRouter>>,
    Path(key): Path<String>,
) -> Response {
    match router.get(&key).await {
        Ok(Some(blob)) => blob_response(blob),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            tracing::error!("GET /{} failed: {}", key, e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

async fn handle_put(
    Extension(router): Extension<Arc<CacheRouter>>,
    Path(key): Path<String>,
    body: Body,
) -> Response {
    let spool = match receive_body(&router, body).await {
        Ok(spool) => spool,
        Err(e) => {
            tracing::warn!("PUT /{}: bad request body: {}", key, e);
            return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
        }
    };

    match router.put(&key, spool).await {
        Ok(()) => StatusCode::CREATED.into_response(),
        Err(e) => {
            tracing::error!("PUT /{} failed: {}", key, e);
            put_error_response(e)
        }
    }
}

async fn handle_delete(
    Extension(router): Extension<Arc<CacheRouter>>,
    Path(key): Path<String>,
) -> Response {
    match router.delete(&key).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => {
            tracing::error!("DELETE /{} failed: {}", key, e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

async fn handle_internal_get(
    Extension(router): Extension<Arc<CacheRouter>>,
    Path(key): Path<String>,
    headers: HeaderMap,
) -> Response {
    match router.forward_get(&key, hop_budget(&headers)).await {
        Ok(Some(blob)) => blob_response(blob),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn handle_internal_put(
    Extension(router): Extension<Arc<CacheRouter>>,
    Path(key): Path<String>,
    headers: HeaderMap,
    body: Body,
) -> Response {
    let hops = hop_budget(&headers);
    let spool = match receive_body(&router, body).await {
        Ok(spool) => spool,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };

    match router.forward_put(&key, hops, spool).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => put_error_response(e),
    }
}

async fn handle_internal_delete(
    Extension(router): Extension<Arc<CacheRouter>>,
    Path(key): Path<String>,
) -> Response {
    match router.forward_delete(&key).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn handle_status(Extension(router): Extension<Arc<CacheRouter>>) -> Json<StatusResponse> {
    let view = router.membership().current_view();
    Json(StatusResponse {
        node_id: router.local_node_id().0,
        view_generation: view.generation,
        alive_members: view.alive_count(),
        entry_count: router.store().entry_count(),
        occupied_bytes: router.store().occupied_bytes(),
    })
}

/// Streams a request body into a spool without buffering it whole.
async fn receive_body(router: &CacheRouter, body: Body) -> anyhow::Result<Spool> {
    let mut spool = router.store().spool().await?;
    let mut stream = body.into_data_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        spool.write_chunk(&chunk).await?;
    }
    Ok(spool)
}

fn blob_response(blob: Blob) -> Response {
    let size = blob.size();
    let body = Body::from_stream(blob.into_stream());
    (
        [
            (header::CONTENT_LENGTH, size.to_string()),
            (
                header::CONTENT_TYPE,
                "application/octet-stream".to_string(),
            ),
        ],
        body,
    )
        .into_response()
}

fn put_error_response(error: PutError) -> Response {
    let status = match &error {
        PutError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        PutError::WriteFailed(_) => StatusCode::BAD_GATEWAY,
    };
    (status, error.to_string()).into_response()
}

fn hop_budget(headers: &HeaderMap) -> u32 {
    headers
        .get(HOP_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse().ok())
        .unwrap_or(0)
}
