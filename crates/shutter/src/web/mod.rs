//! Web server module: axum HTTP front end for the archive service.
//!
//! - `GET /stream?stream_time=<id>[&offset=<n> | &frame_time=<t>...]`: archive
//! - `DELETE /stream?stream_time=<id>`: delete one stream
//! - `GET /streams`: list stored streams (JSON)
//! - `DELETE /streams`: delete every stream

pub mod params;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::{ArchiveError, ArchiveService, StreamId};
use params::{stream_id_from_pairs, StreamQuery, ValidationError};

type Params = Query<Vec<(String, String)>>;

/// Build the HTTP router for `service`
pub fn router(service: Arc<ArchiveService>) -> Router {
    Router::new()
        .route("/stream", get(get_stream).delete(delete_stream))
        .route("/streams", get(list_streams).delete(delete_streams))
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}

/// Start the web server and run until `shutdown` resolves.
pub async fn start<F>(service: Arc<ArchiveService>, bind: SocketAddr, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .context(format!("Failed to bind to {}", bind))?;

    info!("Web server listening on http://{}", bind);

    axum::serve(listener, router(service))
        .with_graceful_shutdown(shutdown)
        .await
        .context("Web server error")?;

    Ok(())
}

fn pairs(params: &[(String, String)]) -> impl Iterator<Item = (&str, &str)> {
    params.iter().map(|(k, v)| (k.as_str(), v.as_str()))
}

/// GET /stream: archive of the selected frames
async fn get_stream(
    State(service): State<Arc<ArchiveService>>,
    Query(params): Params,
) -> Response {
    let query = match StreamQuery::from_pairs(pairs(&params)) {
        Ok(query) => query,
        Err(e) => return bad_request(e),
    };

    match service.open_archive(query.stream, &query.criterion).await {
        Ok(archive) => {
            let len = archive.encoded_len();
            (
                StatusCode::OK,
                [
                    (header::CONTENT_TYPE, "application/octet-stream".to_string()),
                    (header::CONTENT_LENGTH, len.to_string()),
                ],
                Body::from_stream(archive),
            )
                .into_response()
        }
        Err(e) => failure(query.stream, e),
    }
}

/// DELETE /stream: remove one stream
async fn delete_stream(
    State(service): State<Arc<ArchiveService>>,
    Query(params): Params,
) -> Response {
    let stream = match stream_id_from_pairs(pairs(&params)) {
        Ok(stream) => stream,
        Err(e) => return bad_request(e),
    };

    match service.delete_stream(stream).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => failure(stream, e),
    }
}

/// GET /streams: stored streams with frame counts
async fn list_streams(State(service): State<Arc<ArchiveService>>) -> Response {
    match service.list_streams().await {
        Ok(streams) => Json(streams).into_response(),
        Err(e) => {
            error!(error = %e, "Failed to list streams");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// DELETE /streams: remove everything
async fn delete_streams(State(service): State<Arc<ArchiveService>>) -> StatusCode {
    service.delete_all().await;
    StatusCode::NO_CONTENT
}

fn bad_request(e: ValidationError) -> Response {
    (StatusCode::BAD_REQUEST, e.to_string()).into_response()
}

fn failure(stream: StreamId, e: ArchiveError) -> Response {
    match e {
        ArchiveError::StreamNotFound(_) => StatusCode::NOT_FOUND.into_response(),
        e => {
            error!(stream = %stream, error = %e, "Storage failure");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
