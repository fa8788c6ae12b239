//! axum routing layer.
//!
//! # Routes
//!
//! - `GET  /ais/{ai}` - echo the path segment
//! - `GET  /ais/`     - echo the empty segment
//! - `POST /ais`      - echo the `ai` field of the JSON body
//!
//! `get` routes answer `HEAD` as well, with the body stripped.
//!
//! The body is taken as raw `Bytes` rather than through `Json`, so that a
//! malformed body is answered by the echo service (empty 400) instead of by
//! axum's own rejection. Extractor rejections are rendered as empty replies
//! too.

use axum::{
    body::Bytes,
    extract::{
        rejection::{BytesRejection, PathRejection},
        DefaultBodyLimit, Path, State,
    },
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use std::io;
use tokio::net::TcpListener;
use tracing::debug;

use super::ServeOptions;
use crate::service::{EchoService, Reply, JSON_CONTENT_TYPE};
use crate::shutdown::Shutdown;

/// Build the axum router with both echo routes.
pub fn app_router(service: EchoService, max_body_size: usize) -> Router {
    Router::new()
        .route("/ais", post(create_handler))
        .route("/ais/", get(empty_segment_handler))
        .route("/ais/{ai}", get(get_handler))
        .layer(DefaultBodyLimit::max(max_body_size))
        .with_state(service)
}

/// Serve the router until shutdown, letting in-flight requests finish.
pub async fn serve(
    listener: TcpListener,
    service: EchoService,
    options: ServeOptions,
    mut shutdown: Shutdown,
) -> io::Result<()> {
    let app = app_router(service, options.max_body_size);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.wait().await })
        .await
}

/// GET /ais/{ai}
async fn get_handler(
    State(service): State<EchoService>,
    ai: Result<Path<String>, PathRejection>,
) -> Response {
    match ai {
        Ok(Path(ai)) => into_response(service.get(ai)),
        Err(rejection) => reject(rejection.status()),
    }
}

/// GET /ais/
async fn empty_segment_handler(State(service): State<EchoService>) -> Response {
    into_response(service.get(String::new()))
}

/// POST /ais
async fn create_handler(
    State(service): State<EchoService>,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    match body {
        Ok(body) => into_response(service.post(&body)),
        Err(rejection) => reject(rejection.status()),
    }
}

fn reject(status: StatusCode) -> Response {
    debug!(status = %status, "Rejected request");
    into_response(Reply::empty(status))
}

fn into_response(reply: Reply) -> Response {
    match reply.body {
        Some(body) => (
            reply.status,
            [(header::CONTENT_TYPE, JSON_CONTENT_TYPE)],
            body,
        )
            .into_response(),
        None => reply.status.into_response(),
    }
}
