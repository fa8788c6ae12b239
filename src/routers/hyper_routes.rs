//! hyper routing layer.
//!
//! Plain hyper 1.x HTTP/1 connections; requests are matched with the shared
//! route table in `routes` and answered through `service_fn`. hyper itself
//! drops the body of replies to `HEAD`.

use bytes::Bytes;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::{Body, Incoming};
use hyper::header::{HeaderValue, ALLOW, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::io;
use tokio::net::{TcpListener, TcpStream};
use tracing::debug;

use super::routes::{self, Route};
use super::{accept_loop, ServeOptions};
use crate::service::{EchoService, Reply};
use crate::shutdown::Shutdown;

/// Accept connections and serve each with hyper until shutdown.
pub async fn serve(
    listener: TcpListener,
    service: EchoService,
    options: ServeOptions,
    shutdown: Shutdown,
) -> io::Result<()> {
    accept_loop(listener, options.max_connections, shutdown, |stream, shutdown| {
        serve_connection(stream, service.clone(), options.max_body_size, shutdown)
    })
    .await
}

async fn serve_connection(
    stream: TcpStream,
    service: EchoService,
    max_body_size: usize,
    mut shutdown: Shutdown,
) -> io::Result<()> {
    let io = TokioIo::new(stream);
    let handler = service_fn(move |request: Request<Incoming>| {
        let service = service.clone();
        async move { Ok::<_, Infallible>(handle(&service, request, max_body_size).await) }
    });

    let connection = http1::Builder::new().serve_connection(io, handler);
    tokio::pin!(connection);

    let result = tokio::select! {
        result = connection.as_mut() => result,
        _ = shutdown.wait() => {
            connection.as_mut().graceful_shutdown();
            connection.await
        }
    };
    result.map_err(io::Error::other)
}

/// Route one request and render the echo service's reply.
pub async fn handle<B>(
    service: &EchoService,
    request: Request<B>,
    max_body_size: usize,
) -> Response<Full<Bytes>>
where
    B: Body,
    B::Error: std::error::Error + Send + Sync + 'static,
{
    let route = routes::resolve(request.method().as_str(), request.uri().path());
    let reply = match route {
        Route::Get(ai) => service.get(ai),
        Route::Post => {
            let body = request.into_body();
            if body.size_hint().lower() > max_body_size as u64 {
                Reply::empty(StatusCode::PAYLOAD_TOO_LARGE)
            } else {
                match Limited::new(body, max_body_size).collect().await {
                    Ok(collected) => service.post(&collected.to_bytes()),
                    Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
                        Reply::empty(StatusCode::PAYLOAD_TOO_LARGE)
                    }
                    Err(e) => {
                        debug!(error = %e, "Failed to read request body");
                        Reply::empty(StatusCode::BAD_REQUEST)
                    }
                }
            }
        }
        Route::MethodNotAllowed(allow) => {
            let mut response = into_response(Reply::empty(StatusCode::METHOD_NOT_ALLOWED));
            response
                .headers_mut()
                .insert(ALLOW, HeaderValue::from_static(allow));
            return response;
        }
        Route::BadPath => Reply::empty(StatusCode::BAD_REQUEST),
        Route::NotFound => Reply::empty(StatusCode::NOT_FOUND),
    };
    into_response(reply)
}

fn into_response(reply: Reply) -> Response<Full<Bytes>> {
    let content_type = reply.content_type();
    let mut response = Response::new(Full::new(reply.body.unwrap_or_default()));
    *response.status_mut() = reply.status;
    if let Some(content_type) = content_type {
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    }
    response
}
