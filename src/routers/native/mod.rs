//! Native routing layer.
//!
//! HTTP/1.x served straight off tokio sockets, without an HTTP library:
//! - `parser`: request head parsing and response encoding
//! - `handler`: per-connection read/dispatch/write loop
//!
//! ## Wire behaviour
//!
//! ```text
//! Request:  GET /ais/buy-milk HTTP/1.1\r\nHost: ...\r\n\r\n
//! Response: HTTP/1.1 200 OK\r\n
//!           Content-Type: application/json\r\n
//!           Content-Length: 62\r\n
//!           Connection: keep-alive\r\n\r\n
//!           {"status":"Hello world from native!","action_item":"buy-milk"}
//! ```
//!
//! Bodies are framed by `Content-Length` only. Keep-alive and pipelining
//! are supported; any parse error answers once and closes.

pub mod handler;
pub mod parser;

pub use handler::handle_connection;

use std::io;
use tokio::net::TcpListener;

use super::{accept_loop, ServeOptions};
use crate::service::EchoService;
use crate::shutdown::Shutdown;

/// Accept connections and run `handle_connection` on each until shutdown.
pub async fn serve(
    listener: TcpListener,
    service: EchoService,
    options: ServeOptions,
    shutdown: Shutdown,
) -> io::Result<()> {
    accept_loop(listener, options.max_connections, shutdown, |stream, shutdown| {
        handle_connection(stream, service.clone(), options.max_body_size, shutdown)
    })
    .await
}
