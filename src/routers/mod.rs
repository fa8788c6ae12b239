//! Routing layers.
//!
//! Each layer mounts the same `EchoService` on a different HTTP stack:
//! - `axum`: axum `Router` with path extractors
//! - `hyper`: hyper 1.x connections with the shared route table
//! - `native`: in-crate HTTP/1.1 parser over raw tokio sockets
//!
//! All layers take an already-bound listener, so bind failures surface in
//! the supervisor before any layer starts serving.

pub mod axum_routes;
pub mod hyper_routes;
pub mod native;
pub mod routes;

use crate::service::EchoService;
use crate::shutdown::Shutdown;
use serde::Deserialize;
use std::future::Future;
use std::io;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tracing::{debug, error, trace};

/// Available routing layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RouterKind {
    Axum,
    Hyper,
    Native,
}

impl RouterKind {
    /// Every layer, in default port order.
    pub const ALL: [RouterKind; 3] = [RouterKind::Axum, RouterKind::Hyper, RouterKind::Native];

    pub fn name(self) -> &'static str {
        match self {
            RouterKind::Axum => "axum",
            RouterKind::Hyper => "hyper",
            RouterKind::Native => "native",
        }
    }

    /// Position used to derive a port from the base port.
    pub fn port_offset(self) -> u16 {
        match self {
            RouterKind::Axum => 0,
            RouterKind::Hyper => 1,
            RouterKind::Native => 2,
        }
    }

    pub fn default_greeting(self) -> String {
        format!("Hello world from {}!", self.name())
    }
}

impl std::fmt::Display for RouterKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Limits applied by every layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServeOptions {
    /// Concurrent connections per listener (`hyper` and `native`).
    pub max_connections: u32,
    /// Largest accepted request body in bytes.
    pub max_body_size: usize,
}

impl Default for ServeOptions {
    fn default() -> Self {
        Self {
            max_connections: 10_000,
            max_body_size: 1024 * 1024,
        }
    }
}

/// Serve `service` on `listener` with the chosen layer until shutdown.
pub async fn serve(
    kind: RouterKind,
    listener: TcpListener,
    service: EchoService,
    options: ServeOptions,
    shutdown: Shutdown,
) -> io::Result<()> {
    match kind {
        RouterKind::Axum => axum_routes::serve(listener, service, options, shutdown).await,
        RouterKind::Hyper => hyper_routes::serve(listener, service, options, shutdown).await,
        RouterKind::Native => native::serve(listener, service, options, shutdown).await,
    }
}

/// Accept connections under a connection limit and hand each one to
/// `serve_connection` on its own task.
///
/// On shutdown the loop closes the listener and waits for every spawned
/// connection to release its permit.
pub(crate) async fn accept_loop<F, Fut>(
    listener: TcpListener,
    max_connections: u32,
    mut shutdown: Shutdown,
    serve_connection: F,
) -> io::Result<()>
where
    F: Fn(TcpStream, Shutdown) -> Fut,
    Fut: Future<Output = io::Result<()>> + Send + 'static,
{
    let connection_limit = Arc::new(Semaphore::new(max_connections as usize));

    loop {
        // Wait for a connection slot
        let permit = tokio::select! {
            permit = connection_limit.clone().acquire_owned() => {
                permit.map_err(io::Error::other)?
            }
            _ = shutdown.wait() => break,
        };

        let accepted = tokio::select! {
            accepted = listener.accept() => accepted,
            _ = shutdown.wait() => break,
        };

        match accepted {
            Ok((stream, addr)) => {
                debug!(peer = %addr, "New connection");
                let connection = serve_connection(stream, shutdown.clone());

                tokio::spawn(async move {
                    if let Err(e) = connection.await {
                        debug!(peer = %addr, error = %e, "Connection error");
                    }
                    drop(permit);
                });
            }
            Err(e) => {
                error!(error = %e, "Failed to accept connection");
            }
        }
    }

    // Refuse new clients while draining.
    drop(listener);

    // Drain: every in-flight connection holds one permit.
    trace!("Waiting for open connections to close");
    let _drained = connection_limit
        .acquire_many(max_connections)
        .await
        .map_err(io::Error::other)?;
    Ok(())
}
