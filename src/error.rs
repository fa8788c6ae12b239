//! Listener lifecycle errors.

use crate::routers::RouterKind;
use std::net::SocketAddr;
use thiserror::Error;

/// Failures that stop a service, or the whole process.
#[derive(Debug, Error)]
pub enum ServeError {
    /// The listening socket could not be created or bound.
    #[error("{router} service failed to bind {addr}: {source}")]
    Bind {
        router: RouterKind,
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// The accept loop or the router's server stopped with an I/O error.
    #[error("{router} service on {addr} stopped: {source}")]
    Serve {
        router: RouterKind,
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// A service task panicked or was cancelled.
    #[error("service task ended abnormally: {0}")]
    Task(#[from] tokio::task::JoinError),
}
