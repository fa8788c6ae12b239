//! Service supervisor.
//!
//! Owns one listener per configured service and their lifecycle:
//! 1. `bind` creates every listening socket up front, so a port conflict
//!    aborts startup before any service accepts traffic.
//! 2. `run` spawns each service into a `JoinSet`. Each task reports its
//!    terminal outcome exactly once and the supervisor waits for all of them.
//! 3. A shutdown future (Ctrl-C in the binary) or, with fail-fast, the first
//!    failing service stops the rest.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::ServiceConfig;
use crate::error::ServeError;
use crate::routers::{self, RouterKind, ServeOptions};
use crate::service::EchoService;
use crate::shutdown::ShutdownTrigger;

/// Listen backlog for every service socket.
const LISTEN_BACKLOG: i32 = 1024;

/// A bound, not yet serving, service.
struct BoundService {
    router: RouterKind,
    addr: SocketAddr,
    listener: TcpListener,
    service: EchoService,
}

/// Supervisor over a set of bound services.
pub struct Supervisor {
    services: Vec<BoundService>,
    options: ServeOptions,
    fail_fast: bool,
}

impl Supervisor {
    /// Bind every service. Fails on the first socket that cannot be bound.
    ///
    /// Must be called within a tokio runtime.
    pub fn bind(
        configs: &[ServiceConfig],
        options: ServeOptions,
        fail_fast: bool,
    ) -> Result<Self, ServeError> {
        let mut services = Vec::with_capacity(configs.len());

        for config in configs {
            let bind_error = |source| ServeError::Bind {
                router: config.router,
                addr: config.listen,
                source,
            };
            let listener = create_listener(config.listen).map_err(bind_error)?;
            let listener = TcpListener::from_std(listener).map_err(bind_error)?;
            let addr = listener.local_addr().map_err(bind_error)?;

            debug!(router = %config.router, address = %addr, "Service bound");
            services.push(BoundService {
                router: config.router,
                addr,
                listener,
                service: EchoService::new(config.greeting.as_str()),
            });
        }

        Ok(Supervisor {
            services,
            options,
            fail_fast,
        })
    }

    /// Actual bound addresses, in configuration order.
    pub fn local_addrs(&self) -> Vec<(RouterKind, SocketAddr)> {
        self.services.iter().map(|s| (s.router, s.addr)).collect()
    }

    /// Serve every service until `shutdown` resolves or, with fail-fast,
    /// until one of them fails. Returns the first failure, if any.
    pub async fn run<S>(self, shutdown: S) -> Result<(), ServeError>
    where
        S: Future<Output = ()>,
    {
        let trigger = ShutdownTrigger::new();
        let mut tasks = JoinSet::new();

        for bound in self.services {
            let BoundService {
                router,
                addr,
                listener,
                service,
            } = bound;
            let options = self.options;
            let shutdown = trigger.subscribe();

            debug!(router = %router, greeting = service.greeting(), "Starting service");
            tasks.spawn(async move {
                routers::serve(router, listener, service, options, shutdown)
                    .await
                    .map_err(|source| ServeError::Serve {
                        router,
                        addr,
                        source,
                    })
            });
        }

        supervise(&mut tasks, &trigger, shutdown, self.fail_fast).await
    }
}

/// Fan in service outcomes until every task has reported.
///
/// `shutdown` resolving stops all services. With `fail_fast`, so does the
/// first error. The first error seen is returned.
async fn supervise<S>(
    tasks: &mut JoinSet<Result<(), ServeError>>,
    trigger: &ShutdownTrigger,
    shutdown: S,
    fail_fast: bool,
) -> Result<(), ServeError>
where
    S: Future<Output = ()>,
{
    let mut first_error: Option<ServeError> = None;
    let mut shutdown_requested = false;
    tokio::pin!(shutdown);

    loop {
        let outcome = tokio::select! {
            outcome = tasks.join_next() => outcome,
            _ = &mut shutdown, if !shutdown_requested => {
                info!("Shutdown requested, stopping services");
                shutdown_requested = true;
                trigger.trigger();
                continue;
            }
        };

        // `None`: every service has reported.
        let Some(outcome) = outcome else { break };

        match outcome.map_err(ServeError::from).and_then(|result| result) {
            Ok(()) if trigger.is_triggered() => {}
            Ok(()) => warn!("Service stopped without a shutdown request"),
            Err(e) => {
                error!(error = %e, "Service failed");
                if fail_fast && !trigger.is_triggered() {
                    warn!("Stopping remaining services");
                    trigger.trigger();
                }
                first_error.get_or_insert(e);
            }
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Create a TCP listener with SO_REUSEADDR and the service backlog.
fn create_listener(addr: SocketAddr) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        socket2::Domain::for_address(addr),
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;

    Ok(socket.into())
}
