//! Serves the registered endpoints via HTTP.
//!
//! The server binds to `server.host` and `server.port`. If the port is taken, the next port is
//! tried, up to `server.bind_attempts` ports in total. This permits to run several workers on
//! one machine without assigning ports upfront. Each failed attempt is logged, the port which
//! was finally bound is logged as well.
//!
//! Each request path is split into a [Request](crate::request::Request) and handed to the
//! [Dispatcher](crate::commands::Dispatcher) of the [CommandDictionary](CommandDictionary).
//! Once the platform is terminated, the server stops accepting new connections, completes all
//! pending requests and reports the utilization of all endpoints.
//!
//! # Example
//!
//! ```no_run
//! # use nanocube::builder::Builder;
//! # use nanocube::server::Server;
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let platform = Builder::new().enable_all().build().await;
//!     platform.require::<Server>().event_loop().await
//! }
//! ```
use std::convert::Infallible;
use std::fmt::Display;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{anyhow, Context};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, StatusCode};

use crate::commands::{CommandDictionary, Dispatcher};
use crate::config::Config;
use crate::fmt::format_micros;
use crate::platform::Platform;
use crate::request::Request;
use crate::response::Response;

/// The address to bind to unless configured otherwise.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// The first port to try unless configured otherwise.
pub const DEFAULT_PORT: u16 = 29512;

/// The number of consecutive ports to try unless configured otherwise.
pub const DEFAULT_BIND_ATTEMPTS: usize = 100;

/// Determines how often we check if the platform is still running.
const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Determines how often we check if a forked server is up.
const STARTUP_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// The HTTP server of a worker.
pub struct Server {
    platform: Arc<Platform>,
    running: AtomicBool,
    local_address: Mutex<Option<SocketAddr>>,
}

impl Server {
    /// Creates a server and registers it in the given platform.
    ///
    /// This is called by the [Builder](crate::builder::Builder) unless disabled.
    pub fn install(platform: &Arc<Platform>) -> Arc<Self> {
        let server = Arc::new(Server {
            platform: platform.clone(),
            running: AtomicBool::new(false),
            local_address: Mutex::new(None),
        });
        platform.register::<Server>(server.clone());

        server
    }

    /// Determines if the server is accepting connections.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Returns the address the server is bound to once it is running.
    pub fn local_address(&self) -> Option<SocketAddr> {
        *self
            .local_address
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Reads host, port and the number of bind attempts from the config.
    fn settings(&self) -> anyhow::Result<(IpAddr, u16, usize)> {
        let (host, port, attempts) = match self.platform.find::<Config>() {
            Some(config) => {
                let handle = config.current();
                (
                    handle.string("server.host", DEFAULT_HOST),
                    handle.int("server.port", DEFAULT_PORT as i64),
                    handle.int("server.bind_attempts", DEFAULT_BIND_ATTEMPTS as i64),
                )
            }
            None => (
                DEFAULT_HOST.to_owned(),
                DEFAULT_PORT as i64,
                DEFAULT_BIND_ATTEMPTS as i64,
            ),
        };

        let host = host
            .parse::<IpAddr>()
            .with_context(|| format!("Invalid server.host: {}", host))?;
        let port = u16::try_from(port).unwrap_or_else(|_| {
            log::warn!("Invalid server.port: {}. Using {}.", port, DEFAULT_PORT);
            DEFAULT_PORT
        });

        Ok((host, port, attempts.max(1) as usize))
    }

    /// Starts the event loop in a separate task.
    ///
    /// This is used by tests which run their requests in the main task.
    pub fn fork(server: &Arc<Server>) {
        let server = server.clone();
        crate::spawn!(async move {
            if let Err(error) = server.event_loop().await {
                log::error!("{:#}", error);
            }
        });
    }

    /// Starts the event loop in a separate task and waits until the server accepts connections.
    pub async fn fork_and_await(server: &Arc<Server>) {
        Server::fork(server);

        while !server.is_running() && server.platform.is_running() {
            tokio::time::sleep(STARTUP_POLL_INTERVAL).await;
        }
    }

    /// Binds the server socket and serves requests until the platform is terminated.
    ///
    /// Fails if no port could be bound.
    pub async fn event_loop(&self) -> anyhow::Result<()> {
        let commands = self.platform.require::<CommandDictionary>();
        let dispatcher = Arc::new(commands.dispatcher());

        let (host, port, attempts) = self.settings()?;
        let (builder, _) = bind_with_retry(host, port, attempts, |address| {
            hyper::Server::try_bind(&address)
        })?;

        let make_service = make_service_fn(move |_| {
            let dispatcher = dispatcher.clone();
            async move {
                Ok::<_, Infallible>(service_fn(move |request| {
                    handle(dispatcher.clone(), request)
                }))
            }
        });

        let server = builder.serve(make_service);
        let address = server.local_addr();
        *self
            .local_address
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(address);
        log::info!("Opened server socket on {}...", address);

        let platform = self.platform.clone();
        self.running.store(true, Ordering::Release);
        let outcome = server
            .with_graceful_shutdown(async move {
                while platform.is_running() {
                    tokio::time::sleep(SHUTDOWN_POLL_INTERVAL).await;
                }
            })
            .await;
        self.running.store(false, Ordering::Release);
        log::info!("Closing server socket on {}.", address);

        for command in commands.commands() {
            log::info!(
                "Endpoint {}: {} calls, {} on average",
                command.name,
                command.call_count(),
                format_micros(command.avg_duration())
            );
        }

        outcome.context("The HTTP server failed")
    }
}

async fn handle(
    dispatcher: Arc<Dispatcher>,
    request: hyper::Request<Body>,
) -> Result<hyper::Response<Body>, Infallible> {
    let response = match Request::parse(request.uri().path()) {
        Ok(request) => {
            log::debug!("Received {}", request.command());
            dispatcher.invoke(request).await
        }
        Err(error) => Response::error(StatusCode::BAD_REQUEST, &format!("{:#}", error)),
    };

    Ok(response.complete())
}

/// Tries to bind to **port**, **port + 1**, ... until **bind** succeeds.
///
/// At most **attempts** ports are tried (fewer if the port range is exhausted). Each failure is
/// logged. Returns the bound value along with its address.
///
/// # Example
///
/// ```
/// # use std::net::{IpAddr, Ipv4Addr};
/// # use nanocube::server::bind_with_retry;
/// let host = IpAddr::V4(Ipv4Addr::LOCALHOST);
/// let (value, address) = bind_with_retry(host, 8000, 10, |address| {
///     if address.port() < 8003 { Err("in use") } else { Ok(address.port() * 2) }
/// }).unwrap();
/// assert_eq!(value, 16006);
/// assert_eq!(address.port(), 8003);
/// ```
pub fn bind_with_retry<T, E: Display>(
    host: IpAddr,
    port: u16,
    attempts: usize,
    mut bind: impl FnMut(SocketAddr) -> Result<T, E>,
) -> anyhow::Result<(T, SocketAddr)> {
    for attempt in 0..attempts {
        let candidate = match u16::try_from(attempt)
            .ok()
            .and_then(|offset| port.checked_add(offset))
        {
            Some(candidate) => candidate,
            None => break,
        };

        let address = SocketAddr::new(host, candidate);
        match bind(address) {
            Ok(bound) => return Ok((bound, address)),
            Err(error) => log::warn!("Cannot bind to {}: {}", address, error),
        }
    }

    Err(anyhow!(
        "Unable to bind to any port starting at {} on {} ({} attempts).",
        port,
        host,
        attempts
    ))
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};

    use crate::server::bind_with_retry;

    #[test]
    fn binding_gives_up_after_the_given_number_of_attempts() {
        let mut tried = Vec::new();
        let result = bind_with_retry(
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            29512,
            100,
            |address| -> Result<(), &str> {
                tried.push(address.port());
                Err("in use")
            },
        );

        assert_eq!(result.is_err(), true);
        assert_eq!(tried.len(), 100);
        assert_eq!(tried[0], 29512);
        assert_eq!(tried[99], 29611);
    }

    #[test]
    fn binding_stops_at_the_end_of_the_port_range() {
        let mut tried = 0;
        let result = bind_with_retry(
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            u16::MAX - 1,
            100,
            |_| -> Result<(), &str> {
                tried += 1;
                Err("in use")
            },
        );

        assert_eq!(result.is_err(), true);
        assert_eq!(tried, 2);
    }

    #[test]
    fn taken_ports_are_skipped() {
        let occupied = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = occupied.local_addr().unwrap().port();

        let (listener, address) = bind_with_retry(
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            port,
            100,
            std::net::TcpListener::bind,
        )
        .unwrap();

        assert_eq!(address.port() > port, true);
        assert_eq!(listener.local_addr().unwrap(), address);
    }
}
