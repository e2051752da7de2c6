//! Nanocube serves aggregation queries over in-memory data cubes via HTTP.
//!
//! # Introduction
//! A **nanocube** indexes a dataset of records along a set of dimensions (spatial quadtrees,
//! categories and time) so that counts and sums over arbitrary sub-regions, category subsets and
//! time intervals can be answered interactively. This crate provides the serving layer around
//! such a cube:
//!
//! * **Schema handling**: every dataset starts with a textual header (see [schema]) which
//!   describes its fields. The [signature] of a header names the specialized worker binary
//!   which serves datasets of this shape.
//! * **Dispatching**: the front-end ([dispatch]) reads the header, starts the matching worker
//!   and pipes the complete dataset into it.
//! * **Querying**: query expressions like `@location=qaddr(1,2,2)+3/crime=[0,1]` are parsed
//!   into a [QueryDescription](query::QueryDescription) and evaluated by a [Cube](cube::Cube).
//!   Results are rendered as JSON or as a compressed binary [frame].
//! * **Serving**: the [Server](server::Server) exposes all endpoints registered by the
//!   [service] via HTTP.
//!
//! # Architecture
//! All long-lived components (config, command dictionary, server, the loaded cube) are
//! registered in the [Platform](platform::Platform). The simplest way to set everything up is a
//! [Builder](builder::Builder):
//!
//! ```no_run
//! # use nanocube::builder::Builder;
//! # use nanocube::server::Server;
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let platform = Builder::new().enable_all().build().await;
//!     // Load a cube and call nanocube::service::install here...
//!     platform.require::<Server>().event_loop().await
//! }
//! ```
//!
//! Endpoint handlers are synchronous. The [Dispatcher](commands::Dispatcher) runs them on a
//! bounded pool of blocking threads so that queries never stall the event loop.
#![warn(
    missing_docs,
    trivial_casts,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_import_braces
)]
use simplelog::{format_description, ConfigBuilder, LevelFilter, SimpleLogger};
use std::sync::Once;

pub mod average;
pub mod builder;
pub mod commands;
pub mod config;
pub mod cube;
pub mod dispatch;
pub mod fmt;
pub mod frame;
pub mod ingest;
pub mod platform;
pub mod query;
pub mod request;
pub mod response;
pub mod result;
pub mod schema;
pub mod server;
pub mod service;
pub mod signals;
pub mod signature;

/// Contains the version of the Nanocube library.
pub const NANOCUBE_VERSION: &str = "DEVELOPMENT-SNAPSHOT";

/// Contains the git commit hash of the Nanocube build being used.
pub const NANOCUBE_REVISION: &str = "NO-REVISION";

/// Initializes the logging system.
///
/// Note that most probably the simplest way is to use a [Builder](builder::Builder) to set up the
/// framework, which will also set up logging if enabled. The front-end, which doesn't need any
/// other component, calls this directly.
pub fn init_logging() {
    static INIT_LOGGING: Once = Once::new();

    // Tests might initialize the logging system several times...
    INIT_LOGGING.call_once(|| {
        if let Err(error) = SimpleLogger::init(
            LevelFilter::Debug,
            ConfigBuilder::new()
                .set_time_format_custom(format_description!(
                    "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]"
                ))
                .set_thread_level(LevelFilter::Trace)
                .set_target_level(LevelFilter::Error)
                .set_location_level(LevelFilter::Trace)
                .build(),
        ) {
            eprintln!("Failed to initialize logging system: {}", error);
        }
    });
}

/// Provides a simple macro to execute an async lambda within `tokio::spawn`.
///
/// Note that this also applies std::mem::drop on the returned join handle to make
/// clippy happy.
///
/// # Example
/// ```rust
/// # #[macro_use] extern crate nanocube;
/// # #[tokio::main]
/// # async fn main() {
/// spawn!(async move {
///     // perform some async stuff here...
/// });
/// # }
/// ```
#[macro_export]
macro_rules! spawn {
    ($e:expr) => {{
        std::mem::drop(tokio::spawn($e));
    }};
}

#[cfg(test)]
mod testing {
    use std::sync::Mutex;

    use bytes::Bytes;
    use hyper::StatusCode;

    use crate::server::Server;

    lazy_static::lazy_static! {
        /// Provides a global lock which has to be acquired if a test operates on shared
        /// resources. This would either be our test port (1503) on which we start our
        /// local server for integration tests or worker scripts which are written to and
        /// executed from the file system. Using this lock, we can still execute all other
        /// tests in parallel and only block if required.
        pub static ref SHARED_TEST_RESOURCES: Mutex<()> = Mutex::new(());
    }

    /// Executes async code within a single threaded tokio runtime.
    pub fn test_async<F: std::future::Future>(future: F) {
        use tokio::runtime;

        let rt = runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        let _ = rt.block_on(future);
    }

    /// Performs a GET request for the given path against the running server.
    ///
    /// Returns the status and the complete body or **None** if the server isn't reachable.
    pub async fn query_http_async(server: &Server, path: &str) -> Option<(StatusCode, Bytes)> {
        let address = server.local_address()?;
        let uri = format!("http://{}{}", address, path).parse().ok()?;

        let response = hyper::Client::new().get(uri).await.ok()?;
        let status = response.status();
        let body = hyper::body::to_bytes(response.into_body()).await.ok()?;

        Some((status, body))
    }
}
