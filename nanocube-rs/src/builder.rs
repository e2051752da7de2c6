//! Sets up the components of a worker.
//!
//! Each part (logging, signal handling, config, endpoint dictionary and HTTP server) can be
//! enabled separately. Tests usually only enable what they need, the worker binary enables all.
//!
//! # Example
//!
//! ```no_run
//! # use nanocube::builder::Builder;
//! # use nanocube::server::Server;
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let platform = Builder::new().enable_all().build().await;
//!
//!     // Load the cube and register the endpoints here...
//!
//!     platform.require::<Server>().event_loop().await
//! }
//! ```
use std::sync::Arc;

use crate::platform::Platform;
use crate::{init_logging, NANOCUBE_REVISION, NANOCUBE_VERSION};

/// Selects which components to set up.
#[derive(Default)]
pub struct Builder {
    logging: bool,
    signals: bool,
    config: bool,
    commands: bool,
    server: bool,
}

impl Builder {
    /// Creates a builder with all components disabled.
    pub fn new() -> Self {
        Builder::default()
    }

    /// Enables all components.
    pub fn enable_all(mut self) -> Self {
        self.logging = true;
        self.signals = true;
        self.config = true;
        self.commands = true;
        self.server = true;

        self
    }

    /// Initializes **simplelog** to log to stdout.
    pub fn enable_logging(mut self) -> Self {
        self.logging = true;
        self
    }

    /// Skips the logging setup after [enable_all()](Builder::enable_all) has been used.
    pub fn disable_logging(mut self) -> Self {
        self.logging = false;
        self
    }

    /// Terminates the platform on CTRL-C, SIGTERM or SIGHUP. See [signals](crate::signals).
    pub fn enable_signals(mut self) -> Self {
        self.signals = true;
        self
    }

    /// Skips the signal handling after [enable_all()](Builder::enable_all) has been used.
    pub fn disable_signals(mut self) -> Self {
        self.signals = false;
        self
    }

    /// Installs a [Config](crate::config::Config) and loads the settings file.
    pub fn enable_config(mut self) -> Self {
        self.config = true;
        self
    }

    /// Skips the config setup after [enable_all()](Builder::enable_all) has been used.
    pub fn disable_config(mut self) -> Self {
        self.config = false;
        self
    }

    /// Installs a [CommandDictionary](crate::commands::CommandDictionary) which the endpoints
    /// are registered in.
    pub fn enable_commands(mut self) -> Self {
        self.commands = true;
        self
    }

    /// Skips the command dictionary after [enable_all()](Builder::enable_all) has been used.
    pub fn disable_commands(mut self) -> Self {
        self.commands = false;
        self
    }

    /// Installs a [Server](crate::server::Server). Its event loop still has to be started via
    /// `platform.require::<Server>().event_loop().await`.
    pub fn enable_server(mut self) -> Self {
        self.server = true;
        self
    }

    /// Skips the server after [enable_all()](Builder::enable_all) has been used.
    pub fn disable_server(mut self) -> Self {
        self.server = false;
        self
    }

    /// Creates the [Platform](crate::platform::Platform) with all enabled components registered.
    pub async fn build(self) -> Arc<Platform> {
        let platform = Platform::new();

        if self.logging {
            init_logging();
        }

        log::info!(
            "NANOCUBE (v {} - rev {}) running on {} core(s)",
            NANOCUBE_VERSION,
            NANOCUBE_REVISION,
            num_cpus::get()
        );

        if self.signals {
            crate::signals::install(platform.clone());
        }

        if self.config {
            crate::config::install(platform.clone()).await;
        }

        if self.commands {
            let _ = crate::commands::CommandDictionary::install(&platform);
        }

        if self.server {
            let _ = crate::server::Server::install(&platform);
        }

        platform
    }
}
