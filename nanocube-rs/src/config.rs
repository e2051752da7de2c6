//! Contains the worker configuration.
//!
//! The configuration is read from **config/settings.yml** once during startup. A missing file is
//! fine, as every setting has a default. The following keys are used:
//!
//! ```yaml
//! server:
//!     host: 0.0.0.0       # the address to bind to
//!     port: 29512         # the first port to try
//!     bind_attempts: 100  # the number of consecutive ports to try
//!     threads: 10         # the number of queries executed in parallel
//! ```
//!
//! # Example
//!
//! ```
//! # use nanocube::config::Config;
//! let config = Config::new("settings.yml");
//! config.load_from_string("
//! server:
//!     port: 12345
//! ").unwrap();
//!
//! let handle = config.current();
//! assert_eq!(handle.int("server.port", 29512), 12345);
//! assert_eq!(handle.int("server.threads", 10), 10);
//! assert_eq!(handle.string("server.host", "0.0.0.0"), "0.0.0.0");
//! ```
use std::sync::Arc;

use anyhow::anyhow;
use arc_swap::ArcSwap;
use yaml_rust::{Yaml, YamlLoader};

use crate::platform::Platform;

/// The file the configuration is read from.
pub const CONFIG_FILE: &str = "config/settings.yml";

/// Provides access to the loaded configuration.
pub struct Config {
    filename: String,
    document: ArcSwap<Yaml>,
}

/// A snapshot of the configuration as loaded at the time it was obtained.
pub struct Handle {
    document: Arc<Yaml>,
}

impl Config {
    /// Creates an empty config which reads from the given file once loaded.
    pub fn new(filename: &str) -> Config {
        Config {
            filename: filename.to_owned(),
            document: ArcSwap::new(Arc::new(Yaml::Null)),
        }
    }

    /// Returns a handle to the current configuration.
    pub fn current(&self) -> Handle {
        Handle {
            document: self.document.load_full(),
        }
    }

    /// Reads the underlying file.
    ///
    /// A missing file leaves the configuration empty so that all defaults apply.
    pub async fn load(&self) -> anyhow::Result<()> {
        match tokio::fs::metadata(&self.filename).await {
            Ok(metadata) if metadata.is_file() => (),
            _ => {
                log::info!(
                    "No config file {} present. Using defaults.",
                    &self.filename
                );
                return Ok(());
            }
        }

        log::info!("Loading config file {}...", &self.filename);
        let data = tokio::fs::read_to_string(&self.filename)
            .await
            .map_err(|error| anyhow!("Cannot load config file {}: {}", &self.filename, error))?;

        self.load_from_string(&data)
    }

    /// Parses the given YAML and replaces the current configuration.
    ///
    /// Malformed input is rejected and leaves the current configuration untouched.
    pub fn load_from_string(&self, data: &str) -> anyhow::Result<()> {
        let mut documents = YamlLoader::load_from_str(data)
            .map_err(|error| anyhow!("Cannot parse config file {}: {}", &self.filename, error))?;

        let document = if documents.is_empty() {
            Yaml::Null
        } else {
            documents.swap_remove(0)
        };
        self.document.store(Arc::new(document));

        Ok(())
    }
}

impl Handle {
    /// Resolves a dot separated path like `server.port`.
    ///
    /// Returns **Yaml::BadValue** if any part of the path is missing.
    pub fn query(&self, path: &str) -> &Yaml {
        path.split('.')
            .fold(self.document.as_ref(), |node, key| &node[key])
    }

    /// Reads an integer setting or returns the given default.
    pub fn int(&self, path: &str, default: i64) -> i64 {
        self.query(path).as_i64().unwrap_or(default)
    }

    /// Reads a string setting or returns the given default.
    pub fn string(&self, path: &str, default: &str) -> String {
        self.query(path)
            .as_str()
            .unwrap_or(default)
            .to_owned()
    }
}

/// Creates a **Config** reading from [CONFIG_FILE](CONFIG_FILE) and registers it.
///
/// This is called by the [Builder](crate::builder::Builder) unless disabled.
pub async fn install(platform: Arc<Platform>) {
    let config = Arc::new(Config::new(CONFIG_FILE));
    platform.register::<Config>(config.clone());

    if let Err(error) = config.load().await {
        log::error!("{}", error);
    }
}

#[cfg(test)]
mod tests {
    use crate::config::Config;

    #[test]
    fn malformed_configs_are_rejected() {
        let config = Config::new("test.yml");
        config.load_from_string("server:\n    threads: 4").unwrap();

        assert_eq!(config.load_from_string("server: 'invalid").is_err(), true);
        assert_eq!(config.current().int("server.threads", 10), 4);
    }

    #[test]
    fn missing_keys_yield_defaults() {
        let config = Config::new("test.yml");
        assert_eq!(config.current().int("server.port", 29512), 29512);

        config.load_from_string("").unwrap();
        assert_eq!(config.current().query("server.port").is_badvalue(), true);
        assert_eq!(config.current().string("server.host", "::1"), "::1");
    }
}
