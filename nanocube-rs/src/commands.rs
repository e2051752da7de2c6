//! Maps endpoint names to their handlers and executes calls on a bounded worker pool.
//!
//! A [CommandDictionary](CommandDictionary) keeps all registered endpoints. Each entry points to
//! a [Handler](Handler) along with a numeric token, so that one handler can serve several
//! endpoints (using **num_derive** to map the token back to an enum). The server obtains a
//! read-only [Dispatcher](Dispatcher) from the dictionary once it starts.
//!
//! Handlers are synchronous, as evaluating a query is pure computation. The dispatcher runs
//! them via **spawn_blocking**, but never more than the configured number (`server.threads`)
//! at once.
//!
//! # Errors
//!
//! A handler either returns a [Response](crate::response::Response) or a
//! [CommandError](CommandError). Use [client_error](client_error) if the request itself was
//! invalid and [server_error](server_error) if something went wrong on our side. Any
//! **anyhow::Error** converts into a client error.
//!
//! # Example
//!
//! ```
//! # use std::sync::Arc;
//! # use num_derive::FromPrimitive;
//! # use num_traits::FromPrimitive;
//! # use nanocube::commands::{CommandDictionary, CommandResult, Handler};
//! # use nanocube::request::Request;
//! # use nanocube::response::Response;
//! #[derive(FromPrimitive)]
//! enum Endpoints {
//!     Ping,
//!     Echo,
//! }
//!
//! struct Actor;
//!
//! impl Handler for Actor {
//!     fn handle(&self, token: usize, request: &Request) -> CommandResult {
//!         match Endpoints::from_usize(token) {
//!             Some(Endpoints::Ping) => Ok(Response::text("pong")),
//!             Some(Endpoints::Echo) => Ok(Response::text(request.str_parameter(0)?)),
//!             None => Err(nanocube::server_error!("Unknown token {}", token)),
//!         }
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let commands = CommandDictionary::new(2);
//!     let actor = Arc::new(Actor);
//!     commands.register_command("ping", actor.clone(), Endpoints::Ping as usize);
//!     commands.register_command("echo", actor, Endpoints::Echo as usize);
//!
//!     let dispatcher = commands.dispatcher();
//!     let response = dispatcher.invoke(Request::example(vec!["echo", "hello"])).await;
//!     assert_eq!(&response.body()[..], b"\"hello\"");
//!
//!     let response = dispatcher.invoke(Request::example(vec!["echo"])).await;
//!     assert_eq!(response.status(), hyper::StatusCode::BAD_REQUEST);
//! }
//! ```
use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use hyper::StatusCode;
use tokio::sync::Semaphore;

use crate::average::Average;
use crate::config::Config;
use crate::platform::Platform;
use crate::request::Request;
use crate::response::Response;

/// The number of handlers executed in parallel unless configured otherwise.
pub const DEFAULT_WORKERS: usize = 10;

/// Represents an error when executing an endpoint.
#[derive(Debug)]
pub enum CommandError {
    /// The request was invalid (e.g. a malformed query). Rendered as **400 Bad Request**.
    ClientError(anyhow::Error),
    /// Something failed on our side. Rendered as **500 Internal Server Error**.
    ServerError(anyhow::Error),
}

impl Display for CommandError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandError::ClientError(error) => write!(f, "{}", error),
            CommandError::ServerError(error) => write!(f, "{}", error),
        }
    }
}

impl From<anyhow::Error> for CommandError {
    fn from(error: anyhow::Error) -> Self {
        CommandError::ClientError(error)
    }
}

/// Creates a [CommandError::ServerError](CommandError::ServerError).
#[macro_export]
macro_rules! server_error {
    ($err:expr $(,)?) => ({
        $crate::commands::CommandError::ServerError(anyhow::anyhow!($err))
    });
    ($fmt:expr, $($arg:tt)*) => {
        $crate::commands::CommandError::ServerError(anyhow::anyhow!($fmt, $($arg)*))
    };
}

/// Creates a [CommandError::ClientError](CommandError::ClientError).
#[macro_export]
macro_rules! client_error {
    ($err:expr $(,)?) => ({
        $crate::commands::CommandError::ClientError(anyhow::anyhow!($err))
    });
    ($fmt:expr, $($arg:tt)*) => {
        $crate::commands::CommandError::ClientError(anyhow::anyhow!($fmt, $($arg)*))
    };
}

/// The outcome of an endpoint call.
pub type CommandResult = Result<Response, CommandError>;

/// Handles the calls of one or more endpoints.
pub trait Handler: Send + Sync {
    /// Handles the given request. The token is the one given when registering the endpoint.
    fn handle(&self, token: usize, request: &Request) -> CommandResult;
}

/// A registered endpoint along with its utilization metrics.
pub struct Command {
    /// The name of the endpoint (the first path segment).
    pub name: &'static str,
    handler: Arc<dyn Handler>,
    token: usize,
    call_metrics: Average,
}

impl Command {
    /// Returns the number of calls.
    pub fn call_count(&self) -> u64 {
        self.call_metrics.count()
    }

    /// Returns the average call duration in microseconds.
    pub fn avg_duration(&self) -> u64 {
        self.call_metrics.avg()
    }
}

/// Keeps all registered endpoints.
pub struct CommandDictionary {
    commands: Mutex<HashMap<&'static str, Arc<Command>>>,
    permits: Arc<Semaphore>,
}

/// A read-only copy of a [CommandDictionary](CommandDictionary) which executes calls.
pub struct Dispatcher {
    commands: HashMap<&'static str, Arc<Command>>,
    permits: Arc<Semaphore>,
}

impl CommandDictionary {
    /// Creates an empty dictionary which runs at most **workers** calls in parallel.
    pub fn new(workers: usize) -> Self {
        CommandDictionary {
            commands: Mutex::new(HashMap::new()),
            permits: Arc::new(Semaphore::new(workers.max(1))),
        }
    }

    /// Creates a dictionary and registers it in the given platform.
    ///
    /// The number of workers is read from `server.threads` if a config is present.
    pub fn install(platform: &Arc<Platform>) -> Arc<Self> {
        let workers = platform
            .find::<Config>()
            .map(|config| config.current().int("server.threads", DEFAULT_WORKERS as i64))
            .unwrap_or(DEFAULT_WORKERS as i64);

        let commands = Arc::new(CommandDictionary::new(workers.max(1) as usize));
        platform.register::<CommandDictionary>(commands.clone());

        commands
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<&'static str, Arc<Command>>> {
        self.commands.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers an endpoint. A second registration for the same name is ignored.
    pub fn register_command(&self, name: &'static str, handler: Arc<dyn Handler>, token: usize) {
        let mut commands = self.lock();
        if commands.contains_key(name) {
            log::error!(
                "Not going to register endpoint {} as it is already present.",
                name
            );
        } else {
            log::debug!("Registering endpoint {}...", name);
            let _ = commands.insert(
                name,
                Arc::new(Command {
                    name,
                    handler,
                    token,
                    call_metrics: Average::default(),
                }),
            );
        }
    }

    /// Returns all registered endpoints ordered by name.
    pub fn commands(&self) -> Vec<Arc<Command>> {
        let mut commands: Vec<Arc<Command>> = self.lock().values().cloned().collect();
        commands.sort_by_key(|command| command.name);

        commands
    }

    /// Creates a dispatcher for all endpoints registered so far.
    pub fn dispatcher(&self) -> Dispatcher {
        Dispatcher {
            commands: self.lock().clone(),
            permits: self.permits.clone(),
        }
    }
}

impl Dispatcher {
    /// Executes the given request and renders errors into responses.
    pub async fn invoke(&self, request: Request) -> Response {
        let command = match self.commands.get(request.command()) {
            Some(command) => command.clone(),
            None => {
                return Response::error(
                    StatusCode::NOT_FOUND,
                    &format!("Unknown endpoint: {}", request.command()),
                )
            }
        };

        let permit = match self.permits.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                return Response::error(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "The server is shutting down.",
                )
            }
        };

        let watch = Instant::now();
        let worker_command = command.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            worker_command
                .handler
                .handle(worker_command.token, &request)
        })
        .await;
        command
            .call_metrics
            .add(watch.elapsed().as_micros() as u64);

        match outcome {
            Ok(Ok(response)) => response,
            Ok(Err(CommandError::ClientError(error))) => {
                Response::error(StatusCode::BAD_REQUEST, &error.to_string())
            }
            Ok(Err(CommandError::ServerError(error))) => {
                log::error!("The endpoint {} failed: {:#}", command.name, error);
                Response::error(StatusCode::INTERNAL_SERVER_ERROR, &error.to_string())
            }
            Err(error) => {
                log::error!("The endpoint {} crashed: {}", command.name, error);
                Response::error(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Unexpected problem. Server might be unstable now.",
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use hyper::StatusCode;

    use crate::commands::{CommandDictionary, CommandResult, Handler};
    use crate::request::Request;
    use crate::response::Response;

    struct Sleeper {
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    impl Handler for Sleeper {
        fn handle(&self, token: usize, _request: &Request) -> CommandResult {
            let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            let _ = self.peak.fetch_max(active, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(20));
            let _ = self.active.fetch_sub(1, Ordering::SeqCst);

            match token {
                0 => Ok(Response::empty()),
                1 => Err(crate::server_error!("Failed on purpose")),
                _ => panic!("Unexpected token"),
            }
        }
    }

    #[test]
    fn calls_are_bounded_by_the_worker_pool() {
        crate::testing::test_async(async {
            let sleeper = Arc::new(Sleeper {
                active: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            });
            let commands = CommandDictionary::new(2);
            commands.register_command("sleep", sleeper.clone(), 0);
            let dispatcher = Arc::new(commands.dispatcher());

            let mut tasks = Vec::new();
            for _ in 0..6 {
                let dispatcher = dispatcher.clone();
                tasks.push(tokio::spawn(async move {
                    dispatcher
                        .invoke(Request::example(vec!["sleep"]))
                        .await
                        .status()
                }));
            }
            for task in tasks {
                assert_eq!(task.await.unwrap(), StatusCode::NO_CONTENT);
            }

            assert_eq!(sleeper.peak.load(Ordering::SeqCst) <= 2, true);
            assert_eq!(commands.commands()[0].call_count(), 6);
        });
    }

    #[test]
    fn failures_are_rendered_as_errors() {
        crate::testing::test_async(async {
            let sleeper = Arc::new(Sleeper {
                active: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            });
            let commands = CommandDictionary::new(1);
            commands.register_command("fail", sleeper.clone(), 1);
            commands.register_command("crash", sleeper.clone(), 2);
            commands.register_command("fail", sleeper, 0);
            let dispatcher = commands.dispatcher();

            let response = dispatcher.invoke(Request::example(vec!["fail"])).await;
            assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
            assert_eq!(&response.body()[..], br#"{"error":"Failed on purpose"}"#);

            let response = dispatcher.invoke(Request::example(vec!["crash"])).await;
            assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

            let response = dispatcher.invoke(Request::example(vec!["unknown"])).await;
            assert_eq!(response.status(), StatusCode::NOT_FOUND);
        });
    }
}
