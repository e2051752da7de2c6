//! Hands an incoming dataset to the worker binary specialized for its shape.
//!
//! The front-end only reads the header of the dataset. Using the [Signature](Signature) of the
//! header, it resolves the worker binary (`<base>nc<signature>`), starts it with the original
//! command line and pipes the header followed by the untouched record stream into its standard
//! input. The front-end then waits for the worker and reports its exit status.
//!
//! The base directory is taken from the environment variable `NANOCUBE_BIN` and defaults to
//! the current working directory.
use std::ffi::OsString;
use std::fmt::{Display, Formatter};
use std::io::ErrorKind;
use std::process::Stdio;

use tokio::io::{AsyncBufRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;

use crate::schema::{read_header_async, DumpFileDescription};
use crate::signature::Signature;

/// Prefixes the file name of each worker binary.
pub const BINARY_PREFIX: &str = "nc";

/// Names the environment variable which points to the directory of the worker binaries.
pub const BINARY_PATH_ENV: &str = "NANOCUBE_BIN";

/// The exit code used if no worker could be started.
pub const DISPATCH_FAILURE: i32 = 127;

/// The size of the chunks in which records are forwarded.
pub const CHUNK_SIZE: usize = 4095;

/// Describes why a dataset couldn't be handed to its worker.
#[derive(Debug)]
pub enum DispatchError {
    /// The header couldn't be read or parsed.
    Header(anyhow::Error),
    /// The worker binary couldn't be started.
    Spawn(String, std::io::Error),
    /// The input of the worker couldn't be opened.
    Pipe(String),
    /// Forwarding the input or waiting for the worker failed.
    Wait(std::io::Error),
}

impl DispatchError {
    /// Returns the exit code the front-end terminates with.
    pub fn exit_code(&self) -> i32 {
        match self {
            DispatchError::Spawn(..) | DispatchError::Pipe(_) => DISPATCH_FAILURE,
            DispatchError::Header(_) | DispatchError::Wait(_) => 1,
        }
    }
}

impl Display for DispatchError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            DispatchError::Header(error) => write!(f, "Invalid dataset header: {:#}", error),
            DispatchError::Spawn(program, error) => {
                write!(f, "Cannot start worker {}: {}", program, error)
            }
            DispatchError::Pipe(program) => {
                write!(f, "Cannot open the input of worker {}", program)
            }
            DispatchError::Wait(error) => write!(f, "Failed to feed the worker: {}", error),
        }
    }
}

impl std::error::Error for DispatchError {}

/// Determines the directory of the worker binaries, always ending with a `/`.
pub fn base_path() -> String {
    match std::env::var(BINARY_PATH_ENV) {
        Ok(path) if !path.is_empty() => {
            if path.ends_with('/') {
                path
            } else {
                format!("{}/", path)
            }
        }
        _ => "./".to_owned(),
    }
}

/// Computes the path of the worker binary serving the given signature.
///
/// ```
/// # use nanocube::dispatch::program_name;
/// # use nanocube::schema::DumpFileDescription;
/// # use nanocube::signature::Signature;
/// let description = DumpFileDescription::parse("
/// field: crime nc_dim_cat_1
/// field: time nc_dim_time_2
/// field: count nc_var_uint_4
/// ").unwrap();
/// let signature = Signature::resolve(&description);
/// assert_eq!(program_name("/opt/nc/", &signature), "/opt/nc/nc_c1_u2_u4");
/// ```
pub fn program_name(base: &str, signature: &Signature) -> String {
    format!("{}{}{}", base, BINARY_PREFIX, signature)
}

/// Dispatches the dataset read from **input** to its worker.
///
/// **args** is the complete command line of the front-end (including the program name) which
/// is passed on to the worker unchanged. Returns the exit code of the worker (or 1 if it was
/// terminated by a signal). If reading **input** fails while forwarding, the worker is still
/// awaited but the read error is reported instead of its exit code.
pub async fn dispatch<R: AsyncBufRead + Unpin>(
    input: &mut R,
    args: Vec<OsString>,
    base: &str,
) -> Result<i32, DispatchError> {
    let header = read_header_async(input).await.map_err(DispatchError::Header)?;
    let description = DumpFileDescription::parse(&header).map_err(DispatchError::Header)?;
    let signature = Signature::resolve(&description);
    if signature.is_empty() {
        log::warn!("The dataset has no supported field. Dispatching it anyway...");
    }

    let program = program_name(base, &signature);
    log::info!("Dispatching dataset with signature '{}' to {}", signature, program);

    let mut command = Command::new(&program);
    #[cfg(unix)]
    if let Some(arg0) = args.first() {
        command.arg0(arg0);
    }
    let _ = command.args(args.iter().skip(1)).stdin(Stdio::piped());

    let mut child = command
        .spawn()
        .map_err(|error| DispatchError::Spawn(program.clone(), error))?;
    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| DispatchError::Pipe(program.clone()))?;

    let forwarded = match forward(input, &mut stdin, &description).await {
        Err(error) if error.kind() == ErrorKind::BrokenPipe => {
            log::warn!("Worker {} closed its input early.", program);
            Ok(())
        }
        other => other,
    };
    std::mem::drop(stdin);

    let status = child.wait().await.map_err(DispatchError::Wait)?;
    log::info!("Worker {} terminated: {}", program, status);

    if let Err(error) = forwarded {
        log::error!("Failed to forward records to {}: {}", program, error);
        return Err(DispatchError::Wait(error));
    }

    Ok(status.code().unwrap_or(1))
}

async fn forward<R: AsyncBufRead + Unpin>(
    input: &mut R,
    stdin: &mut tokio::process::ChildStdin,
    description: &DumpFileDescription,
) -> std::io::Result<()> {
    stdin.write_all(description.to_string().as_bytes()).await?;
    stdin.write_all(b"\n").await?;

    let mut buffer = vec![0_u8; CHUNK_SIZE];
    loop {
        let bytes_read = input.read(&mut buffer).await?;
        if bytes_read == 0 {
            break;
        }
        stdin.write_all(&buffer[..bytes_read]).await?;
    }

    stdin.flush().await
}
