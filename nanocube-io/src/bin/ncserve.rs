//! Reads a dataset from stdin and hands it to the worker matching its signature.
//!
//! The worker directory is taken from `NANOCUBE_BIN` (defaults to the working directory).
//! All command line arguments are passed on to the worker.
use nanocube::dispatch::{base_path, dispatch};

#[tokio::main]
async fn main() {
    nanocube::init_logging();

    let mut input = tokio::io::BufReader::new(tokio::io::stdin());
    let code = match dispatch(&mut input, std::env::args_os().collect(), &base_path()).await {
        Ok(code) => code,
        Err(error) => {
            log::error!("{}", error);
            error.exit_code()
        }
    };

    std::process::exit(code);
}
