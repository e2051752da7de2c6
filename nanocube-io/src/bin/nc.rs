//! The generic worker: loads a dataset from stdin into a cube and serves it via HTTP.
//!
//! Accepts `--max=N` and `--report-frequency=N` (or `--rf=N`), see
//! [ingest](nanocube::ingest).
use std::io::Read;
use std::sync::Arc;

use anyhow::Context;
use nanocube::builder::Builder;
use nanocube::cube::flat::FlatCube;
use nanocube::cube::Cube;
use nanocube::ingest::{ingest, Options};
use nanocube::schema::{read_header, DumpFileDescription, Schema};
use nanocube::server::Server;

#[cfg(not(target_env = "msvc"))]
use jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

#[cfg(not(target_env = "msvc"))]
fn resident_memory() -> Option<usize> {
    let _ = jemalloc_ctl::epoch::advance();
    jemalloc_ctl::stats::resident::mib()
        .and_then(|mib| mib.read())
        .ok()
}

#[cfg(target_env = "msvc")]
fn resident_memory() -> Option<usize> {
    None
}

fn load(options: &Options) -> anyhow::Result<FlatCube> {
    let stdin = std::io::stdin();
    let mut input = stdin.lock();

    let header = read_header(&mut input)?;
    let description = DumpFileDescription::parse(&header).context("Invalid dataset header")?;
    let mut cube = FlatCube::new(Schema::new(description)?)?;

    let reader: &mut dyn Read = &mut input;
    let _ = ingest(&mut cube, reader, options, &resident_memory)?;

    Ok(cube)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Build a platform and enable all features...
    let platform = Builder::new().enable_all().build().await;

    // Load the dataset without blocking the event loop...
    let options = Options::parse(std::env::args().skip(1));
    let cube = tokio::task::spawn_blocking(move || load(&options)).await??;
    log::info!("{}", cube.report());

    // Register the endpoints and serve...
    let _ = nanocube::service::install(&platform, Arc::new(cube));
    platform.require::<Server>().event_loop().await
}
