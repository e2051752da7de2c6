//! Loads the records of a dump file into a cube.
//!
//! Records are read one by one until the input is exhausted or the configured maximum is
//! reached. Every `report_frequency` records a progress line is logged which contains the number
//! of records, the resident memory of the process and the elapsed time.
//!
//! The options are given as command line arguments of the worker:
//!
//! | Argument                  | Meaning                                              |
//! |---------------------------|------------------------------------------------------|
//! | `--max=N`                 | Stops after N records (0 or absent: no limit)        |
//! | `--report-frequency=N`    | Logs progress every N records (0: no progress lines) |
//! | `--rf=N`                  | Shorthand for `--report-frequency`                   |
//!
//! Unknown or malformed arguments are ignored.
use std::io::Read;
use std::time::Instant;

use crate::cube::Cube;
use crate::fmt::{format_seconds, format_size};

/// Logs a progress line every this many records unless configured otherwise.
pub const DEFAULT_REPORT_FREQUENCY: u64 = 100_000;

/// Controls how records are ingested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Options {
    /// Stops after this many records.
    pub max_points: Option<u64>,
    /// Logs a progress line every this many records. Zero disables progress lines.
    pub report_frequency: u64,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            max_points: None,
            report_frequency: DEFAULT_REPORT_FREQUENCY,
        }
    }
}

impl Options {
    /// Parses the given command line arguments.
    ///
    /// ```
    /// # use nanocube::ingest::Options;
    /// let options = Options::parse(["--max=100", "--rf=10", "--verbose"]);
    /// assert_eq!(options.max_points, Some(100));
    /// assert_eq!(options.report_frequency, 10);
    /// ```
    pub fn parse<I, S>(args: I) -> Options
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut options = Options::default();
        for arg in args {
            let arg = arg.as_ref();
            let (key, value) = match arg.split_once('=') {
                Some(pair) => pair,
                None => continue,
            };

            let value = match value.parse::<u64>() {
                Ok(value) => value,
                Err(_) => {
                    log::warn!("Ignoring malformed argument: {}", arg);
                    continue;
                }
            };

            match key {
                "--max" => options.max_points = Some(value).filter(|max| *max > 0),
                "--report-frequency" | "--rf" => options.report_frequency = value,
                _ => log::debug!("Ignoring unknown argument: {}", arg),
            }
        }

        options
    }
}

/// Adds all records of the given reader to the cube.
///
/// **resident_memory** reports the resident memory of the process, if available. Returns the
/// number of records added.
pub fn ingest(
    cube: &mut dyn Cube,
    reader: &mut dyn Read,
    options: &Options,
    resident_memory: &dyn Fn() -> Option<usize>,
) -> anyhow::Result<u64> {
    let watch = Instant::now();
    // Sampled outside of the log macro which skips its arguments if no logger is installed.
    let report = |count: u64| {
        let memory = resident_memory()
            .map(format_size)
            .unwrap_or_else(|| "n/a".to_owned());
        log::info!(
            "count: {:>10} mem. res: {:>10} time(s): {:>10}",
            count,
            memory,
            format_seconds(watch.elapsed())
        );
    };

    let mut count = 0;
    log::info!("Reading records...");
    while options.max_points.map_or(true, |max| count < max) {
        if !cube.add(reader)? {
            break;
        }

        count += 1;
        if options.report_frequency > 0 && count % options.report_frequency == 0 {
            report(count);
        }
    }

    report(count);
    log::info!("Number of records inserted: {}", count);

    Ok(count)
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::io::Cursor;

    use crate::cube::flat::FlatCube;
    use crate::cube::Cube;
    use crate::ingest::{ingest, Options, DEFAULT_REPORT_FREQUENCY};
    use crate::schema::{DumpFileDescription, Schema};

    fn cube() -> FlatCube {
        let description = DumpFileDescription::parse(
            "field: crime nc_dim_cat_1\nfield: time nc_dim_time_2\nfield: count nc_var_uint_4",
        )
        .unwrap();
        FlatCube::new(Schema::new(description).unwrap()).unwrap()
    }

    fn records(count: usize) -> Vec<u8> {
        let mut data = Vec::new();
        for index in 0..count {
            data.push((index % 3) as u8);
            data.extend_from_slice(&(index as u16).to_le_bytes());
            data.extend_from_slice(&1_u32.to_le_bytes());
        }
        data
    }

    #[test]
    fn options_are_parsed() {
        assert_eq!(Options::parse(Vec::<String>::new()), Options::default());
        assert_eq!(
            Options::default().report_frequency,
            DEFAULT_REPORT_FREQUENCY
        );

        let options = Options::parse(["--max=5", "--report-frequency=2"]);
        assert_eq!(options.max_points, Some(5));
        assert_eq!(options.report_frequency, 2);

        let options = Options::parse(["--max=0", "--rf=0"]);
        assert_eq!(options.max_points, None);
        assert_eq!(options.report_frequency, 0);
    }

    #[test]
    fn malformed_options_are_ignored() {
        let options = Options::parse(["--max=lots", "--rf", "--unknown=3", "plain"]);
        assert_eq!(options, Options::default());
    }

    #[test]
    fn ingestion_stops_at_the_maximum() {
        let mut cube = cube();
        let mut reader = Cursor::new(records(10));
        let count = ingest(
            &mut cube,
            &mut reader,
            &Options::parse(["--max=5"]),
            &|| None,
        )
        .unwrap();

        assert_eq!(count, 5);
        assert_eq!(cube.len(), 5);
    }

    #[test]
    fn ingestion_reads_all_records_and_reports_progress() {
        let calls = Cell::new(0);
        let mut cube = cube();
        let mut reader = Cursor::new(records(7));
        let count = ingest(
            &mut cube,
            &mut reader,
            &Options::parse(["--rf=2"]),
            &|| {
                calls.set(calls.get() + 1);
                Some(4096)
            },
        )
        .unwrap();

        assert_eq!(count, 7);
        assert_eq!(cube.len(), 7);
        // Three progress lines plus the final one.
        assert_eq!(calls.get(), 4);
    }

    #[test]
    fn progress_is_sampled_with_logging_enabled() {
        crate::init_logging();

        let calls = Cell::new(0);
        let mut cube = cube();
        let mut reader = Cursor::new(records(4));
        let count = ingest(
            &mut cube,
            &mut reader,
            &Options::parse(["--rf=1"]),
            &|| {
                calls.set(calls.get() + 1);
                None
            },
        )
        .unwrap();

        assert_eq!(count, 4);
        assert_eq!(calls.get(), 5);
    }
}
