//! Formats durations and memory sizes for log output and statistics.
use std::time::Duration;

const SIZE_UNITS: [&str; 6] = ["bytes", "KiB", "MiB", "GiB", "TiB", "PiB"];

/// Picks the number of decimals so that roughly three significant digits remain.
fn with_precision(value: f64, unit: &str) -> String {
    if value < 10. {
        format!("{:.2} {}", value, unit)
    } else if value < 100. {
        format!("{:.1} {}", value, unit)
    } else {
        format!("{:.0} {}", value, unit)
    }
}

/// Formats a duration given in microseconds using the most suitable unit.
///
/// # Examples
///
/// ```
/// # use nanocube::fmt::format_micros;
/// assert_eq!(format_micros(250), "250 us");
/// assert_eq!(format_micros(8_192), "8.19 ms");
/// assert_eq!(format_micros(32_768), "32.8 ms");
/// assert_eq!(format_micros(128_123), "128 ms");
/// assert_eq!(format_micros(1_128_123), "1.13 s");
/// assert_eq!(format_micros(101_000_000), "101 s");
/// ```
pub fn format_micros(micros: u64) -> String {
    if micros < 1_000 {
        format!("{} us", micros)
    } else if micros < 1_000_000 {
        with_precision(micros as f64 / 1_000., "ms")
    } else {
        with_precision(micros as f64 / 1_000_000., "s")
    }
}

/// Formats a size in bytes using binary units.
///
/// # Examples
///
/// ```
/// # use nanocube::fmt::format_size;
/// assert_eq!(format_size(0), "0 bytes");
/// assert_eq!(format_size(1), "1 byte");
/// assert_eq!(format_size(1023), "1023 bytes");
/// assert_eq!(format_size(8_734), "8.53 KiB");
/// assert_eq!(format_size(87_340_000), "83.3 MiB");
/// assert_eq!(format_size(873_400_000_000), "813 GiB");
/// ```
pub fn format_size(bytes: usize) -> String {
    if bytes == 1 {
        return "1 byte".to_owned();
    }
    if bytes < 1024 {
        return format!("{} bytes", bytes);
    }

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024. && unit < SIZE_UNITS.len() - 1 {
        value /= 1024.;
        unit += 1;
    }

    with_precision(value, SIZE_UNITS[unit])
}

/// Formats an elapsed duration in seconds with millisecond precision.
///
/// ```
/// # use std::time::Duration;
/// # use nanocube::fmt::format_seconds;
/// assert_eq!(format_seconds(Duration::from_millis(12_345)), "12.345");
/// ```
pub fn format_seconds(duration: Duration) -> String {
    format!("{:.3}", duration.as_secs_f64())
}
