//! Logging utilities

use std::str::FromStr;

pub use log::{debug, error, info, trace, warn};

/// Initialize the logging system.
///
/// `RUST_LOG` still wins when set; `default_level` is the filter used
/// otherwise. Calling this more than once is harmless.
pub fn init(default_level: &str) {
    let level = parse_level(default_level);

    let result = env_logger::Builder::new()
        .filter_level(level)
        .parse_env("RUST_LOG")
        .try_init();

    if result.is_err() {
        log::debug!("Logger already initialized");
    }
}

/// Parse a level name, falling back to `Info` for unknown names
pub fn parse_level(name: &str) -> log::LevelFilter {
    log::LevelFilter::from_str(name).unwrap_or(log::LevelFilter::Info)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("debug"), log::LevelFilter::Debug);
        assert_eq!(parse_level("WARN"), log::LevelFilter::Warn);
        assert_eq!(parse_level("off"), log::LevelFilter::Off);
        assert_eq!(parse_level("loud"), log::LevelFilter::Info);
    }

    #[test]
    fn test_init_twice() {
        init("trace");
        init("info");
    }
}
