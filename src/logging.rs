use std::io::Write;
use std::str::FromStr;

use chrono::Local;
use log::{LevelFilter, SetLoggerError};

/// Installs an `env_logger` backend writing timestamped lines to stderr.
/// `RUST_LOG`, when set, takes precedence over `level`.
pub fn init(level: LevelFilter) -> Result<(), SetLoggerError> {
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] {}",
                Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                record.args()
            )
        })
        .try_init()?;
    log::info!("Logging initialized at {}", level);
    Ok(())
}

/// Parses a level name such as `info` or `DEBUG`.
pub fn parse_level(name: &str) -> Result<LevelFilter, String> {
    LevelFilter::from_str(name.trim()).map_err(|_| {
        format!(
            "invalid log level {:?}, expected one of off, error, warn, info, debug, trace",
            name
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_level_names() {
        assert_eq!(parse_level("debug"), Ok(LevelFilter::Debug));
        assert_eq!(parse_level(" WARN "), Ok(LevelFilter::Warn));
        assert!(parse_level("loud").is_err());
    }
}
