use anyhow::{anyhow, Context, Result};
use crate::config::logging::{LogOutput, LoggingConfig};
use log::LevelFilter;
use std::fs::OpenOptions;
use std::path::PathBuf;

const DEFAULT_LOG_FILE: &str = "/var/log/keyword-watch.log";

pub fn setup_logging(config: &LoggingConfig) -> Result<()> {
    let level = config.level.parse::<LevelFilter>()?;

    match &config.output {
        LogOutput::Stdout => {
            builder(level).init();
        }
        LogOutput::File => {
            let path = config.file.clone().unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_FILE));
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("Failed to open log file '{}'", path.display()))?;

            builder(level)
                .target(env_logger::Target::Pipe(Box::new(file)))
                .init();
        }
        LogOutput::Syslog => {
            let formatter = syslog::Formatter3164 {
                facility: syslog::Facility::LOG_DAEMON,
                hostname: None,
                process: "keyword-watch".into(),
                pid: std::process::id(),
            };

            let logger = syslog::unix(formatter).map_err(|e| anyhow!("Failed to create syslog logger: {}", e))?;
            log::set_boxed_logger(Box::new(syslog::BasicLogger::new(logger)))
                .map(|()| log::set_max_level(level))?;
        }
    }

    Ok(())
}

// Dependencies (hyper, libsql, html5ever) are noisy at debug level
fn builder(level: LevelFilter) -> env_logger::Builder {
    let mut builder = env_logger::Builder::new();
    builder
        .filter_level(level.min(LevelFilter::Warn))
        .filter_module("keyword_watch", level)
        .format_timestamp_secs();
    builder
}
