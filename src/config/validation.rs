use std::path::Path;
use std::time::Duration;

use crate::config::file::{ConfigFile, NotificationDefinition};
use crate::config::logging::LogOutput;
use crate::config::{
    parse_duration, resolve_timezone, LOCAL_TIMEZONE, MIN_FETCH_TIMEOUT, MIN_POLL,
    MIN_SCHEDULER_INTERVAL,
};

#[derive(Debug, Clone, PartialEq)]
pub enum ValidationResult {
    Error(String),
    Warning(String),
}

fn validate_output_path(path: &str) -> Option<String> {
    let path = Path::new(path);

    // If path exists, it must be a file
    if path.exists() && !path.is_file() {
        return Some(format!("Path '{}' exists but is not a file", path.display()));
    }

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            return Some(format!("Parent directory '{}' does not exist", parent.display()));
        }
    }

    None
}

fn validate_logging_config(conf: &ConfigFile) -> Vec<ValidationResult> {
    let mut result = vec![];

    if let Some(logging) = &conf.logging {
        let valid_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_levels.contains(&logging.level.as_str()) {
            result.push(ValidationResult::Error(format!(
                "Invalid log level '{}'. Must be one of: {}",
                logging.level,
                valid_levels.join(", ")
            )));
        }

        if logging.output == LogOutput::File {
            if let Some(path) = &logging.file {
                if let Some(err) = validate_output_path(&path.to_string_lossy()) {
                    result.push(ValidationResult::Error(format!("Invalid log file: {}", err)));
                }
            } else {
                result.push(ValidationResult::Warning(
                    "Log output is set to 'file' but no file path specified".to_string(),
                ));
            }
        }
    }

    result
}

fn validate_duration(field: &str, value: &Option<String>, min: Duration) -> Option<ValidationResult> {
    let value = value.as_ref()?;
    match parse_duration(value) {
        Err(e) => Some(ValidationResult::Error(format!("Invalid '{}' format: {}", field, e))),
        Ok(duration) if duration < min => Some(ValidationResult::Error(format!(
            "'{}' must be at least {} ms",
            field,
            min.as_millis()
        ))),
        Ok(_) => None,
    }
}

fn validate_notification(index: usize, def: &NotificationDefinition) -> Vec<ValidationResult> {
    let mut result = vec![];
    let position = index + 1;

    match def {
        NotificationDefinition::Log => {}
        NotificationDefinition::Cmd { cmd } => {
            if cmd.trim().is_empty() {
                result.push(ValidationResult::Error(format!(
                    "Notification {}: Command must not be empty",
                    position
                )));
            }
        }
        NotificationDefinition::Webhook { url, method, .. } => {
            if let Err(e) = reqwest::Url::parse(url) {
                result.push(ValidationResult::Error(format!(
                    "Notification {}: Invalid webhook url '{}': {}",
                    position, url, e
                )));
            }
            if let Some(method) = method {
                let known = ["GET", "POST", "PUT", "PATCH", "DELETE"];
                if !known.contains(&method.as_str()) {
                    result.push(ValidationResult::Warning(format!(
                        "Notification {}: Unknown method '{}', POST will be used",
                        position, method
                    )));
                }
            }
        }
        NotificationDefinition::Email { to, from, .. } => {
            if to.parse::<lettre::message::Mailbox>().is_err() {
                result.push(ValidationResult::Error(format!(
                    "Notification {}: Invalid recipient address '{}'",
                    position, to
                )));
            }
            if let Some(from) = from {
                if from.parse::<lettre::message::Mailbox>().is_err() {
                    result.push(ValidationResult::Error(format!(
                        "Notification {}: Invalid sender address '{}'",
                        position, from
                    )));
                }
            }
        }
    }

    result
}

pub fn validate_config(conf: &ConfigFile) -> Vec<ValidationResult> {
    let mut result = vec![];

    if let Some(tz_name) = &conf.timezone {
        if resolve_timezone(Some(tz_name)).is_err() {
            result.push(ValidationResult::Error(format!("Unable to parse timezone: '{}'", tz_name)));
        } else if tz_name == LOCAL_TIMEZONE {
            result.push(ValidationResult::Warning(
                "Local timezone: times in the repeated DST hour cannot be entered back".to_string(),
            ));
        }
    }

    if let Some(store) = &conf.store {
        if store.trim().is_empty() {
            result.push(ValidationResult::Error("Store path must not be empty".to_string()));
        } else if let Some(err) = validate_output_path(store) {
            result.push(ValidationResult::Error(format!("Invalid store path: {}", err)));
        }
    }

    if let Some(fetch) = &conf.fetch {
        result.extend(validate_duration("fetch.timeout", &fetch.timeout, MIN_FETCH_TIMEOUT));
        if fetch.max_bytes == Some(0) {
            result.push(ValidationResult::Error("'fetch.max_bytes' must be positive".to_string()));
        }
    }

    if let Some(scheduler) = &conf.scheduler {
        result.extend(validate_duration(
            "scheduler.min_interval",
            &scheduler.min_interval,
            MIN_SCHEDULER_INTERVAL,
        ));
        result.extend(validate_duration("scheduler.poll", &scheduler.poll, MIN_POLL));
    }

    if conf.notifications.is_empty() {
        result.push(ValidationResult::Warning(
            "No notifications configured, matches will only be logged".to_string(),
        ));
    }
    for (i, def) in conf.notifications.iter().enumerate() {
        result.extend(validate_notification(i, def));
    }

    result.extend(validate_logging_config(conf));

    result
}
