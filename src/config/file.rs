use anyhow::Context;
use serde::Deserialize;
use std::collections::HashMap;

use super::logging::LoggingConfig;

#[derive(Deserialize, Clone, Debug, Default)]
pub struct ConfigFile {
    #[serde(default)]
    pub store: Option<String>,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub fetch: Option<FetchDefinition>,
    #[serde(default)]
    pub scheduler: Option<SchedulerDefinition>,
    pub logging: Option<LoggingConfig>,
    #[serde(default)]
    pub notifications: Vec<NotificationDefinition>,
}

#[derive(Deserialize, Clone, Debug, Default)]
pub struct FetchDefinition {
    #[serde(default)]
    pub timeout: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub max_bytes: Option<u64>,
}

#[derive(Deserialize, Clone, Debug, Default)]
pub struct SchedulerDefinition {
    #[serde(default)]
    pub min_interval: Option<String>,
    #[serde(default)]
    pub poll: Option<String>,
}

#[derive(Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "type")]
pub enum NotificationDefinition {
    #[serde(rename = "log")]
    Log,
    #[serde(rename = "cmd")]
    Cmd { cmd: String },
    #[serde(rename = "webhook")]
    Webhook {
        url: String,
        #[serde(default)]
        method: Option<String>,
        #[serde(default)]
        body: Option<String>,
        #[serde(default)]
        headers: HashMap<String, String>,
    },
    #[serde(rename = "email")]
    Email {
        to: String,
        #[serde(default)]
        subject: Option<String>,
        #[serde(default)]
        body: Option<String>,
        #[serde(default)]
        from: Option<String>,
        #[serde(default)]
        smtp_server: Option<String>,
        #[serde(default)]
        smtp_port: Option<u16>,
        #[serde(default)]
        smtp_username: Option<String>,
        #[serde(default)]
        smtp_password: Option<String>,
    },
}

pub fn read_config_file(path: &str) -> anyhow::Result<ConfigFile> {
    let content = std::fs::read_to_string(path).context("Failed to read config file")?;
    parse_config_str(&content)
}

pub fn parse_config_str(content: &str) -> anyhow::Result<ConfigFile> {
    let config = serde_yml::from_str(content).context("Failed to parse config file")?;
    Ok(config)
}
