use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono_tz::Tz;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use log::{error, info};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::Client;
use std::collections::HashMap;

use crate::config::file::NotificationDefinition;
use crate::settings::MatchState;
use crate::utils::format_timestamp;

pub const KEYWORD_FOUND_TITLE: &str = "Keyword found!";

/// A user-visible alert about a positive check
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub count: u64,
    pub last_match: String,
    pub url: String,
    pub keyword: String,
}

impl Notification {
    pub fn keyword_found(state: &MatchState, url: &str, keyword: &str, tz: &Tz) -> Self {
        let last_match = state
            .last_match_at
            .map(|ms| format_timestamp(ms, tz))
            .unwrap_or_else(|| "never".to_string());

        Notification {
            title: KEYWORD_FOUND_TITLE.to_string(),
            body: format!(
                "The keyword was found {} times. Last time: {}",
                state.count, last_match
            ),
            count: state.count,
            last_match,
            url: url.to_string(),
            keyword: keyword.to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{failed} of {attempted} notification targets failed: {messages:?}")]
pub struct NotifyError {
    pub attempted: usize,
    pub failed: usize,
    pub messages: Vec<String>,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Delivers notifications to every configured target
pub struct AlertNotifier {
    targets: Vec<NotificationDefinition>,
    client: Client,
}

impl AlertNotifier {
    pub fn new(targets: Vec<NotificationDefinition>) -> Self {
        Self {
            targets,
            client: Client::new(),
        }
    }
}

#[async_trait]
impl Notifier for AlertNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        let mut messages = vec![];

        // A failing target must not prevent delivery to the others
        for target in &self.targets {
            if let Err(e) = send_alert(&self.client, target, notification).await {
                error!("Failed to deliver notification via {}: {:#}", target_name(target), e);
                messages.push(format!("{}: {:#}", target_name(target), e));
            }
        }

        if messages.is_empty() {
            Ok(())
        } else {
            Err(NotifyError {
                attempted: self.targets.len(),
                failed: messages.len(),
                messages,
            })
        }
    }
}

fn target_name(target: &NotificationDefinition) -> &'static str {
    match target {
        NotificationDefinition::Log => "log",
        NotificationDefinition::Cmd { .. } => "cmd",
        NotificationDefinition::Webhook { .. } => "webhook",
        NotificationDefinition::Email { .. } => "email",
    }
}

pub async fn send_alert(
    client: &Client,
    target: &NotificationDefinition,
    notification: &Notification,
) -> Result<()> {
    match target {
        NotificationDefinition::Log => {
            info!("{} {}", notification.title, notification.body);
        }
        NotificationDefinition::Cmd { cmd } => {
            let cmd = template_replace(cmd, notification);
            let output = tokio::process::Command::new("/bin/sh")
                .arg("-c")
                .arg(&cmd)
                .output()
                .await
                .context("Failed to spawn notification command")?;
            if !output.status.success() {
                bail!(
                    "Notification command exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                );
            }
        }
        NotificationDefinition::Webhook {
            url,
            method,
            body,
            headers,
        } => {
            send_webhook(client, url, method.as_deref(), body.as_deref(), headers, notification)
                .await?;
        }
        NotificationDefinition::Email {
            from,
            to,
            subject,
            body,
            smtp_server,
            smtp_port,
            smtp_username,
            smtp_password,
        } => {
            let from = from
                .clone()
                .unwrap_or_else(|| "keyword-watch@localhost".to_string());
            let subject = template_replace(subject.as_deref().unwrap_or("{{ title }}"), notification);
            let body = template_replace(
                body.as_deref().unwrap_or("{{ body }}\n\nPage: {{ url }}"),
                notification,
            );

            let email = Message::builder()
                .from(from.parse()?)
                .to(to.parse()?)
                .subject(subject)
                .body(body)?;

            let server = smtp_server
                .clone()
                .unwrap_or_else(|| "localhost".to_string());
            let port = smtp_port.unwrap_or(25);

            let mut mailer = if server == "localhost" || port == 25 {
                SmtpTransport::builder_dangerous(server).port(port)
            } else {
                SmtpTransport::relay(&server)?.port(port)
            };

            if let (Some(username), Some(password)) = (smtp_username, smtp_password) {
                mailer = mailer.credentials(Credentials::new(username.clone(), password.clone()));
            }

            // SMTP transport is blocking
            let mailer = mailer.build();
            tokio::task::spawn_blocking(move || mailer.send(&email))
                .await
                .context("Email task panicked")??;
            info!("Email sent successfully");
        }
    }
    Ok(())
}

async fn send_webhook(
    client: &Client,
    url: &str,
    method: Option<&str>,
    body: Option<&str>,
    headers: &HashMap<String, String>,
    notification: &Notification,
) -> Result<()> {
    let mut request = match method {
        Some("GET") => client.get(url),
        Some("PUT") => client.put(url),
        Some("PATCH") => client.patch(url),
        Some("DELETE") => client.delete(url),
        _ => client.post(url),
    };

    let mut header_map = HeaderMap::new();
    let payload = match body {
        Some(template) => template_replace(template, notification),
        None => {
            header_map.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            serde_json::json!({
                "title": notification.title,
                "body": notification.body,
                "count": notification.count,
                "last_match": notification.last_match,
                "url": notification.url,
                "keyword": notification.keyword,
            })
            .to_string()
        }
    };

    for (key, value) in headers {
        header_map.insert(
            HeaderName::from_bytes(key.trim().as_bytes())?,
            HeaderValue::from_str(value.trim())?,
        );
    }
    request = request.headers(header_map).body(payload);

    let response = request.send().await.context("Failed to send webhook")?;
    if !response.status().is_success() {
        return Err(anyhow!("Webhook request failed with status: {}", response.status()));
    }
    Ok(())
}

fn template_replace(template: &str, notification: &Notification) -> String {
    let mut result = template.to_string();
    result = result.replace("{{ title }}", &notification.title);
    result = result.replace("{{ body }}", &notification.body);
    result = result.replace("{{ count }}", &notification.count.to_string());
    result = result.replace("{{ last_match }}", &notification.last_match);
    result = result.replace("{{ url }}", &notification.url);
    result = result.replace("{{ keyword }}", &notification.keyword);
    result
}
