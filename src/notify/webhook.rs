// pgbackup/src/notify/webhook.rs
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

use super::{NotificationChannel, NotificationPayload};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const USER_AGENT: &str = concat!("pgbackup/", env!("CARGO_PKG_VERSION"));

const COLOR_SUCCESS: u32 = 5_763_719;
const COLOR_FAILURE: u32 = 15_548_997;
const FOOTER: &str = "PostgreSQL Backup Job";

/// Posts a Discord-compatible embed to an HTTP webhook.
#[derive(Debug, Clone)]
pub struct WebhookChannel {
    client: reqwest::Client,
    url: String,
}

impl WebhookChannel {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to build HTTP client for webhook")?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl NotificationChannel for WebhookChannel {
    async fn send(&self, payload: &NotificationPayload) -> Result<()> {
        self.client
            .post(&self.url)
            .json(&render_embed(payload))
            .send()
            .await
            .context("Failed to reach webhook")?
            .error_for_status()
            .context("Webhook rejected the notification")?;
        Ok(())
    }
}

/// Webhook request body.
#[derive(Debug, Serialize)]
pub struct WebhookMessage {
    pub embeds: Vec<Embed>,
}

#[derive(Debug, Serialize)]
pub struct Embed {
    pub title: &'static str,
    pub color: u32,
    pub fields: Vec<EmbedField>,
    pub footer: EmbedFooter,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
pub struct EmbedField {
    pub name: &'static str,
    pub value: String,
    pub inline: bool,
}

#[derive(Debug, Serialize)]
pub struct EmbedFooter {
    pub text: String,
}

fn field(name: &'static str, value: impl Into<String>, inline: bool) -> EmbedField {
    EmbedField {
        name,
        value: value.into(),
        inline,
    }
}

/// One embed describing the run.
pub fn render_embed(payload: &NotificationPayload) -> WebhookMessage {
    let or_na = |v: &Option<String>| v.clone().unwrap_or_else(|| "N/A".to_string());

    let mut fields = vec![field("Database", &payload.database, true)];
    let (title, color) = if payload.succeeded {
        fields.push(field("Backup File", or_na(&payload.artifact_name), false));
        let size = match (&payload.size_human, payload.size_bytes) {
            (Some(human), Some(bytes)) => format!("{human} ({bytes} bytes)"),
            _ => "N/A".to_string(),
        };
        fields.push(field("Backup Size", size, true));
        fields.push(field("Raw Size", or_na(&payload.raw_size_human), true));
        fields.push(field("Backup Time", or_na(&payload.backup_time), true));
        fields.push(field("Storage", &payload.storage, true));
        if let Some(key) = &payload.remote_key {
            fields.push(field("Remote Key", key, false));
        }
        if let Some(digest) = &payload.sha256 {
            fields.push(field("SHA-256", digest, false));
        }
        ("Backup Successful", COLOR_SUCCESS)
    } else {
        fields.push(field(
            "Error",
            payload.error.as_deref().unwrap_or("Unknown error"),
            false,
        ));
        fields.push(field(
            "Step",
            payload.failed_stage.as_deref().unwrap_or("Unknown"),
            true,
        ));
        ("Backup Failed", COLOR_FAILURE)
    };
    fields.push(field("Duration", format!("{:.1}s", payload.duration_secs), true));
    if let Some(verification) = &payload.verification {
        fields.push(field("Verification", verification, false));
    }

    WebhookMessage {
        embeds: vec![Embed {
            title,
            color,
            fields,
            footer: EmbedFooter {
                text: format!("{FOOTER} | run {}", payload.run_id),
            },
            timestamp: payload.timestamp.clone(),
        }],
    }
}
