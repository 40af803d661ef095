//! Alert sink delivering stuck alerts to a webhook

use anyhow::{Context, Result};
use async_trait::async_trait;
use monitor_lib::detection::{AlertSink, StuckAlert};
use reqwest::Client;
use std::time::Duration;

/// Posts each alert as JSON to a webhook endpoint
pub struct WebhookAlertSink {
    client: Client,
    url: String,
}

impl WebhookAlertSink {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl AlertSink for WebhookAlertSink {
    async fn send(&self, alert: &StuckAlert) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(alert)
            .send()
            .await
            .context("Failed to send alert")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Webhook error ({}): {}", status, body);
        }

        Ok(())
    }
}
