use async_trait::async_trait;
use tracing::{info, warn};

use crate::error::{AutomatonError, Result};
use crate::plugins::{Notifier, PluginConfig, PluginContext};
use crate::workflow::{Notification, NotificationKind};

/// Writes notifications to the log.
#[derive(Debug)]
pub struct LogNotifier {
    id: String,
}

impl LogNotifier {
    pub fn new(id: &str) -> Self {
        Self { id: id.to_string() }
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    fn id(&self) -> &str {
        &self.id
    }

    async fn notify(&self, notification: &Notification) -> Result<()> {
        match notification.kind {
            NotificationKind::Info => info!(notifier = %self.id, "{}", notification.message),
            NotificationKind::Warning => warn!(notifier = %self.id, "{}", notification.message),
        }
        Ok(())
    }
}

/// POSTs each notification as JSON to `url`.
#[derive(Debug)]
pub struct WebhookNotifier {
    id: String,
    url: String,
    http: reqwest::Client,
}

impl WebhookNotifier {
    pub fn from_config(config: &PluginConfig, context: &PluginContext) -> Result<Self> {
        let url = config.require_str("url")?;
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(AutomatonError::Plugin(format!(
                "`{}` (webhook) url must be http(s): {url}",
                config.id
            )));
        }
        Ok(Self {
            id: config.id.clone(),
            url: url.to_string(),
            http: context.http.clone(),
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn id(&self) -> &str {
        &self.id
    }

    async fn notify(&self, notification: &Notification) -> Result<()> {
        let response = self
            .http
            .post(&self.url)
            .json(notification)
            .send()
            .await
            .map_err(|e| AutomatonError::Notification(format!("{}: {e}", self.id)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AutomatonError::Notification(format!(
                "{} answered {}",
                self.url,
                status.as_u16()
            )));
        }
        Ok(())
    }
}
