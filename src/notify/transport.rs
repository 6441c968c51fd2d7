// src/notify/transport.rs

use std::time::Duration;

use reqwest::header::AUTHORIZATION;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::config::TransportSection;
use crate::errors::{CardwatchError, Result};
use crate::notify::{NotificationTransport, Payload, SendFuture};
use crate::types::{SubscriberKind, SubscriberTarget};

/// Writes every delivery to the log. Always succeeds.
#[derive(Debug, Clone, Default)]
pub struct LogTransport;

impl NotificationTransport for LogTransport {
    fn send<'a>(&'a self, target: &'a SubscriberTarget, payload: &'a Payload) -> SendFuture<'a> {
        Box::pin(async move {
            match payload {
                Payload::Image { path, caption } => {
                    info!(target = %target, path = ?path, caption = ?caption, "deliver image");
                }
                Payload::Text(text) => {
                    info!(target = %target, text = %text, "deliver text");
                }
            }
            Ok(())
        })
    }
}

/// OneBot v11 HTTP API (`send_group_msg` / `send_private_msg`).
#[derive(Debug, Clone)]
pub struct OneBotTransport {
    http: reqwest::Client,
    endpoint: String,
    access_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OneBotResponse {
    #[serde(default)]
    status: String,
    #[serde(default)]
    retcode: i64,
    #[serde(default)]
    message: Option<String>,
}

impl OneBotTransport {
    pub fn new(cfg: &TransportSection, request_timeout: Duration) -> Result<Self> {
        let endpoint = cfg
            .endpoint
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .ok_or_else(|| {
                CardwatchError::ConfigError("[transport].endpoint is not set".to_string())
            })?;

        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| CardwatchError::ConfigError(format!("building HTTP client: {e}")))?;

        Ok(Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            access_token: cfg.access_token.clone().filter(|t| !t.trim().is_empty()),
        })
    }

    async fn post(&self, target: &SubscriberTarget, message: String) -> Result<()> {
        let (action, id_field) = match target.kind {
            SubscriberKind::Group => ("send_group_msg", "group_id"),
            SubscriberKind::Private => ("send_private_msg", "user_id"),
        };
        let url = format!("{}/{action}", self.endpoint);

        let mut body = json!({ "message": message });
        body[id_field] = origin_value(&target.origin_id);

        let mut req = self.http.post(&url).json(&body);
        if let Some(token) = &self.access_token {
            req = req.header(AUTHORIZATION, format!("Bearer {token}"));
        }

        debug!(target = %target, url = %url, "posting OneBot message");
        let resp = req
            .send()
            .await
            .map_err(|e| CardwatchError::Network(format!("posting to {url}: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(CardwatchError::Notification {
                target: target.to_string(),
                reason: format!("HTTP {status}: {text}"),
            });
        }

        let reply: OneBotResponse = resp
            .json()
            .await
            .map_err(|e| CardwatchError::Network(format!("decoding OneBot reply: {e}")))?;
        if reply.retcode != 0 || reply.status == "failed" {
            return Err(CardwatchError::Notification {
                target: target.to_string(),
                reason: format!(
                    "retcode {}: {}",
                    reply.retcode,
                    reply.message.unwrap_or_default()
                ),
            });
        }
        Ok(())
    }
}

impl NotificationTransport for OneBotTransport {
    fn send<'a>(&'a self, target: &'a SubscriberTarget, payload: &'a Payload) -> SendFuture<'a> {
        Box::pin(async move {
            let message = render_message(payload)?;
            self.post(target, message).await
        })
    }
}

/// Numeric ids go out as numbers, anything else as a string.
fn origin_value(origin: &str) -> Value {
    match origin.parse::<i64>() {
        Ok(id) => json!(id),
        Err(_) => json!(origin),
    }
}

/// CQ-code rendering of a payload.
pub fn render_message(payload: &Payload) -> Result<String> {
    match payload {
        Payload::Text(text) => Ok(text.clone()),
        Payload::Image { path, caption } => {
            let abs = std::path::absolute(path)?;
            let image = format!("[CQ:image,file=file://{}]", abs.display());
            Ok(match caption {
                Some(caption) if !caption.is_empty() => format!("{caption}\n{image}"),
                _ => image,
            })
        }
    }
}
