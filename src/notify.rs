//! Telegram delivery
//!
//! Fire-and-forget: a failed send is logged and reported as undelivered, it
//! never fails the run.

use std::time::Duration;

use serde::Serialize;
use tracing::warn;

use crate::config::TelegramTarget;

const SEND_TIMEOUT: Duration = Duration::from_secs(5);

#[allow(async_fn_in_trait)]
pub trait Notify {
    /// Deliver one message; returns whether delivery succeeded.
    async fn send(&self, text: &str) -> bool;
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'static str,
}

pub struct TelegramNotifier {
    client: reqwest::Client,
    target: TelegramTarget,
    base_url: String,
}

impl TelegramNotifier {
    pub fn new(target: TelegramTarget) -> Self {
        let client = reqwest::Client::builder()
            .timeout(SEND_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            target,
            base_url: "https://api.telegram.org".to_string(),
        }
    }

    #[cfg(test)]
    fn with_base_url(target: TelegramTarget, base_url: impl Into<String>) -> Self {
        let mut notifier = Self::new(target);
        notifier.base_url = base_url.into();
        notifier
    }
}

impl Notify for TelegramNotifier {
    async fn send(&self, text: &str) -> bool {
        let url = format!("{}/bot{}/sendMessage", self.base_url, self.target.bot_token);
        let body = SendMessage {
            chat_id: &self.target.chat_id,
            text,
            parse_mode: "HTML",
        };

        match self.client.post(&url).json(&body).send().await {
            Ok(resp) if resp.status().is_success() => true,
            Ok(resp) => {
                warn!(status = %resp.status(), "telegram rejected the message");
                false
            }
            Err(err) => {
                warn!(error = %err, "telegram send failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_message_serialization() {
        let body = SendMessage {
            chat_id: "12345",
            text: "🎉 <b>done</b>",
            parse_mode: "HTML",
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["chat_id"], "12345");
        assert_eq!(json["parse_mode"], "HTML");
        assert_eq!(json["text"], "🎉 <b>done</b>");
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_reports_undelivered() {
        let target = TelegramTarget {
            bot_token: "token".to_string(),
            chat_id: "1".to_string(),
        };
        // Reserved TEST-NET-1 address, nothing listens there.
        let notifier = TelegramNotifier::with_base_url(target, "http://192.0.2.1:9");
        assert!(!notifier.send("hello").await);
    }
}
