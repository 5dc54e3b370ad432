//! Telegram channel adapter using Bot API long polling

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::Utc;
use porter_core::{IncomingMessage, OutgoingMessage};
use serde_json::{Value, json};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::bus::MessageChannel;

/// Long-poll wait passed to getUpdates, in seconds. The HTTP client timeout
/// must sit above it.
const POLL_TIMEOUT_SECS: u64 = 25;

/// Pause before retrying after a failed poll.
const RETRY_DELAY: Duration = Duration::from_secs(5);

/// Telegram transport. Receives text messages via long polling and sends
/// replies with legacy Markdown formatting.
pub struct TelegramChannel {
    token: String,
    http: reqwest::Client,
    api_base: String,
}

impl std::fmt::Debug for TelegramChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramChannel")
            .field("api_base", &self.api_base)
            .finish()
    }
}

impl TelegramChannel {
    pub fn new(token: String) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(POLL_TIMEOUT_SECS + 10))
            .build()
            .map_err(|e| anyhow!("failed to build HTTP client: {e}"))?;

        Ok(Self {
            token,
            http,
            api_base: "https://api.telegram.org".to_string(),
        })
    }

    /// Set a custom API base URL (e.g. for a local Bot API server or tests).
    pub fn with_api_base(mut self, api_base: String) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    /// Call a Bot API method and return the decoded envelope.
    async fn call(
        http: &reqwest::Client,
        api_base: &str,
        token: &str,
        method: &str,
        payload: &Value,
    ) -> Result<Value> {
        let url = format!("{api_base}/bot{token}/{method}");
        let response = http.post(&url).json(payload).send().await?;

        if !response.status().is_success() {
            return Err(anyhow!(
                "telegram API {} returned HTTP {}",
                method,
                response.status()
            ));
        }

        let body: Value = response.json().await?;
        if body.get("ok").and_then(Value::as_bool) != Some(true) {
            let desc = body
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or("unknown");
            return Err(anyhow!("telegram API {method} error: {desc}"));
        }

        Ok(body)
    }

    /// Extract text messages from a getUpdates reply. Returns the messages
    /// plus the next offset to acknowledge everything seen, including
    /// updates we skip.
    fn parse_updates(body: &Value) -> (Vec<IncomingMessage>, Option<i64>) {
        let mut messages = Vec::new();
        let mut next_offset = None;

        let Some(updates) = body.get("result").and_then(Value::as_array) else {
            return (messages, next_offset);
        };

        for update in updates {
            let Some(update_id) = update.get("update_id").and_then(Value::as_i64) else {
                continue;
            };
            next_offset = Some(next_offset.map_or(update_id + 1, |n: i64| n.max(update_id + 1)));

            let Some(message) = update.get("message") else {
                continue;
            };
            let Some(text) = message.get("text").and_then(Value::as_str) else {
                continue;
            };
            if message.pointer("/from/is_bot").and_then(Value::as_bool) == Some(true) {
                continue;
            }
            let (Some(caller), Some(chat)) = (
                message.pointer("/from/id").and_then(Value::as_i64),
                message.pointer("/chat/id").and_then(Value::as_i64),
            ) else {
                continue;
            };

            messages.push(IncomingMessage {
                id: format!("tg-{update_id}"),
                caller,
                chat,
                text: text.to_string(),
                timestamp: Utc::now(),
            });
        }

        (messages, next_offset)
    }
}

#[async_trait]
impl MessageChannel for TelegramChannel {
    async fn start(&self, tx: mpsc::Sender<IncomingMessage>) -> Result<()> {
        if self.token.is_empty() {
            return Err(anyhow!("telegram bot token is empty"));
        }

        // Verify the token before entering the poll loop.
        let me = Self::call(&self.http, &self.api_base, &self.token, "getMe", &json!({})).await?;
        let bot_name = me
            .pointer("/result/username")
            .and_then(Value::as_str)
            .unwrap_or("?");
        info!("telegram bot authenticated as @{bot_name}");

        let http = self.http.clone();
        let api_base = self.api_base.clone();
        let token = self.token.clone();

        tokio::spawn(async move {
            let mut offset: i64 = 0;
            loop {
                let payload = json!({
                    "timeout": POLL_TIMEOUT_SECS,
                    "offset": offset,
                    "allowed_updates": ["message"],
                });

                match Self::call(&http, &api_base, &token, "getUpdates", &payload).await {
                    Ok(body) => {
                        let (messages, next_offset) = Self::parse_updates(&body);
                        if let Some(next) = next_offset {
                            offset = next;
                        }
                        for msg in messages {
                            debug!("telegram update {} from {}", msg.id, msg.caller);
                            if tx.send(msg).await.is_err() {
                                info!("message receiver dropped, stopping telegram poll loop");
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        warn!("telegram poll failed: {e:#}");
                        tokio::time::sleep(RETRY_DELAY).await;
                    }
                }
            }
        });

        Ok(())
    }

    async fn send(&self, msg: OutgoingMessage) -> Result<()> {
        let payload = json!({
            "chat_id": msg.chat,
            "text": msg.text,
            "parse_mode": "Markdown",
        });
        Self::call(
            &self.http,
            &self.api_base,
            &self.token,
            "sendMessage",
            &payload,
        )
        .await?;
        Ok(())
    }

    async fn send_typing(&self, chat: i64) -> Result<()> {
        let payload = json!({
            "chat_id": chat,
            "action": "typing",
        });
        Self::call(
            &self.http,
            &self.api_base,
            &self.token,
            "sendChatAction",
            &payload,
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::Method::POST;
    use httpmock::MockServer;

    #[test]
    fn test_parse_updates_text_message() {
        let body = json!({
            "ok": true,
            "result": [{
                "update_id": 100,
                "message": {
                    "text": "hello",
                    "from": {"id": 42, "is_bot": false},
                    "chat": {"id": 4242},
                }
            }]
        });

        let (messages, next) = TelegramChannel::parse_updates(&body);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].caller, 42);
        assert_eq!(messages[0].chat, 4242);
        assert_eq!(messages[0].text, "hello");
        assert_eq!(messages[0].id, "tg-100");
        assert_eq!(next, Some(101));
    }

    #[test]
    fn test_parse_updates_skips_non_text_but_advances_offset() {
        let body = json!({
            "ok": true,
            "result": [
                {"update_id": 7, "message": {"photo": [], "from": {"id": 1}, "chat": {"id": 1}}},
                {"update_id": 9, "edited_message": {"text": "x"}},
            ]
        });

        let (messages, next) = TelegramChannel::parse_updates(&body);
        assert!(messages.is_empty());
        assert_eq!(next, Some(10));
    }

    #[test]
    fn test_parse_updates_skips_bot_senders() {
        let body = json!({
            "ok": true,
            "result": [{
                "update_id": 1,
                "message": {
                    "text": "beep",
                    "from": {"id": 5, "is_bot": true},
                    "chat": {"id": 5},
                }
            }]
        });

        let (messages, next) = TelegramChannel::parse_updates(&body);
        assert!(messages.is_empty());
        assert_eq!(next, Some(2));
    }

    #[test]
    fn test_parse_updates_empty() {
        let (messages, next) = TelegramChannel::parse_updates(&json!({"ok": true, "result": []}));
        assert!(messages.is_empty());
        assert_eq!(next, None);
    }

    #[tokio::test]
    async fn test_send_posts_message() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/bottest-token/sendMessage");
            then.status(200)
                .header("content-type", "application/json")
                .body((json!({"ok": true, "result": {}})).to_string());
        });

        let channel = TelegramChannel::new("test-token".to_string())
            .unwrap()
            .with_api_base(server.base_url());
        channel
            .send(OutgoingMessage {
                chat: 7,
                text: "*hi*".to_string(),
            })
            .await
            .unwrap();
        mock.assert_calls(1);
    }

    #[tokio::test]
    async fn test_send_surfaces_api_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/bottest-token/sendMessage");
            then.status(200)
                .header("content-type", "application/json")
                .body((json!({"ok": false, "description": "chat not found"})).to_string());
        });

        let channel = TelegramChannel::new("test-token".to_string())
            .unwrap()
            .with_api_base(server.base_url());
        let err = channel
            .send(OutgoingMessage {
                chat: 7,
                text: "hi".to_string(),
            })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("chat not found"));
    }

    #[tokio::test]
    async fn test_start_rejects_empty_token() {
        let channel = TelegramChannel::new(String::new()).unwrap();
        let (tx, _rx) = mpsc::channel(1);
        assert!(channel.start(tx).await.is_err());
    }

    #[tokio::test]
    async fn test_start_verifies_token_and_polls() {
        let server = MockServer::start();
        let get_me = server.mock(|when, then| {
            when.method(POST).path("/bottest-token/getMe");
            then.status(200)
                .header("content-type", "application/json")
                .body((json!({"ok": true, "result": {"username": "porter_bot"}})).to_string());
        });
        server.mock(|when, then| {
            when.method(POST).path("/bottest-token/getUpdates");
            then.status(200).header("content-type", "application/json")
                .body((json!({"ok": true, "result": [{
                "update_id": 1,
                "message": {"text": "hi", "from": {"id": 3}, "chat": {"id": 3}},
            }]})).to_string());
        });

        let channel = TelegramChannel::new("test-token".to_string())
            .unwrap()
            .with_api_base(server.base_url());
        let (tx, mut rx) = mpsc::channel(8);
        channel.start(tx).await.unwrap();
        get_me.assert_calls(1);

        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.text, "hi");
        assert_eq!(msg.caller, 3);
    }
}
