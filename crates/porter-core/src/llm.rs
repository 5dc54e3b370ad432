//! LLM client for intent classification (Google Gemini)

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, error};

/// Seam to the hosted LLM. The returned text is untrusted: it may be prose,
/// malformed JSON, or fenced code, and callers must degrade gracefully.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String>;
}

/// Gemini `generateContent` client.
pub struct GeminiClient {
    client: Client,
    api_key: String,
    model: String,
    max_tokens: u32,
    base_url: String,
}

impl std::fmt::Debug for GeminiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiClient")
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

impl GeminiClient {
    /// Create a new client. Requests are bounded at 30 seconds so a hung
    /// upstream stalls only the message being processed.
    pub fn new(api_key: String, model: String, max_tokens: u32) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            client,
            api_key,
            model,
            max_tokens,
            base_url: "https://generativelanguage.googleapis.com".to_string(),
        })
    }

    /// Set a custom base URL (e.g. for proxies or tests).
    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    /// Probe the model with a trivial generation. Used by the status command.
    pub async fn check_status(&self) -> bool {
        match self.generate("ping").await {
            Ok(text) => !text.is_empty(),
            Err(e) => {
                error!("LLM status probe failed: {e:#}");
                false
            }
        }
    }
}

#[async_trait]
impl TextGenerator for GeminiClient {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        );

        let body = serde_json::json!({
            "contents": [{
                "role": "user",
                "parts": [{"text": prompt}],
            }],
            "generationConfig": {
                "maxOutputTokens": self.max_tokens,
            },
        });

        debug!("Gemini request: model={}", self.model);

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .context("failed to send request to Gemini API")?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(anyhow!(
                "Gemini API request failed with status {status}: {error_text}"
            ));
        }

        let api_response: GenerateResponse = response
            .json()
            .await
            .context("failed to parse Gemini API response")?;

        let text = api_response.text();
        if text.trim().is_empty() {
            return Err(anyhow!("Gemini returned no usable text"));
        }

        debug!("Gemini response: {} chars", text.len());
        Ok(text)
    }
}

// ── Gemini wire types ──

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

impl GenerateResponse {
    /// Concatenated text parts of the first candidate.
    fn text(&self) -> String {
        self.candidates
            .first()
            .map(|c| {
                c.content
                    .parts
                    .iter()
                    .filter_map(|p| p.text.as_deref())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default()
    }
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Debug, Default, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::MockServer;

    fn client_for(server: &MockServer) -> GeminiClient {
        GeminiClient::new("test-key".to_string(), "gemini-1.5-flash".to_string(), 256)
            .unwrap()
            .with_base_url(server.base_url())
    }

    #[test]
    fn test_debug_hides_key() {
        let client =
            GeminiClient::new("AIza-secret".to_string(), "gemini-1.5-flash".to_string(), 256)
                .unwrap();
        let debug = format!("{client:?}");
        assert!(!debug.contains("AIza-secret"));
    }

    #[test]
    fn test_response_text_concatenates_parts() {
        let raw = serde_json::json!({
            "candidates": [{
                "content": {"parts": [{"text": "Hello "}, {"text": "world"}]}
            }]
        });
        let resp: GenerateResponse = serde_json::from_value(raw).unwrap();
        assert_eq!(resp.text(), "Hello world");
    }

    #[test]
    fn test_response_text_empty_candidates() {
        let resp: GenerateResponse = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(resp.text(), "");
    }

    #[tokio::test]
    async fn test_generate_returns_text() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(httpmock::Method::POST)
                .path("/v1beta/models/gemini-1.5-flash:generateContent");
            then.status(200).header("content-type", "application/json")
                .body((serde_json::json!({
                "candidates": [{
                    "content": {"parts": [{"text": "{\"response\":\"hi\"}"}]}
                }]
            })).to_string());
        });

        let client = client_for(&server);
        let text = client.generate("hello").await.unwrap();
        assert_eq!(text, "{\"response\":\"hi\"}");
        mock.assert_calls(1);
    }

    #[tokio::test]
    async fn test_generate_error_on_http_failure() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(httpmock::Method::POST);
            then.status(500).body("boom");
        });

        let client = client_for(&server);
        assert!(client.generate("hello").await.is_err());
    }

    #[tokio::test]
    async fn test_generate_error_on_empty_reply() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(httpmock::Method::POST);
            then.status(200)
                .header("content-type", "application/json")
                .body((serde_json::json!({"candidates": []})).to_string());
        });

        let client = client_for(&server);
        assert!(client.generate("hello").await.is_err());
    }
}
