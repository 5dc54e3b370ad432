//! Intent resolution for inbound support messages
//!
//! Turns free-form user text into a `ResolvedIntent` via the LLM, with two
//! degradation layers: a strict decode of the model's JSON reply, and a
//! deterministic keyword fallback when the reply cannot be parsed. The
//! resolver never fails outward; every path ends in a usable reply.

use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::llm::TextGenerator;
use crate::types::{Action, ResolvedIntent};

/// Fixed instruction prepended to every classification request. Enumerates
/// the action vocabulary and pins the JSON output contract.
const SYSTEM_PROMPT: &str = r#"You are a customer support assistant for a VPN service. Help users with the operations below.

Available operations:
- REQUEST_ACCOUNT: request a new account
- CHECK_ACCOUNT: check account status (requires username)
- RENEW_ACCOUNT: renew a subscription (requires username)
- GET_CONFIG: fetch the connection config (requires username)
- HELP_SETUP: installation and setup guidance
- HELP_TROUBLESHOOT: troubleshoot connection problems
- CONTACT_SUPPORT: hand off to a human
- NONE: reply only, no operation

Rules:
1. Always answer in the user's language. Be friendly and polite.
2. If an operation needs a username and none was given, ask for it.
3. Route complex problems to human support.
4. Never ask for passwords or other secrets.

Respond with JSON only, in this shape:
{
  "response": "friendly reply to the user",
  "action": "one of the operations above",
  "parameters": {
    "username": "username, if the user gave one"
  },
  "confidence": 0.95
}"#;

const APOLOGY: &str = "Sorry, the assistant is having trouble right now. \
Please try again in a moment, or contact support.";

const GREETING: &str = "Hi! I'm the VPN support assistant.\n\n\
I can help you with:\n\
- requesting a new account\n\
- checking your account status\n\
- fetching your connection config\n\
- renewing your subscription\n\
- installation guidance\n\n\
Just ask!";

/// Keyword sets for the rule-based fallback, in priority order.
/// The first category with a hit wins; there is no scoring.
const FALLBACK_RULES: &[(Action, &[&str])] = &[
    (
        Action::RequestAccount,
        &["new account", "create an account", "sign up", "register"],
    ),
    (
        Action::CheckAccount,
        &["status", "check", "usage", "traffic"],
    ),
    (
        Action::GetConfig,
        &["config", "subscription link", "connection file", "link"],
    ),
    (
        Action::RenewAccount,
        &["renew", "extend", "recharge", "top up"],
    ),
    (
        Action::HelpSetup,
        &["install", "setup", "set up", "how do i", "guide"],
    ),
];

/// Why the model's reply could not be used as-is.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("reply is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("reply JSON has no usable `response` field")]
    MissingResponse,
}

/// Resolves user messages into intents. Owns the LLM seam; cheap to share.
pub struct IntentResolver {
    llm: Arc<dyn TextGenerator>,
}

impl IntentResolver {
    pub fn new(llm: Arc<dyn TextGenerator>) -> Self {
        Self { llm }
    }

    /// Classify one message. Never fails: LLM errors become the apology
    /// reply, unparseable replies fall back to keyword matching.
    pub async fn resolve(&self, message: &str) -> ResolvedIntent {
        let prompt = build_prompt(message);

        let raw = match self.llm.generate(&prompt).await {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) => {
                warn!("model returned empty text");
                return ResolvedIntent::plain(APOLOGY, 0.5);
            }
            Err(e) => {
                warn!("model call failed: {e:#}");
                return ResolvedIntent::plain(APOLOGY, 0.5);
            }
        };

        match parse_reply(&raw) {
            Ok(intent) => {
                debug!(action = %intent.action, confidence = intent.confidence, "model classified message");
                intent
            }
            Err(e) => {
                warn!("unparseable model reply ({e}), using keyword fallback");
                keyword_fallback(message, &raw)
            }
        }
    }
}

fn build_prompt(message: &str) -> String {
    format!("{SYSTEM_PROMPT}\n\nUser message: \"{message}\"\n\nJSON:")
}

/// Strict decode of the model reply. Must be a JSON object with a non-empty
/// string `response`; `action`, `parameters` and `confidence` are defaulted.
/// Non-string parameter values are dropped.
pub fn parse_reply(text: &str) -> Result<ResolvedIntent, ParseError> {
    let body = strip_code_fences(text);
    let value: serde_json::Value = serde_json::from_str(body)?;

    let response = value
        .get("response")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or(ParseError::MissingResponse)?;

    let action = value
        .get("action")
        .and_then(|v| v.as_str())
        .map(Action::parse)
        .unwrap_or_default();

    let parameters = value
        .get("parameters")
        .and_then(|v| v.as_object())
        .map(|map| {
            map.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect()
        })
        .unwrap_or_default();

    let confidence = value
        .get("confidence")
        .and_then(|v| v.as_f64())
        .map(|c| c.clamp(0.0, 1.0) as f32)
        .unwrap_or(0.8);

    Ok(ResolvedIntent {
        response: response.to_string(),
        action,
        parameters,
        confidence,
    })
}

/// Strip a markdown code fence (```json or unlabeled) around the reply body.
/// The model is asked for bare JSON but routinely wraps it anyway.
fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    for marker in ["```json", "```"] {
        if let Some(start) = trimmed.find(marker) {
            let body = &trimmed[start + marker.len()..];
            return match body.find("```") {
                Some(end) => body[..end].trim(),
                None => body.trim(),
            };
        }
    }
    trimmed
}

/// Rule-based classification used when the model's reply is unusable.
/// `raw_reply` is the model's original text; the NONE branch reuses it when
/// present so a prose answer still reaches the user.
fn keyword_fallback(message: &str, raw_reply: &str) -> ResolvedIntent {
    let action = detect_intent(message);

    let response = match action {
        Action::RequestAccount => {
            "Your request for a new account has been received.\n\
             Support will contact you shortly to set it up."
        }
        Action::CheckAccount => {
            "To check your account status, please send your username.\n\
             Example: \"account status user123\""
        }
        Action::GetConfig => {
            "To get your connection config, please send your username.\n\
             Example: \"config for user123\""
        }
        Action::RenewAccount => {
            "To renew your subscription, please send your username.\n\
             Example: \"renew user123\""
        }
        Action::HelpSetup => {
            "*VPN setup guide*\n\n\
             *Android:*\n\
             1. Install V2rayNG\n\
             2. Copy your subscription link\n\
             3. Tap + and choose \"Import from Clipboard\"\n\n\
             *iOS:*\n\
             1. Install FairVPN\n\
             2. Copy your subscription link\n\
             3. Tap + and paste it\n\n\
             Need more help? Just ask."
        }
        _ => {
            let raw = raw_reply.trim();
            if raw.is_empty() {
                GREETING
            } else {
                raw
            }
        }
    };

    ResolvedIntent {
        response: response.to_string(),
        action,
        parameters: Default::default(),
        confidence: 0.6,
    }
}

/// First matching keyword category wins, in the fixed priority order
/// REQUEST_ACCOUNT, CHECK_ACCOUNT, GET_CONFIG, RENEW_ACCOUNT, HELP_SETUP.
fn detect_intent(message: &str) -> Action {
    let lower = message.to_lowercase();
    for (action, keywords) in FALLBACK_RULES {
        if keywords.iter().any(|k| lower.contains(k)) {
            return *action;
        }
    }
    Action::None
}
