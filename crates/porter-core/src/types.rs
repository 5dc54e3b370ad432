//! Shared types for porter-core

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Account operation a user message can resolve to.
///
/// The model tags its reply with one of these; anything it invents beyond
/// this vocabulary collapses to `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    #[default]
    None,
    RequestAccount,
    CheckAccount,
    GetConfig,
    RenewAccount,
    HelpSetup,
    HelpTroubleshoot,
    ContactSupport,
}

impl Action {
    /// Parse the model's action tag. Unrecognized or empty tags map to `None`.
    pub fn parse(tag: &str) -> Self {
        match tag.trim() {
            "REQUEST_ACCOUNT" => Self::RequestAccount,
            "CHECK_ACCOUNT" => Self::CheckAccount,
            "GET_CONFIG" => Self::GetConfig,
            "RENEW_ACCOUNT" => Self::RenewAccount,
            "HELP_SETUP" => Self::HelpSetup,
            "HELP_TROUBLESHOOT" => Self::HelpTroubleshoot,
            "CONTACT_SUPPORT" => Self::ContactSupport,
            _ => Self::None,
        }
    }

    /// Whether this action operates on a specific account and therefore
    /// needs a `username` parameter before the panel can be called.
    pub fn requires_username(&self) -> bool {
        matches!(
            self,
            Self::CheckAccount | Self::GetConfig | Self::RenewAccount
        )
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = match self {
            Self::None => "NONE",
            Self::RequestAccount => "REQUEST_ACCOUNT",
            Self::CheckAccount => "CHECK_ACCOUNT",
            Self::GetConfig => "GET_CONFIG",
            Self::RenewAccount => "RENEW_ACCOUNT",
            Self::HelpSetup => "HELP_SETUP",
            Self::HelpTroubleshoot => "HELP_TROUBLESHOOT",
            Self::ContactSupport => "CONTACT_SUPPORT",
        };
        write!(f, "{tag}")
    }
}

/// Outcome of intent resolution for a single user message.
///
/// Created per inbound message, consumed once by the dispatcher, then
/// discarded. `confidence` is advisory and not used for branching yet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedIntent {
    /// Human-readable reply, never empty.
    pub response: String,
    pub action: Action,
    /// Extracted parameters; `username` is the key account-scoped actions use.
    pub parameters: HashMap<String, String>,
    /// Classifier confidence in [0, 1].
    pub confidence: f32,
}

impl ResolvedIntent {
    /// An intent with no follow-up operation, just a reply.
    pub fn plain(response: impl Into<String>, confidence: f32) -> Self {
        Self {
            response: response.into(),
            action: Action::None,
            parameters: HashMap::new(),
            confidence,
        }
    }

    /// The `username` parameter, if present and non-empty.
    pub fn username(&self) -> Option<&str> {
        self.parameters
            .get("username")
            .map(String::as_str)
            .filter(|u| !u.trim().is_empty())
    }
}

/// Inbound message from the messaging gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncomingMessage {
    pub id: String,
    /// Identity of the human sender, used for the allow-list check.
    pub caller: i64,
    /// Conversation the reply should go back to.
    pub chat: i64,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// Outbound reply to be delivered by the messaging gateway.
///
/// `text` may use lightweight markup only: `*bold*` and `` `code` `` spans.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutgoingMessage {
    pub chat: i64,
    pub text: String,
}
