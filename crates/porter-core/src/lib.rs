//! porter-core — the decision core of the support bot
//!
//! This crate provides:
//! - Intent resolution: LLM classification with strict reply decoding and a
//!   deterministic keyword fallback
//! - Action dispatch over a closed action vocabulary with failure isolation
//! - An authenticated client for the VPN panel REST API
//! - The caller allow-list gate and the message pipeline tying it together

pub mod access;
pub mod bot;
pub mod dispatch;
pub mod intent;
pub mod llm;
pub mod panel;
pub mod types;

pub use access::AccessPolicy;
pub use bot::SupportBot;
pub use dispatch::Dispatcher;
pub use intent::{IntentResolver, ParseError};
pub use llm::{GeminiClient, TextGenerator};
pub use panel::{AccountRecord, AccountStatus, PanelClient, SubscriptionInfo};
pub use types::{Action, IncomingMessage, OutgoingMessage, ResolvedIntent};
