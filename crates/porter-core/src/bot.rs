//! The support bot pipeline
//!
//! Glues the pieces together for one inbound message: authorization gate,
//! built-in commands, intent resolution, action dispatch. `handle_message`
//! is total — whatever goes wrong downstream, the caller gets a reply and
//! the process keeps serving other messages.

use chrono::Utc;
use std::sync::Arc;
use tracing::info;

use crate::access::AccessPolicy;
use crate::dispatch::Dispatcher;
use crate::intent::IntentResolver;
use crate::llm::TextGenerator;
use crate::panel::PanelClient;
use crate::types::{IncomingMessage, OutgoingMessage};

const DENIED: &str = "Sorry, you are not allowed to use this bot.";

const WELCOME: &str = "*Welcome to VPN support!*\n\n\
I can help you with:\n\
- requesting a new account\n\
- checking your account status\n\
- renewing your subscription\n\
- fetching your connection config\n\
- installation guidance\n\n\
Just ask in plain language.\n\n\
*Examples:*\n\
- \"I'd like a new account\"\n\
- \"what's the status of user123?\"\n\
- \"how do I set this up on my phone?\"";

const HELP: &str = "*How to use this bot*\n\n\
*Commands:*\n\
- /start — introduction\n\
- /help — this guide\n\
- /status — system status\n\n\
*Services:*\n\
- new account: \"I'd like a new account\"\n\
- account status: \"status of [username]\"\n\
- renewal: \"renew [username]\"\n\
- config: \"config for [username]\"\n\
- setup help: \"how do I install this?\"\n\n\
Just ask in plain language.";

/// The full inbound-message pipeline.
pub struct SupportBot {
    access: AccessPolicy,
    resolver: IntentResolver,
    dispatcher: Dispatcher,
    panel: Arc<PanelClient>,
    llm: Arc<dyn TextGenerator>,
}

impl SupportBot {
    pub fn new(
        access: AccessPolicy,
        llm: Arc<dyn TextGenerator>,
        panel: Arc<PanelClient>,
        support_contact: String,
    ) -> Self {
        Self {
            access,
            resolver: IntentResolver::new(llm.clone()),
            dispatcher: Dispatcher::new(panel.clone(), support_contact),
            panel,
            llm,
        }
    }

    /// Handle one inbound message end to end. Never fails.
    pub async fn handle_message(&self, msg: &IncomingMessage) -> OutgoingMessage {
        info!("message from {} in chat {}", msg.caller, msg.chat);

        // Gate first: a rejected caller never costs an LLM call.
        if !self.access.is_allowed(msg.caller) {
            info!("caller {} rejected by allow-list", msg.caller);
            return self.reply(msg, DENIED.to_string());
        }

        let text = msg.text.trim();
        if let Some(reply) = self.handle_command(text).await {
            return self.reply(msg, reply);
        }

        let intent = self.resolver.resolve(text).await;
        let final_text = self.dispatcher.dispatch(&intent, msg.caller).await;
        self.reply(msg, final_text)
    }

    /// Built-in slash commands. Unknown commands fall through to the
    /// resolver like any other text.
    async fn handle_command(&self, text: &str) -> Option<String> {
        match text.split_whitespace().next()? {
            "/start" => Some(WELCOME.to_string()),
            "/help" => Some(HELP.to_string()),
            "/status" => Some(self.system_status().await),
            _ => None,
        }
    }

    async fn system_status(&self) -> String {
        let panel_ok = self.panel.check_connection().await;
        let llm_ok = self
            .llm
            .generate("ping")
            .await
            .map(|t| !t.is_empty())
            .unwrap_or(false);

        let mark = |ok: bool| if ok { "✅ up" } else { "❌ down" };
        format!(
            "*System status*\n\n\
             Panel: {}\n\
             Assistant: {}\n\
             Bot: ✅ up\n\n\
             Checked: {}",
            mark(panel_ok),
            mark(llm_ok),
            Utc::now().format("%Y-%m-%d %H:%M:%S UTC"),
        )
    }

    fn reply(&self, msg: &IncomingMessage, text: String) -> OutgoingMessage {
        OutgoingMessage {
            chat: msg.chat,
            text,
        }
    }
}
