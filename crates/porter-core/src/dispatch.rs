//! Action dispatch — maps a resolved intent onto the panel
//!
//! Exhaustive over the action vocabulary, so an unimplemented operation is a
//! visible match arm rather than a silently ignored string. Handler failures
//! never escape: they are logged and turned into a generic failure suffix.

use anyhow::Result;
use std::sync::Arc;
use tracing::{debug, error};

use crate::panel::{AccountRecord, PanelClient};
use crate::types::{Action, ResolvedIntent};

const USERNAME_PROMPT: &str = "Please send your username so I can look that up.";

const OPERATION_FAILED: &str =
    "Something went wrong while performing that operation. Please try again later or contact support.";

const INSTALL_GUIDE: &str = "*How to install:*\n\
1. Copy the link above\n\
2. Import it into your VPN app\n\
3. Tap connect\n\n\
*Recommended apps:*\n\
- Android: V2rayNG\n\
- iOS: FairVPN\n\
- Windows: V2rayN";

/// Executes the operation behind a resolved intent and composes the final
/// user-facing reply.
pub struct Dispatcher {
    panel: Arc<PanelClient>,
    support_contact: String,
}

impl Dispatcher {
    pub fn new(panel: Arc<PanelClient>, support_contact: String) -> Self {
        Self {
            panel,
            support_contact,
        }
    }

    /// Run the intent's action and return the final reply text. Total: any
    /// handler error collapses into a failure suffix on the model's reply.
    pub async fn dispatch(&self, intent: &ResolvedIntent, caller: i64) -> String {
        let supplement: Result<String> = match intent.action {
            // Informational actions carry their whole answer in the reply.
            Action::None
            | Action::HelpSetup
            | Action::HelpTroubleshoot
            | Action::ContactSupport => return intent.response.clone(),

            Action::RequestAccount => {
                debug!("account request from caller {caller}");
                Ok(self.request_account())
            }
            Action::CheckAccount => match intent.username() {
                Some(username) => self.check_account(username).await,
                None => Ok(USERNAME_PROMPT.to_string()),
            },
            Action::GetConfig => match intent.username() {
                Some(username) => self.get_config(username).await,
                None => Ok(USERNAME_PROMPT.to_string()),
            },
            Action::RenewAccount => match intent.username() {
                Some(username) => Ok(self.renew_account(username)),
                None => Ok(USERNAME_PROMPT.to_string()),
            },
        };

        match supplement {
            Ok(extra) => format!("{}\n\n{extra}", intent.response),
            Err(e) => {
                error!("action {} failed for caller {caller}: {e:#}", intent.action);
                format!("{}\n\n{OPERATION_FAILED}", intent.response)
            }
        }
    }

    /// New accounts go through a manual ticket, not an API call.
    fn request_account(&self) -> String {
        format!(
            "*New account request received*\n\n\
             Your request has been registered. Support will contact you to \
             finish setting up your account.\n\n\
             Typical response time: under 2 hours\n\
             Support: {}",
            self.support_contact
        )
    }

    async fn check_account(&self, username: &str) -> Result<String> {
        match self.panel.get_user(username).await? {
            Some(record) => Ok(format_account_info(&record)),
            None => Ok(format!("No account named `{username}` was found.")),
        }
    }

    async fn get_config(&self, username: &str) -> Result<String> {
        match self.panel.get_subscription(username).await? {
            Some(sub) => Ok(format!(
                "*Your config is ready*\n\n\
                 Subscription link:\n`{}`\n\n{INSTALL_GUIDE}",
                sub.url
            )),
            None => Ok(format!("No config was found for `{username}`.")),
        }
    }

    /// Renewal is a manual payment flow, not an API call.
    fn renew_account(&self, username: &str) -> String {
        format!(
            "*Renewal request for `{username}`*\n\n\
             To renew your subscription:\n\
             1. Transfer the amount for your plan\n\
             2. Send us the payment receipt\n\
             3. Wait for support to confirm\n\n\
             *Plans:*\n\
             - 1 month: $4\n\
             - 3 months: $10\n\
             - 6 months: $18\n\n\
             Support: {}",
            self.support_contact
        )
    }
}

/// Render an account record for the user: status, traffic, dates, link.
fn format_account_info(record: &AccountRecord) -> String {
    let marker = status_marker(record);
    let used = format_gb(record.used_traffic);
    let limit = record
        .limit()
        .map_or_else(|| "unlimited".to_string(), format_gb);
    let created = record.created_at.as_deref().unwrap_or("unknown");
    let expires = record
        .expire
        .and_then(format_date)
        .unwrap_or_else(|| "unlimited".to_string());
    let link = record.subscription_url.as_deref().unwrap_or("not available");

    format!(
        "*Account info*\n\n\
         Username: `{}`\n\
         Status: {marker} {}\n\
         Traffic: {used} of {limit}\n\
         Created: {created}\n\
         Expires: {expires}\n\n\
         Subscription link:\n`{link}`",
        record.username, record.status
    )
}

fn status_marker(record: &AccountRecord) -> &'static str {
    use crate::panel::AccountStatus::*;
    match record.status {
        Active => "✅",
        Disabled => "❌",
        Limited => "⚠️",
        Expired => "⏰",
        Unknown => "❓",
    }
}

/// Bytes to GB with 2-decimal precision.
fn format_gb(bytes: u64) -> String {
    format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
}

/// Unix timestamp to a calendar date; out-of-range values are dropped.
fn format_date(ts: i64) -> Option<String> {
    chrono::DateTime::from_timestamp(ts, 0).map(|dt| dt.format("%Y-%m-%d").to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::panel::AccountStatus;
    use httpmock::Method::{GET, POST};
    use httpmock::MockServer;
    use std::collections::HashMap;

    fn record(used: u64, limit: Option<u64>) -> AccountRecord {
        AccountRecord {
            username: "alice".to_string(),
            status: AccountStatus::Active,
            used_traffic: used,
            data_limit: limit,
            expire: Some(1_735_689_600),
            subscription_url: Some("https://panel.example.com/sub/alice".to_string()),
            created_at: Some("2024-01-15T10:00:00".to_string()),
            links: vec![],
        }
    }

    fn intent(action: Action, username: Option<&str>) -> ResolvedIntent {
        let mut parameters = HashMap::new();
        if let Some(u) = username {
            parameters.insert("username".to_string(), u.to_string());
        }
        ResolvedIntent {
            response: "Here you go.".to_string(),
            action,
            parameters,
            confidence: 0.9,
        }
    }

    fn dispatcher_for(server: &MockServer) -> Dispatcher {
        let panel = Arc::new(
            PanelClient::new(&server.base_url(), "admin".to_string(), "pass".to_string())
                .unwrap(),
        );
        Dispatcher::new(panel, "@support".to_string())
    }

    fn mock_auth(server: &MockServer) {
        server.mock(|when, then| {
            when.method(POST).path("/api/admin/token");
            then.status(200)
                .header("content-type", "application/json")
                .body((serde_json::json!({"access_token": "tok"})).to_string());
        });
    }

    #[test]
    fn test_format_gb() {
        assert_eq!(format_gb(5_368_709_120), "5.00 GB");
        assert_eq!(format_gb(10_737_418_240), "10.00 GB");
        assert_eq!(format_gb(0), "0.00 GB");
        assert_eq!(format_gb(1_610_612_736), "1.50 GB");
    }

    #[test]
    fn test_format_account_info_with_limit() {
        let info = format_account_info(&record(5_368_709_120, Some(10_737_418_240)));
        assert!(info.contains("5.00 GB of 10.00 GB"));
        assert!(info.contains("✅ active"));
        assert!(info.contains("2025-01-01"));
        assert!(info.contains("`alice`"));
    }

    #[test]
    fn test_format_account_info_unlimited() {
        let mut rec = record(5_368_709_120, None);
        rec.expire = None;
        let info = format_account_info(&rec);
        assert!(info.contains("5.00 GB of unlimited"));
        assert!(info.contains("Expires: unlimited"));
    }

    #[test]
    fn test_format_account_info_zero_limit_is_unlimited() {
        let info = format_account_info(&record(1, Some(0)));
        assert!(info.contains("of unlimited"));
    }

    #[tokio::test]
    async fn test_dispatch_none_passes_response_through() {
        let server = MockServer::start();
        let dispatcher = dispatcher_for(&server);

        let out = dispatcher.dispatch(&intent(Action::None, None), 1).await;
        assert_eq!(out, "Here you go.");
    }

    #[tokio::test]
    async fn test_dispatch_informational_actions_pass_through() {
        let server = MockServer::start();
        let dispatcher = dispatcher_for(&server);

        for action in [
            Action::HelpSetup,
            Action::HelpTroubleshoot,
            Action::ContactSupport,
        ] {
            let out = dispatcher.dispatch(&intent(action, None), 1).await;
            assert_eq!(out, "Here you go.");
        }
    }

    #[tokio::test]
    async fn test_dispatch_missing_username_asks_for_it() {
        let server = MockServer::start();
        let dispatcher = dispatcher_for(&server);

        for action in [Action::CheckAccount, Action::GetConfig, Action::RenewAccount] {
            let out = dispatcher.dispatch(&intent(action, None), 1).await;
            assert!(out.starts_with("Here you go.\n\n"));
            assert!(out.contains(USERNAME_PROMPT));
        }
    }

    #[tokio::test]
    async fn test_dispatch_check_account_formats_record() {
        let server = MockServer::start();
        mock_auth(&server);
        server.mock(|when, then| {
            when.method(GET).path("/api/user/alice");
            then.status(200).header("content-type", "application/json")
                .body((serde_json::json!({
                "username": "alice",
                "status": "active",
                "used_traffic": 5_368_709_120u64,
                "data_limit": 10_737_418_240u64,
                "expire": 1_735_689_600,
            })).to_string());
        });

        let dispatcher = dispatcher_for(&server);
        let out = dispatcher
            .dispatch(&intent(Action::CheckAccount, Some("alice")), 1)
            .await;

        assert!(out.contains("5.00 GB"));
        assert!(out.contains("10.00 GB"));
        assert!(out.contains("✅ active"));
    }

    #[tokio::test]
    async fn test_dispatch_check_account_not_found() {
        let server = MockServer::start();
        mock_auth(&server);
        server.mock(|when, then| {
            when.method(GET).path("/api/user/ghost");
            then.status(404);
        });

        let dispatcher = dispatcher_for(&server);
        let out = dispatcher
            .dispatch(&intent(Action::CheckAccount, Some("ghost")), 1)
            .await;
        assert!(out.contains("No account named `ghost` was found."));
    }

    #[tokio::test]
    async fn test_dispatch_get_config_absent_has_no_install_guide() {
        let server = MockServer::start();
        mock_auth(&server);
        server.mock(|when, then| {
            when.method(GET).path("/api/user/bob");
            then.status(404);
        });

        let dispatcher = dispatcher_for(&server);
        let out = dispatcher
            .dispatch(&intent(Action::GetConfig, Some("bob")), 1)
            .await;

        assert_eq!(out, "Here you go.\n\nNo config was found for `bob`.");
        assert!(!out.contains("How to install"));
    }

    #[tokio::test]
    async fn test_dispatch_get_config_present_appends_guide() {
        let server = MockServer::start();
        mock_auth(&server);
        server.mock(|when, then| {
            when.method(GET).path("/api/user/alice");
            then.status(200).header("content-type", "application/json")
                .body((serde_json::json!({
                "username": "alice",
                "subscription_url": "https://panel.example.com/sub/alice",
            })).to_string());
        });

        let dispatcher = dispatcher_for(&server);
        let out = dispatcher
            .dispatch(&intent(Action::GetConfig, Some("alice")), 1)
            .await;

        assert!(out.contains("`https://panel.example.com/sub/alice`"));
        assert!(out.contains("How to install"));
        assert!(out.contains("V2rayNG"));
    }

    #[tokio::test]
    async fn test_dispatch_handler_failure_is_isolated() {
        let server = MockServer::start();
        mock_auth(&server);
        server.mock(|when, then| {
            when.method(GET).path("/api/user/alice");
            then.status(500).body("boom");
        });

        let dispatcher = dispatcher_for(&server);
        let out = dispatcher
            .dispatch(&intent(Action::CheckAccount, Some("alice")), 1)
            .await;

        assert!(out.starts_with("Here you go.\n\n"));
        assert!(out.contains(OPERATION_FAILED));
    }

    #[tokio::test]
    async fn test_dispatch_request_account_is_canned() {
        let server = MockServer::start();
        let dispatcher = dispatcher_for(&server);

        // No panel mock registered: the handler must not call the panel.
        let out = dispatcher
            .dispatch(&intent(Action::RequestAccount, None), 7)
            .await;
        assert!(out.contains("New account request received"));
        assert!(out.contains("@support"));
    }

    #[tokio::test]
    async fn test_dispatch_renew_account_is_canned() {
        let server = MockServer::start();
        let dispatcher = dispatcher_for(&server);

        let out = dispatcher
            .dispatch(&intent(Action::RenewAccount, Some("alice")), 7)
            .await;
        assert!(out.contains("Renewal request for `alice`"));
        assert!(out.contains("1 month"));
        assert!(out.contains("@support"));
    }
}
