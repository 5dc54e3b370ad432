//! Webhook receiver — axum HTTP server for panel lifecycle events
//!
//! The panel pushes `{action, username, ...}` events signed with a shared
//! secret. Events are verified and logged; nothing feeds back into the bot
//! pipeline yet. A valid, well-formed request is always answered 200, even
//! for actions we do not recognize.

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use serde::Deserialize;
use std::net::SocketAddr;
use tracing::{info, warn};

use crate::signature;

const SERVICE_NAME: &str = "porter-webhook";

/// Shared state for the webhook routes.
#[derive(Clone)]
pub struct WebhookState {
    secret: String,
}

/// Lifecycle event pushed by the panel.
#[derive(Debug, Deserialize)]
struct PanelEvent {
    #[serde(default)]
    action: String,
    #[serde(default)]
    username: String,
}

/// The webhook server.
pub struct WebhookServer {
    state: WebhookState,
    bind: SocketAddr,
}

impl WebhookServer {
    pub fn new(bind: SocketAddr, secret: String) -> Self {
        Self {
            state: WebhookState { secret },
            bind,
        }
    }

    /// Build the axum router.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/webhook/panel", post(webhook_handler))
            .route("/health", get(health_handler))
            .with_state(self.state.clone())
    }

    /// Start the server (blocks until shutdown).
    pub async fn run(self) -> anyhow::Result<()> {
        let router = self.router();
        let listener = tokio::net::TcpListener::bind(self.bind).await?;
        info!("webhook listening on {}", self.bind);
        axum::serve(listener, router).await?;
        Ok(())
    }

    /// Start the server in the background, returning a handle.
    pub fn spawn(self) -> tokio::task::JoinHandle<anyhow::Result<()>> {
        tokio::spawn(async move { self.run().await })
    }
}

async fn webhook_handler(
    State(state): State<WebhookState>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let provided = headers
        .get("x-webhook-secret")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if !signature::verify(state.secret.as_bytes(), &body, provided) {
        warn!("webhook request with invalid signature");
        return (StatusCode::FORBIDDEN, "Invalid signature");
    }

    let event: PanelEvent = match serde_json::from_slice(&body) {
        Ok(event) => event,
        Err(e) => {
            warn!("webhook payload is not valid JSON: {e}");
            return (StatusCode::BAD_REQUEST, "Invalid JSON");
        }
    };

    process_event(&event);
    (StatusCode::OK, "OK")
}

/// Log the event by kind. Unknown actions are accepted and logged as such.
fn process_event(event: &PanelEvent) {
    let PanelEvent { action, username } = event;
    match action.as_str() {
        "user_created" => info!("panel event: user created: {username}"),
        "user_updated" => info!("panel event: user updated: {username}"),
        "user_deleted" => info!("panel event: user deleted: {username}"),
        "user_limited" => info!("panel event: user hit traffic limit: {username}"),
        "user_expired" => info!("panel event: user expired: {username}"),
        other => info!("panel event: unhandled action {other:?} for {username}"),
    }
}

async fn health_handler() -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "healthy",
        "service": SERVICE_NAME,
    }))
}
