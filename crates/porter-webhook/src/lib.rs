//! porter-webhook — HTTP receiver for panel lifecycle events

pub mod server;
pub mod signature;

pub use server::WebhookServer;
