//! Configuration loading — TOML file plus environment overrides for secrets

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use url::Url;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PorterConfig {
    pub telegram: TelegramConfig,
    pub llm: LlmConfig,
    pub panel: PanelConfig,
    #[serde(default)]
    pub webhook: WebhookConfig,
    #[serde(default)]
    pub support: SupportConfig,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: String,
    /// Caller identities allowed to use the bot. Empty means open access.
    #[serde(default)]
    pub allowed_users: Vec<i64>,
}

impl std::fmt::Debug for TelegramConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramConfig")
            .field("bot_token", &mask_secret(&self.bot_token))
            .field("allowed_users", &self.allowed_users)
            .finish()
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl std::fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmConfig")
            .field("api_key", &mask_secret(&self.api_key))
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

fn default_model() -> String {
    "gemini-1.5-flash".to_string()
}

fn default_max_tokens() -> u32 {
    1024
}

#[derive(Clone, Serialize, Deserialize)]
pub struct PanelConfig {
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

impl std::fmt::Debug for PanelConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PanelConfig")
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .field("password", &mask_secret(&self.password))
            .finish()
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    #[serde(default = "default_webhook_port")]
    pub port: u16,
    #[serde(default)]
    pub secret: String,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            port: default_webhook_port(),
            secret: String::new(),
        }
    }
}

impl std::fmt::Debug for WebhookConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookConfig")
            .field("port", &self.port)
            .field("secret", &mask_secret(&self.secret))
            .finish()
    }
}

fn default_webhook_port() -> u16 {
    8080
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupportConfig {
    /// Handle users are pointed at for manual steps.
    #[serde(default = "default_support_contact")]
    pub contact: String,
}

impl Default for SupportConfig {
    fn default() -> Self {
        Self {
            contact: default_support_contact(),
        }
    }
}

fn default_support_contact() -> String {
    "@support".to_string()
}

/// Default location: `~/.config/porter/config.toml`.
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("porter")
}

impl PorterConfig {
    /// Load, apply env overrides, and validate. Missing required values are
    /// fatal here, before anything is started.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| config_dir().join("config.toml"));
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read config at {}", path.display()))?;
        let mut config: PorterConfig =
            toml::from_str(&raw).with_context(|| format!("invalid config at {}", path.display()))?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Secrets may come from the environment instead of the config file.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("TELEGRAM_BOT_TOKEN") {
            self.telegram.bot_token = v;
        }
        if let Ok(v) = std::env::var("ALLOWED_USERS") {
            self.telegram.allowed_users = v
                .split(',')
                .filter_map(|part| part.trim().parse().ok())
                .collect();
        }
        if let Ok(v) = std::env::var("GEMINI_API_KEY") {
            self.llm.api_key = v;
        }
        if let Ok(v) = std::env::var("PANEL_URL") {
            self.panel.base_url = v;
        }
        if let Ok(v) = std::env::var("PANEL_USERNAME") {
            self.panel.username = v;
        }
        if let Ok(v) = std::env::var("PANEL_PASSWORD") {
            self.panel.password = v;
        }
        if let Ok(v) = std::env::var("WEBHOOK_SECRET") {
            self.webhook.secret = v;
        }
    }

    fn validate(&self) -> Result<()> {
        if self.telegram.bot_token.is_empty() {
            bail!("telegram.bot_token is required (or set TELEGRAM_BOT_TOKEN)");
        }
        if self.llm.api_key.is_empty() {
            bail!("llm.api_key is required (or set GEMINI_API_KEY)");
        }
        if self.panel.base_url.is_empty() {
            bail!("panel.base_url is required (or set PANEL_URL)");
        }
        Url::parse(&self.panel.base_url)
            .with_context(|| format!("panel.base_url is not a valid URL: {}", self.panel.base_url))?;
        if self.panel.username.is_empty() || self.panel.password.is_empty() {
            bail!("panel.username and panel.password are required");
        }
        if self.webhook.secret.is_empty() {
            bail!("webhook.secret is required (or set WEBHOOK_SECRET)");
        }
        Ok(())
    }
}

fn mask_secret(secret: &str) -> String {
    if secret.is_empty() {
        "<unset>".to_string()
    } else if secret.len() > 7 {
        format!("{}...{}", &secret[..3], &secret[secret.len() - 4..])
    } else {
        "***".to_string()
    }
}
