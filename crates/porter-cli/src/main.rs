use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

mod config;

use config::PorterConfig;
use porter_channels::{MessageChannel, TelegramChannel};
use porter_core::{AccessPolicy, GeminiClient, PanelClient, SupportBot, TextGenerator};
use porter_webhook::WebhookServer;

#[derive(Parser)]
#[command(name = "porter")]
#[command(version)]
#[command(about = "Porter — LLM-assisted customer support bot for VPN panels")]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the bot and the webhook receiver
    Start,

    /// Check connectivity to the panel and the LLM
    Check,

    /// Show the current configuration (secrets masked)
    Config,

    /// Initialize the config directory with a default config
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match cli.command {
        Commands::Init => cmd_init().await,
        Commands::Config => cmd_config(&cli.config),
        Commands::Check => cmd_check(&cli.config).await,
        Commands::Start => cmd_start(&cli.config).await,
    }
}

async fn cmd_init() -> Result<()> {
    let config_dir = config::config_dir();
    tokio::fs::create_dir_all(&config_dir)
        .await
        .with_context(|| format!("failed to create config dir: {}", config_dir.display()))?;

    let config_path = config_dir.join("config.toml");
    if config_path.exists() {
        warn!("config already exists at {}", config_path.display());
    } else {
        let default_config = include_str!("../../../config/default.toml");
        tokio::fs::write(&config_path, default_config).await?;
        info!("created default config at {}", config_path.display());
    }

    println!("Porter initialized at {}", config_dir.display());
    println!(
        "Edit {} to configure your tokens and panel credentials.",
        config_path.display()
    );
    Ok(())
}

fn cmd_config(path: &Option<PathBuf>) -> Result<()> {
    let config = PorterConfig::load(path.as_deref())?;
    println!("{config:#?}");
    Ok(())
}

async fn cmd_check(path: &Option<PathBuf>) -> Result<()> {
    let config = PorterConfig::load(path.as_deref())?;

    let panel = PanelClient::new(
        &config.panel.base_url,
        config.panel.username.clone(),
        config.panel.password.clone(),
    )?;
    let llm = GeminiClient::new(
        config.llm.api_key.clone(),
        config.llm.model.clone(),
        config.llm.max_tokens,
    )?;

    let panel_ok = panel.check_connection().await;
    let llm_ok = llm.check_status().await;

    println!("panel:     {}", if panel_ok { "ok" } else { "unreachable" });
    println!("assistant: {}", if llm_ok { "ok" } else { "unreachable" });

    if panel_ok && llm_ok {
        Ok(())
    } else {
        anyhow::bail!("connectivity check failed")
    }
}

async fn cmd_start(path: &Option<PathBuf>) -> Result<()> {
    let config = PorterConfig::load(path.as_deref())?;
    info!("starting porter");

    let llm: Arc<dyn TextGenerator> = Arc::new(GeminiClient::new(
        config.llm.api_key.clone(),
        config.llm.model.clone(),
        config.llm.max_tokens,
    )?);
    let panel = Arc::new(PanelClient::new(
        &config.panel.base_url,
        config.panel.username.clone(),
        config.panel.password.clone(),
    )?);
    let access = AccessPolicy::new(config.telegram.allowed_users.iter().copied());
    if access.is_open() {
        warn!("no allow-list configured, the bot will answer anyone");
    }

    let bot = Arc::new(SupportBot::new(
        access,
        llm,
        panel,
        config.support.contact.clone(),
    ));

    let channel = Arc::new(TelegramChannel::new(config.telegram.bot_token.clone())?);
    let (tx, mut rx) = mpsc::channel(64);
    channel.start(tx).await.context("failed to start telegram channel")?;

    let webhook = WebhookServer::new(
        ([0, 0, 0, 0], config.webhook.port).into(),
        config.webhook.secret.clone(),
    );
    let webhook_handle = webhook.spawn();

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
            shutdown.cancel();
        }
    });

    // One task per inbound message: a slow panel or model call stalls only
    // that message, never the receive loop.
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            maybe = rx.recv() => {
                let Some(msg) = maybe else {
                    error!("telegram receive loop ended");
                    break;
                };
                let bot = bot.clone();
                let channel = channel.clone();
                tokio::spawn(async move {
                    let chat = msg.chat;
                    if let Err(e) = channel.send_typing(chat).await {
                        debug!("typing indicator failed: {e:#}");
                    }
                    let reply = bot.handle_message(&msg).await;
                    if let Err(e) = channel.send(reply).await {
                        error!("failed to deliver reply to chat {chat}: {e:#}");
                    }
                });
            }
        }
    }

    webhook_handle.abort();
    info!("porter stopped");
    Ok(())
}
