//! # GiftWatch
//!
//! Watches Telegram channels for gift announcements, keeps a durable gift
//! log, and sends each subscriber a digest of new gifts on their own cadence.
//!
//! Usage:
//!   giftwatch                          # Run with ~/.giftwatch/config.toml + env
//!   giftwatch --config ./gifts.toml    # Explicit config file
//!   giftwatch check-config             # Validate and print effective config

mod commands;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use giftwatch_channels::{ChannelPostBuffer, CommandStream, TelegramChannel, TelegramConfig};
use giftwatch_core::GiftWatchConfig;
use giftwatch_scheduler::{
    GiftDb, NotificationScheduler, PollerConfig, SchedulerConfig, SettingsHandle, SourcePoller,
};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use crate::commands::CommandHandler;

#[derive(Parser)]
#[command(
    name = "giftwatch",
    version,
    about = "🎁 GiftWatch — Telegram gift channel monitor"
)]
struct Cli {
    /// Config file (default: ~/.giftwatch/config.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Log as JSON lines
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start monitoring and notifications (default)
    Run,
    /// Validate configuration and print it with secrets redacted
    CheckConfig,
}

fn init_logging(verbose: bool, json: bool) {
    let filter = if verbose {
        "giftwatch=debug,giftwatch_scheduler=debug,giftwatch_channels=debug,giftwatch_core=debug"
    } else {
        "giftwatch=info,giftwatch_scheduler=info,giftwatch_channels=info,giftwatch_core=info"
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .init();
    }
}

fn load_config(path: Option<&str>) -> Result<GiftWatchConfig> {
    let mut config = match path {
        Some(p) => {
            let expanded = PathBuf::from(shellexpand::tilde(p).to_string());
            GiftWatchConfig::load_from(&expanded)?
        }
        None => GiftWatchConfig::load()?,
    };
    config.apply_env()?;
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_json);

    let config = load_config(cli.config.as_deref()).context("Invalid configuration")?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::CheckConfig => {
            println!("🎁 GiftWatch configuration is valid\n");
            println!("{}", serde_json::to_string_pretty(&config.redacted())?);
            println!("\nDatabase: {}", config.database_path().display());
            Ok(())
        }
        Commands::Run => run(config).await,
    }
}

async fn run(config: GiftWatchConfig) -> Result<()> {
    tracing::info!("🎁 GiftWatch v{}", env!("CARGO_PKG_VERSION"));

    // Store
    let db = Arc::new(
        GiftDb::open(&config.database_path())?
            .with_default_interval(config.notifications.default_interval_minutes),
    );
    let settings = SettingsHandle::new(config.monitor_settings());

    // Telegram: the main bot delivers and takes commands; channel posts may
    // come from a separate reader bot.
    let bot = Arc::new(TelegramChannel::new(TelegramConfig {
        bot_token: config.bot_token.clone(),
        ..TelegramConfig::from(&config)
    }));
    bot.connect().await.context("Telegram bot token rejected")?;

    let reader = if config.source_token() != config.bot_token {
        let reader = Arc::new(TelegramChannel::new(TelegramConfig::from(&config)));
        reader.connect().await.context("Source bot token rejected")?;
        Some(reader)
    } else {
        None
    };

    let buffer = Arc::new(ChannelPostBuffer::new(config.source.buffer_capacity));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let (bot_updates, commands) = bot.clone().start_polling(buffer.clone(), shutdown_rx.clone());
    let reader_updates = reader
        .as_ref()
        .map(|r| r.clone().start_polling(buffer.clone(), shutdown_rx.clone()).0);

    // Loops
    let poller = Arc::new(SourcePoller::new(
        buffer.clone(),
        db.clone(),
        settings.clone(),
        PollerConfig::from(&config),
    ));
    let poller_task = poller.clone().spawn();

    let scheduler = Arc::new(NotificationScheduler::new(
        db.clone(),
        db.clone(),
        bot.clone(),
        SchedulerConfig::from(&config),
    ));
    let scheduler_task = scheduler.spawn(shutdown_rx.clone());

    let handler = Arc::new(CommandHandler::new(
        db.clone(),
        db.clone(),
        settings.clone(),
        config.admin_ids.clone(),
    ));
    let command_task = tokio::spawn(serve_commands(
        handler,
        bot.clone(),
        commands,
        shutdown_rx,
    ));

    tracing::info!(
        "👀 Watching {} channel(s), checking every {}s",
        settings.snapshot().channels.len(),
        config.monitor.check_interval_secs
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("🛑 Shutting down...");

    poller.stop();
    let _ = shutdown_tx.send(true);
    if let Err(e) = poller_task.await {
        tracing::error!("Poller task failed: {e}");
    }
    if let Err(e) = scheduler_task.await {
        tracing::error!("Scheduler task failed: {e}");
    }
    let mut update_tasks = vec![bot_updates, command_task];
    update_tasks.extend(reader_updates);
    for task in futures::future::join_all(update_tasks).await {
        if let Err(e) = task {
            tracing::error!("Update task failed: {e}");
        }
    }

    bot.disconnect();
    if let Some(reader) = reader {
        reader.disconnect();
    }
    db.close()?;

    tracing::info!("👋 GiftWatch stopped");
    Ok(())
}

/// Answer private messages until shutdown.
async fn serve_commands(
    handler: Arc<CommandHandler>,
    bot: Arc<TelegramChannel>,
    mut commands: CommandStream,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let incoming = tokio::select! {
            next = commands.next() => next,
            _ = shutdown.changed() => break,
        };
        let Some(incoming) = incoming else { break };

        if let Some(reply) = handler
            .handle(incoming.user_id, &incoming.text, Instant::now())
            .await
            && let Err(e) = bot.send_message(incoming.chat_id, &reply).await
        {
            tracing::warn!("Reply to {} failed: {e}", incoming.chat_id);
        }
    }
}
