use std::path::PathBuf;

use anyhow::{Context, Result};
use structopt::StructOpt;
use tokio_util::sync::CancellationToken;

mod config;
mod format;
mod locale;
mod metrics;
mod monitor;
mod retry;
mod session;
mod setup;
mod telegram;
mod twitch;

use config::Config;

#[derive(Debug, StructOpt)]
struct Opt {
    /// Run interactive setup and exit
    #[structopt(long)]
    setup: bool,

    /// Path to the config file
    #[structopt(long, default_value = "config.json")]
    config: PathBuf,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let opt = Opt::from_args();

    if opt.setup {
        setup::run(&opt.config, true).await.context("setup failed")?;
        println!("Setup completed successfully");
        return Ok(());
    }

    let cfg = match Config::load(&opt.config) {
        Ok(cfg) if cfg.setup_completed => cfg,
        Ok(_) => {
            println!("Setup incomplete. Running interactive setup...");
            println!();
            setup::run(&opt.config, true).await.context("setup failed")?;
            Config::load(&opt.config).context("failed to reload config")?
        }
        Err(_) => {
            println!("No config file found. Starting interactive setup...");
            println!();
            setup::run(&opt.config, false).await.context("setup failed")?;
            Config::load(&opt.config).context("failed to reload config")?
        }
    };
    cfg.validate()?;

    let token = CancellationToken::new();
    tokio::spawn(watch_signals(token.clone()));

    log::info!("starting monitor");
    let loc = locale::Localization::for_language(&cfg.language);
    let chat_id = cfg
        .telegram
        .chat_id
        .context("telegram chat is not configured")?;

    let platform = twitch::TwitchClient::new(
        cfg.twitch.client_id.clone(),
        cfg.twitch.client_secret.clone(),
        loc,
    )?;
    let messenger = telegram::TelegramClient::new(
        cfg.telegram.bot_token.clone(),
        chat_id,
        cfg.telegram.thread_id,
    )?;

    let mut monitor = monitor::Monitor::new(&cfg, loc, platform, messenger);
    monitor.run(&token).await
}

/// SIGINT and SIGTERM both request an orderly shutdown: the token is the
/// process-wide cancellation signal every sleep and backoff wait races.
async fn watch_signals(token: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(err) => {
                log::error!("cannot install SIGTERM handler: {}", err);
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    log::info!("shutdown signal received");
    token.cancel();
}
