//! Combine Pilot - Main Entry Point
//!
//! Runs one account bot per configured account until interrupted.

use anyhow::Result;
use clap::{Parser, Subcommand};
use combine_pilot::config::Config;
use combine_pilot::exec::AccountBot;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, Level};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

/// Combine Pilot CLI
#[derive(Parser)]
#[command(name = "combine-pilot")]
#[command(version, about = "Funded-account execution core for the ProjectX gateway")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the configured account bots (default)
    Run,

    /// Load and validate configuration, then exit
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging()?;

    match cli.command {
        Some(Commands::CheckConfig) => check_config(),
        Some(Commands::Run) | None => run().await,
    }
}

async fn run() -> Result<()> {
    let config = Config::load()?;
    config.validate()?;

    info!(
        accounts = config.accounts.len(),
        gateway = %config.gateway.base_url,
        "Starting combine-pilot"
    );

    let mut bots: Vec<Arc<AccountBot>> = Vec::with_capacity(config.accounts.len());
    for account in &config.accounts {
        match AccountBot::build(&config, account).await {
            Ok(bot) => {
                let bot = Arc::new(bot);
                bot.start().await;
                bots.push(bot);
            }
            Err(e) => {
                error!(account = %account.name, error = %e, "Failed to start account bot");
                return Err(e);
            }
        }
    }

    // Periodic status heartbeat until ctrl-c.
    let mut heartbeat = tokio::time::interval(Duration::from_secs(60));
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
            _ = heartbeat.tick() => {
                for bot in &bots {
                    let status = bot.status();
                    info!(
                        account = %status.name,
                        feed = ?status.feed_state,
                        halted = status.risk.trading_halted,
                        daily_pnl = %status.risk.daily_pnl,
                        total_pnl = %status.risk.total_pnl,
                        open_positions = status.positions.len(),
                        "Status"
                    );
                }
            }
        }
    }

    for bot in &bots {
        bot.shutdown().await;
    }
    info!("All account bots stopped");

    Ok(())
}

fn check_config() -> Result<()> {
    let config = Config::load()?;
    config.validate()?;

    info!(gateway = %config.gateway.base_url, "Configuration is valid");
    for account in &config.accounts {
        let risk = account.effective_risk(&config.risk);
        info!(
            account = %account.name,
            symbols = ?account.symbols,
            account_size = %risk.account_size,
            daily_loss_limit = %risk.daily_loss_limit,
            max_drawdown = %risk.max_drawdown_limit,
            "Account profile"
        );
    }
    Ok(())
}

fn init_logging() -> Result<()> {
    use tracing_subscriber::fmt::writer::MakeWriterExt;

    // Create logs directory
    std::fs::create_dir_all("logs")?;

    // File appender for detailed logs
    let file_appender = tracing_appender::rolling::hourly("logs", "combine-pilot.log");
    let (file_writer, _guard) = tracing_appender::non_blocking(file_appender);

    // Leak the guard to keep it alive for the program duration
    Box::leak(Box::new(_guard));

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("combine_pilot=debug".parse()?)
                .add_directive(Level::INFO.into()),
        )
        .with_writer(std::io::stdout.and(file_writer))
        .with_span_events(FmtSpan::CLOSE)
        .init();

    Ok(())
}
