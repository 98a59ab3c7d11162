use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use discord_bridge::config::{BridgeConfig, LogFormat, LogLevel};
use discord_bridge::supervisor;

#[derive(Parser)]
#[command(name = "discord-bridge", version, about = "Discord Gateway to HTTP event bridge")]
struct Cli {
    /// Path to the YAML configuration file. Without it, configuration comes
    /// from environment variables.
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Discord bot token (overrides config file).
    #[arg(long)]
    token: Option<String>,

    /// Log level (overrides config file).
    #[arg(long, value_parser = ["DEBUG", "INFO", "WARNING", "ERROR"])]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    init_logging(&config);
    print_banner(&config);

    match supervisor::run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("bridge terminated: {e}");
            ExitCode::FAILURE
        }
    }
}

fn load_config(cli: &Cli) -> Result<BridgeConfig, discord_bridge::error::BridgeError> {
    let mut config = match &cli.config {
        Some(path) => BridgeConfig::from_yaml(path)?,
        None => BridgeConfig::from_env()?,
    };
    if let Some(token) = &cli.token {
        config.discord.token = token.clone();
    }
    if let Some(level) = &cli.log_level {
        config.logging.level = LogLevel::parse(level)?;
    }
    Ok(config)
}

fn init_logging(config: &BridgeConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.as_filter()));

    match config.logging.format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_target(true))
                .init();
        }
        LogFormat::Console => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_target(false).with_ansi(true))
                .init();
        }
    }
}

fn print_banner(config: &BridgeConfig) {
    let version = env!("CARGO_PKG_VERSION");
    let enabled = config.routes.iter().filter(|r| r.enabled).count();

    eprintln!();
    eprintln!("  \x1b[1;36mdiscord-bridge\x1b[0m \x1b[2mv{version}\x1b[0m");
    eprintln!();
    eprintln!("  \x1b[2mintents\x1b[0m      {}", config.discord.intents);
    eprintln!(
        "  \x1b[2mroutes\x1b[0m       {} ({} enabled)",
        config.routes.len(),
        enabled
    );
    eprintln!("  \x1b[2mhttp timeout\x1b[0m {}s", config.http.timeout);
    eprintln!();
}
