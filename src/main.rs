use anyhow::Context;
use clap::Parser;
use colored::*;
use std::process;

use cocollama::config::Config;
use cocollama::error_handling::{display_warning, enhance_error};
use cocollama::input::TerminalInput;
use cocollama::interpolation::Interpolator;
use cocollama::logging::{get_logger, init_logger, with_logger, LogCategory};
use cocollama::shell::{CtrlC, Session};
use cocollama::OllamaClient;

#[derive(Parser)]
#[command(name = "cocollama")]
#[command(version)]
#[command(about = "Interactive shell for a local Ollama server")]
struct Cli {
    /// Model used for chat
    #[arg(long)]
    model: Option<String>,

    /// Host the Ollama server listens on
    #[arg(long)]
    host: Option<String>,

    /// Port the Ollama server listens on
    #[arg(long)]
    port: Option<u16>,

    /// Write debug entries to the log file
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = init_logger() {
        display_warning(&format!("Warning: Failed to initialize logger: {}", e));
    }

    let cli = Cli::parse();

    if cli.debug {
        if let Ok(logger) = get_logger() {
            if let Ok(mut logger) = logger.lock() {
                let _ = logger.enable_debug_mode();
            }
        }
    }

    let config = match Config::load()
        .with_overrides(cli.model, cli.host, cli.port)
        .context("Invalid configuration")
    {
        Ok(config) => config,
        Err(e) => {
            enhance_error(&e).display();
            process::exit(1);
        }
    };
    cocollama::log_debug!(
        LogCategory::Configuration,
        format!(
            "Effective settings: command timeout {}s, probe timeout {}s",
            config.command_timeout_secs, config.probe_timeout_secs
        )
    );

    let client = OllamaClient::new(config.base_url(), config.probe_timeout());
    if let Err(e) = client.check_connection().await {
        cocollama::log_error!(LogCategory::Network, "Startup connectivity check failed");
        eprintln!("{} {}", "Error:".red().bold(), e);
        eprintln!("Make sure ollama is running on {}", client.base_url());
        process::exit(1);
    }

    with_logger(|logger| logger.log_startup(env!("CARGO_PKG_VERSION"), client.base_url()));

    let mut session = Session::new(
        client,
        config.model.clone(),
        Interpolator::new(config.command_timeout()),
        std::io::stdout(),
    );
    let mut input = TerminalInput::stdin();

    if let Err(e) = session.run(&mut input, &mut CtrlC).await {
        enhance_error(&e).display();
    }

    Ok(())
}
