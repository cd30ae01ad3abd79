use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use ethscript::config::ConfigLoadError;
use ethscript::logging::init_logging;
use ethscript::{EthscriptConfig, Reactor, ScriptBridge, TcpPeerConnector};

#[derive(Parser)]
#[command(version = env!("VERSION_STRING"), about, long_about = None)]
pub struct Cli {
    /// Enables debug mode
    #[arg(short, long, action = clap::ArgAction::Count)]
    debug: u8,

    /// Config file to use instead of the default location
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Read expressions from stdin after running the scripts
    #[arg(short, long)]
    interactive: bool,

    /// Script files to evaluate, in order
    #[arg(value_name = "SCRIPT")]
    scripts: Vec<PathBuf>,
}

fn load_config(path: Option<&PathBuf>) -> Result<EthscriptConfig> {
    let loaded = match path {
        Some(path) => EthscriptConfig::load_from(path),
        None => EthscriptConfig::load(),
    };

    match loaded {
        Ok(config) => Ok(config),
        // Only the default location is allowed to be missing
        Err(ConfigLoadError::NotFound(_)) if path.is_none() => Ok(EthscriptConfig::default()),
        Err(e) => Err(e).context("failed to load config"),
    }
}

fn print_value(value: &serde_json::Value) {
    if !value.is_null() {
        println!("{}", value);
    }
}

async fn run_interactive(bridge: &ScriptBridge) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("> ");
        io::stdout().flush()?;

        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => line?,
        };

        let Some(line) = line else {
            break;
        };

        if line.trim().is_empty() {
            continue;
        }

        match bridge.evaluate(line).await {
            Ok(value) => print_value(&value),
            Err(e) => eprintln!("{}", e),
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;

    let level = match cli.debug {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let _guard = init_logging("ethscript", &config.logging, level).context("failed to set up logging")?;

    info!("Starting ethscript {}", env!("VERSION_STRING"));

    let reactor = Arc::new(Reactor::new());
    let connector = Arc::new(TcpPeerConnector::current());

    let mut bridge = tokio::task::spawn_blocking(move || ScriptBridge::start(reactor, connector, &config))
        .await?
        .context("failed to start script bridge")?;

    for script in &cli.scripts {
        let source = tokio::fs::read_to_string(script)
            .await
            .with_context(|| format!("failed to read {}", script.display()))?;

        match bridge.evaluate(source).await {
            Ok(value) => print_value(&value),
            Err(e) => warn!("{}: {}", script.display(), e),
        }
    }

    if cli.interactive {
        run_interactive(&bridge).await?;
    }

    tokio::task::spawn_blocking(move || bridge.stop()).await??;
    info!("Bye");

    Ok(())
}
