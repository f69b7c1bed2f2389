mod app;

use anyhow::Context;
use app::{App, Input, render_outcome};
use clap::{Parser, Subcommand};
use log::{debug, info, warn};
use pandu_config::{LayeredConfig, LayeredConfigOptions, PanduConfig};
use pandu_core::{ClientAttributes, EchoResponder, SystemClock};
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

/// Command-line options for the Pandu proxy harness.
#[derive(Parser)]
#[command(name = "pandu", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Chat over stdin using the echo responder
    Chat {
        /// Optional pandu.json5 applied over the discovered layers
        #[arg(long)]
        config: Option<PathBuf>,
        /// Client address used for key derivation
        #[arg(long)]
        address: Option<IpAddr>,
        /// Client user agent used for key derivation
        #[arg(long, default_value = "pandu-cli")]
        user_agent: String,
    },
    /// Print the effective layered config as JSON
    Config {
        /// Optional pandu.json5 applied over the discovered layers
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .try_init();

    let cli = Cli::parse();
    match cli.command {
        Command::Chat {
            config,
            address,
            user_agent,
        } => {
            let layered = load_config(config)?;
            chat(
                layered.config,
                ClientAttributes::new(address, Some(user_agent)),
            )
            .await
        }
        Command::Config { config } => {
            let layered = load_config(config)?;
            for layer in &layered.layers {
                info!(
                    "config layer (source={}, path={})",
                    layer.source.as_str(),
                    layer.path.display()
                );
            }
            let rendered = serde_json::to_string_pretty(&layered.config)
                .context("failed to render config")?;
            println!("{rendered}");
            Ok(())
        }
    }
}

fn load_config(runtime_path: Option<PathBuf>) -> anyhow::Result<LayeredConfig> {
    let cwd = std::env::current_dir().context("failed to resolve current working directory")?;
    let mut options = LayeredConfigOptions::new(&cwd);
    if let Some(path) = runtime_path {
        options = options.with_runtime_path(path);
    }
    let layered =
        PanduConfig::load_layered_with_options(options).context("failed to load layered config")?;
    debug!("layered config loaded (layers={})", layered.layers.len());
    Ok(layered)
}

async fn chat(config: PanduConfig, client: ClientAttributes) -> anyhow::Result<()> {
    let app = App::build(&config, Arc::new(SystemClock), Arc::new(EchoResponder))
        .context("failed to build chat gate")?;
    info!("chat started (sweeper={})", app.sweeper.is_some());
    debug!("chat client key (key={})", app.gate.key_for(&client));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("failed to read stdin")? {
        match Input::parse(&line) {
            Input::Empty => {}
            Input::Quit => break,
            Input::Clear => {
                let cleared = app.gate.clear(&client);
                println!("session cleared (existed={cleared})");
            }
            Input::Status => {
                let status = serde_json::to_string_pretty(&app.gate.diagnostics())
                    .context("failed to render diagnostics")?;
                println!("{status}");
            }
            Input::Ask(question) => match app.gate.handle(&client, &question).await {
                Ok(outcome) => println!("{}", render_outcome(&outcome)),
                Err(err) => warn!("request failed (error={err})"),
            },
        }
    }

    app.shutdown().await;
    info!("chat finished");
    Ok(())
}
