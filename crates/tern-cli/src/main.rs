//! tern - chat relay server and terminal client

mod commands;
mod config;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use config::Config;

/// tern - streaming chat relay for a hosted agent
#[derive(Parser, Debug)]
#[command(name = "tern")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file (default: ~/.config/tern/config.toml or $TERN_CONFIG_PATH)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the relay server
    Serve {
        /// Address to listen on
        #[arg(long)]
        bind: Option<String>,

        /// Accept any bearer token
        #[arg(long)]
        dev_auth: bool,
    },

    /// Chat with the agent through a relay
    Chat {
        /// Relay base URL
        #[arg(long)]
        relay: Option<String>,

        /// Bearer token for the relay (default: $TERN_TOKEN)
        #[arg(long)]
        token: Option<String>,

        /// Continue an existing conversation
        #[arg(long)]
        thread: Option<String>,

        /// Attach an image to the first message (repeatable)
        #[arg(short, long = "image")]
        images: Vec<PathBuf>,

        /// Send one message and exit instead of starting a prompt
        message: Option<String>,
    },

    /// Show the agent behind a relay
    Agent {
        /// Relay base URL
        #[arg(long)]
        relay: Option<String>,

        /// Bearer token for the relay (default: $TERN_TOKEN)
        #[arg(long)]
        token: Option<String>,
    },

    /// Write an example config file
    InitConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Setup tracing
    let default_filter = if args.verbose {
        "tern=debug,tower_http=debug"
    } else {
        "tern=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let path = args.config.unwrap_or_else(Config::config_path);

    if let Command::InitConfig = args.command {
        if Config::init(&path)? {
            println!("Config file created at: {}", path.display());
        } else {
            println!("Config file already exists at: {}", path.display());
        }
        return Ok(());
    }

    let mut config = Config::load(&path)?;

    match args.command {
        Command::Serve { bind, dev_auth } => {
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            config.server.dev_auth |= dev_auth;
            commands::serve::run(&config).await
        }
        Command::Chat {
            relay,
            token,
            thread,
            images,
            message,
        } => {
            apply_client_overrides(&mut config, relay, token);
            commands::chat::run(&config.client, thread, &images, message).await
        }
        Command::Agent { relay, token } => {
            apply_client_overrides(&mut config, relay, token);
            commands::agent::run(&config.client).await
        }
        Command::InitConfig => Ok(()),
    }
}

fn apply_client_overrides(config: &mut Config, relay: Option<String>, token: Option<String>) {
    if let Some(relay) = relay {
        config.client.relay_url = relay;
    }
    if token.is_some() {
        config.client.token = token;
    }
}
