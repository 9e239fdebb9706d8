mod auth;
mod commands;
mod config;
mod gmail;
mod influx;
mod ollama;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::process;

use crate::auth::GmailCredentials;
use crate::commands::{cmd_chat, cmd_sync};
use crate::config::Config;
use crate::gmail::GmailClient;
use crate::influx::InfluxClient;
use crate::ollama::OllamaClient;

#[derive(Parser)]
#[command(
    name = "healthsync",
    version,
    about = "Sync Lose It! nutrition data from Gmail into InfluxDB, and chat about it"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch labeled emails, parse CSV attachments, upsert daily records
    Sync {
        /// Lookback window in days (default: SYNC_LOOKBACK_DAYS, or 90)
        #[arg(long)]
        days: Option<u32>,
        /// Parse and report without writing to the store
        #[arg(long)]
        dry_run: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Chat about your data via a local Ollama model
    Chat {
        /// Days of context to load from the store
        #[arg(long, default_value = "30")]
        days: u32,
    },
    /// Interactive Gmail OAuth login; stores a reusable token
    Login,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load()?;

    match cli.command {
        Commands::Sync {
            days,
            dry_run,
            json,
        } => {
            let creds = GmailCredentials::load(&config.credentials_file, &config.token_file)?;
            let gmail = GmailClient::new(creds);
            let influx = influx_client(&config);
            // The collaborator traits are synchronous and block on this
            // runtime's handle, so run the pipeline off the async threads.
            tokio::task::spawn_blocking(move || {
                cmd_sync(&config, &gmail, &influx, days, dry_run, json)
            })
            .await?
        }
        Commands::Chat { days } => {
            let influx = influx_client(&config);
            let ollama = OllamaClient::new(&config.ollama_host, &config.ollama_model);
            tokio::task::spawn_blocking(move || cmd_chat(&influx, &ollama, days)).await?
        }
        Commands::Login => {
            let http = reqwest::Client::new();
            auth::interactive_login(&http, &config.credentials_file, &config.token_file).await
        }
    }
}

fn influx_client(config: &Config) -> InfluxClient {
    InfluxClient::new(
        &config.influx_url,
        &config.influx_database,
        config.influx_username.clone(),
        config.influx_password.clone(),
    )
}
