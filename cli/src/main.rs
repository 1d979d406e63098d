//! teebroker Control CLI
//!
//! Store, read and delete the caller's auth token through `teebrokerd`.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use teebroker_client::{ClientConfig, RegistryClient, RegistryError};

#[derive(Parser, Debug)]
#[command(name = "teebrokerctl")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Client configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Daemon endpoint (`#name` for an abstract socket, otherwise a path)
    #[arg(long)]
    endpoint: Option<String>,

    /// Response timeout in ms (0 = wait forever)
    #[arg(long)]
    timeout_ms: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Store (or replace) the auth token
    Store {
        /// Token bytes as hex
        #[arg(conflicts_with = "file", required_unless_present = "file")]
        hex: Option<String>,
        /// Read the token from a file
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Print the stored auth token as hex
    Read {
        /// Write the raw token to a file instead
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Delete the auth token
    Delete,
    /// Check that the daemon accepts connections
    Ping,
}

/// Exit status when no token is stored
const EXIT_NOT_FOUND: u8 = 2;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => ClientConfig::load(path)
            .await
            .with_context(|| format!("loading {}", path.display()))?,
        None => ClientConfig::default(),
    };
    if let Some(endpoint) = args.endpoint {
        config.endpoint = endpoint;
    }
    if let Some(ms) = args.timeout_ms {
        config.response_timeout_ms = ms;
    }

    let mut client = RegistryClient::new(config);

    let outcome = match args.command {
        Commands::Store { hex, file } => {
            let blob = match (hex, file) {
                (Some(hex), _) => hex::decode(hex.trim()).context("token is not valid hex")?,
                (None, Some(path)) => tokio::fs::read(&path)
                    .await
                    .with_context(|| format!("reading {}", path.display()))?,
                (None, None) => bail!("nothing to store"),
            };
            client.store_auth_token(&blob).await.map(|()| {
                println!("Stored {} bytes", blob.len());
            })
        }
        Commands::Read { out } => match client.read_auth_token().await {
            Ok(blob) => {
                match out {
                    Some(path) => {
                        tokio::fs::write(&path, &blob)
                            .await
                            .with_context(|| format!("writing {}", path.display()))?;
                        println!("Wrote {} bytes to {}", blob.len(), path.display());
                    }
                    None => println!("{}", hex::encode(&blob)),
                }
                Ok(())
            }
            Err(e) => Err(e),
        },
        Commands::Delete => client.delete_auth_token().await.map(|()| {
            println!("Auth token deleted");
        }),
        Commands::Ping => client.reconnect().await.map(|()| {
            if client.is_connection_alive() {
                println!("Daemon is up");
            } else {
                println!("Daemon accepted the connection but closed it");
            }
        }),
    };

    match outcome {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(RegistryError::NotFound) => {
            eprintln!("No auth token stored");
            Ok(ExitCode::from(EXIT_NOT_FOUND))
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            Ok(ExitCode::FAILURE)
        }
    }
}
