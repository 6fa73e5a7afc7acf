use std::path::PathBuf;

use clap::{Parser, Subcommand};
use meshrelay::client::ClientSession;
use meshrelay::config::{ClientConfig, RelayConfig};
use meshrelay::relay;
use tracing_subscriber::EnvFilter;

/// Federated peer-to-peer message bus: relay server and auto-reconnecting client.
#[derive(Parser)]
#[command(name = "meshrelay", version, about)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the relay server: accepts authenticated WebSocket connections,
    /// routes direct/broadcast traffic, and spools messages for offline
    /// recipients.
    Serve {
        /// Address to bind the HTTP/WebSocket listener (e.g. 0.0.0.0:4300).
        #[arg(long)]
        bind: Option<String>,
        /// Directory for the relay's SQLite store.
        #[arg(long)]
        data_dir: Option<PathBuf>,
        /// Log filter string, e.g. "info" or "meshrelay=debug".
        #[arg(long)]
        log: Option<String>,
    },
    /// Run a client session: connect, authenticate, and bridge stdin/stdout
    /// lines to the message bus for local testing and scripting.
    Client {
        /// This client's user_id.
        #[arg(long = "user-id")]
        user_id: String,
        /// Path to the Ed25519 private key file (generated if missing).
        #[arg(long)]
        private: PathBuf,
        /// Path to the Ed25519 public key file (generated if missing).
        #[arg(long)]
        public: PathBuf,
        /// Relay WebSocket URL.
        #[arg(long)]
        server: Option<String>,
        /// Local HTTP port for the embedding application (accepted, unused
        /// by this crate's core message bus).
        #[arg(long = "http-port")]
        http_port: Option<u16>,
        /// Passed through to the embedding application's project context;
        /// this crate never reads it.
        #[arg(long = "project-path")]
        project_path: Option<PathBuf>,
        /// Passed through to the retrieval-augmented-generation
        /// collaborator; this crate never reads it.
        #[arg(long = "rag-sources")]
        rag_sources: Option<String>,
        /// Passed through to the external syftbox collaborator; this
        /// crate never reads it.
        #[arg(long = "syftbox-config")]
        syftbox_config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    match args.command {
        Command::Serve { bind, data_dir, log } => {
            init_tracing(log.as_deref().unwrap_or("info"));
            let config = RelayConfig::new(bind, data_dir, log);
            relay::serve(config).await
        }
        Command::Client {
            user_id,
            private,
            public,
            server,
            http_port,
            project_path,
            rag_sources,
            syftbox_config,
        } => {
            init_tracing("info");
            let config = ClientConfig::new(
                user_id,
                private,
                public,
                server,
                http_port,
                project_path,
                rag_sources,
                syftbox_config,
            );
            run_client(config).await
        }
    }
}

fn init_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter.to_string()));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Minimal line-oriented bridge for exercising a client session from a
/// terminal: lines typed as `to:content` are sent; inbound messages are
/// printed as they arrive.
async fn run_client(config: ClientConfig) -> anyhow::Result<()> {
    use tokio::io::{AsyncBufReadExt, BufReader};

    let session = ClientSession::connect(config).await?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line? {
                    Some(line) => {
                        if let Some((to, content)) = line.split_once(':') {
                            if let Err(e) = session.send(to, content).await {
                                tracing::warn!(err = %e, "send failed");
                            }
                        }
                    }
                    None => break,
                }
            }
            inbound = session.recv() => {
                match inbound {
                    Some(message) => println!("{} -> {}", message.from, message.content),
                    None => break,
                }
            }
        }
    }

    session.disconnect().await;
    Ok(())
}
