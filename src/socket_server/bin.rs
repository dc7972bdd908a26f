//! cindex Daemon Binary
//!
//! A WebSocket server that keeps C/C++ translation units parsed and current
//! for any number of clients.
//!
//! # Usage
//!
//! ```bash
//! cindexd --port 9848
//! cindexd --config ~/.cindex/cindex.toml --data-dir /tmp/cindex --no-watch
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;

use cindex::config::DaemonConfig;
use cindex::daemon::Daemon;
use cindex::parser::TreeSitterParser;
use cindex::socket_server::handle_connection;

/// cindex Socket Server Daemon
#[derive(Parser, Debug)]
#[command(name = "cindexd")]
#[command(about = "Live C/C++ translation unit index daemon")]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "9848")]
    port: u16,

    /// Host to bind to
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// TOML configuration file
    #[arg(short, long, env = "CINDEX_CONFIG")]
    config: Option<PathBuf>,

    /// Override the data directory
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Do not reparse units when their sources change
    #[arg(long)]
    no_watch: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("cindex=info".parse()?)
                .add_directive("cindexd=info".parse()?),
        )
        .init();

    let args = Args::parse();
    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;

    let mut config = match &args.config {
        Some(path) => DaemonConfig::load_from(path)?,
        None => DaemonConfig::load_from(&cindex::paths::default_data_dir().join("cindex.toml"))?,
    };
    if let Some(dir) = args.data_dir {
        config.data_dir = dir;
    }
    if args.no_watch {
        config.watch = false;
    }
    tracing::info!("Using data directory {}", config.data_dir.display());

    let daemon = Arc::new(Daemon::open(config, TreeSitterParser::new())?);

    // Start the TCP listener
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("cindex daemon listening on ws://{}", addr);

    // Accept connections until interrupted
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    tracing::info!("Accepted connection from {}", addr);
                    let daemon = Arc::clone(&daemon);
                    tokio::spawn(async move {
                        handle_connection(stream, daemon).await;
                    });
                }
                Err(e) => {
                    tracing::error!("Failed to accept connection: {}", e);
                }
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, shutting down");
                break;
            }
        }
    }

    let report = tokio::task::spawn_blocking(move || daemon.shutdown()).await?;
    if report.abandoned_parses + report.abandoned_jobs > 0 {
        tracing::warn!(
            "Abandoned {} parses and {} jobs at shutdown",
            report.abandoned_parses,
            report.abandoned_jobs
        );
    }
    Ok(())
}
