//! PIXNET server binary.
//!
//! Serves `*.pxnt` pages from a content directory over the PIXNET wire
//! protocol, seeding sample pages when the directory is empty.
//!
//! # Usage
//!
//! ```bash
//! # Serve ./content on the default port (7621)
//! pixnet-server
//!
//! # Custom bind address and content directory
//! pixnet-server --host 0.0.0.0 --port 7700 --content /srv/pixnet
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use log::{error, info, LevelFilter};

use pixnet::{PixnetServer, ServerConfig, DEFAULT_PORT};

/// PIXNET protocol server with PXNT page support.
#[derive(Parser, Debug)]
#[command(name = "pixnet-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Host interface to bind to
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Directory containing PXNT files
    #[arg(long, default_value = "content")]
    content: PathBuf,

    /// Maximum simultaneous connections
    #[arg(long = "max-conn", default_value_t = 100)]
    max_connections: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let level = match args.log_level.as_str() {
        "trace" => LevelFilter::Trace,
        "debug" => LevelFilter::Debug,
        "info" => LevelFilter::Info,
        "warn" => LevelFilter::Warn,
        "error" => LevelFilter::Error,
        other => {
            eprintln!("unknown log level: {other}");
            return ExitCode::FAILURE;
        }
    };
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .init();

    let config = ServerConfig {
        host: args.host,
        port: args.port,
        content_dir: args.content,
        max_connections: args.max_connections,
        ..ServerConfig::default()
    };

    let server = match PixnetServer::new(config) {
        Ok(server) => server,
        Err(e) => {
            error!("server startup failed: {e}");
            return ExitCode::FAILURE;
        }
    };

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("server failed: {e}");
                return ExitCode::FAILURE;
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received, shutting down");
            server.shutdown();
        }
    }

    let stats = server.stats().snapshot();
    info!(
        "final statistics: {} connections, {} pages served, {} errors, {} bytes sent, {} bytes received",
        stats.connections, stats.pages_served, stats.errors, stats.bytes_sent, stats.bytes_received
    );
    ExitCode::SUCCESS
}
