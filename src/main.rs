//! TideKV server entry point.
//!
//! Parses the command line, sets up the log pipeline, and runs the echo
//! handler until a shutdown signal arrives.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tidekv::connection::EchoHandler;
use tidekv::logger::{Logger, LoggerConfig};
use tidekv::server::{Server, ServerConfig, DEFAULT_ACCEPT_BACKOFF};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Command-line options
#[derive(Debug, Parser)]
#[command(name = "tidekv", version, about = "TideKV server (echo protocol)")]
struct Cli {
    /// Host to bind to
    #[arg(long, default_value = tidekv::DEFAULT_HOST)]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = tidekv::DEFAULT_PORT)]
    port: u16,

    /// Expected connection ceiling (logged, not enforced)
    #[arg(long, default_value_t = 1024)]
    max_connections: u32,

    /// Seconds to wait for in-flight work on each connection at shutdown
    #[arg(long, default_value_t = 10)]
    grace_period_secs: u64,

    /// Also write logs to rotating files in this directory
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Base name of log files
    #[arg(long, default_value = "tidekv")]
    log_name: String,

    /// Extension of log files
    #[arg(long, default_value = "log")]
    log_ext: String,

    /// strftime pattern in log file names; controls rotation
    #[arg(long, default_value = "%Y-%m-%d")]
    log_time_format: String,
}

impl Cli {
    fn server_config(&self) -> ServerConfig {
        ServerConfig {
            address: format!("{}:{}", self.host, self.port),
            max_connections: self.max_connections,
            accept_backoff: DEFAULT_ACCEPT_BACKOFF,
        }
    }

    fn logger_config(&self) -> Option<LoggerConfig> {
        self.log_dir.as_ref().map(|path| LoggerConfig {
            path: path.clone(),
            name: self.log_name.clone(),
            ext: self.log_ext.clone(),
            time_format: self.log_time_format.clone(),
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let logger = match cli.logger_config() {
        Some(config) => Logger::file(config)?,
        None => Logger::stdout()?,
    };

    // Route `tracing` events from dependencies into the same pipeline.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(logger.clone())
        .init();

    logger.info(format_args!("TideKV v{} starting", tidekv::VERSION));

    let handler = Arc::new(
        EchoHandler::new(logger.clone())
            .with_grace_period(Duration::from_secs(cli.grace_period_secs)),
    );
    let server = Server::new(cli.server_config(), handler, logger.clone());

    let result = server.listen_and_serve_with_signal().await;
    match &result {
        Ok(()) => logger.info("server shutdown complete"),
        Err(e) => logger.error(format_args!("server stopped: {}", e)),
    }
    logger.flush();

    result.map_err(Into::into)
}
