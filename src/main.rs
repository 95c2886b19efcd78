use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use chat_relay::{RelayConfig, RelayServer, console};
use clap::Parser;
use tokio::io::BufReader;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Line-oriented chat relay server.
#[derive(Parser, Debug)]
#[command(name = "chat-relay", about = "Line-oriented chat relay server")]
struct Cli {
    /// JSON config file; flags below override its values.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Interface to bind.
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (0 for auto-assign).
    #[arg(long)]
    port: Option<u16>,

    /// Seconds a client has to send its LOGIN line.
    #[arg(long)]
    login_timeout_secs: Option<u64>,

    /// Maximum bytes per line.
    #[arg(long)]
    max_line_bytes: Option<usize>,

    /// Lines queued per client before it is dropped as too slow.
    #[arg(long)]
    max_queue_depth: Option<usize>,

    /// Close sessions idle for this many seconds.
    #[arg(long)]
    idle_timeout_secs: Option<u64>,

    /// Announce joins and departures.
    #[arg(long)]
    presence_notices: bool,

    /// Log level when RUST_LOG is unset.
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Do not read operator commands from stdin.
    #[arg(long)]
    no_console: bool,
}

impl Cli {
    fn relay_config(&self) -> Result<RelayConfig> {
        let mut config = match &self.config {
            Some(path) => RelayConfig::load(path)?,
            None => RelayConfig::default(),
        };

        if let Some(host) = &self.host {
            config.bind_host = host.clone();
        }
        if let Some(port) = self.port {
            config.bind_port = port;
        }
        if let Some(secs) = self.login_timeout_secs {
            config.login_timeout_secs = secs;
        }
        if let Some(bytes) = self.max_line_bytes {
            config.max_line_bytes = bytes;
        }
        if let Some(depth) = self.max_queue_depth {
            config.max_outbound_queue_depth = depth;
        }
        if let Some(secs) = self.idle_timeout_secs {
            config.idle_timeout_secs = Some(secs);
        }
        if self.presence_notices {
            config.presence_notices = true;
        }

        config.validate()?;
        Ok(config)
    }
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .try_init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let config = cli.relay_config()?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start tokio runtime")?;

    let outcome = runtime.block_on(serve(config, !cli.no_console));

    // The console's stdin read can stay parked in a blocking thread.
    runtime.shutdown_timeout(Duration::from_millis(200));

    outcome
}

async fn serve(config: RelayConfig, with_console: bool) -> Result<()> {
    let server = RelayServer::bind(config).await?;
    let shutdown = server.shutdown_handle();

    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("interrupt received");
                on_signal.shutdown();
            }
            Err(err) => warn!(error = %err, "cannot listen for ctrl-c"),
        }
    });

    if with_console {
        let registry = server.registry();
        let dispatcher = server.dispatcher();
        let shutdown = shutdown.clone();

        tokio::spawn(async move {
            let stdin = BufReader::new(tokio::io::stdin());
            if let Err(err) =
                console::run(stdin, tokio::io::stdout(), registry, dispatcher, shutdown).await
            {
                warn!(error = %err, "operator console stopped");
            }
        });
    }

    server.run().await
}
