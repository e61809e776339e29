//! Leapfrog server endpoint - CLI entry point
//!
//! Accepts encrypted tunnel connections, decodes the address header, dials
//! the requested origin and relays. Also runs the monitor surface.

// Use mimalloc as global allocator for better p99 latency
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use clap::Parser;
use leapfrog::{Config, Gateway, VERSION};
use std::path::{Path, PathBuf};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_CONFIG: &str = "config.json";

#[derive(Parser, Debug)]
#[command(name = "leapfrog-server")]
#[command(version = VERSION)]
#[command(about = "Encrypted SOCKS5 tunnel - server endpoint")]
struct Args {
    /// Path to configuration file
    #[arg(short = 'c')]
    config: Option<PathBuf>,

    /// Listen port for tunnel connections
    #[arg(short = 'p')]
    server_port: Option<u16>,

    /// Shared password
    #[arg(short = 'k')]
    password: Option<String>,

    /// Cipher method
    #[arg(short = 'm')]
    method: Option<String>,

    /// Idle timeout in seconds
    #[arg(short = 't')]
    timeout: Option<u64>,
}

fn main() -> anyhow::Result<()> {
    // Build a tokio runtime tuned for many small relay tasks
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_cpus::get().max(2))
        .max_blocking_threads(32)
        .enable_all()
        .event_interval(61)
        .global_queue_interval(31)
        .thread_name("leapfrog-worker")
        .build()?;

    runtime.block_on(async_main())
}

async fn async_main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("leapfrog=info".parse()?),
        )
        .init();

    let args = Args::parse();
    info!("Leapfrog server v{}", VERSION);

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            error!("configuration error: {}", e);
            std::process::exit(1);
        }
    };

    let gateway = match Gateway::server(config).await {
        Ok(gateway) => gateway,
        Err(e) => {
            error!("failed to start: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = gateway.run().await {
        error!("gateway error: {}", e);
        std::process::exit(1);
    }

    Ok(())
}

/// Load config.json, apply CLI overrides, validate. An explicitly given
/// path must exist; the implicit default may be absent.
fn load_config(args: &Args) -> leapfrog::Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => {
            let path = Path::new(DEFAULT_CONFIG);
            if path.exists() {
                Config::load(path)?
            } else {
                Config::default()
            }
        }
    };

    if let Some(port) = args.server_port {
        config.server_port = port;
    }
    if let Some(password) = &args.password {
        config.password = password.clone();
    }
    if let Some(method) = &args.method {
        config.method = method.clone();
    }
    if let Some(timeout) = args.timeout {
        config.timeout = timeout;
    }

    config.validate()?;
    Ok(config)
}
