//! node-forwarder: transparent HTTP/1.1 forwarder
//!
//! This is the main entry point for the forwarder binary.
//!
//! # Usage
//!
//! ```bash
//! # Run with default configuration
//! sudo ./node-forwarder
//!
//! # Run with custom configuration
//! sudo ./node-forwarder -c /path/to/config.json
//!
//! # Run with environment overrides
//! NODE_FORWARDER_LOG_LEVEL=debug sudo ./node-forwarder
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::signal;
use tracing::{info, warn, Level};
use tracing_subscriber::EnvFilter;

use node_forwarder::config::{load_config_with_env, Config};
use node_forwarder::forwarder::{run_accept_loop, ForwarderContext};
use node_forwarder::tproxy::{has_net_admin_capability, is_root, TproxyListener};

/// Command-line arguments
struct Args {
    /// Configuration file path
    config_path: PathBuf,
    /// Generate default configuration
    generate_config: bool,
    /// Check configuration only
    check_config: bool,
}

impl Args {
    fn parse() -> Self {
        let mut args = std::env::args().skip(1);
        let mut config_path = PathBuf::from("/etc/node-forwarder/config.json");
        let mut generate_config = false;
        let mut check_config = false;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "-c" | "--config" => {
                    if let Some(path) = args.next() {
                        config_path = PathBuf::from(path);
                    }
                }
                "-g" | "--generate-config" => {
                    generate_config = true;
                }
                "--check" => {
                    check_config = true;
                }
                "-h" | "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                "-v" | "--version" => {
                    println!("node-forwarder v{}", node_forwarder::VERSION);
                    std::process::exit(0);
                }
                _ => {
                    eprintln!("Unknown argument: {arg}");
                    print_help();
                    std::process::exit(1);
                }
            }
        }

        Self {
            config_path,
            generate_config,
            check_config,
        }
    }
}

fn print_help() {
    println!(
        r#"node-forwarder v{}

Transparent HTTP/1.1 forwarder with TPROXY support.

USAGE:
    node-forwarder [OPTIONS]

OPTIONS:
    -c, --config <PATH>     Configuration file path [default: /etc/node-forwarder/config.json]
    -g, --generate-config   Generate default configuration and exit
    --check                 Check configuration and exit
    -h, --help             Print help information
    -v, --version          Print version information

ENVIRONMENT:
    NODE_FORWARDER_LISTEN_ADDR     Override listen address
    NODE_FORWARDER_UPSTREAM_ADDR   Override upstream host:port
    NODE_FORWARDER_LOG_LEVEL       Override log level (trace, debug, info, warn, error)

REQUIREMENTS:
    - Linux kernel with TPROXY support
    - CAP_NET_ADMIN capability (or root)
    - iptables TPROXY rules configured

EXAMPLE:
    # Steer port 80 traffic to the forwarder
    iptables -t mangle -A PREROUTING -p tcp --dport 80 -j TPROXY \
        --on-port 15001 --tproxy-mark 0x1
    ip rule add fwmark 0x1 lookup 100
    ip route add local 0.0.0.0/0 dev lo table 100

    # Run the forwarder
    sudo node-forwarder -c /etc/node-forwarder/config.json
"#,
        node_forwarder::VERSION
    );
}

/// Initialize logging
fn init_logging(config: &Config) {
    let level = match config.log.level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    if let Ok(directive) = "tokio=warn".parse() {
        filter = filter.add_directive(directive);
    }

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.log.target);

    if config.log.format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Check system prerequisites
fn check_prerequisites() {
    if !is_root() && !has_net_admin_capability() {
        warn!("Not running as root and CAP_NET_ADMIN not detected");
        warn!("TPROXY requires CAP_NET_ADMIN capability");
        // Don't fail - let the socket creation fail with a clearer error
    }
}

/// Main application entry point
#[tokio::main]
async fn main() -> Result<()> {
    let start_time = Instant::now();

    let args = Args::parse();

    if args.generate_config {
        node_forwarder::config::create_default_config(&args.config_path)?;
        println!("Generated default configuration at {:?}", args.config_path);
        return Ok(());
    }

    let config = load_config_with_env(&args.config_path).with_context(|| {
        format!("Failed to load configuration from {:?}", args.config_path)
    })?;

    if args.check_config {
        println!("Configuration is valid");
        return Ok(());
    }

    init_logging(&config);

    info!("node-forwarder v{}", node_forwarder::VERSION);
    if args.config_path.exists() {
        info!("Configuration loaded from {:?}", args.config_path);
    } else {
        info!("No configuration at {:?}, using defaults", args.config_path);
    }

    check_prerequisites();

    let listener =
        TproxyListener::bind(&config.listen).context("Failed to create TPROXY listener")?;
    let ctx = Arc::new(ForwarderContext::from_config(&config));

    info!(
        "node-forwarder ready on {} -> {} (connect timeout {}ms)",
        listener.listen_addr(),
        config.upstream.address,
        config.upstream.connect_timeout_ms
    );
    info!(
        "Startup complete in {:.2}ms",
        start_time.elapsed().as_secs_f64() * 1000.0
    );

    tokio::select! {
        () = run_accept_loop(listener, ctx) => {}
        _ = signal::ctrl_c() => {
            info!("Received SIGINT, shutting down");
        }
        () = wait_for_sigterm() => {
            info!("Received SIGTERM, shutting down");
        }
    }

    info!("Shutdown complete");
    Ok(())
}

/// Wait for SIGTERM signal
#[cfg(unix)]
async fn wait_for_sigterm() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            warn!("Failed to register SIGTERM handler: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_sigterm() {
    std::future::pending::<()>().await;
}
