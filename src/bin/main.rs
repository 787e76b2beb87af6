//! mesos-dns binary entry point.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use mesos_dns::{telemetry, Config, DnsServer};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Exit code for configuration errors the operator can correct.
const EXIT_CONFIG: u8 = 2;
/// Exit code for unrecoverable runtime errors.
const EXIT_RUNTIME: u8 = 1;

/// DNS server projecting live Mesos cluster state into a DNS zone.
#[derive(Parser, Debug)]
#[command(name = "mesos-dns")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file (TOML).
    #[arg(short, long, default_value = "mesos-dns.toml")]
    config: PathBuf,
}

fn load_config(args: &Args) -> Result<Config, config::ConfigError> {
    config::Config::builder()
        .add_source(config::File::from(args.config.clone()))
        .add_source(
            config::Environment::with_prefix("MESOS_DNS")
                .separator("__")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize()
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let mut config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("failed to load configuration from {}: {e}", args.config.display());
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    if let Err(e) = telemetry::init(&config.telemetry) {
        eprintln!("failed to initialize telemetry: {e}");
        return ExitCode::from(EXIT_RUNTIME);
    }

    if let Err(e) = config.dns.finalize() {
        error!("configuration error: {e}");
        return ExitCode::from(EXIT_CONFIG);
    }

    info!(
        config_file = %args.config.display(),
        domain = %config.dns.domain,
        "starting mesos-dns"
    );

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received interrupt, shutting down");
            signal_token.cancel();
        }
    });

    let server = DnsServer::new(config.dns);
    if let Err(e) = server.run(shutdown).await {
        error!("DNS server error: {e}");
        return ExitCode::from(EXIT_RUNTIME);
    }

    info!("mesos-dns shutdown complete");
    ExitCode::SUCCESS
}
