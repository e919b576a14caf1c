//! linkpingd daemon entry point
//!
//! Loads the configuration, opens every probe socket and the link socket,
//! then hands control to the reactor. Any failure before the reactor starts
//! exits non-zero; after that only the shutdown signals end the process.

use clap::Parser;
use linkpingd::config::{Config, DEFAULT_CONFIG_PATH};
use linkpingd::probe::ProbeSession;
use linkpingd::reactor::Reactor;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "linkpingd", version, about = "Per-link ICMP liveness daemon")]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging();

    info!(config = %args.config.display(), "linkpingd starting");

    match run(&args).await {
        Ok(()) => {
            info!("linkpingd exiting normally");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "linkpingd exiting with error");
            Err(e.into())
        }
    }
}

/// Initialize structured logging; RUST_LOG overrides the default level
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .compact()
        .init();
}

async fn run(args: &Args) -> linkpingd::Result<()> {
    let config = Config::load(&args.config)?;

    let mut reactor = Reactor::new()?;
    for (name, target) in &config.targets {
        let session = ProbeSession::new(
            name.clone(),
            target.device.clone(),
            &target.address,
            target.interval(),
            target.timeout(),
        )?;
        info!(
            probe = %name,
            device = %target.device,
            address = %target.address,
            "session configured"
        );
        reactor.add_session(session);
    }

    reactor.run().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_default_config_path() {
        let args = Args::parse_from(["linkpingd"]);
        assert_eq!(args.config, PathBuf::from(DEFAULT_CONFIG_PATH));
    }

    #[test]
    fn test_args_config_override() {
        let args = Args::parse_from(["linkpingd", "--config", "/tmp/test.conf"]);
        assert_eq!(args.config, PathBuf::from("/tmp/test.conf"));
    }
}
