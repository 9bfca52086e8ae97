use std::io::IsTerminal;
use std::process::ExitCode;

use common::{GossipConfig, NodeConfig, Runtime};
use tracing::{error, info};

fn init_tracing() {
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::{fmt, EnvFilter};

    // stdout carries the protocol, so logs go to stderr.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .with_target(false)
        .with_filter(filter);

    let registry = tracing_subscriber::registry().with(stderr_layer);
    #[cfg(feature = "console")]
    let registry = registry.with(console_subscriber::spawn());

    let _ = registry.try_init();
}

fn main() -> ExitCode {
    init_tracing();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            error!(%err, "failed to start tokio runtime");
            return ExitCode::FAILURE;
        }
    };

    let config = NodeConfig::default().with_gossip(GossipConfig::default());
    let result = runtime.block_on(Runtime::start(
        tokio::io::stdin(),
        tokio::io::stdout(),
        config,
    ));

    // A fatal error can leave a stdin read parked on a blocking thread that
    // never returns while the input stays open; don't wait for it.
    runtime.shutdown_background();

    match result {
        Ok(()) => {
            info!("node exiting");
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!(%err, "node failed");
            ExitCode::FAILURE
        }
    }
}
