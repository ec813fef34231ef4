use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use broadcast_relay::{
    cli::{Cli, Command},
    event_loop::EventLoop,
    tasks::TaskRelay,
    threaded::ThreadedRelay,
};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = cli.relay_config();

    let result = match cli.command {
        Command::Threaded => {
            let relay = ThreadedRelay::bind(cli.listen, config)?;
            info!("relay listening on {}", relay.local_addr()?);
            relay.run()
        }
        Command::EventLoop(_) => {
            let relay = EventLoop::bind(cli.listen, config)?;
            info!("relay listening on {}", relay.local_addr()?);
            relay.run()
        }
        Command::Tasks => {
            let runtime = tokio::runtime::Runtime::new().context("failed to start tokio runtime")?;
            runtime.block_on(async {
                let listener = tokio::net::TcpListener::bind(cli.listen)
                    .await
                    .with_context(|| format!("failed to bind relay on {}", cli.listen))?;
                let relay = TaskRelay::new(listener, config);
                info!("relay listening on {}", relay.local_addr()?);
                relay.run_until_ctrl_c().await
            })
        }
    };

    if let Err(err) = &result {
        warn!("relay exited with error: {err:?}");
    }
    result
}
