use std::net::SocketAddr;

use clap::{Args, Parser, Subcommand};

use crate::config::{
    AcceptPolicy, DEFAULT_BUFFER_SIZE, DEFAULT_LISTEN_ADDR, ReadPolicy, RelayConfig,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Socket address the relay should bind to. Use port 0 for an ephemeral port.
    #[arg(long, default_value = DEFAULT_LISTEN_ADDR)]
    pub listen: SocketAddr,

    /// Maximum number of bytes taken from a peer in one read.
    #[arg(long, default_value_t = DEFAULT_BUFFER_SIZE, value_parser = parse_buffer_size)]
    pub buffer_size: usize,

    /// Refuse new connections once this many peers are connected.
    #[arg(long)]
    pub max_peers: Option<usize>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve each connection on its own blocking OS thread.
    Threaded,
    /// Serve every connection from one edge-triggered readiness loop.
    EventLoop(EventLoopArgs),
    /// Serve each connection as a tokio task.
    Tasks,
}

#[derive(Args, Debug, Clone, Default)]
pub struct EventLoopArgs {
    /// Perform a single read per readiness event instead of draining the socket.
    #[arg(long)]
    pub single_read: bool,

    /// Accept a single pending connection per readiness event.
    #[arg(long)]
    pub accept_one: bool,
}

impl Cli {
    pub fn relay_config(&self) -> RelayConfig {
        let mut config = RelayConfig {
            buffer_size: self.buffer_size,
            max_peers: self.max_peers,
            ..RelayConfig::default()
        };

        if let Command::EventLoop(args) = &self.command {
            if args.single_read {
                config.read_policy = ReadPolicy::SingleRead;
            }
            if args.accept_one {
                config.accept_policy = AcceptPolicy::One;
            }
        }

        config
    }
}

fn parse_buffer_size(raw: &str) -> Result<usize, String> {
    match raw.parse::<usize>() {
        Ok(0) => Err("buffer size must be at least 1".to_string()),
        Ok(size) => Ok(size),
        Err(err) => Err(err.to_string()),
    }
}
