//! Thread-per-connection core.
//!
//! The acceptor blocks on `accept` and spawns one named OS thread per peer.
//! Each handler owns the read side and the teardown of its connection; the
//! registry lock is only taken for add, remove and snapshot, never across a
//! blocking read or write.

use std::{
    io::{self, Read},
    net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs},
    sync::Arc,
    thread,
};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::{
    broadcast::relay_chunk,
    config::RelayConfig,
    peer::{PeerId, PeerIdAllocator},
    registry::Registry,
};

pub type ThreadedRegistry = Registry<Arc<TcpStream>>;

pub struct ThreadedRelay {
    listener: TcpListener,
    registry: Arc<ThreadedRegistry>,
    config: RelayConfig,
}

impl ThreadedRelay {
    pub fn new(listener: TcpListener, config: RelayConfig) -> Self {
        Self {
            listener,
            registry: Arc::new(Registry::new()),
            config,
        }
    }

    pub fn bind<A: ToSocketAddrs>(addr: A, config: RelayConfig) -> Result<Self> {
        let listener = TcpListener::bind(addr).context("failed to bind relay listener")?;
        Ok(Self::new(listener, config))
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn registry(&self) -> Arc<ThreadedRegistry> {
        Arc::clone(&self.registry)
    }

    /// Accepts connections forever.
    pub fn run(self) -> Result<()> {
        let ThreadedRelay {
            listener,
            registry,
            config,
        } = self;
        let ids = PeerIdAllocator::new();

        for stream in listener.incoming() {
            match stream {
                Ok(stream) => admit_connection(stream, ids.next_id(), &registry, &config),
                Err(err) => warn!(error = ?err, "failed to accept connection"),
            }
        }

        Ok(())
    }
}

fn admit_connection(
    stream: TcpStream,
    id: PeerId,
    registry: &Arc<ThreadedRegistry>,
    config: &RelayConfig,
) {
    let peer_addr = stream.peer_addr().ok();
    let stream = Arc::new(stream);

    if !registry.try_add(id, Arc::clone(&stream), config.max_peers) {
        warn!(peer = %id, ?peer_addr, "peer limit reached, refusing connection");
        let _ = stream.shutdown(Shutdown::Both);
        return;
    }
    info!(peer = %id, ?peer_addr, "client connected");

    let handler_registry = Arc::clone(registry);
    let buffer_size = config.buffer_size;
    let spawned = thread::Builder::new()
        .name(format!("relay-peer-{id}"))
        .spawn(move || handle_connection(stream, id, &handler_registry, buffer_size));

    if let Err(err) = spawned {
        warn!(peer = %id, error = ?err, "failed to spawn connection handler");
        if let Some(stream) = registry.remove(id) {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }
}

fn handle_connection(
    stream: Arc<TcpStream>,
    id: PeerId,
    registry: &ThreadedRegistry,
    buffer_size: usize,
) {
    let mut buffer = vec![0u8; buffer_size];

    let reason = loop {
        match (&*stream).read(&mut buffer) {
            Ok(0) => break None,
            Ok(read) => {
                relay_chunk(registry, id, &buffer[..read]);
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => break Some(err),
        }
    };

    teardown(stream, id, registry, reason);
}

/// Unregisters and closes one connection. Runs once, on the handler thread.
fn teardown(
    stream: Arc<TcpStream>,
    id: PeerId,
    registry: &ThreadedRegistry,
    reason: Option<io::Error>,
) {
    registry.remove(id);

    // Other threads may still hold a snapshot clone mid-broadcast; shutting the
    // socket down closes the connection now rather than when the last clone drops.
    if let Err(err) = stream.shutdown(Shutdown::Both) {
        debug!(peer = %id, error = ?err, "shutdown after disconnect failed");
    }
    drop(stream);

    match reason {
        None => info!(peer = %id, "client disconnected"),
        Some(err) => info!(peer = %id, error = ?err, "client disconnected with error"),
    }
}
