//! Cooperative tokio core: one task per peer on the multi-threaded runtime.

use std::{future::Future, net::SocketAddr, sync::Arc};

use anyhow::Result;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{
        TcpListener, TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    select,
    sync::Mutex,
};
use tracing::{debug, info, warn};

use crate::{
    broadcast::{FanoutReport, log_relay},
    config::RelayConfig,
    message::tag_message,
    peer::{PeerId, PeerIdAllocator},
    registry::Registry,
};

/// Write half of a peer. The async mutex serializes concurrent broadcasts
/// to the same peer; it is never held while the registry lock is.
pub type TaskSink = Arc<Mutex<OwnedWriteHalf>>;

pub type TaskRegistry = Registry<TaskSink>;

pub struct TaskRelay {
    listener: TcpListener,
    state: Arc<RelayState>,
}

struct RelayState {
    registry: Arc<TaskRegistry>,
    ids: PeerIdAllocator,
    config: RelayConfig,
}

impl TaskRelay {
    pub fn new(listener: TcpListener, config: RelayConfig) -> Self {
        Self {
            listener,
            state: Arc::new(RelayState {
                registry: Arc::new(Registry::new()),
                ids: PeerIdAllocator::new(),
                config,
            }),
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn registry(&self) -> Arc<TaskRegistry> {
        Arc::clone(&self.state.registry)
    }

    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let TaskRelay { listener, state } = self;
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => {
                    info!(peers = state.registry.len(), "relay shutting down");
                    break;
                }
                accept_result = listener.accept() => {
                    handle_accept_result(accept_result, &state);
                }
            }
        }

        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

fn handle_accept_result(
    result: std::io::Result<(TcpStream, SocketAddr)>,
    state: &Arc<RelayState>,
) {
    match result {
        Ok((stream, peer_addr)) => spawn_peer_task(stream, peer_addr, state),
        Err(err) => warn!(error = ?err, "failed to accept connection"),
    }
}

fn spawn_peer_task(stream: TcpStream, peer_addr: SocketAddr, state: &Arc<RelayState>) {
    let id = state.ids.next_id();
    let (reader, writer) = stream.into_split();
    let sink = Arc::new(Mutex::new(writer));

    if !state.registry.try_add(id, sink, state.config.max_peers) {
        warn!(peer = %id, %peer_addr, "peer limit reached, refusing connection");
        return;
    }
    info!(peer = %id, %peer_addr, "client connected");

    let state = Arc::clone(state);
    tokio::spawn(async move {
        handle_connection(reader, id, state).await;
    });
}

async fn handle_connection(mut reader: OwnedReadHalf, id: PeerId, state: Arc<RelayState>) {
    let mut buffer = vec![0u8; state.config.buffer_size];

    let reason = loop {
        match reader.read(&mut buffer).await {
            Ok(0) => break None,
            Ok(read) => {
                let chunk = &buffer[..read];
                log_relay(id, chunk);
                broadcast_async(&state.registry, &tag_message(id, chunk), id).await;
            }
            Err(err) => break Some(err),
        }
    };

    teardown(reader, id, &state, reason).await;
}

async fn teardown(
    reader: OwnedReadHalf,
    id: PeerId,
    state: &RelayState,
    reason: Option<std::io::Error>,
) {
    if let Some(sink) = state.registry.remove(id) {
        if let Err(err) = sink.lock().await.shutdown().await {
            debug!(peer = %id, error = ?err, "shutdown after disconnect failed");
        }
    }
    drop(reader);

    match reason {
        None => info!(peer = %id, "client disconnected"),
        Some(err) => info!(peer = %id, error = ?err, "client disconnected with error"),
    }
}

/// Async counterpart of [`crate::broadcast::broadcast`] with the same
/// contract: one write per peer, failures counted and skipped.
pub async fn broadcast_async(
    registry: &TaskRegistry,
    message: &[u8],
    sender: PeerId,
) -> FanoutReport {
    let mut report = FanoutReport::default();
    for (peer, sink) in registry.snapshot_excluding(sender) {
        let result = sink.lock().await.write(message).await;
        report.record(peer, message.len(), result);
    }
    report
}
