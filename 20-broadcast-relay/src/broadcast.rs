//! Fanout of one tagged message to every registered peer but its sender.

use std::{
    io::{self, Write},
    sync::Arc,
};

use tracing::{debug, info};

use crate::{message::tag_message, peer::PeerId, registry::Registry};

/// Something a synchronous core can push bytes into.
///
/// `send` performs a single write and reports how much of `bytes` went out.
/// Callers do not retry short writes.
pub trait PeerSink {
    fn send(&self, bytes: &[u8]) -> io::Result<usize>;
}

impl PeerSink for Arc<std::net::TcpStream> {
    fn send(&self, bytes: &[u8]) -> io::Result<usize> {
        (&**self).write(bytes)
    }
}

impl PeerSink for Arc<mio::net::TcpStream> {
    fn send(&self, bytes: &[u8]) -> io::Result<usize> {
        (&**self).write(bytes)
    }
}

/// Outcome of one fanout.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FanoutReport {
    /// Peers that accepted the whole message in one write.
    pub delivered: usize,
    /// Peers that accepted only part of it.
    pub short: usize,
    /// Peers whose write failed outright, including `WouldBlock`.
    pub failed: usize,
}

impl FanoutReport {
    pub fn attempted(&self) -> usize {
        self.delivered + self.short + self.failed
    }

    pub(crate) fn record(&mut self, peer: PeerId, expected: usize, result: io::Result<usize>) {
        match result {
            Ok(written) if written == expected => self.delivered += 1,
            Ok(written) => {
                debug!(peer = %peer, written, expected, "short write during broadcast");
                self.short += 1;
            }
            Err(err) => {
                debug!(peer = %peer, error = ?err, "failed to deliver message to peer");
                self.failed += 1;
            }
        }
    }
}

/// Writes `message` to every peer in the registry except `sender`.
///
/// A failing peer never stops the fanout and is never removed here; its own
/// read side notices the broken connection and tears it down.
pub fn broadcast<H>(registry: &Registry<H>, message: &[u8], sender: PeerId) -> FanoutReport
where
    H: PeerSink + Clone,
{
    let mut report = FanoutReport::default();
    for (peer, sink) in registry.snapshot_excluding(sender) {
        report.record(peer, message.len(), sink.send(message));
    }
    report
}

/// Tags one chunk read from `sender` and broadcasts it.
pub fn relay_chunk<H>(registry: &Registry<H>, sender: PeerId, chunk: &[u8]) -> FanoutReport
where
    H: PeerSink + Clone,
{
    log_relay(sender, chunk);
    broadcast(registry, &tag_message(sender, chunk), sender)
}

pub(crate) fn log_relay(sender: PeerId, chunk: &[u8]) {
    info!(
        peer = %sender,
        bytes = chunk.len(),
        text = %String::from_utf8_lossy(chunk),
        "relaying message"
    );
}
