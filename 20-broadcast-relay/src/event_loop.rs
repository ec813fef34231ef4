//! Single-threaded readiness core built on `mio`.
//!
//! mio registrations are edge-triggered (epoll `EPOLLET` on Linux), so a
//! readiness event is only reported when new data or a new connection
//! arrives. [`ReadPolicy::Drain`] and [`AcceptPolicy::Drain`] consume a source
//! until it reports `WouldBlock`. `SingleRead` does one read per event and
//! can leave bytes in the socket until the next edge. `One` accepts a single
//! connection per wakeup and polls again without blocking until the backlog
//! is empty, so queued connections are still accepted one at a time.
//!
//! Every event of a wakeup is handled before the loop waits again. The
//! registry is only ever touched from the loop thread, but it is the same
//! lock-guarded type the other cores use so the broadcast engine is shared.

use std::{
    collections::HashMap,
    io::{self, Read},
    net::SocketAddr,
    sync::Arc,
    time::Duration,
};

use anyhow::{Context, Result};
use mio::{
    Events, Interest, Poll, Token, Waker,
    net::{TcpListener, TcpStream},
};
use tracing::{debug, info, warn};

use crate::{
    broadcast::relay_chunk,
    config::{AcceptPolicy, ReadPolicy, RelayConfig},
    peer::{PeerId, PeerIdAllocator},
    registry::Registry,
};

const LISTENER: Token = Token(0);
const WAKER: Token = Token(1);
const PEER_TOKEN_OFFSET: usize = 2;
const EVENT_CAPACITY: usize = 1024;

pub type EventLoopRegistry = Registry<Arc<TcpStream>>;

/// `None` once ids outgrow the platform's `usize`.
fn peer_token(id: PeerId) -> Option<Token> {
    usize::try_from(id.get())
        .ok()
        .and_then(|raw| raw.checked_add(PEER_TOKEN_OFFSET))
        .map(Token)
}

struct Connection {
    id: PeerId,
    stream: Arc<TcpStream>,
}

enum ReadOutcome {
    Open,
    Closed(Option<io::Error>),
}

pub struct EventLoop {
    poll: Poll,
    events: Events,
    listener: TcpListener,
    waker: Arc<Waker>,
    registry: Arc<EventLoopRegistry>,
    connections: HashMap<Token, Connection>,
    ids: PeerIdAllocator,
    buffer: Vec<u8>,
    config: RelayConfig,
    // Set after a single accept under `AcceptPolicy::One`. The listener is
    // edge-triggered, so the rest of the backlog raises no new event.
    backlog_pending: bool,
}

/// Stops a running [`EventLoop`] from another thread.
#[derive(Clone)]
pub struct ShutdownHandle {
    waker: Arc<Waker>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) -> io::Result<()> {
        self.waker.wake()
    }
}

impl EventLoop {
    pub fn new(mut listener: TcpListener, config: RelayConfig) -> Result<Self> {
        let poll = Poll::new().context("failed to create readiness poll")?;
        poll.registry()
            .register(&mut listener, LISTENER, Interest::READABLE)
            .context("failed to register listener")?;
        let waker = Waker::new(poll.registry(), WAKER).context("failed to create waker")?;

        Ok(Self {
            poll,
            events: Events::with_capacity(EVENT_CAPACITY),
            listener,
            waker: Arc::new(waker),
            registry: Arc::new(Registry::new()),
            connections: HashMap::new(),
            ids: PeerIdAllocator::new(),
            buffer: vec![0u8; config.buffer_size],
            config,
            backlog_pending: false,
        })
    }

    pub fn bind(addr: SocketAddr, config: RelayConfig) -> Result<Self> {
        let listener =
            TcpListener::bind(addr).with_context(|| format!("failed to bind relay on {addr}"))?;
        Self::new(listener, config)
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Shared view of the registered peers.
    ///
    /// Callers may inspect the registry but must not keep stream handles out
    /// of it. Teardown expects to hold the last reference so it can
    /// deregister the stream before closing it.
    pub fn registry(&self) -> Arc<EventLoopRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            waker: Arc::clone(&self.waker),
        }
    }

    /// Waits without timeout and services events until shut down.
    pub fn run(mut self) -> Result<()> {
        debug!("event loop running");
        while self.poll_once(None).context("readiness wait failed")? {}
        info!(peers = self.registry.len(), "event loop shutting down");
        Ok(())
    }

    /// Runs one wait and handles every event it returned.
    ///
    /// Returns `false` once a shutdown was requested. A wait that times out
    /// or is interrupted handles nothing and returns `true`. While accepted
    /// connections are still queued under [`AcceptPolicy::One`], the wait
    /// does not block and the next queued connection is accepted.
    pub fn poll_once(&mut self, timeout: Option<Duration>) -> io::Result<bool> {
        let timeout = if self.backlog_pending {
            Some(Duration::ZERO)
        } else {
            timeout
        };
        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::Interrupted => return Ok(true),
            Err(err) => return Err(err),
        }

        let mut tokens: Vec<Token> = self.events.iter().map(|event| event.token()).collect();
        if self.backlog_pending && !tokens.contains(&LISTENER) {
            tokens.push(LISTENER);
        }

        let mut keep_running = true;
        for token in tokens {
            match token {
                LISTENER => self.accept_pending(),
                WAKER => keep_running = false,
                token => self.service_peer(token),
            }
        }

        Ok(keep_running)
    }

    fn accept_pending(&mut self) {
        self.backlog_pending = false;
        loop {
            match self.listener.accept() {
                Ok((stream, addr)) => {
                    self.admit(stream, addr);
                    if self.config.accept_policy == AcceptPolicy::One {
                        self.backlog_pending = true;
                        return;
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    warn!(error = ?err, "failed to accept connection");
                    return;
                }
            }
        }
    }

    fn admit(&mut self, mut stream: TcpStream, addr: SocketAddr) {
        let id = self.ids.next_id();

        if self
            .config
            .max_peers
            .is_some_and(|limit| self.registry.len() >= limit)
        {
            warn!(peer = %id, peer_addr = %addr, "peer limit reached, refusing connection");
            return;
        }

        let Some(token) = peer_token(id) else {
            warn!(peer = %id, "peer id exceeds token space, refusing connection");
            return;
        };

        // mio streams are already non-blocking.
        if let Err(err) = self
            .poll
            .registry()
            .register(&mut stream, token, Interest::READABLE)
        {
            warn!(peer = %id, error = ?err, "failed to register connection");
            return;
        }

        let stream = Arc::new(stream);
        self.registry.add(id, Arc::clone(&stream));
        self.connections.insert(token, Connection { id, stream });
        info!(peer = %id, peer_addr = %addr, "client connected");
    }

    fn service_peer(&mut self, token: Token) {
        // An earlier event in the same wakeup may already have closed it.
        let Some(connection) = self.connections.get(&token) else {
            return;
        };
        let id = connection.id;
        let stream = Arc::clone(&connection.stream);

        let outcome = loop {
            match (&*stream).read(&mut self.buffer) {
                Ok(0) => break ReadOutcome::Closed(None),
                Ok(read) => {
                    relay_chunk(&self.registry, id, &self.buffer[..read]);
                    if self.config.read_policy == ReadPolicy::SingleRead {
                        break ReadOutcome::Open;
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break ReadOutcome::Open,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => break ReadOutcome::Closed(Some(err)),
            }
        };
        drop(stream);

        if let ReadOutcome::Closed(reason) = outcome {
            self.teardown(token, reason);
        }
    }

    fn teardown(&mut self, token: Token, reason: Option<io::Error>) {
        let Some(Connection { id, stream }) = self.connections.remove(&token) else {
            return;
        };
        drop(self.registry.remove(id));

        // Broadcast snapshots are dropped before the loop moves on, so by now
        // the loop holds the last reference.
        match Arc::try_unwrap(stream) {
            Ok(mut stream) => {
                if let Err(err) = self.poll.registry().deregister(&mut stream) {
                    debug!(peer = %id, error = ?err, "failed to deregister connection");
                }
            }
            // Only an outside clone taken from `registry()` gets here. The
            // descriptor closes when that clone drops, and the kernel removes
            // it from the poll set then.
            Err(_) => debug!(peer = %id, "connection still shared at teardown"),
        }

        match reason {
            None => info!(peer = %id, "client disconnected"),
            Some(err) => info!(peer = %id, error = ?err, "client disconnected with error"),
        }
    }
}
