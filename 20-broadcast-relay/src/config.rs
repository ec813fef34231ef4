/// Address the relay binds to when none is given on the command line.
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8080";

/// Upper bound on the bytes taken from a peer in one read.
pub const DEFAULT_BUFFER_SIZE: usize = 1024;

/// How the event loop services a readable peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadPolicy {
    /// Keep reading until the socket reports `WouldBlock`. Required for
    /// edge-triggered readiness to see every byte.
    #[default]
    Drain,
    /// One bounded read per readiness event. Bytes beyond the buffer stay in
    /// the socket until the next edge, which only a new arrival produces.
    SingleRead,
}

/// How the event loop handles a readable listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AcceptPolicy {
    /// Accept until the listener reports `WouldBlock`.
    #[default]
    Drain,
    /// Accept a single connection per readiness event.
    One,
}

/// Runtime settings shared by every core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    pub buffer_size: usize,
    /// Refuse connections once this many peers are registered. `None` means
    /// unlimited.
    pub max_peers: Option<usize>,
    pub read_policy: ReadPolicy,
    pub accept_policy: AcceptPolicy,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            max_peers: None,
            read_policy: ReadPolicy::default(),
            accept_policy: AcceptPolicy::default(),
        }
    }
}
