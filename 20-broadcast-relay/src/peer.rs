use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

/// Process-unique identifier for one accepted connection.
///
/// Unlike a raw file descriptor, an id is never handed out twice, so a late
/// broadcast can never reach a new connection that happens to reuse an old
/// descriptor number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(u64);

impl PeerId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Hands out increasing [`PeerId`]s starting at 1.
#[derive(Debug)]
pub struct PeerIdAllocator {
    next: AtomicU64,
}

impl PeerIdAllocator {
    pub const fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    pub fn next_id(&self) -> PeerId {
        PeerId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for PeerIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}
