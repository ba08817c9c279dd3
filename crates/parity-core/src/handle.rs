use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Identity of one accepted transport connection.
///
/// Handles are assigned at accept time and never reused within a process,
/// so registry bookkeeping does not depend on the transport object itself.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct ConnectionHandle(u64);

impl ConnectionHandle {
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Monotonic handle source.
#[derive(Debug, Default)]
pub struct HandleAllocator {
    next: AtomicU64,
}

impl HandleAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&self) -> ConnectionHandle {
        ConnectionHandle(self.next.fetch_add(1, Ordering::Relaxed) + 1)
    }
}
