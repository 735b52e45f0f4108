use parking_lot::RwLock;
use std::{collections::HashSet, fmt};

/// Identity of one live connection. Never reused within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Tracks which sessions currently have detection enabled.
///
/// A session missing from the set is inactive. Writers are the transport
/// callbacks; the frame worker only reads.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    active: RwLock<HashSet<SessionId>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the session was not already active.
    pub fn activate(&self, session: SessionId) -> bool {
        self.active.write().insert(session)
    }

    /// Returns `true` if the session was active before the call.
    pub fn deactivate(&self, session: SessionId) -> bool {
        self.active.write().remove(&session)
    }

    pub fn is_active(&self, session: SessionId) -> bool {
        self.active.read().contains(&session)
    }

    pub fn active_count(&self) -> usize {
        self.active.read().len()
    }
}
