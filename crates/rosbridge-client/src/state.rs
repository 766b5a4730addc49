//! Socket lifecycle state.

use std::sync::atomic::{AtomicU8, Ordering};

/// State of the rosbridge socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    /// No socket.
    Closed = 0,
    /// WebSocket handshake in progress.
    Connecting = 1,
    /// Socket open and owned by a scope.
    Open = 2,
    /// Socket open between scopes (keep-alive).
    Parked = 3,
    /// Last connect attempt failed.
    Failed = 4,
}

impl ConnectionState {
    const fn from_raw(raw: u8) -> Self {
        match raw {
            0 => Self::Closed,
            1 => Self::Connecting,
            2 => Self::Open,
            3 => Self::Parked,
            _ => Self::Failed,
        }
    }
}

/// [`ConnectionState`] readable without the manager's socket lock.
#[derive(Debug)]
pub(crate) struct SharedState(AtomicU8);

impl SharedState {
    pub(crate) const fn new(state: ConnectionState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub(crate) fn load(&self) -> ConnectionState {
        ConnectionState::from_raw(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn store(&self, state: ConnectionState) {
        self.0.store(state as u8, Ordering::Release);
    }
}
