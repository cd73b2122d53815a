//! Service status reporting.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

/// The lifecycle states a Carmine service can be in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusType {
    /// The service is starting up.
    Spawning = 0,
    /// The service is syncing against the node.
    Syncing = 1,
    /// The service is caught up and serving.
    Ready = 2,
    /// The service is shutting down.
    Closing = 3,
    /// The service hit an error it can retry past.
    RecoverableError = 4,
    /// The service hit an error requiring operator action.
    CriticalError = 5,
    /// The service is not running.
    Offline = 6,
}

impl From<usize> for StatusType {
    fn from(value: usize) -> Self {
        match value {
            0 => StatusType::Spawning,
            1 => StatusType::Syncing,
            2 => StatusType::Ready,
            3 => StatusType::Closing,
            4 => StatusType::RecoverableError,
            5 => StatusType::CriticalError,
            _ => StatusType::Offline,
        }
    }
}

impl From<StatusType> for usize {
    fn from(status: StatusType) -> Self {
        status as usize
    }
}

impl StatusType {
    /// A single-character marker for compact status log lines.
    pub fn status_symbol(&self) -> &'static str {
        match self {
            StatusType::Spawning => "⋯",
            StatusType::Syncing => "↻",
            StatusType::Ready => "✓",
            StatusType::Closing => "✗",
            StatusType::RecoverableError => "!",
            StatusType::CriticalError => "‼",
            StatusType::Offline => "∅",
        }
    }
}

impl std::fmt::Display for StatusType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            StatusType::Spawning => "Spawning",
            StatusType::Syncing => "Syncing",
            StatusType::Ready => "Ready",
            StatusType::Closing => "Closing",
            StatusType::RecoverableError => "RecoverableError",
            StatusType::CriticalError => "CriticalError",
            StatusType::Offline => "Offline",
        };
        f.write_str(name)
    }
}

/// A shareable atomic wrapper around a [`StatusType`].
#[derive(Debug, Clone)]
pub struct AtomicStatus(Arc<AtomicUsize>);

impl AtomicStatus {
    /// Creates a new status holder.
    pub fn new(status: StatusType) -> Self {
        Self(Arc::new(AtomicUsize::new(status.into())))
    }

    /// Reads the current status.
    pub fn load(&self) -> StatusType {
        StatusType::from(self.0.load(Ordering::SeqCst))
    }

    /// Replaces the current status.
    pub fn store(&self, status: StatusType) {
        self.0.store(status.into(), Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_usize() {
        for status in [
            StatusType::Spawning,
            StatusType::Syncing,
            StatusType::Ready,
            StatusType::Closing,
            StatusType::RecoverableError,
            StatusType::CriticalError,
            StatusType::Offline,
        ] {
            assert_eq!(StatusType::from(usize::from(status)), status);
        }
    }

    #[test]
    fn atomic_status_is_shared() {
        let status = AtomicStatus::new(StatusType::Spawning);
        let clone = status.clone();
        clone.store(StatusType::Ready);
        assert_eq!(status.load(), StatusType::Ready);
    }
}
