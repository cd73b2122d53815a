//! Holds config data for carmine-state services.

use std::time::Duration;

/// Holds config data for [`crate::sync::ChainSync`].
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Fallback interval between sync passes when the source pushes no
    /// events.
    pub poll_interval: Duration,
    /// Backoff between attempts to re-read the stored tip after a failed
    /// advance pass.
    pub tip_refresh_backoff: Duration,
    /// Delay before retrying a failed mempool reconciliation.
    pub mempool_retry_delay: Duration,
    /// Buffer size for node event channels.
    pub event_channel_size: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(2000),
            tip_refresh_backoff: Duration::from_secs(1),
            mempool_retry_delay: Duration::from_secs(5),
            event_channel_size: 1024,
        }
    }
}
