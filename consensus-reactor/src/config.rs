//! Reactor configuration.

use std::time::Duration;

/// Cadence knobs for the per-peer gossip routines.
#[derive(Debug, Clone)]
pub struct ReactorConfig {
    /// Sleep between gossip attempts when there is nothing to send.
    pub peer_gossip_sleep: Duration,

    /// Sleep between maj23 liveness prods. The prod only matters under a
    /// vote-withholding attack, so it runs at a much lower rate.
    pub peer_query_maj23_sleep: Duration,
}

impl Default for ReactorConfig {
    fn default() -> Self {
        Self {
            peer_gossip_sleep: Duration::from_millis(100),
            peer_query_maj23_sleep: Duration::from_secs(2),
        }
    }
}

impl ReactorConfig {
    /// Config suitable for local testing: short sleeps so gossip converges
    /// in milliseconds.
    pub fn dev_default() -> Self {
        Self {
            peer_gossip_sleep: Duration::from_millis(5),
            peer_query_maj23_sleep: Duration::from_millis(20),
        }
    }

    /// Config that effectively parks the gossip routines, for tests that
    /// drive the reactor's dispatch directly.
    pub fn idle_default() -> Self {
        Self {
            peer_gossip_sleep: Duration::from_secs(3600),
            peer_query_maj23_sleep: Duration::from_secs(3600),
        }
    }
}
