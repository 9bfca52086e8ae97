use std::time::Duration;

/// Tunables for a single node. Identity and peers are not configured here,
/// they arrive through `init` and `topology` messages.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeConfig {
    /// How long a dissemination wave waits before re-sending to peers that
    /// have not acknowledged yet.
    pub retry_interval: Duration,

    /// Upper bound on message handlers running at the same time.
    pub max_in_flight: usize,

    /// Periodic anti-entropy, off unless set.
    pub gossip: Option<GossipConfig>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GossipConfig {
    pub interval: Duration,

    /// Chance that any single cluster node is picked in a round.
    pub fanout_probability: f64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            retry_interval: Duration::from_millis(1000),
            max_in_flight: 1024,
            gossip: None,
        }
    }
}

impl Default for GossipConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(500),
            fanout_probability: 0.5,
        }
    }
}

impl NodeConfig {
    pub fn with_retry_interval(mut self, retry_interval: Duration) -> Self {
        self.retry_interval = retry_interval;
        self
    }

    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight.max(1);
        self
    }

    pub fn with_gossip(mut self, gossip: GossipConfig) -> Self {
        self.gossip = Some(gossip);
        self
    }
}
