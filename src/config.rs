//! Pipeline configuration.

use std::time::Duration;

/// How the update pipeline buffers, orders and applies updates.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Updates held per instrument before a sorted flush; 0 applies immediately
    pub buffer_capacity: usize,
    /// Sort a full buffer by update id, otherwise by update time
    pub sort_by_update_id: bool,
    /// Apply every update by exchange id and action instead of by price
    pub apply_by_identifier: bool,
    /// Accept repeated prices in every snapshot, whatever the snapshot says
    pub allow_duplicate_prices: bool,
    /// Treat a by-id delete of an unknown id as a no-op
    pub bypass_delete_verification: bool,
    /// Free nodes idle longer than this are dropped by the pool sweep
    pub node_pool_idle_ttl: Duration,
    /// Slots in the change-notification broadcast channel
    pub notification_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 0,
            sort_by_update_id: true,
            apply_by_identifier: false,
            allow_duplicate_prices: false,
            bypass_delete_verification: false,
            node_pool_idle_ttl: Duration::from_secs(30),
            notification_capacity: 1024,
        }
    }
}

impl PipelineConfig {
    pub fn with_buffer(mut self, capacity: usize, sort_by_update_id: bool) -> Self {
        self.buffer_capacity = capacity;
        self.sort_by_update_id = sort_by_update_id;
        self
    }

    pub fn with_apply_by_identifier(mut self, enabled: bool) -> Self {
        self.apply_by_identifier = enabled;
        self
    }

    pub fn with_allow_duplicate_prices(mut self, enabled: bool) -> Self {
        self.allow_duplicate_prices = enabled;
        self
    }

    pub fn with_bypass_delete_verification(mut self, enabled: bool) -> Self {
        self.bypass_delete_verification = enabled;
        self
    }

    pub fn with_node_pool_idle_ttl(mut self, ttl: Duration) -> Self {
        self.node_pool_idle_ttl = ttl;
        self
    }

    /// Buffering is on when the capacity is non-zero
    #[inline]
    pub fn is_buffered(&self) -> bool {
        self.buffer_capacity > 0
    }
}
