use std::time::Duration;

use murmur_db::STORE_DEADLINE;

/// Default capacity of each connection's outbound queue.
pub const DEFAULT_OUTBOUND_QUEUE: usize = 64;

/// Default capacity of each hub channel (register, unregister, broadcast).
pub const DEFAULT_HUB_QUEUE: usize = 1024;

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Frames buffered per connection before the hub disconnects it.
    pub outbound_queue: usize,

    /// Capacity of the hub's coordination channels.
    pub hub_queue: usize,

    /// Answer failed frames with `{"status":"error",...}` instead of only
    /// logging them.
    pub error_frames: bool,

    /// Upper bound on each store call.
    pub store_deadline: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            outbound_queue: DEFAULT_OUTBOUND_QUEUE,
            hub_queue: DEFAULT_HUB_QUEUE,
            error_frames: true,
            store_deadline: STORE_DEADLINE,
        }
    }
}
