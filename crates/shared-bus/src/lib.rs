//! # Shared Bus - Commit Notifications
//!
//! Local subscribers (the gossip layer, loopback RPC subscribers) learn that a
//! quorum fact was committed to the ledger through this bus.
//!
//! ```text
//! ┌──────────────────┐   publish()    ┌──────────────┐   subscribe()   ┌──────────────┐
//! │ EnshrinedBifrost │ ─────────────→ │  Event Bus   │ ──────────────→ │  Subscriber  │
//! │  (post-deliver)  │                │  (broadcast) │                 │ (gossip/RPC) │
//! └──────────────────┘                └──────────────┘                 └──────────────┘
//! ```
//!
//! Delivery is best effort: a subscriber that falls more than the channel
//! capacity behind skips the oldest events.

pub mod events;
pub mod publisher;
pub mod subscriber;

// Re-export main types
pub use events::{ConsensusEvent, EventFilter, EventType};
pub use publisher::{EventPublisher, InMemoryEventBus};
pub use subscriber::{EventStream, Subscription, SubscriptionError};

/// Maximum events to buffer per subscriber before lagging.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1000;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_capacity() {
        assert_eq!(DEFAULT_CHANNEL_CAPACITY, 1000);
    }
}
