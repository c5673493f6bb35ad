//! # Event Subscriber
//!
//! Receiving side of the bus.

use crate::events::{ConsensusEvent, EventFilter};
use std::pin::Pin;
use std::task::{Context, Poll};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::Stream;
use tracing::debug;

/// Errors from subscription operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SubscriptionError {
    /// The event bus was closed.
    #[error("Event bus closed")]
    Closed,
}

/// A subscription handle for receiving events.
pub struct Subscription {
    receiver: broadcast::Receiver<ConsensusEvent>,
    filter: EventFilter,
}

impl Subscription {
    pub(crate) fn new(receiver: broadcast::Receiver<ConsensusEvent>, filter: EventFilter) -> Self {
        Self { receiver, filter }
    }

    /// Receive the next event that matches the filter.
    ///
    /// Returns `None` once the bus has been dropped.
    pub async fn recv(&mut self) -> Option<ConsensusEvent> {
        loop {
            let event = match self.receiver.recv().await {
                Ok(e) => e,
                Err(broadcast::error::RecvError::Closed) => return None,
                Err(broadcast::error::RecvError::Lagged(count)) => {
                    debug!(lagged = count, "Subscriber lagged, some events dropped");
                    continue;
                }
            };

            if self.filter.matches(&event) {
                return Some(event);
            }
        }
    }

    /// Try to receive the next matching event without waiting.
    pub fn try_recv(&mut self) -> Result<Option<ConsensusEvent>, SubscriptionError> {
        loop {
            let event = match self.receiver.try_recv() {
                Ok(e) => e,
                Err(broadcast::error::TryRecvError::Empty) => return Ok(None),
                Err(broadcast::error::TryRecvError::Closed) => {
                    return Err(SubscriptionError::Closed)
                }
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
            };

            if self.filter.matches(&event) {
                return Ok(Some(event));
            }
        }
    }

    #[must_use]
    pub fn filter(&self) -> &EventFilter {
        &self.filter
    }
}

/// A filtered `Stream` of events, for use with stream combinators.
pub struct EventStream {
    inner: BroadcastStream<ConsensusEvent>,
    filter: EventFilter,
}

impl EventStream {
    #[must_use]
    pub fn new(receiver: broadcast::Receiver<ConsensusEvent>, filter: EventFilter) -> Self {
        Self {
            inner: BroadcastStream::new(receiver),
            filter,
        }
    }

    #[must_use]
    pub fn filter(&self) -> &EventFilter {
        &self.filter
    }
}

impl Stream for EventStream {
    type Item = ConsensusEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            match Pin::new(&mut self.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(event))) => {
                    if self.filter.matches(&event) {
                        return Poll::Ready(Some(event));
                    }
                }
                Poll::Ready(Some(Err(BroadcastStreamRecvError::Lagged(count)))) => {
                    debug!(lagged = count, "Event stream lagged, some events dropped");
                }
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventType;
    use crate::publisher::InMemoryEventBus;
    use crate::EventPublisher;
    use shared_types::{Attestation, ErrataTx, NetworkFee, Quorum, QuorumFact};
    use std::time::Duration;
    use tokio::time::timeout;
    use tokio_stream::StreamExt;

    fn fee_event() -> ConsensusEvent {
        let fact = QuorumFact::NetworkFee(Quorum::new(
            NetworkFee {
                chain: "ETH".into(),
                height: 1,
                transaction_size: 1,
                transaction_rate: 1,
            },
            vec![Attestation::new([1; 32], [1; 64])],
        ));
        ConsensusEvent::committed(&fact, 5).unwrap()
    }

    fn errata_event() -> ConsensusEvent {
        let fact = QuorumFact::Errata(Quorum::new(
            ErrataTx {
                chain: "BTC".into(),
                tx_id: "abc".into(),
            },
            vec![Attestation::new([2; 32], [2; 64])],
        ));
        ConsensusEvent::committed(&fact, 6).unwrap()
    }

    #[tokio::test]
    async fn test_subscription_filter() {
        let bus = InMemoryEventBus::new();
        let mut sub = bus.subscribe(EventFilter::types(vec![EventType::QuorumErrataTxCommitted]));

        bus.publish(fee_event());
        bus.publish(errata_event());

        let received = timeout(Duration::from_millis(100), sub.recv())
            .await
            .expect("timeout")
            .expect("event");
        assert_eq!(received.event_type, EventType::QuorumErrataTxCommitted);
    }

    #[tokio::test]
    async fn test_subscription_drop_cleanup() {
        let bus = InMemoryEventBus::new();
        {
            let _sub1 = bus.subscribe(EventFilter::all());
            let _sub2 = bus.subscribe(EventFilter::all());
            assert_eq!(bus.subscriber_count(), 2);
        }
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_try_recv() {
        let bus = InMemoryEventBus::new();
        let mut sub = bus.subscribe(EventFilter::all());
        assert!(matches!(sub.try_recv(), Ok(None)));

        bus.publish(fee_event());
        let event = sub.try_recv().unwrap().unwrap();
        assert_eq!(event.event_type, EventType::QuorumNetworkFeeCommitted);
    }

    #[tokio::test]
    async fn test_event_stream_skips_filtered_and_ends_on_close() {
        let bus = InMemoryEventBus::new();
        let mut stream =
            bus.event_stream(EventFilter::types(vec![EventType::QuorumNetworkFeeCommitted]));

        bus.publish(errata_event());
        bus.publish(fee_event());
        drop(bus);

        let first = timeout(Duration::from_millis(100), stream.next())
            .await
            .expect("timeout");
        assert_eq!(first.map(|e| e.event_type), Some(EventType::QuorumNetworkFeeCommitted));
        assert!(stream.next().await.is_none());
    }
}
