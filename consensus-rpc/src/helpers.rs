//! Client wait helpers: poll for a height, or subscribe for one event.

use {
    crate::error::RpcError,
    consensus_types::{
        error::PubSubError,
        event_bus::EventBus,
        events::{event_query, EventData},
        pubsub::Query,
    },
    crossbeam_channel::{bounded, Sender},
    std::{thread, time::Duration},
};

const SUBSCRIBER: &str = "rpc-wait";
const SUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(1);

/// Status surface of a node, as seen by a waiting client.
pub trait StatusClient {
    fn latest_block_height(&self) -> Result<i64, RpcError>;
}

/// Informed of the remaining height delta; decides whether to keep
/// waiting or abort early.
pub type Waiter = dyn Fn(i64) -> Result<(), RpcError>;

/// The standard backoff: abort when more than 10 blocks behind, otherwise
/// sleep half a second for the in-progress block plus a second for every
/// full block.
pub fn default_wait_strategy(delta: i64) -> Result<(), RpcError> {
    if delta > 10 {
        return Err(RpcError::WaitAborted(delta));
    }
    if delta > 0 {
        let delay = Duration::from_secs((delta - 1) as u64) + Duration::from_millis(500);
        thread::sleep(delay);
    }
    Ok(())
}

/// Poll status until the block at `height` is available.
///
/// With no waiter, [`default_wait_strategy`] paces the polling.
pub fn wait_for_height<C: StatusClient + ?Sized>(
    client: &C,
    height: i64,
    waiter: Option<&Waiter>,
) -> Result<(), RpcError> {
    let waiter = waiter.unwrap_or(&default_wait_strategy);
    let mut delta = 1i64;
    while delta > 0 {
        delta = height - client.latest_block_height()?;
        // Wait for the estimated time, or abort early.
        waiter(delta)?;
    }
    Ok(())
}

/// Event-subscription surface of a node, as seen by a waiting client.
pub trait EventsClient {
    fn subscribe(
        &self,
        subscriber: &str,
        query: Query,
        out: Sender<EventData>,
    ) -> Result<(), PubSubError>;
    fn unsubscribe_all(&self, subscriber: &str) -> Result<(), PubSubError>;
}

impl EventsClient for EventBus {
    fn subscribe(
        &self,
        subscriber: &str,
        query: Query,
        out: Sender<EventData>,
    ) -> Result<(), PubSubError> {
        EventBus::subscribe(self, subscriber, query, out, SUBSCRIBE_TIMEOUT)
    }

    fn unsubscribe_all(&self, subscriber: &str) -> Result<(), PubSubError> {
        EventBus::unsubscribe_all(self, subscriber)
    }
}

/// Wait for the next event of `event_type`, or time out.
///
/// Subscribing and unsubscribing are handled under the hood; the
/// subscription is removed on every exit path.
pub fn wait_for_one_event<C: EventsClient + ?Sized>(
    client: &C,
    event_type: &str,
    timeout: Duration,
) -> Result<EventData, RpcError> {
    let (out, events) = bounded(1);
    client.subscribe(SUBSCRIBER, event_query(event_type), out)?;

    let result = events
        .recv_timeout(timeout)
        .map_err(|_| RpcError::WaitForEventTimeout(event_type.to_string()));

    // Make sure to unregister whichever way the wait ended.
    let _ = client.unsubscribe_all(SUBSCRIBER);
    result
}
