//! The typed event bus.
//!
//! A thin facade over [`PubSubServer`]: one `publish_event_*` method per
//! event type, each attaching the `tm.events.type` tag that the query
//! language filters on. The bus stores no references back into its
//! publishers; producers and consumers both hold it as a collaborator
//! handle.

use {
    crate::{
        error::PubSubError,
        events::{
            event_tx_type, EventData, EventDataNewBlock, EventDataNewBlockHeader,
            EventDataProposalHeartbeat, EventDataRoundState, EventDataTx, EventDataVote,
            EVENT_COMPLETE_PROPOSAL, EVENT_LOCK, EVENT_NEW_BLOCK, EVENT_NEW_BLOCK_HEADER,
            EVENT_NEW_ROUND, EVENT_NEW_ROUND_STEP, EVENT_POLKA, EVENT_PROPOSAL_HEARTBEAT,
            EVENT_RELOCK, EVENT_TIMEOUT_PROPOSE, EVENT_TIMEOUT_WAIT, EVENT_UNLOCK, EVENT_VOTE,
        },
        pubsub::{PubSubServer, Query, EVENT_TYPE_KEY},
    },
    crossbeam_channel::Sender,
    std::{collections::HashMap, sync::Arc, time::Duration},
};

/// Publishes transaction results. Implemented by the bus itself and by the
/// batching [`crate::event_buffer::TxEventBuffer`].
pub trait TxEventPublisher {
    fn publish_event_tx(&self, event: &EventDataTx) -> Result<(), PubSubError>;
}

/// A common bus for all events going through the system.
pub struct EventBus {
    server: PubSubServer,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            server: PubSubServer::new(),
        }
    }

    pub fn subscribe(
        &self,
        subscriber: &str,
        query: Query,
        out: Sender<EventData>,
        timeout: Duration,
    ) -> Result<(), PubSubError> {
        self.server.subscribe(subscriber, query, out, timeout)
    }

    pub fn unsubscribe(&self, subscriber: &str, query: Query) -> Result<(), PubSubError> {
        self.server.unsubscribe(subscriber, query)
    }

    pub fn unsubscribe_all(&self, subscriber: &str) -> Result<(), PubSubError> {
        self.server.unsubscribe_all(subscriber)
    }

    pub fn stop(&self) {
        self.server.stop();
    }

    fn publish(&self, event_type: &str, data: EventData) -> Result<(), PubSubError> {
        let mut tags = HashMap::new();
        tags.insert(EVENT_TYPE_KEY.to_string(), event_type.to_string());
        self.server.publish_with_tags(data, tags)
    }

    // -- block, tx, and vote events --

    pub fn publish_event_new_block(&self, event: EventDataNewBlock) -> Result<(), PubSubError> {
        self.publish(EVENT_NEW_BLOCK, EventData::NewBlock(event))
    }

    pub fn publish_event_new_block_header(
        &self,
        event: EventDataNewBlockHeader,
    ) -> Result<(), PubSubError> {
        self.publish(EVENT_NEW_BLOCK_HEADER, EventData::NewBlockHeader(event))
    }

    pub fn publish_event_vote(&self, event: EventDataVote) -> Result<(), PubSubError> {
        self.publish(EVENT_VOTE, EventData::Vote(event))
    }

    /// Transactions publish under their per-tx subtype so a subscriber can
    /// wait for one specific transaction.
    pub fn publish_event_tx(&self, event: EventDataTx) -> Result<(), PubSubError> {
        self.publish(&event_tx_type(&event.tx), EventData::Tx(event))
    }

    pub fn publish_event_proposal_heartbeat(
        &self,
        event: EventDataProposalHeartbeat,
    ) -> Result<(), PubSubError> {
        self.publish(EVENT_PROPOSAL_HEARTBEAT, EventData::ProposalHeartbeat(event))
    }

    // -- round-state events --

    pub fn publish_event_new_round_step(
        &self,
        event: EventDataRoundState,
    ) -> Result<(), PubSubError> {
        self.publish(EVENT_NEW_ROUND_STEP, EventData::RoundState(event))
    }

    pub fn publish_event_new_round(&self, event: EventDataRoundState) -> Result<(), PubSubError> {
        self.publish(EVENT_NEW_ROUND, EventData::RoundState(event))
    }

    pub fn publish_event_timeout_propose(
        &self,
        event: EventDataRoundState,
    ) -> Result<(), PubSubError> {
        self.publish(EVENT_TIMEOUT_PROPOSE, EventData::RoundState(event))
    }

    pub fn publish_event_timeout_wait(
        &self,
        event: EventDataRoundState,
    ) -> Result<(), PubSubError> {
        self.publish(EVENT_TIMEOUT_WAIT, EventData::RoundState(event))
    }

    pub fn publish_event_complete_proposal(
        &self,
        event: EventDataRoundState,
    ) -> Result<(), PubSubError> {
        self.publish(EVENT_COMPLETE_PROPOSAL, EventData::RoundState(event))
    }

    pub fn publish_event_polka(&self, event: EventDataRoundState) -> Result<(), PubSubError> {
        self.publish(EVENT_POLKA, EventData::RoundState(event))
    }

    pub fn publish_event_unlock(&self, event: EventDataRoundState) -> Result<(), PubSubError> {
        self.publish(EVENT_UNLOCK, EventData::RoundState(event))
    }

    pub fn publish_event_lock(&self, event: EventDataRoundState) -> Result<(), PubSubError> {
        self.publish(EVENT_LOCK, EventData::RoundState(event))
    }

    pub fn publish_event_relock(&self, event: EventDataRoundState) -> Result<(), PubSubError> {
        self.publish(EVENT_RELOCK, EventData::RoundState(event))
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl TxEventPublisher for EventBus {
    fn publish_event_tx(&self, event: &EventDataTx) -> Result<(), PubSubError> {
        EventBus::publish_event_tx(self, event.clone())
    }
}

impl<T: TxEventPublisher + ?Sized> TxEventPublisher for Arc<T> {
    fn publish_event_tx(&self, event: &EventDataTx) -> Result<(), PubSubError> {
        (**self).publish_event_tx(event)
    }
}

impl<T: TxEventPublisher + ?Sized> TxEventPublisher for &T {
    fn publish_event_tx(&self, event: &EventDataTx) -> Result<(), PubSubError> {
        (**self).publish_event_tx(event)
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{block::Tx, events::event_query_tx},
        crossbeam_channel::unbounded,
    };

    fn tx_event(tx: Tx) -> EventDataTx {
        EventDataTx {
            height: 5,
            tx,
            data: vec![0xaa],
            log: "ok".to_string(),
            code: 0,
            error: String::new(),
        }
    }

    #[test]
    fn test_tx_event_routes_by_tx_hash() {
        let bus = EventBus::new();
        let tx = Tx(vec![1, 2, 3]);
        let other = Tx(vec![4, 5, 6]);

        let (out, rx) = unbounded();
        bus.subscribe("rpc", event_query_tx(&tx), out, Duration::from_millis(100))
            .unwrap();

        // An unrelated tx does not reach the subscriber.
        bus.publish_event_tx(tx_event(other)).unwrap();
        bus.publish_event_tx(tx_event(tx.clone())).unwrap();

        match rx.recv_timeout(Duration::from_secs(1)).unwrap() {
            EventData::Tx(got) => assert_eq!(got.tx, tx),
            other => panic!("unexpected event {other:?}"),
        }
        assert!(rx.try_recv().is_err());
        bus.stop();
    }

    #[test]
    fn test_round_step_event_carries_snapshot() {
        use crate::{
            events::event_query, id::ValidatorId, round_state::RoundState,
            validator_set::ValidatorSet,
        };

        let bus = EventBus::new();
        let (out, rx) = unbounded();
        bus.subscribe(
            "reactor",
            event_query(EVENT_NEW_ROUND_STEP),
            out,
            Duration::from_millis(100),
        )
        .unwrap();

        let rs = RoundState::new_height(9, ValidatorSet::new(vec![ValidatorId::new_unique()]));
        bus.publish_event_new_round_step(EventDataRoundState::from_round_state(&rs))
            .unwrap();

        match rx.recv_timeout(Duration::from_secs(1)).unwrap() {
            EventData::RoundState(event) => {
                assert_eq!(event.height, 9);
                assert!(event.round_state.is_some());
            }
            other => panic!("unexpected event {other:?}"),
        }
        bus.stop();
    }
}
