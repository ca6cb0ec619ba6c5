//! Batch-then-flush adaptor for transaction events.
//!
//! Transaction results for one block are buffered while the block executes
//! and flushed in insertion order once the block is final. Owned by a
//! single batch executor; the `RefCell` makes the type deliberately
//! non-`Sync`.

use {
    crate::{error::PubSubError, event_bus::TxEventPublisher, events::EventDataTx},
    std::cell::RefCell,
};

const TX_EVENT_BUFFER_CAPACITY: usize = 1000;

/// A buffer of tx events in front of a downstream publisher.
pub struct TxEventBuffer<P: TxEventPublisher> {
    next: P,
    events: RefCell<Vec<EventDataTx>>,
}

impl<P: TxEventPublisher> TxEventBuffer<P> {
    pub fn new(next: P) -> Self {
        Self {
            next,
            events: RefCell::new(Vec::with_capacity(TX_EVENT_BUFFER_CAPACITY)),
        }
    }

    /// Number of buffered events.
    pub fn len(&self) -> usize {
        self.events.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.borrow().is_empty()
    }

    /// Publish every buffered event downstream, in insertion order.
    ///
    /// The first error short-circuits and leaves the buffer untouched, so a
    /// retry re-runs the whole batch; the buffer resets only after a fully
    /// successful flush.
    pub fn flush(&self) -> Result<(), PubSubError> {
        for event in self.events.borrow().iter() {
            self.next.publish_event_tx(event)?;
        }
        *self.events.borrow_mut() = Vec::with_capacity(TX_EVENT_BUFFER_CAPACITY);
        Ok(())
    }
}

impl<P: TxEventPublisher> TxEventPublisher for TxEventBuffer<P> {
    /// Buffers the event to be fired upon finality.
    fn publish_event_tx(&self, event: &EventDataTx) -> Result<(), PubSubError> {
        self.events.borrow_mut().push(event.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use {super::*, crate::block::Tx};

    struct RecordingPublisher {
        seen: RefCell<Vec<EventDataTx>>,
        fail_on: Option<usize>,
        calls: RefCell<usize>,
    }

    impl RecordingPublisher {
        fn new(fail_on: Option<usize>) -> Self {
            Self {
                seen: RefCell::new(Vec::new()),
                fail_on,
                calls: RefCell::new(0),
            }
        }

        fn seen_tags(&self) -> Vec<u8> {
            self.seen.borrow().iter().map(|e| e.tx.0[0]).collect()
        }
    }

    impl TxEventPublisher for RecordingPublisher {
        fn publish_event_tx(&self, event: &EventDataTx) -> Result<(), PubSubError> {
            let call = *self.calls.borrow();
            *self.calls.borrow_mut() += 1;
            if self.fail_on == Some(call) {
                return Err(PubSubError::Stopped);
            }
            self.seen.borrow_mut().push(event.clone());
            Ok(())
        }
    }

    fn tx_event(tag: u8) -> EventDataTx {
        EventDataTx {
            height: 1,
            tx: Tx(vec![tag]),
            data: vec![],
            log: String::new(),
            code: 0,
            error: String::new(),
        }
    }

    #[test]
    fn test_buffer_then_flush_in_order() {
        let buffer = TxEventBuffer::new(RecordingPublisher::new(None));
        for tag in [1u8, 2, 3] {
            buffer.publish_event_tx(&tx_event(tag)).unwrap();
        }
        // Nothing reaches the downstream publisher before the flush.
        assert!(buffer.next.seen.borrow().is_empty());
        assert_eq!(buffer.len(), 3);

        buffer.flush().unwrap();
        assert_eq!(buffer.next.seen_tags(), vec![1, 2, 3]);
        assert!(buffer.is_empty());

        // A second flush with nothing buffered publishes nothing.
        buffer.flush().unwrap();
        assert_eq!(buffer.next.seen.borrow().len(), 3);
    }

    #[test]
    fn test_flush_error_short_circuits() {
        let buffer = TxEventBuffer::new(RecordingPublisher::new(Some(1)));
        for tag in [1u8, 2, 3] {
            buffer.publish_event_tx(&tx_event(tag)).unwrap();
        }

        assert_eq!(buffer.flush(), Err(PubSubError::Stopped));
        // Only the first event went out; the batch stays buffered for retry.
        assert_eq!(buffer.next.seen.borrow().len(), 1);
        assert_eq!(buffer.len(), 3);

        // The retry re-runs the whole batch (the downstream publisher only
        // failed its second call).
        buffer.flush().unwrap();
        assert!(buffer.is_empty());
        assert_eq!(buffer.next.seen_tags(), vec![1, 1, 2, 3]);
    }
}
