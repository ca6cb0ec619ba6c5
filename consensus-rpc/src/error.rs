//! Error types for the RPC layer.

use {
    crate::broadcast::TxResult,
    consensus_types::{block::Hash, error::PubSubError},
    thiserror::Error,
};

/// Errors surfaced to RPC callers.
#[derive(Error, Debug)]
pub enum RpcError {
    /// Subscribing to the event bus failed (saturated or stopped server).
    #[error("failed to subscribe: {0}")]
    Subscribe(#[from] PubSubError),

    /// The mempool rejected the transaction outright.
    #[error("mempool error: {0}")]
    Mempool(String),

    /// The mempool dropped the check-tx callback without responding.
    #[error("check-tx response channel closed")]
    CheckTxDropped,

    /// The transaction cleared the mempool check but no block carried it
    /// before the deadline. The check result is preserved for the caller.
    #[error("timed out waiting for transaction to be included in a block")]
    WaitForBlockTimeout { check_tx: TxResult, hash: Hash },

    /// The event subscription ended before the awaited event arrived.
    #[error("event stream closed")]
    EventStreamClosed,

    /// No event of the requested type arrived before the deadline.
    #[error("timed out waiting for event {0}")]
    WaitForEventTimeout(String),

    /// The wait strategy gave up on catching up to the requested height.
    #[error("waiting for {0} blocks... aborting")]
    WaitAborted(i64),

    /// Querying node status failed.
    #[error("status query failed: {0}")]
    Status(String),
}
