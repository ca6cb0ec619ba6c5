//! Transaction broadcast.
//!
//! Three modes, by how long the caller is willing to wait: `async`
//! (enqueue and return), `sync` (wait for the mempool check), and `commit`
//! (wait until a committed block carries the transaction, observed through
//! the per-tx event subscription).
//!
//! NOTE: transactions should be signed, but that is checked at the
//! application level, not here.

use {
    crate::error::RpcError,
    consensus_types::{
        block::{Hash, Tx},
        event_bus::EventBus,
        events::{event_query_tx, EventData},
        pubsub::Query,
    },
    crossbeam_channel::{bounded, Receiver, RecvTimeoutError},
    log::{error, info, warn},
    std::time::{Duration, Instant},
};

/// Result code for a successful check or delivery.
pub const CODE_OK: u32 = 0;

/// Deadline for the event-bus subscribe handshake. Deliberately short: it
/// bounds only the subscribe call itself, never the commit wait below.
const SUBSCRIBE_TIMEOUT: Duration = Duration::from_millis(10);

/// How long `broadcast_tx_commit` waits for the transaction to land in a
/// block.
pub const WAIT_FOR_COMMIT_TIMEOUT: Duration = Duration::from_secs(120);

const SUBSCRIBER: &str = "mempool";

/// Result of checking or delivering one transaction.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TxResult {
    pub code: u32,
    pub data: Vec<u8>,
    pub log: String,
}

impl TxResult {
    pub fn is_ok(&self) -> bool {
        self.code == CODE_OK
    }
}

/// Result of an `async`/`sync` broadcast.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BroadcastTxResult {
    pub code: u32,
    pub data: Vec<u8>,
    pub log: String,
    pub hash: Hash,
}

/// Result of a `commit` broadcast.
///
/// CONTRACT: an `Err` means the mempool broke or the commit wait timed
/// out. A failed CheckTx or DeliverTx is NOT an error: the result carries
/// the non-OK code instead.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BroadcastTxCommitResult {
    pub check_tx: TxResult,
    pub deliver_tx: TxResult,
    pub hash: Hash,
    pub height: i64,
}

/// The mempool's transaction-admission seam.
pub trait Mempool: Send + Sync {
    /// Validate and enqueue a transaction. The check result arrives on
    /// the returned channel once validation completes.
    fn check_tx(&self, tx: &Tx) -> Result<Receiver<TxResult>, RpcError>;
}

/// Enqueue the transaction and return right away, with no response.
pub fn broadcast_tx_async(mempool: &dyn Mempool, tx: &Tx) -> Result<BroadcastTxResult, RpcError> {
    let _check_rx = mempool.check_tx(tx)?;
    Ok(BroadcastTxResult {
        code: CODE_OK,
        data: Vec::new(),
        log: String::new(),
        hash: tx.hash(),
    })
}

/// Enqueue the transaction and wait for the mempool check response.
pub fn broadcast_tx_sync(mempool: &dyn Mempool, tx: &Tx) -> Result<BroadcastTxResult, RpcError> {
    let check_rx = mempool.check_tx(tx)?;
    let check = check_rx.recv().map_err(|_| RpcError::CheckTxDropped)?;
    Ok(BroadcastTxResult {
        code: check.code,
        data: check.data,
        log: check.log,
        hash: tx.hash(),
    })
}

/// Enqueue the transaction and wait until a committed block carries it,
/// with the default 120 s deadline.
pub fn broadcast_tx_commit(
    mempool: &dyn Mempool,
    event_bus: &EventBus,
    tx: &Tx,
) -> Result<BroadcastTxCommitResult, RpcError> {
    broadcast_tx_commit_with_timeout(mempool, event_bus, tx, WAIT_FOR_COMMIT_TIMEOUT)
}

/// [`broadcast_tx_commit`] with an explicit commit-wait deadline.
pub fn broadcast_tx_commit_with_timeout(
    mempool: &dyn Mempool,
    event_bus: &EventBus,
    tx: &Tx,
    wait_timeout: Duration,
) -> Result<BroadcastTxCommitResult, RpcError> {
    // Subscribe to the tx being committed in a block before it is even
    // submitted, so the commit event cannot be missed. The subscribe
    // handshake gets the short deadline; the commit wait runs on its own
    // clock below.
    let (out, deliver_rx) = bounded(1);
    let query = event_query_tx(tx);
    let _guard = SubscriptionGuard::subscribe(event_bus, query, out).inspect_err(|e| {
        error!("error broadcasting transaction: {e}");
    })?;

    // Submit and wait for the mempool check.
    let check_rx = mempool.check_tx(tx).inspect_err(|e| {
        error!("error broadcasting transaction: {e}");
    })?;
    let check = check_rx.recv().map_err(|_| RpcError::CheckTxDropped)?;
    if !check.is_ok() {
        // CheckTx failed!
        return Ok(BroadcastTxCommitResult {
            check_tx: check,
            deliver_tx: TxResult::default(),
            hash: tx.hash(),
            height: 0,
        });
    }

    // Wait for the tx to be included in a block, timing out after
    // something reasonable.
    let deadline = Instant::now() + wait_timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match deliver_rx.recv_timeout(remaining) {
            Ok(EventData::Tx(deliver)) => {
                info!("deliver-tx passed for {}", tx.hash());
                return Ok(BroadcastTxCommitResult {
                    check_tx: check,
                    deliver_tx: TxResult {
                        code: deliver.code,
                        data: deliver.data,
                        log: deliver.log,
                    },
                    hash: tx.hash(),
                    height: deliver.height,
                });
            }
            // The per-tx query only ever matches tx events.
            Ok(other) => warn!("unexpected event on tx subscription: {other:?}"),
            Err(RecvTimeoutError::Timeout) => {
                error!("failed to include tx {} in a block", tx.hash());
                return Err(RpcError::WaitForBlockTimeout {
                    check_tx: check,
                    hash: tx.hash(),
                });
            }
            Err(RecvTimeoutError::Disconnected) => return Err(RpcError::EventStreamClosed),
        }
    }
    // Every arm above returns or continues.
    #[allow(unreachable_code)]
    {
        unreachable!("should never happen")
    }
}

// Unsubscribes on every exit path of the commit wait.
struct SubscriptionGuard<'a> {
    bus: &'a EventBus,
    query: Query,
}

impl<'a> SubscriptionGuard<'a> {
    fn subscribe(
        bus: &'a EventBus,
        query: Query,
        out: crossbeam_channel::Sender<EventData>,
    ) -> Result<Self, RpcError> {
        bus.subscribe(SUBSCRIBER, query.clone(), out, SUBSCRIBE_TIMEOUT)?;
        Ok(Self { bus, query })
    }
}

impl Drop for SubscriptionGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.bus.unsubscribe(SUBSCRIBER, self.query.clone()) {
            warn!("failed to unsubscribe {SUBSCRIBER}: {e}");
        }
    }
}
