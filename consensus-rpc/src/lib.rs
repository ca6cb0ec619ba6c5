//! Transaction broadcast entry points and client wait helpers.
//!
//! The JSON-RPC surface proper lives with the node; this crate holds the
//! transport-independent logic behind it: the three transaction broadcast
//! modes (`async` returns immediately, `sync` waits for the mempool check,
//! `commit` waits for block inclusion) and the polling/subscription
//! helpers clients use to wait for heights and events.

pub mod broadcast;
pub mod error;
pub mod helpers;

pub use broadcast::{
    broadcast_tx_async, broadcast_tx_commit, broadcast_tx_commit_with_timeout, broadcast_tx_sync,
    BroadcastTxCommitResult, BroadcastTxResult, Mempool, TxResult, CODE_OK,
};
pub use error::RpcError;
pub use helpers::{
    default_wait_strategy, wait_for_height, wait_for_one_event, EventsClient, StatusClient,
};
