//! Error types for the core-types crate.

use thiserror::Error;

/// Errors from the tag-query pub/sub server.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum PubSubError {
    /// The subscribe handshake did not complete before its deadline.
    #[error("subscribe timed out")]
    SubscribeTimeout,

    /// The (subscriber, query) pair is already registered.
    #[error("subscriber {0} already subscribed to query {1}")]
    AlreadySubscribed(String, String),

    /// No subscription matches the (subscriber, query) pair.
    #[error("subscription not found for subscriber {0}")]
    SubscriptionNotFound(String),

    /// The server has been stopped.
    #[error("pubsub server stopped")]
    Stopped,

    /// The query string does not parse.
    #[error("invalid query: {0}")]
    InvalidQuery(String),
}

/// Errors from part-set assembly.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum PartSetError {
    /// The part index is outside the header's total.
    #[error("part index {index} out of range (total {total})")]
    InvalidIndex { index: u32, total: u32 },

    /// The part's content does not belong to this part set.
    #[error("part {0} does not match the part set header")]
    HeaderMismatch(u32),
}
