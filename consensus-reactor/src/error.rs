//! Error types for the consensus reactor.

use thiserror::Error;

/// Errors from decoding an inbound wire frame. Always recoverable: the
/// reactor logs and drops the frame, it never disconnects the peer (soft
/// upgrades may introduce new message types).
#[derive(Error, Debug, PartialEq, Eq)]
pub enum DecodeError {
    /// The frame carried no bytes at all.
    #[error("empty frame")]
    EmptyFrame,

    /// The frame exceeds the wire size bound.
    #[error("frame too large: {size} bytes (max {max} bytes)")]
    Oversized { size: usize, max: usize },

    /// The 1-byte message tag is not a known message type.
    #[error("unknown message tag {0:#04x}")]
    UnknownTag(u8),

    /// The body does not decode as the tagged message type.
    #[error("malformed message body: {0}")]
    InvalidBody(String),
}

/// Errors from encoding an outbound message.
#[derive(Error, Debug)]
pub enum EncodeError {
    /// The encoded frame exceeds the wire size bound.
    #[error("message too large: {size} bytes (max {max} bytes)")]
    TooLarge { size: usize, max: usize },

    /// Serialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),
}

/// Peer-state rejections. These never surface to callers: stale peer info
/// is silently dropped, per the recovery policy for peer-sourced input.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum PeerStateError {
    /// The peer reported an (height, round, step) behind what we recorded.
    #[error("peer state height regression")]
    HeightRegression,

    /// The peer reported a round start time in the future.
    #[error("peer state invalid start time")]
    InvalidStartTime,
}
