//! Node and validator identities.
//!
//! Both are opaque 32-byte keys. A [`PeerId`] names a transport session
//! (which node sent us a message); a [`ValidatorId`] names a signing
//! identity in the validator set. The two namespaces are kept as distinct
//! types so one cannot be passed where the other is expected.

use {
    serde::{Deserialize, Serialize},
    std::{
        fmt,
        sync::atomic::{AtomicU64, Ordering},
    },
};

macro_rules! impl_id {
    ($name:ident, $label:literal) => {
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
        pub struct $name(pub [u8; 32]);

        impl $name {
            /// Construct from raw bytes.
            pub fn from_bytes(bytes: [u8; 32]) -> Self {
                Self(bytes)
            }

            /// Returns the raw bytes.
            pub fn as_bytes(&self) -> &[u8; 32] {
                &self.0
            }

            /// Returns a process-unique id. Intended for tests and local
            /// tooling, not for real identities.
            pub fn new_unique() -> Self {
                static COUNTER: AtomicU64 = AtomicU64::new(1);
                let n = COUNTER.fetch_add(1, Ordering::Relaxed);
                let mut bytes = [0u8; 32];
                bytes[..8].copy_from_slice(&n.to_le_bytes());
                Self(bytes)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", hex::encode(self.0))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($label, "({}..)"), hex::encode(&self.0[..4]))
            }
        }
    };
}

impl_id!(ValidatorId, "ValidatorId");
impl_id!(PeerId, "PeerId");
