//! Identifiers for cluster entities.
//!
//! Cluster-assigned ids travel as UUID strings. `MutationId` is the only id
//! minted on the client side.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use crate::error::ClientError;

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Create a new random id
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Create from UUID bytes
            #[must_use]
            pub const fn from_bytes(bytes: [u8; 16]) -> Self {
                Self(Uuid::from_bytes(bytes))
            }

            /// Get as UUID
            #[must_use]
            pub const fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = ClientError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self).map_err(|e| ClientError::Validation {
                    field: $label.to_string(),
                    reason: e.to_string(),
                })
            }
        }
    };
}

define_id!(
    /// Master transaction identifier, assigned by the cluster on start
    TransactionId,
    "transaction_id"
);

define_id!(
    /// Tablet transaction identifier, assigned by the cluster on start
    TabletTransactionId,
    "tablet_transaction_id"
);

define_id!(
    /// Idempotency token for a mutating call.
    ///
    /// Generated once per logical call and reused by every retry of it.
    MutationId,
    "mutation_id"
);

define_id!(
    /// Namespace node identifier
    NodeId,
    "node_id"
);

define_id!(
    /// Lock identifier
    LockId,
    "lock_id"
);

define_id!(
    /// Scheduler operation identifier
    OperationId,
    "operation_id"
);

define_id!(
    /// Job identifier
    JobId,
    "job_id"
);

impl From<TabletTransactionId> for TransactionId {
    fn from(id: TabletTransactionId) -> Self {
        Self(id.0)
    }
}
