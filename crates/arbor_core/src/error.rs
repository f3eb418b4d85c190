//! Error types for ARBOR.
//!
//! Remote failures arrive as a recursive [`RemoteError`] tree and are kept
//! intact all the way to the caller. Every [`ClientError`] can be classified
//! with [`ClientError::kind`] without looking at message text.

use crate::id::{MutationId, TransactionId};
use crate::request::Verb;
use crate::state::TransactionState;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Client result type
pub type ClientResult<T> = Result<T, ClientError>;

/// Well-known remote error codes.
pub mod codes {
    /// Unclassified failure
    pub const GENERIC: i32 = 1;
    /// Request was canceled on the remote side
    pub const CANCELED: i32 = 2;
    /// Remote timeout
    pub const TIMEOUT: i32 = 3;
    /// Transport failure between proxies and masters
    pub const TRANSPORT_ERROR: i32 = 100;
    /// Remote service temporarily unavailable
    pub const UNAVAILABLE: i32 = 105;
    /// Request queue overflow
    pub const REQUEST_QUEUE_SIZE_LIMIT_EXCEEDED: i32 = 108;
    /// Scheduler operation is unknown
    pub const NO_SUCH_OPERATION: i32 = 200;
    /// Scheduler operation is in a state that forbids the request
    pub const INVALID_OPERATION_STATE: i32 = 201;
    /// Job is unknown
    pub const NO_SUCH_JOB: i32 = 203;
    /// Lock held by the same transaction
    pub const SAME_TRANSACTION_LOCK_CONFLICT: i32 = 400;
    /// Lock held by a descendant transaction
    pub const DESCENDANT_TRANSACTION_LOCK_CONFLICT: i32 = 401;
    /// Lock held by a concurrent transaction
    pub const CONCURRENT_TRANSACTION_LOCK_CONFLICT: i32 = 402;
    /// Conflicting pending lock
    pub const PENDING_LOCK_CONFLICT: i32 = 403;
    /// Path does not resolve
    pub const RESOLVE_ERROR: i32 = 500;
    /// Node already exists
    pub const ALREADY_EXISTS: i32 = 501;
    /// Chunk errors occupy the 7xx range
    pub const CHUNK_ERROR_RANGE: std::ops::Range<i32> = 700..800;
    /// Authentication failed
    pub const AUTHENTICATION_ERROR: i32 = 900;
    /// Authorization failed
    pub const AUTHORIZATION_ERROR: i32 = 901;
    /// Per-user request rate limit
    pub const REQUEST_RATE_LIMIT_EXCEEDED: i32 = 904;
    /// Prerequisite transaction or revision check failed
    pub const PREREQUISITE_CHECK_FAILED: i32 = 1000;
    /// Duplicate mutation without the retry flag
    pub const DUPLICATE_MUTATION: i32 = 1001;
    /// Dynamic table is not mounted or is frozen
    pub const TABLET_NOT_MOUNTED: i32 = 1702;
    /// Transaction is unknown to the master (expired, committed or aborted)
    pub const NO_SUCH_TRANSACTION: i32 = 11000;
}

/// Structured error returned by the cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{message} (code {code})")]
pub struct RemoteError {
    /// Error code
    pub code: i32,
    /// Human-readable message
    pub message: String,
    /// Attributes attached by the remote side
    #[serde(default)]
    pub attributes: IndexMap<String, serde_json::Value>,
    /// Nested causes
    #[serde(default)]
    pub inner_errors: Vec<RemoteError>,
}

impl RemoteError {
    /// Create a new remote error without attributes or causes
    #[must_use]
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            attributes: IndexMap::new(),
            inner_errors: Vec::new(),
        }
    }

    /// Attach an attribute
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    /// Attach a nested cause
    #[must_use]
    pub fn with_inner(mut self, inner: RemoteError) -> Self {
        self.inner_errors.push(inner);
        self
    }

    /// All errors of the tree in depth-first order, starting with `self`
    #[must_use]
    pub fn flatten(&self) -> Vec<&RemoteError> {
        let mut out = Vec::new();
        let mut stack = vec![self];
        while let Some(err) = stack.pop() {
            out.push(err);
            stack.extend(err.inner_errors.iter().rev());
        }
        out
    }

    /// Find the first error in the tree carrying `code`
    #[must_use]
    pub fn find_code(&self, code: i32) -> Option<&RemoteError> {
        self.flatten().into_iter().find(|e| e.code == code)
    }

    /// Check whether any error in the tree carries `code`
    #[must_use]
    pub fn contains_code(&self, code: i32) -> bool {
        self.find_code(code).is_some()
    }

    /// Whether the tree describes a condition worth retrying
    #[must_use]
    pub fn is_transient(&self) -> bool {
        self.flatten().iter().any(|e| {
            matches!(
                e.code,
                codes::TIMEOUT
                    | codes::TRANSPORT_ERROR
                    | codes::UNAVAILABLE
                    | codes::REQUEST_QUEUE_SIZE_LIMIT_EXCEEDED
                    | codes::REQUEST_RATE_LIMIT_EXCEEDED
            ) || codes::CHUNK_ERROR_RANGE.contains(&e.code)
        })
    }
}

/// Transport-level failures reported by the dispatcher
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Connection failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Connection reset by peer
    #[error("Connection reset")]
    ConnectionReset,

    /// Timeout
    #[error("Request timeout after {0}ms")]
    Timeout(u64),

    /// Invalid response
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl TransportError {
    /// Whether the failure may disappear on retry
    #[must_use]
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::InvalidResponse(_))
    }
}

/// Failure of a single dispatcher call
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CallError {
    /// The cluster answered with an error
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// The call did not complete
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl CallError {
    /// Whether the failure may disappear on retry
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Remote(err) => err.is_transient(),
            Self::Transport(err) => err.is_transient(),
        }
    }

    /// The remote error tree, if the cluster answered
    #[must_use]
    pub fn remote(&self) -> Option<&RemoteError> {
        match self {
            Self::Remote(err) => Some(err),
            Self::Transport(_) => None,
        }
    }
}

/// Coarse error classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Network, timeout or temporary unavailability; retries were exhausted
    Transient,
    /// Validation, authorization, conflict, not-found
    Permanent,
    /// Caller time budget exhausted
    Deadline,
    /// Local transaction state-machine misuse
    StateViolation,
    /// Execution scope was cancelled
    Cancelled,
}

/// What a failed call was doing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallContext {
    /// Remote verb
    pub verb: Verb,
    /// Transaction the call ran under
    pub transaction_id: Option<TransactionId>,
    /// Mutation id of the call
    pub mutation_id: Option<MutationId>,
}

impl CallContext {
    /// Create a context for a verb
    #[must_use]
    pub fn new(verb: Verb) -> Self {
        Self {
            verb,
            transaction_id: None,
            mutation_id: None,
        }
    }
}

impl fmt::Display for CallContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.verb)?;
        if let Some(tx) = &self.transaction_id {
            write!(f, " [tx {}]", tx)?;
        }
        if let Some(mutation) = &self.mutation_id {
            write!(f, " [mutation {}]", mutation)?;
        }
        Ok(())
    }
}

/// Client error type
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ClientError {
    /// Transient failures persisted through every allowed attempt
    #[error("{context}: failed after {attempts} attempts: {last}")]
    Transient {
        /// Call context
        context: CallContext,
        /// Attempts made
        attempts: u32,
        /// Last observed failure
        #[source]
        last: CallError,
    },

    /// Non-retriable failure
    #[error("{context}: {source}")]
    Permanent {
        /// Call context
        context: CallContext,
        /// The failure, remote tree preserved
        source: CallError,
    },

    /// Scope deadline passed
    #[error("{context}: deadline exceeded after {attempts} attempts")]
    Deadline {
        /// Call context
        context: CallContext,
        /// Attempts made
        attempts: u32,
        /// Last observed failure, if any attempt failed
        last: Option<CallError>,
    },

    /// Scope cancelled
    #[error("{context}: cancelled")]
    Cancelled {
        /// Call context
        context: CallContext,
    },

    /// Local validation failure, never sent to the cluster
    #[error("Validation failed for {field}: {reason}")]
    Validation {
        /// Offending field or option group
        field: String,
        /// Reason
        reason: String,
    },

    /// Response could not be decoded into the expected type
    #[error("{context}: cannot decode response: {reason}")]
    Decode {
        /// Call context
        context: CallContext,
        /// Decoder message
        reason: String,
    },

    /// Illegal transition of a transaction
    #[error("transaction {transaction}: cannot {action} in state {state}")]
    StateViolation {
        /// Transaction
        transaction: TransactionId,
        /// Attempted action
        action: &'static str,
        /// State the transaction was in
        state: TransactionState,
    },
}

impl ClientError {
    /// Classify the error
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transient { .. } => ErrorKind::Transient,
            Self::Permanent { .. } | Self::Validation { .. } | Self::Decode { .. } => {
                ErrorKind::Permanent
            }
            Self::Deadline { .. } => ErrorKind::Deadline,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::StateViolation { .. } => ErrorKind::StateViolation,
        }
    }

    /// Call context, when the error came from a call
    #[must_use]
    pub fn context(&self) -> Option<&CallContext> {
        match self {
            Self::Transient { context, .. }
            | Self::Permanent { context, .. }
            | Self::Deadline { context, .. }
            | Self::Cancelled { context }
            | Self::Decode { context, .. } => Some(context),
            Self::Validation { .. } | Self::StateViolation { .. } => None,
        }
    }

    /// The remote error tree, if the cluster answered
    #[must_use]
    pub fn remote(&self) -> Option<&RemoteError> {
        match self {
            Self::Transient { last, .. } => last.remote(),
            Self::Permanent { source, .. } => source.remote(),
            Self::Deadline { last, .. } => last.as_ref().and_then(CallError::remote),
            _ => None,
        }
    }

    /// Whether the cluster reported the transaction as gone
    #[must_use]
    pub fn is_no_such_transaction(&self) -> bool {
        self.remote()
            .is_some_and(|e| e.contains_code(codes::NO_SUCH_TRANSACTION))
    }

    /// Attempts made before the error surfaced
    #[must_use]
    pub fn attempts(&self) -> Option<u32> {
        match self {
            Self::Transient { attempts, .. } | Self::Deadline { attempts, .. } => Some(*attempts),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nested() -> RemoteError {
        RemoteError::new(codes::GENERIC, "commit failed").with_inner(
            RemoteError::new(codes::GENERIC, "participant failed")
                .with_inner(RemoteError::new(codes::NO_SUCH_TRANSACTION, "no such transaction")),
        )
    }

    #[test]
    fn test_remote_error_display() {
        let err = RemoteError::new(codes::RESOLVE_ERROR, "node //a not found");
        assert_eq!(err.to_string(), "node //a not found (code 500)");
    }

    #[test]
    fn test_flatten_is_depth_first() {
        let err = RemoteError::new(1, "root")
            .with_inner(RemoteError::new(2, "a").with_inner(RemoteError::new(3, "a1")))
            .with_inner(RemoteError::new(4, "b"));
        let codes: Vec<i32> = err.flatten().iter().map(|e| e.code).collect();
        assert_eq!(codes, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_find_nested_code() {
        let err = nested();
        assert!(err.contains_code(codes::NO_SUCH_TRANSACTION));
        assert!(!err.contains_code(codes::ALREADY_EXISTS));
        assert_eq!(
            err.find_code(codes::NO_SUCH_TRANSACTION).map(|e| e.message.as_str()),
            Some("no such transaction")
        );
    }

    #[test]
    fn test_transient_classification() {
        assert!(RemoteError::new(codes::UNAVAILABLE, "busy").is_transient());
        assert!(RemoteError::new(codes::GENERIC, "wrapped")
            .with_inner(RemoteError::new(codes::REQUEST_RATE_LIMIT_EXCEEDED, "slow down"))
            .is_transient());
        assert!(RemoteError::new(716, "chunk unavailable").is_transient());
        assert!(!RemoteError::new(codes::AUTHORIZATION_ERROR, "denied").is_transient());
        assert!(!RemoteError::new(codes::ALREADY_EXISTS, "exists").is_transient());

        assert!(CallError::from(TransportError::ConnectionReset).is_transient());
        assert!(!CallError::from(TransportError::InvalidResponse("garbage".into())).is_transient());
    }

    #[test]
    fn test_remote_error_wire_shape() {
        let json = serde_json::json!({
            "code": 500,
            "message": "resolve error",
            "attributes": {"path": "//home"},
            "inner_errors": [{"code": 1, "message": "inner"}]
        });
        let err: RemoteError = serde_json::from_value(json).unwrap();
        assert_eq!(err.code, 500);
        assert_eq!(err.attributes["path"], "//home");
        assert_eq!(err.inner_errors[0].message, "inner");
        assert!(err.inner_errors[0].inner_errors.is_empty());
    }

    #[test]
    fn test_client_error_kind_and_tree() {
        let context = CallContext::new(Verb::CommitTransaction);
        let err = ClientError::Permanent {
            context: context.clone(),
            source: CallError::Remote(nested()),
        };
        assert_eq!(err.kind(), ErrorKind::Permanent);
        assert!(err.is_no_such_transaction());
        assert_eq!(err.remote().map(|e| e.inner_errors.len()), Some(1));

        let err = ClientError::Deadline {
            context,
            attempts: 3,
            last: Some(CallError::Transport(TransportError::Timeout(10))),
        };
        assert_eq!(err.kind(), ErrorKind::Deadline);
        assert_eq!(err.attempts(), Some(3));
        assert!(err.remote().is_none());
    }

    #[test]
    fn test_context_display() {
        let mut context = CallContext::new(Verb::Create);
        context.transaction_id = Some(TransactionId::from_bytes([0; 16]));
        let s = context.to_string();
        assert!(s.starts_with("create [tx 00000000-"));
    }

    #[test]
    fn test_state_violation_display() {
        let err = ClientError::StateViolation {
            transaction: TransactionId::from_bytes([1; 16]),
            action: "commit",
            state: TransactionState::Committed,
        };
        assert_eq!(err.kind(), ErrorKind::StateViolation);
        assert!(err.to_string().contains("cannot commit in state committed"));
    }
}
