//! ARBOR Core Types
//!
//! Identifiers, the remote error tree, configuration and the request model
//! shared by every other crate. No I/O happens here; the [`Dispatcher`]
//! trait is the only seam to the network.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod dispatch;
pub mod error;
pub mod id;
pub mod request;
pub mod state;

// Re-exports
pub use config::{ClientConfig, RetryConfig, TransactionConfig};
pub use dispatch::Dispatcher;
pub use error::{
    CallContext, CallError, ClientError, ClientResult, ErrorKind, RemoteError, TransportError,
    codes,
};
pub use id::{JobId, LockId, MutationId, NodeId, OperationId, TabletTransactionId, TransactionId};
pub use request::{Params, Request, Response, Verb};
pub use state::TransactionState;
