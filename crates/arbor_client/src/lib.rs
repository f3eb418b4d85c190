//! ARBOR Client
//!
//! Transactions, retries and typed operations on top of a [`Dispatcher`].
//!
//! A [`Client`] issues calls outside any transaction. [`Client::begin_tx`]
//! opens a master [`Transaction`] that renews its lease in the background,
//! nests via [`Transaction::begin_tx`] and ends on commit, abort, expiry or
//! cancellation of the [`Scope`] it is bound to. [`Client::begin_tablet_tx`]
//! opens a [`TabletTransaction`] for dynamic table reads and writes.
//!
//! Every mutating call goes through the [`Retrier`], which keeps one
//! mutation id across all attempts so the cluster applies it at most once.
//!
//! [`Dispatcher`]: arbor_core::Dispatcher

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
mod lifecycle;
pub mod ops;
pub mod retry;
pub mod scope;
pub mod tablet;
pub mod transaction;

pub use client::{Client, Invoker, MasterInvoker};
pub use ops::{
    CypressClient, FileClient, LockClient, SchedulerClient, TableAdminClient, TabletClient,
};
pub use retry::Retrier;
pub use scope::Scope;
pub use tablet::{Atomicity, Durability, StartTabletTxOptions, TabletTransaction};
pub use transaction::{CommitTxOptions, StartTxOptions, Transaction};

pub use arbor_core::{
    ClientConfig, ClientError, ClientResult, Dispatcher, ErrorKind, RetryConfig,
    TransactionConfig, TransactionId, TransactionState,
};
pub use arbor_options::CallOptions;
