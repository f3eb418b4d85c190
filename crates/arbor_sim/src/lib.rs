//! ARBOR Simulated Cluster
//!
//! An in-memory cluster that speaks the [`arbor_core::Dispatcher`] seam:
//! a node tree with locks and files, dynamic tables, scheduler operations
//! and master/tablet transactions with leases. Every mutation id is
//! recorded so retries can be checked for idempotency, and faults can be
//! scripted per verb or drawn from a seeded model.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cluster;
mod cypress;
pub mod fault;
pub mod journal;
mod scheduler;
mod state;
mod tables;

pub use cluster::SimCluster;
pub use fault::{FailureModel, Fault};
pub use journal::{Journal, JournalEntry, Outcome};
pub use scheduler::{SimJob, SimOperation};
pub use state::{SimTransaction, TxKind};
