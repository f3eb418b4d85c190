//! ARBOR Option Composer
//!
//! Per-call behavior (transaction binding, access tracking, idempotency,
//! prerequisites, read routing, retry tagging, tablet ranges) is expressed
//! as independent option groups. This crate validates a call's groups
//! against the verb's declaration and flattens them into one parameter set.
//! Composition is pure; nothing here talks to the cluster.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod compose;
pub mod groups;
pub mod operation;

pub use compose::{CallOptions, ComposedCall, compose};
pub use groups::{
    AccessTrackingOptions, GroupKind, GroupSet, MasterReadOptions, MutatingOptions, OptionGroup,
    PrerequisiteOptions, PrerequisiteRevision, ReadKind, ReadRetryOptions, TabletRangeOptions,
    TransactionOptions,
};
pub use operation::{OperationSpec, RetryClass};
