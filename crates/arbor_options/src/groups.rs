//! Option groups.
//!
//! Each group owns a fixed, disjoint set of parameter names. A group only
//! writes the parameters it was given values for.

use arbor_core::{ClientError, ClientResult, MutationId, Params, TransactionId};
use serde::{Deserialize, Serialize};

/// Identifies an option group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum GroupKind {
    /// [`TransactionOptions`]
    Transaction,
    /// [`AccessTrackingOptions`]
    AccessTracking,
    /// [`MutatingOptions`]
    Mutating,
    /// [`PrerequisiteOptions`]
    Prerequisite,
    /// [`MasterReadOptions`]
    MasterRead,
    /// [`ReadRetryOptions`]
    ReadRetry,
    /// [`TabletRangeOptions`]
    TabletRange,
}

impl GroupKind {
    /// Every group kind
    pub const ALL: [GroupKind; 7] = [
        GroupKind::Transaction,
        GroupKind::AccessTracking,
        GroupKind::Mutating,
        GroupKind::Prerequisite,
        GroupKind::MasterRead,
        GroupKind::ReadRetry,
        GroupKind::TabletRange,
    ];

    /// Group name used in validation errors
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Transaction => "transaction_options",
            Self::AccessTracking => "access_tracking_options",
            Self::Mutating => "mutating_options",
            Self::Prerequisite => "prerequisite_options",
            Self::MasterRead => "master_read_options",
            Self::ReadRetry => "read_retry_options",
            Self::TabletRange => "tablet_range_options",
        }
    }

    const fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

impl std::fmt::Display for GroupKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Set of group kinds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct GroupSet(u8);

impl GroupSet {
    /// Empty set
    pub const EMPTY: GroupSet = GroupSet(0);

    /// Build a set from a list of kinds
    #[must_use]
    pub const fn of(kinds: &[GroupKind]) -> Self {
        let mut bits = 0;
        let mut i = 0;
        while i < kinds.len() {
            bits |= kinds[i].bit();
            i += 1;
        }
        Self(bits)
    }

    /// Whether `kind` is in the set
    #[must_use]
    pub const fn contains(self, kind: GroupKind) -> bool {
        self.0 & kind.bit() != 0
    }

    /// Set with `kind` added
    #[must_use]
    pub const fn with(self, kind: GroupKind) -> Self {
        Self(self.0 | kind.bit())
    }

    /// Kinds in the set, in declaration order
    #[must_use]
    pub fn kinds(self) -> Vec<GroupKind> {
        GroupKind::ALL
            .into_iter()
            .filter(|k| self.contains(*k))
            .collect()
    }
}

/// A named, independently optional group of call parameters
pub trait OptionGroup {
    /// Which group this is
    const KIND: GroupKind;

    /// Write this group's parameters
    ///
    /// # Errors
    ///
    /// Returns error if the group's own fields are inconsistent or a
    /// parameter name is already taken
    fn contribute(&self, params: &mut Params) -> ClientResult<()>;
}

/// Run the call inside a master transaction
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionOptions {
    /// Transaction to run under
    pub transaction_id: Option<TransactionId>,
    /// Renew the leases of the transaction's ancestors as a side effect
    pub ping_ancestor_transactions: bool,
}

impl TransactionOptions {
    /// Options for running under `id`
    #[must_use]
    pub fn new(id: TransactionId) -> Self {
        Self {
            transaction_id: Some(id),
            ping_ancestor_transactions: false,
        }
    }
}

impl OptionGroup for TransactionOptions {
    const KIND: GroupKind = GroupKind::Transaction;

    fn contribute(&self, params: &mut Params) -> ClientResult<()> {
        if let Some(id) = self.transaction_id {
            params.insert("transaction_id", id)?;
        }
        if self.ping_ancestor_transactions {
            params.insert("ping_ancestor_transactions", true)?;
        }
        Ok(())
    }
}

/// Keep the call from touching access or modification times
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessTrackingOptions {
    /// Do not update access time
    pub suppress_access_tracking: bool,
    /// Do not update modification time
    pub suppress_modification_tracking: bool,
}

impl OptionGroup for AccessTrackingOptions {
    const KIND: GroupKind = GroupKind::AccessTracking;

    fn contribute(&self, params: &mut Params) -> ClientResult<()> {
        if self.suppress_access_tracking {
            params.insert("suppress_access_tracking", true)?;
        }
        if self.suppress_modification_tracking {
            params.insert("suppress_modification_tracking", true)?;
        }
        Ok(())
    }
}

/// Explicit idempotency token for a mutating call.
///
/// Normally left empty; the retry coordinator mints the token.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutatingOptions {
    /// Caller-chosen mutation id
    pub mutation_id: Option<MutationId>,
    /// Mark the very first attempt as a replay
    pub retry: bool,
}

impl OptionGroup for MutatingOptions {
    const KIND: GroupKind = GroupKind::Mutating;

    fn contribute(&self, params: &mut Params) -> ClientResult<()> {
        if self.retry && self.mutation_id.is_none() {
            return Err(ClientError::Validation {
                field: GroupKind::Mutating.name().to_string(),
                reason: "retry requires an explicit mutation_id".to_string(),
            });
        }
        if let Some(id) = self.mutation_id {
            params.insert("mutation_id", id)?;
        }
        params.insert("retry", self.retry)
    }
}

/// Optimistic precondition on a path revision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrerequisiteRevision {
    /// Node path
    pub path: String,
    /// Transaction the revision is observed in
    pub transaction_id: Option<TransactionId>,
    /// Expected revision
    pub revision: u64,
}

/// Preconditions the cluster checks before applying the call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrerequisiteOptions {
    /// Transactions that must still be alive
    pub transaction_ids: Vec<TransactionId>,
    /// Revisions that must still be current
    pub revisions: Vec<PrerequisiteRevision>,
}

impl OptionGroup for PrerequisiteOptions {
    const KIND: GroupKind = GroupKind::Prerequisite;

    fn contribute(&self, params: &mut Params) -> ClientResult<()> {
        if !self.transaction_ids.is_empty() {
            params.insert("prerequisite_transaction_ids", &self.transaction_ids)?;
        }
        if !self.revisions.is_empty() {
            params.insert("prerequisite_revisions", &self.revisions)?;
        }
        Ok(())
    }
}

/// Where master reads are served from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadKind {
    /// Leader, always fresh
    #[default]
    Leader,
    /// Any follower
    Follower,
    /// Master cache
    Cache,
}

/// Read routing for master reads
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasterReadOptions {
    /// Read source
    pub read_from: ReadKind,
}

impl OptionGroup for MasterReadOptions {
    const KIND: GroupKind = GroupKind::MasterRead;

    fn contribute(&self, params: &mut Params) -> ClientResult<()> {
        params.insert("read_from", self.read_from)
    }
}

/// Marks a read-only call as safe to retry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadRetryOptions;

impl OptionGroup for ReadRetryOptions {
    const KIND: GroupKind = GroupKind::ReadRetry;

    fn contribute(&self, _params: &mut Params) -> ClientResult<()> {
        Ok(())
    }
}

/// Restrict a tablet administration call to a range of tablets
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabletRangeOptions {
    /// First tablet, inclusive
    pub first_tablet_index: Option<u32>,
    /// Last tablet, inclusive
    pub last_tablet_index: Option<u32>,
}

impl OptionGroup for TabletRangeOptions {
    const KIND: GroupKind = GroupKind::TabletRange;

    fn contribute(&self, params: &mut Params) -> ClientResult<()> {
        if let (Some(first), Some(last)) = (self.first_tablet_index, self.last_tablet_index) {
            if first > last {
                return Err(ClientError::Validation {
                    field: GroupKind::TabletRange.name().to_string(),
                    reason: format!("first tablet {} is past last tablet {}", first, last),
                });
            }
        }
        if let Some(first) = self.first_tablet_index {
            params.insert("first_tablet_index", first)?;
        }
        if let Some(last) = self.last_tablet_index {
            params.insert("last_tablet_index", last)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_group_set() {
        let set = GroupSet::of(&[GroupKind::Transaction, GroupKind::Mutating]);
        assert!(set.contains(GroupKind::Transaction));
        assert!(set.contains(GroupKind::Mutating));
        assert!(!set.contains(GroupKind::ReadRetry));
        assert_eq!(set.with(GroupKind::ReadRetry).kinds().len(), 3);
        assert!(GroupSet::EMPTY.kinds().is_empty());
    }

    #[test]
    fn test_transaction_options_params() {
        let id = TransactionId::new();
        let mut params = Params::new();
        TransactionOptions {
            transaction_id: Some(id),
            ping_ancestor_transactions: true,
        }
        .contribute(&mut params)
        .unwrap();
        assert_eq!(params.get_as::<TransactionId>("transaction_id"), Some(id));
        assert_eq!(params.get("ping_ancestor_transactions"), Some(&json!(true)));
    }

    #[test]
    fn test_default_groups_write_little() {
        let mut params = Params::new();
        TransactionOptions::default().contribute(&mut params).unwrap();
        AccessTrackingOptions::default().contribute(&mut params).unwrap();
        PrerequisiteOptions::default().contribute(&mut params).unwrap();
        ReadRetryOptions.contribute(&mut params).unwrap();
        TabletRangeOptions::default().contribute(&mut params).unwrap();
        assert!(params.is_empty());

        MasterReadOptions::default().contribute(&mut params).unwrap();
        assert_eq!(params.get("read_from"), Some(&json!("leader")));
    }

    #[test]
    fn test_mutating_retry_needs_id() {
        let mut params = Params::new();
        let err = MutatingOptions {
            mutation_id: None,
            retry: true,
        }
        .contribute(&mut params)
        .unwrap_err();
        assert!(err.to_string().contains("mutation_id"));

        let id = MutationId::new();
        MutatingOptions {
            mutation_id: Some(id),
            retry: true,
        }
        .contribute(&mut params)
        .unwrap();
        assert_eq!(params.get_as::<MutationId>("mutation_id"), Some(id));
        assert_eq!(params.get("retry"), Some(&json!(true)));
    }

    #[test]
    fn test_prerequisite_revisions_shape() {
        let mut params = Params::new();
        PrerequisiteOptions {
            transaction_ids: vec![],
            revisions: vec![PrerequisiteRevision {
                path: "//home/t".to_string(),
                transaction_id: None,
                revision: 42,
            }],
        }
        .contribute(&mut params)
        .unwrap();
        assert!(!params.contains("prerequisite_transaction_ids"));
        assert_eq!(
            params.get("prerequisite_revisions"),
            Some(&json!([{"path": "//home/t", "transaction_id": null, "revision": 42}]))
        );
    }

    #[test]
    fn test_tablet_range_validation() {
        let mut params = Params::new();
        let err = TabletRangeOptions {
            first_tablet_index: Some(4),
            last_tablet_index: Some(2),
        }
        .contribute(&mut params)
        .unwrap_err();
        assert!(err.to_string().contains("tablet_range_options"));
        assert!(params.is_empty());
    }
}
