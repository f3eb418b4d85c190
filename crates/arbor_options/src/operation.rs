//! Per-verb operation table.
//!
//! Declares, for every verb, which option groups it accepts, how it may be
//! retried, and which parameter pairs it refuses to see together.

use crate::groups::{GroupKind, GroupSet};
use arbor_core::Verb;

/// How a call may be retried
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RetryClass {
    /// Changes cluster state; retried under a mutation id
    Mutating,
    /// Safe to repeat; retried without a mutation id
    Idempotent,
    /// Attempted exactly once
    Once,
}

/// Static description of a verb
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationSpec {
    /// The verb
    pub verb: Verb,
    /// Option groups the verb accepts
    pub accepts: GroupSet,
    /// Retry class when no marker group upgrades it
    pub retry: RetryClass,
    /// Parameter pairs that must not both be enabled
    pub conflicts: &'static [(&'static str, &'static str)],
}

const TX: GroupKind = GroupKind::Transaction;
const ACCESS: GroupKind = GroupKind::AccessTracking;
const MUTATING: GroupKind = GroupKind::Mutating;
const PREREQ: GroupKind = GroupKind::Prerequisite;
const MASTER_READ: GroupKind = GroupKind::MasterRead;
const READ_RETRY: GroupKind = GroupKind::ReadRetry;
const TABLET_RANGE: GroupKind = GroupKind::TabletRange;

const NODE_WRITE: GroupSet = GroupSet::of(&[TX, ACCESS, MUTATING, PREREQ]);
const NODE_READ: GroupSet = GroupSet::of(&[MASTER_READ, TX, ACCESS, READ_RETRY]);
const TABLE_ADMIN: GroupSet = GroupSet::of(&[MUTATING, TABLET_RANGE]);

const COPY_CONFLICTS: &[(&str, &str)] = &[("preserve_account", "suppress_access_tracking")];

impl OperationSpec {
    const fn new(verb: Verb, accepts: GroupSet, retry: RetryClass) -> Self {
        Self {
            verb,
            accepts,
            retry,
            conflicts: &[],
        }
    }

    const fn with_conflicts(mut self, conflicts: &'static [(&'static str, &'static str)]) -> Self {
        self.conflicts = conflicts;
        self
    }

    /// Look up the description of `verb`
    #[must_use]
    pub const fn of(verb: Verb) -> Self {
        use RetryClass::{Idempotent, Mutating, Once};
        match verb {
            Verb::Create | Verb::Set | Verb::Remove => Self::new(verb, NODE_WRITE, Mutating),
            Verb::Copy | Verb::Move => {
                Self::new(verb, NODE_WRITE, Mutating).with_conflicts(COPY_CONFLICTS)
            }
            Verb::Link => Self::new(verb, GroupSet::of(&[TX, MUTATING, PREREQ]), Mutating),
            Verb::Exists | Verb::Get | Verb::List => Self::new(verb, NODE_READ, Once),
            Verb::Lock | Verb::Unlock => Self::new(verb, GroupSet::of(&[TX, MUTATING]), Mutating),
            Verb::WriteFile => Self::new(verb, GroupSet::of(&[TX, PREREQ]), Once),
            Verb::ReadFile => Self::new(verb, GroupSet::of(&[TX, ACCESS]), Once),
            Verb::SelectRows | Verb::LookupRows => Self::new(verb, GroupSet::of(&[TX]), Once),
            Verb::InsertRows | Verb::DeleteRows => Self::new(verb, GroupSet::of(&[TX]), Mutating),
            Verb::MountTable
            | Verb::UnmountTable
            | Verb::RemountTable
            | Verb::FreezeTable
            | Verb::UnfreezeTable => Self::new(verb, TABLE_ADMIN, Mutating),
            Verb::StartOperation => Self::new(verb, GroupSet::of(&[TX, MUTATING]), Mutating),
            Verb::AbortOperation => Self::new(verb, GroupSet::of(&[MUTATING]), Mutating),
            Verb::GetOperation => Self::new(verb, GroupSet::of(&[MASTER_READ, READ_RETRY]), Once),
            Verb::GetJob => Self::new(verb, GroupSet::of(&[READ_RETRY]), Once),
            Verb::StartTransaction => Self::new(verb, GroupSet::of(&[PREREQ]), Mutating),
            Verb::PingTransaction => Self::new(verb, GroupSet::EMPTY, Idempotent),
            Verb::CommitTransaction => {
                Self::new(verb, GroupSet::of(&[MUTATING, PREREQ]), Mutating)
            }
            Verb::AbortTransaction => Self::new(verb, GroupSet::of(&[MUTATING]), Mutating),
        }
    }

    /// Whether the verb accepts `kind`
    #[must_use]
    pub const fn accepts(&self, kind: GroupKind) -> bool {
        self.accepts.contains(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_matches_documented_surface() {
        let create = OperationSpec::of(Verb::Create);
        assert_eq!(create.retry, RetryClass::Mutating);
        assert_eq!(create.accepts.kinds(), vec![TX, ACCESS, MUTATING, PREREQ]);

        let exists = OperationSpec::of(Verb::Exists);
        assert_eq!(exists.retry, RetryClass::Once);
        assert!(exists.accepts(READ_RETRY));
        assert!(!exists.accepts(MUTATING));

        let insert = OperationSpec::of(Verb::InsertRows);
        assert_eq!(insert.retry, RetryClass::Mutating);
        assert!(!insert.accepts(MUTATING));

        assert_eq!(OperationSpec::of(Verb::PingTransaction).retry, RetryClass::Idempotent);
        assert_eq!(OperationSpec::of(Verb::Move).conflicts, COPY_CONFLICTS);
        assert!(OperationSpec::of(Verb::Create).conflicts.is_empty());
    }

    #[test]
    fn test_table_admin_accepts_ranges() {
        for verb in [
            Verb::MountTable,
            Verb::UnmountTable,
            Verb::RemountTable,
            Verb::FreezeTable,
            Verb::UnfreezeTable,
        ] {
            assert!(OperationSpec::of(verb).accepts(TABLET_RANGE), "{}", verb);
        }
    }
}
