//! Option composition.
//!
//! [`CallOptions`] holds at most one instance of every option group.
//! [`compose`] validates it against the verb's [`OperationSpec`] and
//! flattens it, together with the verb's required parameters, into one
//! [`Params`] set.

use crate::groups::{
    AccessTrackingOptions, GroupKind, GroupSet, MasterReadOptions, MutatingOptions, OptionGroup,
    PrerequisiteOptions, ReadRetryOptions, TabletRangeOptions, TransactionOptions,
};
use crate::operation::{OperationSpec, RetryClass};
use arbor_core::{ClientError, ClientResult, Params, TransactionId, Verb};
use serde_json::Value;

/// Option groups supplied for one call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallOptions {
    transaction: Option<TransactionOptions>,
    access_tracking: Option<AccessTrackingOptions>,
    mutating: Option<MutatingOptions>,
    prerequisite: Option<PrerequisiteOptions>,
    master_read: Option<MasterReadOptions>,
    read_retry: Option<ReadRetryOptions>,
    tablet_range: Option<TabletRangeOptions>,
    duplicates: GroupSet,
}

fn place<T>(slot: &mut Option<T>, value: T, kind: GroupKind, duplicates: &mut GroupSet) {
    if slot.is_some() {
        *duplicates = duplicates.with(kind);
    }
    *slot = Some(value);
}

impl CallOptions {
    /// No groups supplied
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Supply transaction options
    #[must_use]
    pub fn with_transaction(mut self, options: TransactionOptions) -> Self {
        place(&mut self.transaction, options, GroupKind::Transaction, &mut self.duplicates);
        self
    }

    /// Supply access tracking options
    #[must_use]
    pub fn with_access_tracking(mut self, options: AccessTrackingOptions) -> Self {
        place(&mut self.access_tracking, options, GroupKind::AccessTracking, &mut self.duplicates);
        self
    }

    /// Supply mutating options
    #[must_use]
    pub fn with_mutating(mut self, options: MutatingOptions) -> Self {
        place(&mut self.mutating, options, GroupKind::Mutating, &mut self.duplicates);
        self
    }

    /// Supply prerequisite options
    #[must_use]
    pub fn with_prerequisite(mut self, options: PrerequisiteOptions) -> Self {
        place(&mut self.prerequisite, options, GroupKind::Prerequisite, &mut self.duplicates);
        self
    }

    /// Supply master read options
    #[must_use]
    pub fn with_master_read(mut self, options: MasterReadOptions) -> Self {
        place(&mut self.master_read, options, GroupKind::MasterRead, &mut self.duplicates);
        self
    }

    /// Tag the call as a retriable read
    #[must_use]
    pub fn with_read_retry(mut self) -> Self {
        place(&mut self.read_retry, ReadRetryOptions, GroupKind::ReadRetry, &mut self.duplicates);
        self
    }

    /// Supply tablet range options
    #[must_use]
    pub fn with_tablet_range(mut self, options: TabletRangeOptions) -> Self {
        place(&mut self.tablet_range, options, GroupKind::TabletRange, &mut self.duplicates);
        self
    }

    /// Groups currently supplied
    #[must_use]
    pub fn supplied(&self) -> GroupSet {
        let mut set = GroupSet::EMPTY;
        let present = [
            (GroupKind::Transaction, self.transaction.is_some()),
            (GroupKind::AccessTracking, self.access_tracking.is_some()),
            (GroupKind::Mutating, self.mutating.is_some()),
            (GroupKind::Prerequisite, self.prerequisite.is_some()),
            (GroupKind::MasterRead, self.master_read.is_some()),
            (GroupKind::ReadRetry, self.read_retry.is_some()),
            (GroupKind::TabletRange, self.tablet_range.is_some()),
        ];
        for (kind, is_present) in present {
            if is_present {
                set = set.with(kind);
            }
        }
        set
    }

    /// Transaction the call is bound to, if any
    #[must_use]
    pub fn transaction_id(&self) -> Option<TransactionId> {
        self.transaction.as_ref().and_then(|t| t.transaction_id)
    }

    /// Bind the call to `id` unless the caller already chose a transaction
    #[must_use]
    pub fn or_transaction(self, id: TransactionId) -> Self {
        self.or_transaction_group(TransactionOptions::new(id))
    }

    /// Use `group` unless the caller already chose a transaction
    #[must_use]
    pub fn or_transaction_group(mut self, group: TransactionOptions) -> Self {
        if self.transaction.is_none() {
            self.transaction = Some(group);
        }
        self
    }

    /// Whether the call is tagged as a retriable read
    #[must_use]
    pub fn is_read_retry(&self) -> bool {
        self.read_retry.is_some()
    }
}

/// Result of composing a call
#[derive(Debug, Clone, PartialEq)]
pub struct ComposedCall {
    /// The verb
    pub verb: Verb,
    /// Flattened parameters
    pub params: Params,
    /// Effective retry class
    pub retry: RetryClass,
}

fn contribute_group<G: OptionGroup>(
    spec: &OperationSpec,
    group: Option<&G>,
    params: &mut Params,
) -> ClientResult<()> {
    let Some(group) = group else {
        return Ok(());
    };
    if !spec.accepts(G::KIND) {
        return Err(ClientError::Validation {
            field: G::KIND.name().to_string(),
            reason: format!("not accepted by {}", spec.verb),
        });
    }
    group.contribute(params)
}

fn is_enabled(params: &Params, name: &str) -> bool {
    match params.get(name) {
        None | Some(Value::Null) | Some(Value::Bool(false)) => false,
        Some(_) => true,
    }
}

/// Flatten `required` and `options` into the parameter set for `verb`
///
/// # Errors
///
/// Returns a validation error, before anything is sent, when a group is
/// supplied twice, a group is not accepted by the verb, a group parameter
/// collides with a required one, or a forbidden parameter pair is enabled
pub fn compose(verb: Verb, required: Params, options: &CallOptions) -> ClientResult<ComposedCall> {
    let spec = OperationSpec::of(verb);

    if let Some(kind) = options.duplicates.kinds().first() {
        return Err(ClientError::Validation {
            field: kind.name().to_string(),
            reason: "option group supplied twice".to_string(),
        });
    }

    let mut params = required;
    contribute_group(&spec, options.transaction.as_ref(), &mut params)?;
    contribute_group(&spec, options.access_tracking.as_ref(), &mut params)?;
    contribute_group(&spec, options.mutating.as_ref(), &mut params)?;
    contribute_group(&spec, options.prerequisite.as_ref(), &mut params)?;
    contribute_group(&spec, options.master_read.as_ref(), &mut params)?;
    contribute_group(&spec, options.read_retry.as_ref(), &mut params)?;
    contribute_group(&spec, options.tablet_range.as_ref(), &mut params)?;

    for (left, right) in spec.conflicts {
        if is_enabled(&params, left) && is_enabled(&params, right) {
            return Err(ClientError::Validation {
                field: (*left).to_string(),
                reason: format!("cannot be combined with {} for {}", right, verb),
            });
        }
    }

    let retry = match spec.retry {
        RetryClass::Once if options.is_read_retry() => RetryClass::Idempotent,
        class => class,
    };

    Ok(ComposedCall { verb, params, retry })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::groups::{PrerequisiteRevision, ReadKind};
    use arbor_core::{ErrorKind, MutationId};
    use proptest::prelude::*;
    use serde_json::json;

    fn path(p: &str) -> Params {
        let mut params = Params::new();
        params.insert("path", p).unwrap();
        params
    }

    #[test]
    fn test_compose_without_groups() {
        let call = compose(Verb::Exists, path("//home"), &CallOptions::new()).unwrap();
        assert_eq!(call.verb, Verb::Exists);
        assert_eq!(call.params, path("//home"));
        assert_eq!(call.retry, RetryClass::Once);
    }

    #[test]
    fn test_read_retry_upgrades_retry_class() {
        let options = CallOptions::new().with_read_retry();
        let call = compose(Verb::Exists, path("//home"), &options).unwrap();
        assert_eq!(call.retry, RetryClass::Idempotent);
        assert_eq!(call.params.len(), 1);
    }

    #[test]
    fn test_compose_flattens_all_groups() {
        let tx = TransactionId::new();
        let options = CallOptions::new()
            .with_transaction(TransactionOptions::new(tx))
            .with_access_tracking(AccessTrackingOptions {
                suppress_access_tracking: true,
                suppress_modification_tracking: false,
            })
            .with_prerequisite(PrerequisiteOptions {
                transaction_ids: vec![tx],
                revisions: vec![PrerequisiteRevision {
                    path: "//home".to_string(),
                    transaction_id: Some(tx),
                    revision: 3,
                }],
            });
        let call = compose(Verb::Create, path("//home/a"), &options).unwrap();
        assert_eq!(call.retry, RetryClass::Mutating);
        assert_eq!(call.params.get_as::<TransactionId>("transaction_id"), Some(tx));
        assert_eq!(call.params.get("suppress_access_tracking"), Some(&json!(true)));
        assert!(!call.params.contains("suppress_modification_tracking"));
        assert_eq!(call.params.get("prerequisite_transaction_ids"), Some(&json!([tx])));
        assert!(call.params.contains("prerequisite_revisions"));
    }

    #[test]
    fn test_duplicate_group_rejected() {
        let options = CallOptions::new()
            .with_transaction(TransactionOptions::new(TransactionId::new()))
            .with_transaction(TransactionOptions::new(TransactionId::new()));
        let err = compose(Verb::Get, path("//home"), &options).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Permanent);
        assert!(err.to_string().contains("transaction_options"));
        assert!(err.to_string().contains("twice"));
    }

    #[test]
    fn test_unaccepted_group_rejected() {
        let options = CallOptions::new().with_mutating(MutatingOptions::default());
        let err = compose(Verb::Exists, path("//home"), &options).unwrap_err();
        assert!(matches!(err, ClientError::Validation { ref field, .. } if field == "mutating_options"));

        let options = CallOptions::new().with_master_read(MasterReadOptions {
            read_from: ReadKind::Cache,
        });
        assert!(compose(Verb::InsertRows, path("//t"), &options).is_err());
    }

    #[test]
    fn test_forbidden_pair_rejected() {
        let mut required = Params::new();
        required.insert("source_path", "//a").unwrap();
        required.insert("destination_path", "//b").unwrap();
        required.insert("preserve_account", true).unwrap();
        let options = CallOptions::new().with_access_tracking(AccessTrackingOptions {
            suppress_access_tracking: true,
            suppress_modification_tracking: false,
        });
        let err = compose(Verb::Copy, required.clone(), &options).unwrap_err();
        assert!(err.to_string().contains("preserve_account"));

        required.set("preserve_account", false).unwrap();
        assert!(compose(Verb::Copy, required, &options).is_ok());
    }

    #[test]
    fn test_collision_with_required_rejected() {
        let mut required = path("//home");
        required.insert("transaction_id", TransactionId::new()).unwrap();
        let options = CallOptions::new().with_transaction(TransactionOptions::new(TransactionId::new()));
        assert!(compose(Verb::Get, required, &options).is_err());
    }

    #[test]
    fn test_or_transaction_keeps_explicit_choice() {
        let explicit = TransactionId::new();
        let options = CallOptions::new()
            .with_transaction(TransactionOptions::new(explicit))
            .or_transaction(TransactionId::new());
        assert_eq!(options.transaction_id(), Some(explicit));

        let injected = TransactionId::new();
        let options = CallOptions::new().or_transaction(injected);
        assert_eq!(options.transaction_id(), Some(injected));
        assert!(options.supplied().contains(GroupKind::Transaction));
    }

    #[test]
    fn test_or_transaction_group_carries_ping_ancestors() {
        let id = TransactionId::new();
        let group = TransactionOptions {
            transaction_id: Some(id),
            ping_ancestor_transactions: true,
        };
        let injected = CallOptions::new().or_transaction_group(group.clone());
        let call = compose(Verb::Remove, path("//a"), &injected).unwrap();
        assert_eq!(call.params.get_as::<TransactionId>("transaction_id"), Some(id));
        assert_eq!(call.params.get("ping_ancestor_transactions"), Some(&json!(true)));

        let explicit = TransactionId::new();
        let options = CallOptions::new()
            .with_transaction(TransactionOptions::new(explicit))
            .or_transaction_group(group);
        let call = compose(Verb::Remove, path("//a"), &options).unwrap();
        assert_eq!(call.params.get_as::<TransactionId>("transaction_id"), Some(explicit));
        assert!(!call.params.contains("ping_ancestor_transactions"));
    }

    #[test]
    fn test_explicit_mutation_id_passes_through() {
        let id = MutationId::new();
        let options = CallOptions::new().with_mutating(MutatingOptions {
            mutation_id: Some(id),
            retry: false,
        });
        let call = compose(Verb::Remove, path("//a"), &options).unwrap();
        assert_eq!(call.params.get_as::<MutationId>("mutation_id"), Some(id));
        assert_eq!(call.params.get("retry"), Some(&json!(false)));
    }

    fn arb_transaction() -> impl Strategy<Value = TransactionOptions> {
        (any::<[u8; 16]>(), any::<bool>(), any::<bool>()).prop_map(|(bytes, set, ping)| {
            TransactionOptions {
                transaction_id: set.then(|| TransactionId::from_bytes(bytes)),
                ping_ancestor_transactions: ping,
            }
        })
    }

    fn arb_access() -> impl Strategy<Value = AccessTrackingOptions> {
        (any::<bool>(), any::<bool>()).prop_map(|(a, m)| AccessTrackingOptions {
            suppress_access_tracking: a,
            suppress_modification_tracking: m,
        })
    }

    fn arb_read() -> impl Strategy<Value = MasterReadOptions> {
        prop_oneof![
            Just(ReadKind::Leader),
            Just(ReadKind::Follower),
            Just(ReadKind::Cache)
        ]
        .prop_map(|read_from| MasterReadOptions { read_from })
    }

    proptest! {
        #[test]
        fn prop_composition_is_order_independent(
            tx in arb_transaction(),
            access in arb_access(),
            read in arb_read(),
            read_retry in any::<bool>(),
        ) {
            let mut forward = CallOptions::new()
                .with_transaction(tx.clone())
                .with_access_tracking(access)
                .with_master_read(read);
            if read_retry {
                forward = forward.with_read_retry();
            }

            let mut backward = CallOptions::new();
            if read_retry {
                backward = backward.with_read_retry();
            }
            let backward = backward
                .with_master_read(read)
                .with_access_tracking(access)
                .with_transaction(tx);

            let a = compose(Verb::Get, path("//home"), &forward).unwrap();
            let b = compose(Verb::Get, path("//home"), &backward).unwrap();
            prop_assert_eq!(a, b);
        }
    }
}
