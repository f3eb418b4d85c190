//! Master transactions.
//!
//! A [`Transaction`] is a cheap, cloneable handle. Calls issued through it
//! run under the transaction unless the caller picked another one
//! explicitly, and are cancelled once the transaction ends.

use crate::client::{ClientCore, Invoker, MasterInvoker, decode};
use crate::lifecycle::{Renewal, TxCore, lease_millis};
use crate::scope::Scope;
use arbor_core::{ClientResult, Params, Response, TransactionId, TransactionState, Verb};
use arbor_options::{
    CallOptions, GroupKind, MutatingOptions, OperationSpec, PrerequisiteOptions,
    TransactionOptions, compose,
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Options for starting a master transaction
#[derive(Debug, Clone, Default)]
pub struct StartTxOptions {
    /// Lease timeout; the client default applies when unset
    pub timeout: Option<Duration>,
    /// Absolute deadline after which the cluster aborts the transaction
    pub deadline: Option<DateTime<Utc>>,
    /// Renew the lease in the background; the client default applies when unset
    pub ping: Option<bool>,
    /// Renew ancestors' leases together with this one
    pub ping_ancestors: bool,
    /// Preconditions checked when the transaction starts
    pub prerequisites: Option<PrerequisiteOptions>,
    /// Attributes stored on the transaction object
    pub attributes: Map<String, Value>,
    /// Human-readable title
    pub title: Option<String>,
    /// Scope the transaction is bound to, instead of the issuing handle's
    pub scope: Option<Scope>,
}

impl StartTxOptions {
    /// Default options
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set lease timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set absolute deadline
    #[must_use]
    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Enable or disable background lease renewal
    #[must_use]
    pub fn with_ping(mut self, ping: bool) -> Self {
        self.ping = Some(ping);
        self
    }

    /// Renew ancestors' leases as well
    #[must_use]
    pub fn with_ping_ancestors(mut self) -> Self {
        self.ping_ancestors = true;
        self
    }

    /// Set start preconditions
    #[must_use]
    pub fn with_prerequisites(mut self, prerequisites: PrerequisiteOptions) -> Self {
        self.prerequisites = Some(prerequisites);
        self
    }

    /// Add an attribute
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    /// Set title
    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Bind the transaction to `scope`
    #[must_use]
    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = Some(scope);
        self
    }
}

/// Options for committing a transaction
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommitTxOptions {
    /// Explicit mutation id for the commit
    pub mutating: Option<MutatingOptions>,
    /// Preconditions checked at commit
    pub prerequisites: Option<PrerequisiteOptions>,
}

impl CommitTxOptions {
    pub(crate) fn to_call_options(&self) -> CallOptions {
        let mut options = CallOptions::new();
        if let Some(mutating) = self.mutating {
            options = options.with_mutating(mutating);
        }
        if let Some(prerequisites) = &self.prerequisites {
            options = options.with_prerequisite(prerequisites.clone());
        }
        options
    }
}

/// Handle of a master transaction
#[derive(Clone)]
pub struct Transaction {
    core: Arc<TxCore>,
    parent_id: Option<TransactionId>,
    ping_ancestors: bool,
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.core.id())
            .field("parent_id", &self.parent_id)
            .field("state", &self.core.state())
            .finish()
    }
}

impl Transaction {
    pub(crate) async fn start(
        client: Arc<ClientCore>,
        issuer: &Scope,
        parent: Option<&TxCore>,
        options: StartTxOptions,
    ) -> ClientResult<Self> {
        if let Some(parent) = parent {
            parent.ensure_active("start a nested transaction")?;
        }
        let defaults = &client.config().transaction;
        let timeout = options
            .timeout
            .unwrap_or(Duration::from_millis(defaults.default_timeout_ms));
        let timeout_ms = lease_millis(timeout)?;
        let ping = options.ping.unwrap_or(defaults.ping_enabled);
        let renewal = ping.then(|| {
            Renewal::new(
                Duration::from_millis(defaults.ping_period_ms),
                timeout,
                options.ping_ancestors,
            )
        });

        let mut params = Params::new();
        params.insert("timeout", timeout_ms)?;
        if let Some(deadline) = options.deadline {
            params.insert("deadline", deadline)?;
        }
        let parent_id = parent.map(TxCore::id);
        if let Some(parent_id) = parent_id {
            params.insert("parent_id", parent_id)?;
        }
        if options.ping_ancestors {
            params.insert("ping_ancestor_transactions", true)?;
        }
        let mut attributes = options.attributes;
        if let Some(title) = options.title {
            attributes.insert("title".to_string(), Value::String(title));
        }
        if !attributes.is_empty() {
            params.insert("attributes", attributes)?;
        }

        let mut call_options = CallOptions::new();
        if let Some(prerequisites) = options.prerequisites {
            call_options = call_options.with_prerequisite(prerequisites);
        }

        let bound = match (options.scope, parent) {
            (Some(scope), _) => scope,
            (None, Some(parent)) => parent.scope().clone(),
            (None, None) => issuer.clone(),
        };
        let call = compose(Verb::StartTransaction, params, &call_options)?;
        let response = client.execute(&bound, call, None).await?;
        let id: TransactionId = decode(Verb::StartTransaction, &response)?;

        let core = TxCore::launch(client, id, "master", &bound, renewal);
        if let Some(parent) = parent {
            parent.adopt(core.scope().clone())?;
        }
        info!(transaction_id = %id, parent_id = ?parent_id, ping, "transaction started");
        Ok(Self {
            core,
            parent_id,
            ping_ancestors: options.ping_ancestors,
        })
    }

    /// Transaction id
    #[must_use]
    pub fn id(&self) -> TransactionId {
        self.core.id()
    }

    /// Parent transaction id, for nested transactions
    #[must_use]
    pub fn parent_id(&self) -> Option<TransactionId> {
        self.parent_id
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> TransactionState {
        self.core.state()
    }

    /// Whether the lease is still being renewed in the background
    #[must_use]
    pub fn is_renewing(&self) -> bool {
        self.core.is_renewing()
    }

    /// Scope of the transaction, cancelled when it ends
    #[must_use]
    pub fn scope(&self) -> &Scope {
        self.core.scope()
    }

    /// Wait until the transaction is committed or aborted
    pub async fn wait(&self) -> TransactionState {
        self.core.wait().await
    }

    /// Start a transaction nested under this one
    ///
    /// Unless `options` name a scope, the child is bound to this
    /// transaction's scope. The child ends no later than its parent.
    ///
    /// # Errors
    ///
    /// Returns a state violation if this transaction is no longer active,
    /// otherwise any failure of the start call
    pub async fn begin_tx(&self, options: StartTxOptions) -> ClientResult<Transaction> {
        Transaction::start(
            Arc::clone(self.core.client()),
            self.core.scope(),
            Some(self.core.as_ref()),
            options,
        )
        .await
    }

    /// Commit the transaction
    ///
    /// # Errors
    ///
    /// Returns a state violation if the transaction is not active. A commit
    /// rejected because the cluster no longer knows the transaction leaves
    /// it aborted.
    pub async fn commit(&self, options: CommitTxOptions) -> ClientResult<()> {
        self.core.commit(options.to_call_options()).await
    }

    /// Abort the transaction; aborting an aborted transaction does nothing
    ///
    /// # Errors
    ///
    /// Returns a state violation if the transaction is committed, otherwise
    /// any failure of the abort call
    pub async fn abort(&self) -> ClientResult<()> {
        self.core.abort(CallOptions::new()).await
    }
}

#[async_trait]
impl Invoker for Transaction {
    async fn invoke(
        &self,
        verb: Verb,
        required: Params,
        options: CallOptions,
        body: Option<Bytes>,
    ) -> ClientResult<Response> {
        self.core.ensure_active("issue calls")?;
        let options = if OperationSpec::of(verb).accepts(GroupKind::Transaction) {
            options.or_transaction_group(TransactionOptions {
                transaction_id: Some(self.core.id()),
                ping_ancestor_transactions: self.ping_ancestors,
            })
        } else {
            options
        };
        let call = compose(verb, required, &options)?;
        self.core
            .client()
            .execute(self.core.scope(), call, body)
            .await
    }
}

impl MasterInvoker for Transaction {}
