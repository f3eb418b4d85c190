//! Tablet transactions.
//!
//! Short-lived transactions over dynamic tables. They follow the same
//! lifecycle as master transactions (scope binding, lease renewal,
//! single terminal transition) but carry tablet-specific start settings.
//! Reads through a tablet transaction carry no mutation id; writes do.
//!
//! With [`StartTabletTxOptions::master`] set, the transaction is started and
//! committed as a master transaction, so its row writes commit together with
//! the master state it coordinates.

use crate::client::{ClientCore, Invoker, decode};
use crate::lifecycle::{Renewal, TxCore, lease_millis};
use crate::scope::Scope;
use crate::transaction::CommitTxOptions;
use arbor_core::{
    ClientResult, Params, Response, TabletTransactionId, TransactionId, TransactionState, Verb,
};
use arbor_options::{CallOptions, GroupKind, OperationSpec, compose};
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Atomicity of a tablet transaction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Atomicity {
    /// Writes across tablets commit atomically
    #[default]
    Full,
    /// Each tablet commits on its own
    #[serde(rename = "none")]
    Relaxed,
}

/// Durability of a tablet transaction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Durability {
    /// Commit waits for the journal
    #[default]
    Sync,
    /// Commit returns before the journal is flushed
    Async,
}

/// Options for starting a tablet transaction
#[derive(Debug, Clone, Default)]
pub struct StartTabletTxOptions {
    /// Atomicity
    pub atomicity: Atomicity,
    /// Durability
    pub durability: Durability,
    /// Lease timeout; the client default applies when unset
    pub timeout: Option<Duration>,
    /// Renew the lease in the background; the client default applies when unset
    pub ping: Option<bool>,
    /// Start a master transaction instead of a tablet one
    pub master: bool,
    /// Options applied to the eventual commit
    pub commit_options: CommitTxOptions,
    /// Scope the transaction is bound to, instead of the issuing handle's
    pub scope: Option<Scope>,
}

impl StartTabletTxOptions {
    /// Default options
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set atomicity
    #[must_use]
    pub fn with_atomicity(mut self, atomicity: Atomicity) -> Self {
        self.atomicity = atomicity;
        self
    }

    /// Set durability
    #[must_use]
    pub fn with_durability(mut self, durability: Durability) -> Self {
        self.durability = durability;
        self
    }

    /// Set lease timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Enable or disable background lease renewal
    #[must_use]
    pub fn with_ping(mut self, ping: bool) -> Self {
        self.ping = Some(ping);
        self
    }

    /// Run as a master transaction
    #[must_use]
    pub fn with_master(mut self) -> Self {
        self.master = true;
        self
    }

    /// Set options applied at commit
    #[must_use]
    pub fn with_commit_options(mut self, options: CommitTxOptions) -> Self {
        self.commit_options = options;
        self
    }

    /// Bind the transaction to `scope`
    #[must_use]
    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = Some(scope);
        self
    }
}

/// Handle of a tablet transaction
#[derive(Clone)]
pub struct TabletTransaction {
    core: Arc<TxCore>,
    id: TabletTransactionId,
    commit_options: CommitTxOptions,
}

impl std::fmt::Debug for TabletTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TabletTransaction")
            .field("id", &self.id)
            .field("state", &self.core.state())
            .finish()
    }
}

impl TabletTransaction {
    pub(crate) async fn start(
        client: Arc<ClientCore>,
        issuer: &Scope,
        options: StartTabletTxOptions,
    ) -> ClientResult<Self> {
        let defaults = &client.config().transaction;
        let timeout = options
            .timeout
            .unwrap_or(Duration::from_millis(defaults.default_timeout_ms));
        let timeout_ms = lease_millis(timeout)?;
        let renewal = options
            .ping
            .unwrap_or(defaults.ping_enabled)
            .then(|| Renewal::new(Duration::from_millis(defaults.ping_period_ms), timeout, false));

        let mut params = Params::new();
        if !options.master {
            params.insert("type", "tablet")?;
            params.insert("atomicity", options.atomicity)?;
            params.insert("durability", options.durability)?;
        }
        params.insert("timeout", timeout_ms)?;

        let bound = options.scope.unwrap_or_else(|| issuer.clone());
        let call = compose(Verb::StartTransaction, params, &CallOptions::new())?;
        let response = client.execute(&bound, call, None).await?;
        let id: TabletTransactionId = decode(Verb::StartTransaction, &response)?;

        let kind = if options.master { "master" } else { "tablet" };
        let core = TxCore::launch(client, id.into(), kind, &bound, renewal);
        info!(
            transaction_id = %id,
            kind,
            atomicity = ?options.atomicity,
            durability = ?options.durability,
            "tablet transaction started"
        );
        Ok(Self {
            core,
            id,
            commit_options: options.commit_options,
        })
    }

    /// Tablet transaction id
    #[must_use]
    pub fn id(&self) -> TabletTransactionId {
        self.id
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

    /// Commit, applying the commit options given at start
    ///
    /// # Errors
    ///
    /// Returns a state violation if the transaction is not active, otherwise
    /// any failure of the commit call
    pub async fn commit(&self) -> ClientResult<()> {
        self.core
            .commit(self.commit_options.to_call_options())
            .await
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
impl Invoker for TabletTransaction {
    async fn invoke(
        &self,
        verb: Verb,
        required: Params,
        options: CallOptions,
        body: Option<Bytes>,
    ) -> ClientResult<Response> {
        self.core.ensure_active("issue calls")?;
        let options = if OperationSpec::of(verb).accepts(GroupKind::Transaction) {
            options.or_transaction(TransactionId::from(self.id))
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
