//! Transaction lifecycle shared by master and tablet transactions.
//!
//! Every transaction owns a scope derived from the scope it is bound to, a
//! state cell and one background task. The state cell is a watch channel, so
//! it doubles as the completion signal: the first terminal transition wins,
//! wakes every waiter and cancels the transaction's scope together with the
//! scopes of its children.
//!
//! The background task renews the lease while the transaction is active and,
//! once the scope is cancelled from outside, issues a best-effort remote abort.

use crate::client::ClientCore;
use crate::scope::Scope;
use arbor_core::{ClientError, ClientResult, Params, TransactionId, TransactionState, Verb};
use arbor_options::{CallOptions, compose};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Lease renewal settings of one transaction
#[derive(Debug, Clone, Copy)]
pub(crate) struct Renewal {
    pub(crate) period: Duration,
    pub(crate) timeout: Duration,
    pub(crate) ping_ancestors: bool,
}

impl Renewal {
    /// Renew at `period`, but at least twice per lease
    pub(crate) fn new(period: Duration, timeout: Duration, ping_ancestors: bool) -> Self {
        Self {
            period: period.min(timeout / 2),
            timeout,
            ping_ancestors,
        }
    }
}

/// Lease timeout as sent on the wire, in milliseconds
pub(crate) fn lease_millis(timeout: Duration) -> ClientResult<u64> {
    if timeout.is_zero() {
        return Err(ClientError::Validation {
            field: "timeout".to_string(),
            reason: "lease timeout must be positive".to_string(),
        });
    }
    u64::try_from(timeout.as_millis()).map_err(|_| ClientError::Validation {
        field: "timeout".to_string(),
        reason: format!("lease timeout {timeout:?} does not fit in milliseconds"),
    })
}

pub(crate) struct TxCore {
    id: TransactionId,
    kind: &'static str,
    client: Arc<ClientCore>,
    state: watch::Sender<TransactionState>,
    scope: Scope,
    op_lock: Mutex<()>,
    renewing: AtomicBool,
    children: StdMutex<Vec<Scope>>,
    renewal: Option<Renewal>,
    /// Cancelled once the background task has returned
    finished: CancellationToken,
}

impl TxCore {
    /// Register a freshly started transaction and spawn its background task
    pub(crate) fn launch(
        client: Arc<ClientCore>,
        id: TransactionId,
        kind: &'static str,
        bound: &Scope,
        renewal: Option<Renewal>,
    ) -> Arc<Self> {
        let (state, _) = watch::channel(TransactionState::Active);
        let core = Arc::new(Self {
            id,
            kind,
            client,
            state,
            scope: bound.child(),
            op_lock: Mutex::new(()),
            renewing: AtomicBool::new(renewal.is_some()),
            children: StdMutex::new(Vec::new()),
            renewal,
            finished: CancellationToken::new(),
        });
        core.client.track(&core);
        tokio::spawn(background(Arc::clone(&core)));
        core
    }

    pub(crate) fn id(&self) -> TransactionId {
        self.id
    }

    pub(crate) fn client(&self) -> &Arc<ClientCore> {
        &self.client
    }

    pub(crate) fn scope(&self) -> &Scope {
        &self.scope
    }

    pub(crate) fn state(&self) -> TransactionState {
        *self.state.borrow()
    }

    pub(crate) fn is_renewing(&self) -> bool {
        self.renewing.load(Ordering::Acquire)
    }

    pub(crate) fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }

    fn violation(&self, action: &'static str, state: TransactionState) -> ClientError {
        ClientError::StateViolation {
            transaction: self.id,
            action,
            state,
        }
    }

    /// Fail with a state violation unless the transaction is active
    pub(crate) fn ensure_active(&self, action: &'static str) -> ClientResult<()> {
        match self.state() {
            TransactionState::Active => Ok(()),
            state => Err(self.violation(action, state)),
        }
    }

    /// Wait until the transaction reaches a terminal state
    pub(crate) async fn wait(&self) -> TransactionState {
        let mut rx = self.state.subscribe();
        match rx.wait_for(|s| s.is_terminal()).await {
            Ok(state) => *state,
            Err(_) => self.state(),
        }
    }

    /// Wait until the background task has returned
    pub(crate) async fn stopped(&self) {
        self.finished.cancelled().await;
    }

    /// Track a child transaction's scope so that it ends with this one
    pub(crate) fn adopt(&self, child: Scope) -> ClientResult<()> {
        let mut children = self.children.lock().unwrap_or_else(PoisonError::into_inner);
        match self.state() {
            TransactionState::Active => {
                children.retain(|c| !c.is_cancelled());
                children.push(child);
                Ok(())
            }
            state => {
                child.cancel();
                Err(self.violation("start a nested transaction", state))
            }
        }
    }

    /// Move from active to `to`; returns false if already terminal
    fn finish(&self, to: TransactionState) -> bool {
        let changed = self.state.send_if_modified(|state| {
            if state.is_terminal() {
                return false;
            }
            *state = to;
            true
        });
        if changed {
            info!(transaction_id = %self.id, kind = self.kind, state = %to, "transaction finished");
            self.scope.cancel();
            let children = std::mem::take(
                &mut *self.children.lock().unwrap_or_else(PoisonError::into_inner),
            );
            for child in children {
                child.cancel();
            }
        }
        changed
    }

    fn tx_params(&self) -> ClientResult<Params> {
        let mut params = Params::new();
        params.insert("transaction_id", self.id)?;
        Ok(params)
    }

    /// Commit on the cluster, then mark committed
    pub(crate) async fn commit(&self, options: CallOptions) -> ClientResult<()> {
        let _guard = self.op_lock.lock().await;
        self.ensure_active("commit")?;

        let call = compose(Verb::CommitTransaction, self.tx_params()?, &options)?;
        match self.client.execute(&self.scope, call, None).await {
            Ok(_) => {
                self.finish(TransactionState::Committed);
                Ok(())
            }
            Err(err) => {
                if err.is_no_such_transaction() {
                    warn!(transaction_id = %self.id, error = %err, "commit found transaction gone");
                    self.finish(TransactionState::Aborted);
                }
                Err(err)
            }
        }
    }

    /// Abort on the cluster, then mark aborted; a second abort is a no-op
    pub(crate) async fn abort(&self, options: CallOptions) -> ClientResult<()> {
        let _guard = self.op_lock.lock().await;
        match self.state() {
            TransactionState::Aborted => return Ok(()),
            TransactionState::Committed => {
                return Err(self.violation("abort", TransactionState::Committed));
            }
            TransactionState::Active => {}
        }

        let scope = if self.scope.is_cancelled() {
            self.abort_scope()
        } else {
            self.scope.clone()
        };
        match self.remote_abort(&scope, &options).await {
            Ok(()) => {
                self.finish(TransactionState::Aborted);
                Ok(())
            }
            Err(err) if err.is_no_such_transaction() => {
                self.finish(TransactionState::Aborted);
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    async fn remote_abort(&self, scope: &Scope, options: &CallOptions) -> ClientResult<()> {
        let call = compose(Verb::AbortTransaction, self.tx_params()?, options)?;
        self.client.execute(scope, call, None).await.map(|_| ())
    }

    fn abort_scope(&self) -> Scope {
        let budget = Duration::from_millis(self.client.config().transaction.abort_timeout_ms);
        Scope::new().with_timeout(budget)
    }

    /// Abort after the bound scope was cancelled from outside
    async fn abort_on_cancel(&self) {
        let _guard = self.op_lock.lock().await;
        if self.state().is_terminal() {
            return;
        }
        if let Err(err) = self
            .remote_abort(&self.abort_scope(), &CallOptions::new())
            .await
        {
            warn!(transaction_id = %self.id, error = %err, "best-effort abort failed");
        }
        self.finish(TransactionState::Aborted);
    }

    /// Mark aborted after the lease could not be kept alive
    async fn expire(&self, reason: &str) {
        let _guard = self.op_lock.lock().await;
        if self.finish(TransactionState::Aborted) {
            warn!(transaction_id = %self.id, reason, "transaction expired");
        }
    }

    async fn ping(&self, renewal: &Renewal, lease_deadline: Instant) -> ClientResult<()> {
        let mut params = self.tx_params()?;
        if renewal.ping_ancestors {
            params.insert("ping_ancestor_transactions", true)?;
        }
        let call = compose(Verb::PingTransaction, params, &CallOptions::new())?;
        let scope = self.scope.child().with_deadline(lease_deadline);
        self.client.execute(&scope, call, None).await.map(|_| ())
    }
}

async fn background(core: Arc<TxCore>) {
    if let Some(renewal) = core.renewal {
        let mut renewed_at = Instant::now();
        loop {
            tokio::select! {
                biased;
                _ = core.scope.cancelled() => break,
                _ = tokio::time::sleep(renewal.period) => {}
            }
            let lease_deadline = renewed_at + renewal.timeout;
            match core.ping(&renewal, lease_deadline).await {
                Ok(()) => {
                    renewed_at = Instant::now();
                    debug!(transaction_id = %core.id, "lease renewed");
                }
                Err(err) if err.is_no_such_transaction() => {
                    core.expire("transaction no longer exists").await;
                    break;
                }
                Err(ClientError::Cancelled { .. }) => break,
                Err(err) if Instant::now() >= lease_deadline => {
                    warn!(transaction_id = %core.id, error = %err, "lease renewal failed");
                    core.expire("lease not renewed before timeout").await;
                    break;
                }
                Err(err) => {
                    warn!(transaction_id = %core.id, error = %err, "ping failed, will retry");
                }
            }
        }
        core.renewing.store(false, Ordering::Release);
    }

    core.scope.cancelled().await;
    core.abort_on_cancel().await;
    core.finished.cancel();
}
