//! Simulated cluster behind the [`Dispatcher`] seam.

use crate::fault::{FailureModel, Fault, FaultInjector};
use crate::journal::{Journal, Outcome};
use crate::scheduler::SimOperation;
use crate::state::{ClusterState, Reply, SimTransaction, fail};
use arbor_core::{
    CallError, Dispatcher, MutationId, OperationId, Request, Response, TransactionId, Verb, codes,
};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, trace};

#[derive(Debug)]
struct Inner {
    state: ClusterState,
    /// Reply recorded for every applied mutation
    ledger: HashMap<MutationId, Reply>,
    journal: Journal,
}

impl Inner {
    /// Apply `request` unless its mutation id was seen before
    fn apply(&mut self, request: &Request) -> (Reply, Outcome) {
        let mutation_id = request.params.get_as::<MutationId>("mutation_id");
        let retry = request.params.get_as::<bool>("retry").unwrap_or(false);

        if let Some(id) = mutation_id {
            if let Some(recorded) = self.ledger.get(&id) {
                if retry {
                    debug!(verb = %request.verb, mutation_id = %id, "replaying recorded reply");
                    return (recorded.clone(), Outcome::Replayed);
                }
                let err = fail(
                    codes::DUPLICATE_MUTATION,
                    format!("mutation {id} was already applied"),
                )
                .with_attribute("mutation_id", serde_json::json!(id));
                return (Err(err), Outcome::Rejected {
                    code: codes::DUPLICATE_MUTATION,
                });
            }
        }

        let reply = self.state.handle(request, Instant::now());
        if let Some(id) = mutation_id {
            self.ledger.insert(id, reply.clone());
        }
        let outcome = match &reply {
            Ok(_) => Outcome::Applied,
            Err(err) => Outcome::Rejected { code: err.code },
        };
        (reply, outcome)
    }
}

/// In-memory cluster with mutation idempotency, lease expiry and fault
/// injection
#[derive(Debug)]
pub struct SimCluster {
    inner: Mutex<Inner>,
    faults: FaultInjector,
}

impl SimCluster {
    /// Create a cluster that never fails on its own
    #[must_use]
    pub fn new() -> Self {
        Self::with_failure_model(FailureModel::default())
    }

    /// Create a cluster drawing random faults from `model`
    #[must_use]
    pub fn with_failure_model(model: FailureModel) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: ClusterState::new(),
                ledger: HashMap::new(),
                journal: Journal::default(),
            }),
            faults: FaultInjector::new(model),
        }
    }

    /// Fail the next call of `verb` with `fault`
    pub fn inject(&self, verb: Verb, fault: Fault) {
        self.faults.script(verb, fault, 1);
    }

    /// Fail the next `times` calls of `verb` with `fault`
    pub fn inject_times(&self, verb: Verb, fault: Fault, times: usize) {
        self.faults.script(verb, fault, times);
    }

    /// Drop scripted faults that have not fired yet
    pub fn clear_faults(&self) {
        self.faults.clear();
    }

    /// Random faults injected so far
    #[must_use]
    pub fn random_faults_injected(&self) -> usize {
        self.faults.random_injected()
    }

    /// Snapshot of the call journal
    pub async fn journal(&self) -> Journal {
        self.inner.lock().await.journal.clone()
    }

    /// Transaction as the cluster currently sees it
    pub async fn transaction(&self, id: TransactionId) -> Option<SimTransaction> {
        let mut inner = self.inner.lock().await;
        inner.state.expire_due(Instant::now());
        inner.state.transactions.get(&id).cloned()
    }

    /// Pings received for `id`
    pub async fn ping_count(&self, id: TransactionId) -> u64 {
        self.inner
            .lock()
            .await
            .state
            .transactions
            .get(&id)
            .map_or(0, |tx| tx.pings)
    }

    /// Committed rows of the table at `path`
    pub async fn rows(&self, path: &str) -> Vec<Value> {
        self.inner
            .lock()
            .await
            .state
            .tables
            .get(path)
            .map(|t| t.rows())
            .unwrap_or_default()
    }

    /// Whether a node exists at `path`
    pub async fn node_exists(&self, path: &str) -> bool {
        self.inner.lock().await.state.nodes.contains_key(path)
    }

    /// Number of distinct mutations applied
    pub async fn applied_mutations(&self) -> usize {
        self.inner.lock().await.ledger.len()
    }

    /// Abort `id` and its descendants as if their lease ran out
    pub async fn expire_transaction(&self, id: TransactionId) -> bool {
        let mut inner = self.inner.lock().await;
        let active = inner
            .state
            .transactions
            .get(&id)
            .is_some_and(|tx| !tx.state.is_terminal());
        if active {
            debug!(transaction_id = %id, "expiring transaction");
            inner.state.abort_subtree(id);
        }
        active
    }

    /// Complete a running operation
    pub async fn complete_operation(&self, id: OperationId) -> bool {
        self.inner.lock().await.state.complete_operation(id)
    }

    /// Operation as the scheduler sees it
    pub async fn operation(&self, id: OperationId) -> Option<SimOperation> {
        self.inner.lock().await.state.operations.get(&id).cloned()
    }

    /// Granted locks held by `tx`
    pub async fn locks_held(&self, tx: TransactionId) -> usize {
        self.inner
            .lock()
            .await
            .state
            .locks
            .iter()
            .filter(|lock| lock.transaction == tx && !lock.pending)
            .count()
    }
}

impl Default for SimCluster {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Dispatcher for SimCluster {
    async fn call(&self, request: Request) -> Result<Response, CallError> {
        let mut fault = self.faults.next(request.verb);
        if let Some(Fault::Latency(delay)) = fault {
            tokio::time::sleep(delay).await;
            fault = None;
        }

        let mut inner = self.inner.lock().await;
        match fault {
            Some(Fault::FailBefore(err)) => {
                trace!(verb = %request.verb, "request lost before delivery");
                inner.journal.push(&request, Outcome::Lost { applied: false });
                Err(err.into())
            }
            Some(Fault::Remote(err)) => {
                trace!(verb = %request.verb, code = err.code, "request rejected by fault");
                inner
                    .journal
                    .push(&request, Outcome::Rejected { code: err.code });
                Err(err.into())
            }
            Some(Fault::FailAfter(err)) => {
                let _ = inner.apply(&request);
                trace!(verb = %request.verb, "response lost after apply");
                inner.journal.push(&request, Outcome::Lost { applied: true });
                Err(err.into())
            }
            Some(Fault::Latency(_)) | None => {
                let (reply, outcome) = inner.apply(&request);
                inner.journal.push(&request, outcome);
                reply.map_err(CallError::from)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_core::{Params, TransactionState};
    use serde_json::json;

    fn request(verb: Verb, fields: Value) -> Request {
        let mut params = Params::new();
        if let Value::Object(map) = fields {
            for (name, value) in map {
                params.insert(&name, value).unwrap();
            }
        }
        Request::new(verb, params)
    }

    fn create(path: &str, mutation_id: MutationId, retry: bool) -> Request {
        request(
            Verb::Create,
            json!({"path": path, "type": "map_node", "mutation_id": mutation_id, "retry": retry}),
        )
    }

    #[tokio::test]
    async fn test_retry_replays_recorded_reply() {
        let cluster = SimCluster::new();
        let id = MutationId::new();
        cluster.inject(Verb::Create, Fault::reset_after());

        let err = cluster.call(create("//a", id, false)).await.unwrap_err();
        assert!(matches!(err, CallError::Transport(_)));
        assert!(cluster.node_exists("//a").await);

        let replayed = cluster.call(create("//a", id, true)).await.unwrap();
        let original = cluster.journal().await;
        assert_eq!(
            original.for_mutation(id).iter().map(|e| e.outcome.clone()).collect::<Vec<_>>(),
            vec![Outcome::Lost { applied: true }, Outcome::Replayed]
        );
        assert!(replayed.value.is_string());
        assert_eq!(cluster.applied_mutations().await, 1);
    }

    #[tokio::test]
    async fn test_duplicate_without_retry_flag() {
        let cluster = SimCluster::new();
        let id = MutationId::new();
        cluster.call(create("//a", id, false)).await.unwrap();

        let err = cluster.call(create("//a", id, false)).await.unwrap_err();
        assert_eq!(err.remote().map(|e| e.code), Some(codes::DUPLICATE_MUTATION));
    }

    #[tokio::test]
    async fn test_fail_before_does_not_apply() {
        let cluster = SimCluster::new();
        cluster.inject(Verb::Create, Fault::reset_before());

        let id = MutationId::new();
        assert!(cluster.call(create("//a", id, false)).await.is_err());
        assert!(!cluster.node_exists("//a").await);

        cluster.call(create("//a", id, true)).await.unwrap();
        assert!(cluster.node_exists("//a").await);
    }

    #[tokio::test]
    async fn test_expire_transaction() {
        let cluster = SimCluster::new();
        let id: TransactionId = cluster
            .call(request(Verb::StartTransaction, json!({})))
            .await
            .unwrap()
            .decode()
            .unwrap();

        assert!(cluster.expire_transaction(id).await);
        assert!(!cluster.expire_transaction(id).await);
        let tx = cluster.transaction(id).await.unwrap();
        assert_eq!(tx.state, TransactionState::Aborted);

        let err = cluster
            .call(request(Verb::PingTransaction, json!({"transaction_id": id})))
            .await
            .unwrap_err();
        assert!(err.remote().is_some_and(|e| e.contains_code(codes::NO_SUCH_TRANSACTION)));
    }
}
