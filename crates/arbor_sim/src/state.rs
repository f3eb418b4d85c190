//! In-memory cluster state.
//!
//! Holds the node tree, transactions, dynamic table rows, locks and
//! scheduler operations. Handlers for each area live in sibling modules
//! as further `impl ClusterState` blocks; this module owns dispatch,
//! transaction bookkeeping and prerequisite checks.
//!
//! Node writes under a master transaction are applied immediately; row
//! writes under any transaction are buffered until it commits.

use crate::cypress::{Node, ROOT};
use crate::scheduler::{SimJob, SimOperation};
use crate::tables::TableRows;
use arbor_core::{
    JobId, OperationId, Params, RemoteError, Request, Response, TransactionId, TransactionState,
    Verb, codes,
};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

pub(crate) type Reply = Result<Response, RemoteError>;

pub(crate) fn fail(code: i32, message: impl Into<String>) -> RemoteError {
    RemoteError::new(code, message)
}

pub(crate) fn no_such_transaction(id: TransactionId) -> RemoteError {
    fail(codes::NO_SUCH_TRANSACTION, format!("no such transaction {id}"))
        .with_attribute("transaction_id", json!(id))
}

/// Required parameter
pub(crate) fn param<T: DeserializeOwned>(params: &Params, name: &str) -> Result<T, RemoteError> {
    params
        .get_as(name)
        .ok_or_else(|| fail(codes::GENERIC, format!("missing or malformed parameter {name:?}")))
}

pub(crate) fn flag(params: &Params, name: &str) -> bool {
    params.get_as::<bool>(name).unwrap_or(false)
}

/// Master or tablet transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxKind {
    /// Master transaction
    Master,
    /// Tablet transaction
    Tablet,
}

/// Buffered row write
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum PendingWrite {
    Insert {
        path: String,
        rows: Vec<Value>,
        update: bool,
    },
    Delete { path: String, keys: Vec<Value> },
}

/// Transaction as the cluster sees it
#[derive(Debug, Clone)]
pub struct SimTransaction {
    /// Id
    pub id: TransactionId,
    /// Parent, for nested transactions
    pub parent: Option<TransactionId>,
    /// Kind
    pub kind: TxKind,
    /// State
    pub state: TransactionState,
    /// Lease timeout
    pub timeout: Duration,
    /// Lease expiry
    pub lease_expires: Instant,
    /// Absolute deadline
    pub deadline: Option<DateTime<Utc>>,
    /// Attributes given at start
    pub attributes: Map<String, Value>,
    /// Pings received
    pub pings: u64,
    pub(crate) pending: Vec<PendingWrite>,
}

#[derive(Debug, Deserialize)]
struct RevisionCheck {
    path: String,
    revision: u64,
}

#[derive(Debug)]
pub(crate) struct ClusterState {
    pub(crate) nodes: BTreeMap<String, Node>,
    pub(crate) revision: u64,
    pub(crate) transactions: HashMap<TransactionId, SimTransaction>,
    pub(crate) tables: HashMap<String, TableRows>,
    pub(crate) locks: Vec<crate::cypress::LockRecord>,
    pub(crate) operations: HashMap<OperationId, SimOperation>,
    pub(crate) jobs: HashMap<JobId, SimJob>,
}

impl ClusterState {
    pub(crate) fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(ROOT.to_string(), Node::new("map_node", Map::new(), 0));
        Self {
            nodes,
            revision: 0,
            transactions: HashMap::new(),
            tables: HashMap::new(),
            locks: Vec::new(),
            operations: HashMap::new(),
            jobs: HashMap::new(),
        }
    }

    pub(crate) fn handle(&mut self, request: &Request, now: Instant) -> Reply {
        self.expire_due(now);
        let params = &request.params;
        self.check_prerequisites(params)?;

        match request.verb {
            Verb::StartTransaction => self.start_transaction(params, now),
            Verb::PingTransaction => self.ping_transaction(params, now),
            Verb::CommitTransaction => self.commit_transaction(params),
            Verb::AbortTransaction => self.abort_transaction(params),
            _ => self.handle_data(request, now),
        }
    }

    fn handle_data(&mut self, request: &Request, now: Instant) -> Reply {
        let params = &request.params;
        let tx = params.get_as::<TransactionId>("transaction_id");
        if let Some(id) = tx {
            self.ensure_alive(id)?;
            if flag(params, "ping_ancestor_transactions") {
                self.renew(id, true, now);
            }
        }

        let body = request.body.as_ref();
        match request.verb {
            Verb::Create => self.create(params),
            Verb::Exists => self.exists(params),
            Verb::Get => self.get(params),
            Verb::Set => self.set(params, body),
            Verb::List => self.list(params),
            Verb::Remove => self.remove(params),
            Verb::Copy => self.transfer(params, false),
            Verb::Move => self.transfer(params, true),
            Verb::Link => self.link(params),
            Verb::Lock => self.lock(params, tx),
            Verb::Unlock => self.unlock(params, tx),
            Verb::WriteFile => self.write_file(params, body),
            Verb::ReadFile => self.read_file(params),
            Verb::SelectRows => self.select_rows(params),
            Verb::LookupRows => self.lookup_rows(params),
            Verb::InsertRows => self.insert_rows(params, tx),
            Verb::DeleteRows => self.delete_rows(params, tx),
            Verb::MountTable => self.mount_table(params),
            Verb::UnmountTable => self.unmount_table(params),
            Verb::RemountTable => self.remount_table(params),
            Verb::FreezeTable => self.freeze_table(params),
            Verb::UnfreezeTable => self.unfreeze_table(params),
            Verb::StartOperation => self.start_operation(params, tx),
            Verb::AbortOperation => self.abort_operation(params),
            Verb::GetOperation => self.get_operation(params),
            Verb::GetJob => self.get_job(params),
            verb @ (Verb::StartTransaction
            | Verb::PingTransaction
            | Verb::CommitTransaction
            | Verb::AbortTransaction) => {
                Err(fail(codes::GENERIC, format!("{verb} is not a data verb")))
            }
        }
    }

    pub(crate) fn ensure_alive(&mut self, id: TransactionId) -> Result<&mut SimTransaction, RemoteError> {
        match self.transactions.get_mut(&id) {
            Some(tx) if tx.state == TransactionState::Active => Ok(tx),
            _ => Err(no_such_transaction(id)),
        }
    }

    fn is_alive(&self, id: TransactionId) -> bool {
        self.transactions
            .get(&id)
            .is_some_and(|tx| tx.state == TransactionState::Active)
    }

    /// Abort every active transaction whose lease or deadline ran out
    pub(crate) fn expire_due(&mut self, now: Instant) {
        let wall = Utc::now();
        let expired: Vec<TransactionId> = self
            .transactions
            .values()
            .filter(|tx| tx.state == TransactionState::Active)
            .filter(|tx| tx.lease_expires <= now || tx.deadline.is_some_and(|d| d <= wall))
            .map(|tx| tx.id)
            .collect();
        for id in expired {
            debug!(transaction_id = %id, "lease expired");
            self.abort_subtree(id);
        }
    }

    fn renew(&mut self, id: TransactionId, ancestors: bool, now: Instant) {
        let mut next = Some(id);
        while let Some(current) = next {
            let Some(tx) = self.transactions.get_mut(&current) else {
                break;
            };
            if tx.state == TransactionState::Active {
                tx.lease_expires = now + tx.timeout;
            }
            next = if ancestors { tx.parent } else { None };
        }
    }

    /// `id` followed by all of its active descendants
    fn subtree_of(&self, id: TransactionId) -> Vec<TransactionId> {
        let mut out = vec![id];
        let mut i = 0;
        while i < out.len() {
            let current = out[i];
            out.extend(
                self.transactions
                    .values()
                    .filter(|tx| tx.parent == Some(current) && tx.state == TransactionState::Active)
                    .map(|tx| tx.id),
            );
            i += 1;
        }
        out
    }

    pub(crate) fn abort_subtree(&mut self, id: TransactionId) {
        for member in self.subtree_of(id) {
            if let Some(tx) = self.transactions.get_mut(&member) {
                if tx.state == TransactionState::Active {
                    tx.state = TransactionState::Aborted;
                    tx.pending.clear();
                }
            }
            self.release_locks(member);
            self.abort_operations_of(member);
        }
    }

    fn check_prerequisites(&self, params: &Params) -> Result<(), RemoteError> {
        if let Some(ids) = params.get_as::<Vec<TransactionId>>("prerequisite_transaction_ids") {
            for id in ids {
                if !self.is_alive(id) {
                    return Err(fail(
                        codes::PREREQUISITE_CHECK_FAILED,
                        format!("prerequisite check failed: transaction {id} is missing"),
                    )
                    .with_inner(no_such_transaction(id)));
                }
            }
        }
        if let Some(checks) = params.get_as::<Vec<RevisionCheck>>("prerequisite_revisions") {
            for check in checks {
                let actual = self.nodes.get(&check.path).map(|n| n.revision);
                if actual != Some(check.revision) {
                    return Err(fail(
                        codes::PREREQUISITE_CHECK_FAILED,
                        format!(
                            "prerequisite check failed: {} has revision {:?}, expected {}",
                            check.path, actual, check.revision
                        ),
                    ));
                }
            }
        }
        Ok(())
    }

    fn start_transaction(&mut self, params: &Params, now: Instant) -> Reply {
        let kind = match params.get_as::<String>("type").as_deref() {
            None | Some("master") => TxKind::Master,
            Some("tablet") => TxKind::Tablet,
            Some(other) => {
                return Err(fail(codes::GENERIC, format!("unknown transaction type {other:?}")));
            }
        };
        if kind == TxKind::Tablet {
            for (name, allowed) in [("atomicity", ["full", "none"]), ("durability", ["sync", "async"])] {
                if let Some(value) = params.get_as::<String>(name) {
                    if !allowed.contains(&value.as_str()) {
                        return Err(fail(codes::GENERIC, format!("invalid {name} {value:?}")));
                    }
                }
            }
        }

        let parent = params.get_as::<TransactionId>("parent_id");
        if let Some(parent) = parent {
            if kind == TxKind::Tablet {
                return Err(fail(codes::GENERIC, "tablet transactions cannot be nested"));
            }
            self.ensure_alive(parent)?;
            if flag(params, "ping_ancestor_transactions") {
                self.renew(parent, true, now);
            }
        }

        let timeout = Duration::from_millis(params.get_as::<u64>("timeout").unwrap_or(15_000));
        let id = TransactionId::new();
        self.transactions.insert(
            id,
            SimTransaction {
                id,
                parent,
                kind,
                state: TransactionState::Active,
                timeout,
                lease_expires: now + timeout,
                deadline: params.get_as("deadline"),
                attributes: params.get_as("attributes").unwrap_or_default(),
                pings: 0,
                pending: Vec::new(),
            },
        );
        debug!(transaction_id = %id, ?kind, ?parent, "transaction started");
        Ok(Response::new(json!(id)))
    }

    fn ping_transaction(&mut self, params: &Params, now: Instant) -> Reply {
        let id: TransactionId = param(params, "transaction_id")?;
        self.ensure_alive(id)?.pings += 1;
        self.renew(id, flag(params, "ping_ancestor_transactions"), now);
        Ok(Response::empty())
    }

    fn commit_transaction(&mut self, params: &Params) -> Reply {
        let id: TransactionId = param(params, "transaction_id")?;
        let pending = std::mem::take(&mut self.ensure_alive(id)?.pending);

        for child in self.subtree_of(id).into_iter().skip(1) {
            self.abort_subtree(child);
        }
        for write in pending {
            match write {
                PendingWrite::Insert { path, rows, update } => {
                    self.tables.entry(path).or_default().insert(rows, update);
                }
                PendingWrite::Delete { path, keys } => {
                    self.tables.entry(path).or_default().delete(&keys);
                }
            }
        }
        if let Some(tx) = self.transactions.get_mut(&id) {
            tx.state = TransactionState::Committed;
        }
        self.release_locks(id);
        debug!(transaction_id = %id, "transaction committed");
        Ok(Response::empty())
    }

    fn abort_transaction(&mut self, params: &Params) -> Reply {
        let id: TransactionId = param(params, "transaction_id")?;
        self.ensure_alive(id)?;
        self.abort_subtree(id);
        debug!(transaction_id = %id, "transaction aborted");
        Ok(Response::empty())
    }
}
