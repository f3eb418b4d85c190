//! Scheduler operations and their jobs.
//!
//! Operations never progress on their own: they stay `running` until the
//! harness completes them, a user aborts them, or the transaction they were
//! started under ends without committing.

use crate::state::{ClusterState, Reply, fail, param};
use arbor_core::{JobId, OperationId, Params, RemoteError, Response, TransactionId, codes};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::debug;

/// Operation as the scheduler sees it
#[derive(Debug, Clone, Serialize)]
pub struct SimOperation {
    /// Id
    pub id: OperationId,
    /// Operation type as sent by the client
    #[serde(rename = "type")]
    pub operation_type: String,
    /// `running`, `completed`, `failed` or `aborted`
    pub state: String,
    /// Jobs started for the operation
    pub jobs: Vec<JobId>,
    /// Transaction the operation was started under
    #[serde(skip)]
    pub transaction: Option<TransactionId>,
    /// Abort reason
    pub error: Option<RemoteError>,
    /// Spec given at start
    #[serde(skip)]
    pub spec: Value,
}

impl SimOperation {
    fn is_running(&self) -> bool {
        self.state == "running"
    }
}

/// Job of an operation
#[derive(Debug, Clone, Serialize)]
pub struct SimJob {
    /// Id
    pub id: JobId,
    /// Owning operation
    #[serde(rename = "operation_id")]
    pub operation: OperationId,
    /// Job state
    pub state: String,
}

fn no_such_operation(id: OperationId) -> RemoteError {
    fail(codes::NO_SUCH_OPERATION, format!("no such operation {id}"))
        .with_attribute("operation_id", json!(id))
}

impl ClusterState {
    pub(crate) fn start_operation(&mut self, params: &Params, tx: Option<TransactionId>) -> Reply {
        let operation_type: String = param(params, "operation_type")?;
        let spec: Value = params.get_as("spec").unwrap_or(Value::Null);
        let job_count = spec.get("job_count").and_then(Value::as_u64).unwrap_or(1);

        let id = OperationId::new();
        let jobs: Vec<JobId> = (0..job_count).map(|_| JobId::new()).collect();
        for job in &jobs {
            self.jobs.insert(
                *job,
                SimJob {
                    id: *job,
                    operation: id,
                    state: "running".to_string(),
                },
            );
        }
        self.operations.insert(
            id,
            SimOperation {
                id,
                operation_type,
                state: "running".to_string(),
                jobs,
                transaction: tx,
                error: None,
                spec,
            },
        );
        debug!(operation_id = %id, transaction_id = ?tx, "operation started");
        Ok(Response::new(json!(id)))
    }

    fn finish_operation(&mut self, id: OperationId, state: &str, error: Option<RemoteError>) {
        let Some(operation) = self.operations.get_mut(&id) else {
            return;
        };
        operation.state = state.to_string();
        operation.error = error;
        for job in &operation.jobs {
            if let Some(job) = self.jobs.get_mut(job) {
                job.state = state.to_string();
            }
        }
    }

    pub(crate) fn abort_operation(&mut self, params: &Params) -> Reply {
        let id: OperationId = param(params, "operation_id")?;
        let operation = self.operations.get(&id).ok_or_else(|| no_such_operation(id))?;
        if !operation.is_running() {
            return Err(fail(
                codes::INVALID_OPERATION_STATE,
                format!("operation {id} is already {}", operation.state),
            ));
        }
        let message = params
            .get_as::<String>("abort_message")
            .unwrap_or_else(|| "aborted by user request".to_string());
        self.finish_operation(id, "aborted", Some(fail(codes::GENERIC, message)));
        Ok(Response::empty())
    }

    pub(crate) fn get_operation(&self, params: &Params) -> Reply {
        let id: OperationId = param(params, "operation_id")?;
        let operation = self.operations.get(&id).ok_or_else(|| no_such_operation(id))?;
        Ok(Response::new(json!(operation)))
    }

    pub(crate) fn get_job(&self, params: &Params) -> Reply {
        let operation_id: OperationId = param(params, "operation_id")?;
        let id: JobId = param(params, "job_id")?;
        match self.jobs.get(&id) {
            Some(job) if job.operation == operation_id => Ok(Response::new(json!({
                "id": job.id,
                "operation_id": job.operation,
                "state": job.state,
                "error": Value::Null,
            }))),
            _ => Err(fail(codes::NO_SUCH_JOB, format!("no such job {id}"))
                .with_attribute("operation_id", json!(operation_id))),
        }
    }

    /// Abort running operations started under `tx`
    pub(crate) fn abort_operations_of(&mut self, tx: TransactionId) {
        let owned: Vec<OperationId> = self
            .operations
            .values()
            .filter(|op| op.transaction == Some(tx) && op.is_running())
            .map(|op| op.id)
            .collect();
        for id in owned {
            debug!(operation_id = %id, transaction_id = %tx, "operation aborted with its transaction");
            self.finish_operation(
                id,
                "aborted",
                Some(fail(
                    codes::NO_SUCH_TRANSACTION,
                    format!("transaction {tx} of the operation ended"),
                )),
            );
        }
    }

    /// Mark a running operation and its jobs completed
    pub(crate) fn complete_operation(&mut self, id: OperationId) -> bool {
        let running = self.operations.get(&id).is_some_and(SimOperation::is_running);
        if running {
            self.finish_operation(id, "completed", None);
        }
        running
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_core::{Request, Verb};
    use tokio::time::Instant;

    fn call(state: &mut ClusterState, verb: Verb, fields: Value) -> Reply {
        let mut params = Params::new();
        if let Value::Object(map) = fields {
            for (name, value) in map {
                params.insert(&name, value).unwrap();
            }
        }
        state.handle(&Request::new(verb, params), Instant::now())
    }

    #[tokio::test]
    async fn test_operation_lifecycle() {
        let mut state = ClusterState::new();
        let id: OperationId = call(
            &mut state,
            Verb::StartOperation,
            json!({"operation_type": "map", "spec": {"job_count": 2}}),
        )
        .unwrap()
        .decode()
        .unwrap();

        let snapshot = call(&mut state, Verb::GetOperation, json!({"operation_id": id})).unwrap();
        assert_eq!(snapshot.value["state"], "running");
        assert_eq!(snapshot.value["type"], "map");
        let jobs = snapshot.value["jobs"].as_array().unwrap().clone();
        assert_eq!(jobs.len(), 2);

        call(&mut state, Verb::AbortOperation, json!({"operation_id": id, "abort_message": "stop"}))
            .unwrap();
        let err = call(&mut state, Verb::AbortOperation, json!({"operation_id": id})).unwrap_err();
        assert_eq!(err.code, codes::INVALID_OPERATION_STATE);

        let job = call(
            &mut state,
            Verb::GetJob,
            json!({"operation_id": id, "job_id": jobs[0]}),
        )
        .unwrap();
        assert_eq!(job.value["state"], "aborted");
    }

    #[tokio::test]
    async fn test_unknown_operation() {
        let mut state = ClusterState::new();
        let err = call(
            &mut state,
            Verb::GetOperation,
            json!({"operation_id": OperationId::new()}),
        )
        .unwrap_err();
        assert_eq!(err.code, codes::NO_SUCH_OPERATION);
        assert!(!state.complete_operation(OperationId::new()));
    }
}
