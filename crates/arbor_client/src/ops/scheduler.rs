//! Scheduler operations.

use crate::client::{Invoker, decode};
use arbor_core::{ClientResult, JobId, OperationId, Params, RemoteError, Verb};
use arbor_options::CallOptions;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Operation types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    /// Map
    Map,
    /// Reduce
    Reduce,
    /// Map followed by reduce
    MapReduce,
    /// Sort
    Sort,
    /// Merge
    Merge,
    /// Erase
    Erase,
    /// Copy between clusters
    RemoteCopy,
    /// User-defined tasks
    Vanilla,
}

/// Operation states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationState {
    /// Jobs are running
    Running,
    /// Finished successfully
    Completed,
    /// Finished with an error
    Failed,
    /// Aborted by a user or by its transaction
    Aborted,
}

impl OperationState {
    /// Whether the operation has finished
    #[must_use]
    pub const fn is_finished(self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// Operation snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationStatus {
    /// Operation id
    pub id: OperationId,
    /// Operation type
    #[serde(rename = "type")]
    pub operation_type: OperationType,
    /// State
    pub state: OperationState,
    /// Jobs started for the operation
    #[serde(default)]
    pub jobs: Vec<JobId>,
    /// Failure or abort reason
    #[serde(default)]
    pub error: Option<RemoteError>,
}

/// Job states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Running
    Running,
    /// Finished successfully
    Completed,
    /// Finished with an error
    Failed,
    /// Aborted
    Aborted,
}

/// Job snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    /// Job id
    pub id: JobId,
    /// Owning operation
    pub operation_id: OperationId,
    /// State
    pub state: JobState,
    /// Failure reason
    #[serde(default)]
    pub error: Option<RemoteError>,
}

/// Options for [`SchedulerClient::abort_operation`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AbortOperationOptions {
    /// Reason recorded on the operation
    pub message: Option<String>,
    /// Option groups
    pub call: CallOptions,
}

/// Scheduler operations
#[async_trait]
pub trait SchedulerClient: Invoker {
    /// Start an operation described by `spec`
    async fn start_operation(
        &self,
        operation_type: OperationType,
        spec: Value,
        options: CallOptions,
    ) -> ClientResult<OperationId> {
        let mut params = Params::new();
        params.insert("operation_type", operation_type)?;
        params.insert("spec", spec)?;
        let response = self
            .invoke(Verb::StartOperation, params, options, None)
            .await?;
        decode(Verb::StartOperation, &response)
    }

    /// Abort a running operation
    async fn abort_operation(
        &self,
        id: OperationId,
        options: AbortOperationOptions,
    ) -> ClientResult<()> {
        let mut params = Params::new();
        params.insert("operation_id", id)?;
        if let Some(message) = &options.message {
            params.insert("abort_message", message)?;
        }
        self.invoke(Verb::AbortOperation, params, options.call, None)
            .await?;
        Ok(())
    }

    /// Fetch an operation snapshot
    async fn get_operation(
        &self,
        id: OperationId,
        options: CallOptions,
    ) -> ClientResult<OperationStatus> {
        let mut params = Params::new();
        params.insert("operation_id", id)?;
        let response = self
            .invoke(Verb::GetOperation, params, options, None)
            .await?;
        decode(Verb::GetOperation, &response)
    }

    /// Fetch a job snapshot
    async fn get_job(
        &self,
        operation_id: OperationId,
        job_id: JobId,
        options: CallOptions,
    ) -> ClientResult<JobStatus> {
        let mut params = Params::new();
        params.insert("operation_id", operation_id)?;
        params.insert("job_id", job_id)?;
        let response = self.invoke(Verb::GetJob, params, options, None).await?;
        decode(Verb::GetJob, &response)
    }
}
