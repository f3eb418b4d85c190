//! Typed operations.
//!
//! Every trait here is blanket-implemented for the handles that may issue
//! it: tablet operations for any [`Invoker`], master operations for
//! [`MasterInvoker`] handles only. Each operation builds its required
//! parameters, forwards the caller's [`CallOptions`](arbor_options::CallOptions)
//! untouched and decodes the response.

pub mod cypress;
pub mod files;
pub mod scheduler;
pub mod tables;

pub use cypress::{
    CopyNodeOptions, CreateNodeOptions, CypressClient, LinkNodeOptions, ListNodeOptions,
    LockClient, LockMode, LockNodeOptions, LockResult, NodeType, RemoveNodeOptions,
};
pub use files::{FileClient, ReadFileOptions, WriteFileOptions};
pub use scheduler::{
    AbortOperationOptions, JobState, JobStatus, OperationState, OperationStatus, OperationType,
    SchedulerClient,
};
pub use tables::{
    DeleteRowsOptions, InsertRowsOptions, LookupRowsOptions, MountTableOptions,
    SelectRowsOptions, TableAdminClient, TabletClient, UnmountTableOptions,
};

use crate::client::{Invoker, MasterInvoker};
use arbor_core::{ClientResult, Params};

fn with_path(path: &str) -> ClientResult<Params> {
    let mut params = Params::new();
    params.insert("path", path)?;
    Ok(params)
}

/// Insert `name=true` only when `flag` is set
fn flag(params: &mut Params, name: &str, flag: bool) -> ClientResult<()> {
    if flag {
        params.insert(name, true)?;
    }
    Ok(())
}

impl<T: MasterInvoker> CypressClient for T {}
impl<T: MasterInvoker> LockClient for T {}
impl<T: MasterInvoker> FileClient for T {}
impl<T: MasterInvoker> TableAdminClient for T {}
impl<T: MasterInvoker> SchedulerClient for T {}
impl<T: Invoker> TabletClient for T {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Client;
    use crate::tablet::Atomicity;
    use crate::transaction::{CommitTxOptions, StartTxOptions};
    use arbor_core::{ClientConfig, ErrorKind, codes};
    use arbor_options::CallOptions;
    use arbor_sim::SimCluster;
    use bytes::Bytes;
    use serde_json::{Value, json};
    use std::sync::Arc;

    fn setup() -> (Arc<SimCluster>, Client) {
        let cluster = Arc::new(SimCluster::new());
        let client = Client::new(cluster.clone(), ClientConfig::new()).unwrap();
        (cluster, client)
    }

    #[tokio::test]
    async fn test_node_tree() {
        let (_cluster, client) = setup();
        let recursive = CreateNodeOptions {
            recursive: true,
            ..Default::default()
        };
        client
            .create_node("//home/a", NodeType::MapNode, recursive)
            .await
            .unwrap();
        client
            .set_node("//home/a/doc", json!({"n": 1}), CallOptions::default())
            .await
            .unwrap();
        assert_eq!(
            client.get_node("//home/a/doc", CallOptions::default()).await.unwrap(),
            json!({"n": 1})
        );
        assert_eq!(
            client.list_node("//home/a", ListNodeOptions::default()).await.unwrap(),
            vec!["doc".to_string()]
        );

        let moved = client
            .move_node("//home/a/doc", "//home/b", CopyNodeOptions::default())
            .await
            .unwrap();
        let linked = client
            .link_node("//home/b", "//home/l", LinkNodeOptions::default())
            .await
            .unwrap();
        assert_ne!(moved, linked);
        assert!(!client.node_exists("//home/a/doc", CallOptions::default()).await.unwrap());

        client
            .copy_node("//home/b", "//home/c", CopyNodeOptions::default())
            .await
            .unwrap();
        client
            .remove_node("//home/b", RemoveNodeOptions::default())
            .await
            .unwrap();
        assert!(client.node_exists("//home/c", CallOptions::default()).await.unwrap());
        assert!(!client.node_exists("//home/b", CallOptions::default()).await.unwrap());
    }

    #[tokio::test]
    async fn test_create_existing_node() {
        let (_cluster, client) = setup();
        let first = client
            .create_node("//n", NodeType::StringNode, CreateNodeOptions::default())
            .await
            .unwrap();
        let err = client
            .create_node("//n", NodeType::StringNode, CreateNodeOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Permanent);
        assert!(err.remote().is_some_and(|e| e.contains_code(codes::ALREADY_EXISTS)));

        let ignore = CreateNodeOptions {
            ignore_existing: true,
            ..Default::default()
        };
        let again = client
            .create_node("//n", NodeType::StringNode, ignore)
            .await
            .unwrap();
        assert_eq!(first, again);
    }

    #[tokio::test]
    async fn test_lock_conflict_and_release() {
        let (cluster, client) = setup();
        client
            .create_node("//locked", NodeType::MapNode, CreateNodeOptions::default())
            .await
            .unwrap();
        let holder = client.begin_tx(StartTxOptions::new()).await.unwrap();
        let other = client.begin_tx(StartTxOptions::new()).await.unwrap();

        holder
            .lock_node("//locked", LockMode::Exclusive, LockNodeOptions::default())
            .await
            .unwrap();
        let err = other
            .lock_node("//locked", LockMode::Exclusive, LockNodeOptions::default())
            .await
            .unwrap_err();
        assert!(
            err.remote()
                .is_some_and(|e| e.contains_code(codes::CONCURRENT_TRANSACTION_LOCK_CONFLICT))
        );

        let waitable = LockNodeOptions {
            waitable: true,
            ..Default::default()
        };
        other
            .lock_node("//locked", LockMode::Exclusive, waitable)
            .await
            .unwrap();
        assert_eq!(cluster.locks_held(other.id()).await, 0);

        holder.commit(CommitTxOptions::default()).await.unwrap();
        assert_eq!(cluster.locks_held(holder.id()).await, 0);
        assert_eq!(cluster.locks_held(other.id()).await, 1);

        other
            .unlock_node("//locked", CallOptions::default())
            .await
            .unwrap();
        assert_eq!(cluster.locks_held(other.id()).await, 0);
        other.abort().await.unwrap();
    }

    #[tokio::test]
    async fn test_file_content() {
        let (_cluster, client) = setup();
        client
            .create_node("//f", NodeType::File, CreateNodeOptions::default())
            .await
            .unwrap();
        client
            .write_file("//f", Bytes::from_static(b"hello"), WriteFileOptions::default())
            .await
            .unwrap();
        let append = WriteFileOptions {
            append: true,
            ..Default::default()
        };
        client
            .write_file("//f", Bytes::from_static(b" world"), append)
            .await
            .unwrap();

        let all = client.read_file("//f", ReadFileOptions::default()).await.unwrap();
        assert_eq!(all, Bytes::from_static(b"hello world"));
        let range = ReadFileOptions {
            offset: Some(6),
            length: Some(3),
            ..Default::default()
        };
        let part = client.read_file("//f", range).await.unwrap();
        assert_eq!(part, Bytes::from_static(b"wor"));
    }

    #[tokio::test]
    async fn test_table_rows_and_mount_state() {
        let (_cluster, client) = setup();
        client
            .create_node("//t", NodeType::Table, CreateNodeOptions::default())
            .await
            .unwrap();
        let err = client
            .insert_rows("//t", vec![json!({"key": 1})], InsertRowsOptions::default())
            .await
            .unwrap_err();
        assert!(err.remote().is_some_and(|e| e.contains_code(codes::TABLET_NOT_MOUNTED)));

        client
            .mount_table("//t", MountTableOptions::default())
            .await
            .unwrap();
        client
            .insert_rows(
                "//t",
                vec![json!({"key": 1, "v": "a"}), json!({"key": 2, "v": "b"})],
                InsertRowsOptions::default(),
            )
            .await
            .unwrap();
        client
            .delete_rows("//t", vec![json!(2)], DeleteRowsOptions::default())
            .await
            .unwrap();
        let found = client
            .lookup_rows("//t", vec![json!(1), json!(2)], LookupRowsOptions::default())
            .await
            .unwrap();
        assert_eq!(found, vec![json!({"key": 1, "v": "a"})]);

        client.freeze_table("//t", CallOptions::default()).await.unwrap();
        assert!(
            client
                .insert_rows("//t", vec![json!({"key": 3})], InsertRowsOptions::default())
                .await
                .is_err()
        );
        let selected = client
            .select_rows("* from [//t]", SelectRowsOptions::default())
            .await
            .unwrap();
        assert_eq!(selected.len(), 1);

        client.unfreeze_table("//t", CallOptions::default()).await.unwrap();
        client.remount_table("//t", CallOptions::default()).await.unwrap();
        client
            .unmount_table("//t", UnmountTableOptions::default())
            .await
            .unwrap();
        assert!(
            client
                .select_rows("* from [//t]", SelectRowsOptions::default())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_row_call_options() {
        let (_cluster, client) = setup();
        client
            .create_node("//rows", NodeType::Table, CreateNodeOptions::default())
            .await
            .unwrap();
        client
            .mount_table("//rows", MountTableOptions::default())
            .await
            .unwrap();
        let rows = (0..4).map(|k| json!({"key": k, "a": k, "b": 0})).collect();
        client
            .insert_rows("//rows", rows, InsertRowsOptions::default())
            .await
            .unwrap();

        let update = InsertRowsOptions {
            atomicity: Some(Atomicity::Relaxed),
            require_sync_replica: true,
            update: true,
            ..Default::default()
        };
        client
            .insert_rows("//rows", vec![json!({"key": 1, "b": 7})], update)
            .await
            .unwrap();
        let keep_missing = LookupRowsOptions {
            keep_missing_rows: true,
            ..Default::default()
        };
        let found = client
            .lookup_rows("//rows", vec![json!(1), json!(9)], keep_missing)
            .await
            .unwrap();
        assert_eq!(found, vec![json!({"key": 1, "a": 1, "b": 7}), Value::Null]);

        let limited = SelectRowsOptions {
            output_row_limit: Some(2),
            ..Default::default()
        };
        let selected = client.select_rows("* from [//rows]", limited).await.unwrap();
        assert_eq!(selected.len(), 2);

        let strict = SelectRowsOptions {
            fail_on_incomplete_result: true,
            input_row_limit: Some(3),
            ..Default::default()
        };
        let err = client.select_rows("* from [//rows]", strict).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Permanent);

        let delete = DeleteRowsOptions {
            require_sync_replica: true,
            ..Default::default()
        };
        client
            .delete_rows("//rows", vec![json!(0)], delete)
            .await
            .unwrap();
        let all = client
            .select_rows("* from [//rows]", SelectRowsOptions::default())
            .await
            .unwrap();
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn test_operation_lifecycle() {
        let (cluster, client) = setup();
        let id = client
            .start_operation(OperationType::Map, json!({"job_count": 2}), CallOptions::default())
            .await
            .unwrap();
        let status = client.get_operation(id, CallOptions::default()).await.unwrap();
        assert_eq!(status.operation_type, OperationType::Map);
        assert_eq!(status.state, OperationState::Running);
        assert_eq!(status.jobs.len(), 2);

        assert!(cluster.complete_operation(id).await);
        let job = client
            .get_job(id, status.jobs[0], CallOptions::default())
            .await
            .unwrap();
        assert_eq!(job.state, JobState::Completed);

        let err = client
            .abort_operation(id, AbortOperationOptions::default())
            .await
            .unwrap_err();
        assert!(err.remote().is_some_and(|e| e.contains_code(codes::INVALID_OPERATION_STATE)));
    }

    #[tokio::test]
    async fn test_operation_ends_with_its_transaction() {
        let (_cluster, client) = setup();
        let tx = client.begin_tx(StartTxOptions::new()).await.unwrap();
        let id = tx
            .start_operation(OperationType::Vanilla, json!({}), CallOptions::default())
            .await
            .unwrap();
        tx.abort().await.unwrap();

        let status = client.get_operation(id, CallOptions::default()).await.unwrap();
        assert_eq!(status.state, OperationState::Aborted);
        assert!(status.state.is_finished());
        assert!(
            status
                .error
                .is_some_and(|e| e.contains_code(codes::NO_SUCH_TRANSACTION))
        );
    }
}
