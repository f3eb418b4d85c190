//! Scenarios run by the CLI.

use arbor_client::ops::{
    CreateNodeOptions, CypressClient, InsertRowsOptions, LockClient, LockMode, LockNodeOptions,
    MountTableOptions, NodeType, TableAdminClient, TabletClient,
};
use arbor_client::{
    CallOptions, Client, CommitTxOptions, Scope, StartTabletTxOptions, StartTxOptions,
};
use arbor_core::{ClientConfig, ErrorKind, Verb};
use arbor_sim::{FailureModel, Fault, SimCluster};
use color_eyre::Result;
use color_eyre::eyre::bail;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

/// Nested transactions under one scope: the child commits, a sibling is
/// left open, then the scope is cancelled
pub(crate) async fn demo(config: ClientConfig) -> Result<()> {
    let cluster = Arc::new(SimCluster::new());
    let client = Client::new(cluster.clone(), config)?;

    let scope = Scope::new();
    let root = client
        .begin_tx(StartTxOptions::new().with_title("demo").with_scope(scope.clone()))
        .await?;
    root.create_node("//home", NodeType::MapNode, CreateNodeOptions::default())
        .await?;

    let writer = root
        .begin_tx(StartTxOptions::new().with_ping_ancestors())
        .await?;
    let lock = writer
        .lock_node("//home", LockMode::Exclusive, LockNodeOptions::default())
        .await?;
    writer
        .create_node("//home/report", NodeType::Document, CreateNodeOptions::default())
        .await?;
    writer
        .set_node("//home/report", json!({"rows": 3}), CallOptions::new())
        .await?;
    writer.commit(CommitTxOptions::default()).await?;
    info!(lock_id = %lock.lock_id, "writer committed");

    let idle = root.begin_tx(StartTxOptions::new()).await?;
    scope.cancel();

    for (name, tx) in [("root", &root), ("writer", &writer), ("idle", &idle)] {
        let state = tx.wait().await;
        let remote = cluster.transaction(tx.id()).await.map(|t| t.state);
        println!("{name:<8} {}  local={state}  remote={remote:?}", tx.id());
    }
    println!("calls: {}", cluster.journal().await.len());
    Ok(())
}

/// One row per tablet transaction, with faults on writes and commits.
///
/// A commit that exhausted its retries has an unknown outcome. Fails if the
/// table holds fewer rows than were committed, or more than committed plus
/// unknown.
pub(crate) async fn chaos(
    config: ClientConfig,
    seed: u64,
    probability: f64,
    rows: usize,
) -> Result<()> {
    if !(0.0..=1.0).contains(&probability) {
        bail!("probability must be within [0, 1], got {probability}");
    }
    let model = FailureModel::new(seed, probability)
        .with_kinds(vec![
            Fault::reset_before(),
            Fault::reset_after(),
            Fault::unavailable(),
        ])
        .with_verbs(vec![Verb::InsertRows, Verb::CommitTransaction]);
    let cluster = Arc::new(SimCluster::with_failure_model(model));
    let client = Client::new(cluster.clone(), config)?;

    let table = "//chaos";
    client
        .create_node(table, NodeType::Table, CreateNodeOptions::default())
        .await?;
    client.mount_table(table, MountTableOptions::default()).await?;

    let mut committed = 0usize;
    let mut unknown = 0usize;
    let mut failed = 0usize;
    for i in 0..rows {
        let tx = client.begin_tablet_tx(StartTabletTxOptions::new()).await?;
        let insert = tx
            .insert_rows(table, vec![json!({"seq": i})], InsertRowsOptions::default())
            .await;
        let outcome = match insert {
            Ok(()) => tx.commit().await.map_err(|err| (true, err)),
            Err(err) => Err((false, err)),
        };
        match outcome {
            Ok(()) => committed += 1,
            Err((at_commit, err)) => {
                warn!(row = i, error = %err, "row not written");
                let maybe_applied = at_commit
                    && matches!(err.kind(), ErrorKind::Transient | ErrorKind::Deadline);
                if maybe_applied {
                    unknown += 1;
                } else {
                    failed += 1;
                }
                if let Err(err) = tx.abort().await {
                    warn!(row = i, error = %err, "abort failed");
                }
            }
        }
    }

    client.stop().await;
    let stored = cluster.rows(table).await.len();
    let journal = cluster.journal().await;
    let retries = journal.entries().iter().filter(|e| e.retry).count();
    println!(
        "rows: committed={committed} unknown={unknown} failed={failed} stored={stored} \
         retries={retries} faults={}",
        cluster.random_faults_injected()
    );
    if stored < committed || stored > committed + unknown {
        bail!("table holds {stored} rows, {committed} were committed and {unknown} are unknown");
    }
    Ok(())
}
