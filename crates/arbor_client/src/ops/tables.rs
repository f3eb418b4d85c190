//! Dynamic table row operations and tablet administration.

use super::{flag, with_path};
use crate::client::{Invoker, decode};
use crate::tablet::Atomicity;
use arbor_core::{ClientResult, Params, Verb};
use arbor_options::CallOptions;
use async_trait::async_trait;
use serde_json::Value;

/// Options for [`TabletClient::select_rows`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectRowsOptions {
    /// Fail instead of returning a truncated result when a row limit is hit
    pub fail_on_incomplete_result: bool,
    /// Maximum number of rows read
    pub input_row_limit: Option<u64>,
    /// Maximum number of rows returned
    pub output_row_limit: Option<u64>,
    /// Option groups
    pub call: CallOptions,
}

/// Options for [`TabletClient::lookup_rows`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LookupRowsOptions {
    /// Return `null` in place of each missing key instead of skipping it
    pub keep_missing_rows: bool,
    /// Option groups
    pub call: CallOptions,
}

/// Options for [`TabletClient::insert_rows`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InsertRowsOptions {
    /// Atomicity of the write, overriding the transaction's
    pub atomicity: Option<Atomicity>,
    /// Wait for a synchronous replica to acknowledge the write
    pub require_sync_replica: bool,
    /// Merge the given fields into existing rows instead of replacing them
    pub update: bool,
    /// Option groups
    pub call: CallOptions,
}

/// Options for [`TabletClient::delete_rows`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeleteRowsOptions {
    /// Wait for a synchronous replica to acknowledge the delete
    pub require_sync_replica: bool,
    /// Option groups
    pub call: CallOptions,
}

/// Row operations on dynamic tables.
///
/// Rows carrying a `key` field address a sorted table; rows without one are
/// appended to an ordered table.
#[async_trait]
pub trait TabletClient: Invoker {
    /// Run a query and return the matching rows
    async fn select_rows(&self, query: &str, options: SelectRowsOptions) -> ClientResult<Vec<Value>> {
        let mut params = Params::new();
        params.insert("query", query)?;
        flag(
            &mut params,
            "fail_on_incomplete_result",
            options.fail_on_incomplete_result,
        )?;
        if let Some(limit) = options.input_row_limit {
            params.insert("input_row_limit", limit)?;
        }
        if let Some(limit) = options.output_row_limit {
            params.insert("output_row_limit", limit)?;
        }
        let response = self
            .invoke(Verb::SelectRows, params, options.call, None)
            .await?;
        decode(Verb::SelectRows, &response)
    }

    /// Fetch the rows with the given keys
    async fn lookup_rows(
        &self,
        path: &str,
        keys: Vec<Value>,
        options: LookupRowsOptions,
    ) -> ClientResult<Vec<Value>> {
        let mut params = with_path(path)?;
        params.insert("keys", keys)?;
        flag(&mut params, "keep_missing_rows", options.keep_missing_rows)?;
        let response = self
            .invoke(Verb::LookupRows, params, options.call, None)
            .await?;
        decode(Verb::LookupRows, &response)
    }

    /// Write rows
    async fn insert_rows(
        &self,
        path: &str,
        rows: Vec<Value>,
        options: InsertRowsOptions,
    ) -> ClientResult<()> {
        let mut params = with_path(path)?;
        params.insert("rows", rows)?;
        if let Some(atomicity) = options.atomicity {
            params.insert("atomicity", atomicity)?;
        }
        flag(
            &mut params,
            "require_sync_replica",
            options.require_sync_replica,
        )?;
        flag(&mut params, "update", options.update)?;
        self.invoke(Verb::InsertRows, params, options.call, None)
            .await?;
        Ok(())
    }

    /// Delete the rows with the given keys
    async fn delete_rows(
        &self,
        path: &str,
        keys: Vec<Value>,
        options: DeleteRowsOptions,
    ) -> ClientResult<()> {
        let mut params = with_path(path)?;
        params.insert("keys", keys)?;
        flag(
            &mut params,
            "require_sync_replica",
            options.require_sync_replica,
        )?;
        self.invoke(Verb::DeleteRows, params, options.call, None)
            .await?;
        Ok(())
    }
}

/// Options for [`TableAdminClient::mount_table`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MountTableOptions {
    /// Mount in frozen state
    pub freeze: bool,
    /// Option groups
    pub call: CallOptions,
}

/// Options for [`TableAdminClient::unmount_table`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UnmountTableOptions {
    /// Skip flushing dynamic stores
    pub force: bool,
    /// Option groups
    pub call: CallOptions,
}

/// Tablet administration
#[async_trait]
pub trait TableAdminClient: Invoker {
    /// Mount the table at `path`
    async fn mount_table(&self, path: &str, options: MountTableOptions) -> ClientResult<()> {
        let mut params = with_path(path)?;
        flag(&mut params, "freeze", options.freeze)?;
        self.invoke(Verb::MountTable, params, options.call, None)
            .await?;
        Ok(())
    }

    /// Unmount the table at `path`
    async fn unmount_table(&self, path: &str, options: UnmountTableOptions) -> ClientResult<()> {
        let mut params = with_path(path)?;
        flag(&mut params, "force", options.force)?;
        self.invoke(Verb::UnmountTable, params, options.call, None)
            .await?;
        Ok(())
    }

    /// Push new settings to the mounted tablets of `path`
    async fn remount_table(&self, path: &str, options: CallOptions) -> ClientResult<()> {
        self.invoke(Verb::RemountTable, with_path(path)?, options, None)
            .await?;
        Ok(())
    }

    /// Stop accepting writes on `path`
    async fn freeze_table(&self, path: &str, options: CallOptions) -> ClientResult<()> {
        self.invoke(Verb::FreezeTable, with_path(path)?, options, None)
            .await?;
        Ok(())
    }

    /// Resume writes on `path`
    async fn unfreeze_table(&self, path: &str, options: CallOptions) -> ClientResult<()> {
        self.invoke(Verb::UnfreezeTable, with_path(path)?, options, None)
            .await?;
        Ok(())
    }
}
