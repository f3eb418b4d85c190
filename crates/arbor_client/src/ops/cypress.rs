//! Cypress node and lock operations.

use super::{flag, with_path};
use crate::client::{Invoker, decode};
use arbor_core::{ClientResult, LockId, NodeId, Params, Verb};
use arbor_options::CallOptions;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Node types the client can create
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    /// Directory
    MapNode,
    /// Table
    Table,
    /// File
    File,
    /// Structured document
    Document,
    /// Scalar string
    StringNode,
}

/// Options for [`CypressClient::create_node`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CreateNodeOptions {
    /// Create missing ancestors
    pub recursive: bool,
    /// Succeed if the node already exists with the same type
    pub ignore_existing: bool,
    /// Replace an existing node
    pub force: bool,
    /// Initial attributes
    pub attributes: Map<String, Value>,
    /// Option groups
    pub call: CallOptions,
}

/// Options for [`CypressClient::remove_node`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemoveNodeOptions {
    /// Remove a non-empty subtree
    pub recursive: bool,
    /// Succeed if the node does not exist
    pub force: bool,
    /// Option groups
    pub call: CallOptions,
}

/// Options for [`CypressClient::list_node`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListNodeOptions {
    /// Maximum number of children returned
    pub max_size: Option<u64>,
    /// Option groups
    pub call: CallOptions,
}

/// Options for [`CypressClient::copy_node`] and [`CypressClient::move_node`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CopyNodeOptions {
    /// Create missing ancestors of the destination
    pub recursive: bool,
    /// Replace an existing destination
    pub force: bool,
    /// Keep the source's account on the copy
    pub preserve_account: bool,
    /// Option groups
    pub call: CallOptions,
}

/// Options for [`CypressClient::link_node`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinkNodeOptions {
    /// Create missing ancestors of the link
    pub recursive: bool,
    /// Succeed if the link already exists
    pub ignore_existing: bool,
    /// Replace an existing node at the link path
    pub force: bool,
    /// Option groups
    pub call: CallOptions,
}

/// Node operations
#[async_trait]
pub trait CypressClient: Invoker {
    /// Create a node at `path`
    async fn create_node(
        &self,
        path: &str,
        node_type: NodeType,
        options: CreateNodeOptions,
    ) -> ClientResult<NodeId> {
        let mut params = with_path(path)?;
        params.insert("type", node_type)?;
        flag(&mut params, "recursive", options.recursive)?;
        flag(&mut params, "ignore_existing", options.ignore_existing)?;
        flag(&mut params, "force", options.force)?;
        if !options.attributes.is_empty() {
            params.insert("attributes", &options.attributes)?;
        }
        let response = self.invoke(Verb::Create, params, options.call, None).await?;
        decode(Verb::Create, &response)
    }

    /// Whether a node exists at `path`
    async fn node_exists(&self, path: &str, options: CallOptions) -> ClientResult<bool> {
        let response = self.invoke(Verb::Exists, with_path(path)?, options, None).await?;
        decode(Verb::Exists, &response)
    }

    /// Read the node at `path`
    async fn get_node(&self, path: &str, options: CallOptions) -> ClientResult<Value> {
        let response = self.invoke(Verb::Get, with_path(path)?, options, None).await?;
        Ok(response.value)
    }

    /// Replace the value of the node at `path`
    async fn set_node(&self, path: &str, value: Value, options: CallOptions) -> ClientResult<()> {
        let body = Bytes::from(value.to_string());
        self.invoke(Verb::Set, with_path(path)?, options, Some(body))
            .await?;
        Ok(())
    }

    /// Names of the children of `path`
    async fn list_node(&self, path: &str, options: ListNodeOptions) -> ClientResult<Vec<String>> {
        let mut params = with_path(path)?;
        if let Some(max_size) = options.max_size {
            params.insert("max_size", max_size)?;
        }
        let response = self.invoke(Verb::List, params, options.call, None).await?;
        decode(Verb::List, &response)
    }

    /// Remove the node at `path`
    async fn remove_node(&self, path: &str, options: RemoveNodeOptions) -> ClientResult<()> {
        let mut params = with_path(path)?;
        flag(&mut params, "recursive", options.recursive)?;
        flag(&mut params, "force", options.force)?;
        self.invoke(Verb::Remove, params, options.call, None).await?;
        Ok(())
    }

    /// Copy `source` to `destination`
    async fn copy_node(
        &self,
        source: &str,
        destination: &str,
        options: CopyNodeOptions,
    ) -> ClientResult<NodeId> {
        let params = transfer_params(source, destination, &options)?;
        let response = self.invoke(Verb::Copy, params, options.call, None).await?;
        decode(Verb::Copy, &response)
    }

    /// Move `source` to `destination`
    async fn move_node(
        &self,
        source: &str,
        destination: &str,
        options: CopyNodeOptions,
    ) -> ClientResult<NodeId> {
        let params = transfer_params(source, destination, &options)?;
        let response = self.invoke(Verb::Move, params, options.call, None).await?;
        decode(Verb::Move, &response)
    }

    /// Create a symbolic link at `link` pointing to `target`
    async fn link_node(
        &self,
        target: &str,
        link: &str,
        options: LinkNodeOptions,
    ) -> ClientResult<NodeId> {
        let mut params = Params::new();
        params.insert("target_path", target)?;
        params.insert("link_path", link)?;
        flag(&mut params, "recursive", options.recursive)?;
        flag(&mut params, "ignore_existing", options.ignore_existing)?;
        flag(&mut params, "force", options.force)?;
        let response = self.invoke(Verb::Link, params, options.call, None).await?;
        decode(Verb::Link, &response)
    }
}

fn transfer_params(source: &str, destination: &str, options: &CopyNodeOptions) -> ClientResult<Params> {
    let mut params = Params::new();
    params.insert("source_path", source)?;
    params.insert("destination_path", destination)?;
    flag(&mut params, "recursive", options.recursive)?;
    flag(&mut params, "force", options.force)?;
    flag(&mut params, "preserve_account", options.preserve_account)?;
    Ok(params)
}

/// Lock modes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockMode {
    /// Read a consistent snapshot
    Snapshot,
    /// Shared with other shared locks on distinct keys
    Shared,
    /// Sole writer
    #[default]
    Exclusive,
}

/// Options for [`LockClient::lock_node`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LockNodeOptions {
    /// Queue behind conflicting locks instead of failing
    pub waitable: bool,
    /// Restrict a shared lock to one child key
    pub child_key: Option<String>,
    /// Restrict a shared lock to one attribute key
    pub attribute_key: Option<String>,
    /// Option groups
    pub call: CallOptions,
}

/// Acquired lock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockResult {
    /// Locked node
    pub node_id: NodeId,
    /// Lock
    pub lock_id: LockId,
}

/// Lock operations; locks belong to the transaction the call runs under
#[async_trait]
pub trait LockClient: Invoker {
    /// Lock the node at `path`
    async fn lock_node(
        &self,
        path: &str,
        mode: LockMode,
        options: LockNodeOptions,
    ) -> ClientResult<LockResult> {
        let mut params = with_path(path)?;
        params.insert("mode", mode)?;
        flag(&mut params, "waitable", options.waitable)?;
        if let Some(key) = &options.child_key {
            params.insert("child_key", key)?;
        }
        if let Some(key) = &options.attribute_key {
            params.insert("attribute_key", key)?;
        }
        let response = self.invoke(Verb::Lock, params, options.call, None).await?;
        decode(Verb::Lock, &response)
    }

    /// Release the locks the transaction holds on `path`
    async fn unlock_node(&self, path: &str, options: CallOptions) -> ClientResult<()> {
        self.invoke(Verb::Unlock, with_path(path)?, options, None)
            .await?;
        Ok(())
    }
}
