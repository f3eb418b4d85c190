//! Request model shared by the option composer and the dispatcher.

use crate::error::{ClientError, ClientResult};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Remote verb
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verb {
    /// Create a namespace node
    Create,
    /// Check node existence
    Exists,
    /// Read a node
    Get,
    /// Write a node
    Set,
    /// List node children
    List,
    /// Remove a node
    Remove,
    /// Copy a node
    Copy,
    /// Move a node
    Move,
    /// Create a symlink
    Link,
    /// Take a lock
    Lock,
    /// Release a lock
    Unlock,
    /// Upload file content
    WriteFile,
    /// Download file content
    ReadFile,
    /// Query dynamic table rows
    SelectRows,
    /// Read dynamic table rows by key
    LookupRows,
    /// Upsert dynamic table rows
    InsertRows,
    /// Delete dynamic table rows
    DeleteRows,
    /// Mount tablets
    MountTable,
    /// Unmount tablets
    UnmountTable,
    /// Reapply tablet settings
    RemountTable,
    /// Freeze tablets
    FreezeTable,
    /// Unfreeze tablets
    UnfreezeTable,
    /// Start a scheduler operation
    StartOperation,
    /// Abort a scheduler operation
    AbortOperation,
    /// Read operation status
    GetOperation,
    /// Read job status
    GetJob,
    /// Start a master or tablet transaction
    StartTransaction,
    /// Renew a transaction lease
    PingTransaction,
    /// Commit a transaction
    CommitTransaction,
    /// Abort a transaction
    AbortTransaction,
}

impl Verb {
    /// Wire name of the verb
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Exists => "exists",
            Self::Get => "get",
            Self::Set => "set",
            Self::List => "list",
            Self::Remove => "remove",
            Self::Copy => "copy",
            Self::Move => "move",
            Self::Link => "link",
            Self::Lock => "lock",
            Self::Unlock => "unlock",
            Self::WriteFile => "write_file",
            Self::ReadFile => "read_file",
            Self::SelectRows => "select_rows",
            Self::LookupRows => "lookup_rows",
            Self::InsertRows => "insert_rows",
            Self::DeleteRows => "delete_rows",
            Self::MountTable => "mount_table",
            Self::UnmountTable => "unmount_table",
            Self::RemountTable => "remount_table",
            Self::FreezeTable => "freeze_table",
            Self::UnfreezeTable => "unfreeze_table",
            Self::StartOperation => "start_operation",
            Self::AbortOperation => "abort_operation",
            Self::GetOperation => "get_operation",
            Self::GetJob => "get_job",
            Self::StartTransaction => "start_transaction",
            Self::PingTransaction => "ping_transaction",
            Self::CommitTransaction => "commit_transaction",
            Self::AbortTransaction => "abort_transaction",
        }
    }
}

impl std::fmt::Display for Verb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Flattened request parameters, keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Params(BTreeMap<String, Value>);

impl Params {
    /// Create an empty parameter set
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a parameter that must not be present yet
    ///
    /// # Errors
    ///
    /// Returns error if the name is taken or the value does not serialize
    pub fn insert(&mut self, name: &str, value: impl Serialize) -> ClientResult<()> {
        if self.0.contains_key(name) {
            return Err(ClientError::Validation {
                field: name.to_string(),
                reason: "parameter supplied twice".to_string(),
            });
        }
        self.set(name, value)
    }

    /// Add or replace a parameter
    ///
    /// # Errors
    ///
    /// Returns error if the value does not serialize
    pub fn set(&mut self, name: &str, value: impl Serialize) -> ClientResult<()> {
        let value = serde_json::to_value(value).map_err(|e| ClientError::Validation {
            field: name.to_string(),
            reason: e.to_string(),
        })?;
        self.0.insert(name.to_string(), value);
        Ok(())
    }

    /// Merge parameters whose names must be disjoint from ours
    ///
    /// # Errors
    ///
    /// Returns error on the first shared name
    pub fn merge(&mut self, other: Params) -> ClientResult<()> {
        for (name, value) in other.0 {
            self.insert(&name, value)?;
        }
        Ok(())
    }

    /// Raw parameter value
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// Parameter decoded into `T`; `None` if absent or of another shape
    #[must_use]
    pub fn get_as<T: DeserializeOwned>(&self, name: &str) -> Option<T> {
        self.0
            .get(name)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Whether a parameter is present
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Remove a parameter
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.0.remove(name)
    }

    /// Number of parameters
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no parameter is set
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Parameters in name order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }
}

/// A single remote call
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    /// Verb
    pub verb: Verb,
    /// Parameters
    pub params: Params,
    /// Optional payload
    pub body: Option<Bytes>,
}

impl Request {
    /// Create a request without a body
    #[must_use]
    pub fn new(verb: Verb, params: Params) -> Self {
        Self {
            verb,
            params,
            body: None,
        }
    }

    /// Attach a payload
    #[must_use]
    pub fn with_body(mut self, body: Bytes) -> Self {
        self.body = Some(body);
        self
    }
}

/// Successful reply to a call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Response {
    /// Structured result
    pub value: Value,
    /// Optional payload
    pub body: Option<Bytes>,
}

impl Response {
    /// Create a response carrying a structured value
    #[must_use]
    pub fn new(value: Value) -> Self {
        Self { value, body: None }
    }

    /// Empty response
    #[must_use]
    pub fn empty() -> Self {
        Self::new(Value::Null)
    }

    /// Attach a payload
    #[must_use]
    pub fn with_body(mut self, body: Bytes) -> Self {
        self.body = Some(body);
        self
    }

    /// Decode the structured value
    ///
    /// # Errors
    ///
    /// Returns error if the value does not match `T`
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_verb_wire_names() {
        assert_eq!(Verb::StartTransaction.as_str(), "start_transaction");
        assert_eq!(
            serde_json::to_value(Verb::InsertRows).unwrap(),
            json!("insert_rows")
        );
        assert_eq!(Verb::Exists.to_string(), "exists");
    }

    #[test]
    fn test_params_insert_rejects_duplicates() {
        let mut params = Params::new();
        params.insert("path", "//home").unwrap();
        let err = params.insert("path", "//tmp").unwrap_err();
        assert!(err.to_string().contains("path"));
        assert_eq!(params.get("path"), Some(&json!("//home")));

        params.set("path", "//tmp").unwrap();
        assert_eq!(params.get_as::<String>("path").as_deref(), Some("//tmp"));
    }

    #[test]
    fn test_params_merge() {
        let mut left = Params::new();
        left.insert("a", 1).unwrap();
        let mut right = Params::new();
        right.insert("b", true).unwrap();
        left.merge(right).unwrap();
        assert_eq!(left.len(), 2);

        let mut clash = Params::new();
        clash.insert("a", 2).unwrap();
        assert!(left.merge(clash).is_err());
    }

    #[test]
    fn test_response_decode() {
        let response = Response::new(json!({"value": 5}));
        #[derive(Deserialize)]
        struct Out {
            value: u32,
        }
        assert_eq!(response.decode::<Out>().unwrap().value, 5);
        assert!(response.decode::<Vec<u32>>().is_err());
    }
}
