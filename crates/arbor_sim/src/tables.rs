//! Dynamic tables: mount state and rows.

use crate::state::{ClusterState, PendingWrite, Reply, fail, flag, param};
use arbor_core::{Params, RemoteError, Response, TransactionId, codes};
use serde_json::{Value, json};
use std::collections::BTreeMap;

/// Rows of one table. Rows with a `key` field are upserted by key; rows
/// without one are appended in order.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct TableRows {
    keyed: BTreeMap<String, Value>,
    ordered: Vec<Value>,
}

fn key_of(value: &Value) -> String {
    value.to_string()
}

impl TableRows {
    pub(crate) fn rows(&self) -> Vec<Value> {
        self.keyed
            .values()
            .chain(self.ordered.iter())
            .cloned()
            .collect()
    }

    /// Write `rows`; with `update`, fields of a keyed row are merged into
    /// the stored row instead of replacing it
    pub(crate) fn insert(&mut self, rows: Vec<Value>, update: bool) {
        for row in rows {
            let Some(key) = row.get("key").map(key_of) else {
                self.ordered.push(row);
                continue;
            };
            let stored = self.keyed.entry(key).or_insert(Value::Null);
            match (stored, row) {
                (Value::Object(stored), Value::Object(fields)) if update => stored.extend(fields),
                (stored, row) => *stored = row,
            }
        }
    }

    pub(crate) fn delete(&mut self, keys: &[Value]) {
        for key in keys {
            self.keyed.remove(&key_of(key));
        }
    }

    fn lookup(&self, keys: &[Value], keep_missing: bool) -> Vec<Value> {
        keys.iter()
            .filter_map(|key| match self.keyed.get(&key_of(key)) {
                Some(row) => Some(row.clone()),
                None => keep_missing.then_some(Value::Null),
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TabletState {
    Unmounted,
    Mounted,
    Frozen,
}

impl TabletState {
    fn parse(value: Option<&Value>) -> Self {
        match value.and_then(Value::as_str) {
            Some("mounted") => Self::Mounted,
            Some("frozen") => Self::Frozen,
            _ => Self::Unmounted,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Unmounted => "unmounted",
            Self::Mounted => "mounted",
            Self::Frozen => "frozen",
        }
    }
}

fn not_mounted(path: &str, state: TabletState) -> RemoteError {
    fail(
        codes::TABLET_NOT_MOUNTED,
        format!("table {path} is {}", state.as_str()),
    )
    .with_attribute("path", json!(path))
}

/// Table path named in a query of the form `* from [//path] ...`
fn query_path(query: &str) -> Option<&str> {
    let start = query.find('[')? + 1;
    let end = start + query[start..].find(']')?;
    Some(query[start..end].trim())
}

impl ClusterState {
    fn tablet_state(&self, path: &str) -> Result<TabletState, RemoteError> {
        let node = self.nodes.get(path).ok_or_else(|| {
            fail(codes::RESOLVE_ERROR, format!("node {path} has no such child"))
        })?;
        if node.node_type != "table" {
            return Err(fail(codes::GENERIC, format!("{path} is not a table")));
        }
        Ok(TabletState::parse(node.attributes.get("tablet_state")))
    }

    fn set_tablet_state(&mut self, path: &str, state: TabletState) {
        if let Some(node) = self.nodes.get_mut(path) {
            node.attributes
                .insert("tablet_state".to_string(), json!(state.as_str()));
        }
    }

    fn check_tablet_range(&self, path: &str, params: &Params) -> Result<(), RemoteError> {
        let count = self
            .nodes
            .get(path)
            .and_then(|n| n.attributes.get("tablet_count"))
            .and_then(Value::as_u64)
            .unwrap_or(1);
        for name in ["first_tablet_index", "last_tablet_index"] {
            if let Some(index) = params.get_as::<u64>(name) {
                if index >= count {
                    return Err(fail(
                        codes::GENERIC,
                        format!("{name} {index} is out of range for {count} tablets"),
                    ));
                }
            }
        }
        Ok(())
    }

    fn writable(&self, path: &str) -> Result<(), RemoteError> {
        match self.tablet_state(path)? {
            TabletState::Mounted => Ok(()),
            state => Err(not_mounted(path, state)),
        }
    }

    fn readable(&self, path: &str) -> Result<(), RemoteError> {
        match self.tablet_state(path)? {
            TabletState::Unmounted => Err(not_mounted(path, TabletState::Unmounted)),
            _ => Ok(()),
        }
    }

    /// Write buffer of the transaction a row write runs under
    fn row_writes(
        &mut self,
        tx: Option<TransactionId>,
    ) -> Result<Option<&mut Vec<PendingWrite>>, RemoteError> {
        let Some(id) = tx else {
            return Ok(None);
        };
        Ok(Some(&mut self.ensure_alive(id)?.pending))
    }

    pub(crate) fn insert_rows(&mut self, params: &Params, tx: Option<TransactionId>) -> Reply {
        let path: String = param(params, "path")?;
        let rows: Vec<Value> = param(params, "rows")?;
        let update = flag(params, "update");
        if let Some(atomicity) = params.get_as::<String>("atomicity") {
            if !["full", "none"].contains(&atomicity.as_str()) {
                return Err(fail(codes::GENERIC, format!("invalid atomicity {atomicity:?}")));
            }
        }
        self.writable(&path)?;
        match self.row_writes(tx)? {
            Some(pending) => pending.push(PendingWrite::Insert { path, rows, update }),
            None => self.tables.entry(path).or_default().insert(rows, update),
        }
        Ok(Response::empty())
    }

    pub(crate) fn delete_rows(&mut self, params: &Params, tx: Option<TransactionId>) -> Reply {
        let path: String = param(params, "path")?;
        let keys: Vec<Value> = param(params, "keys")?;
        self.writable(&path)?;
        match self.row_writes(tx)? {
            Some(pending) => pending.push(PendingWrite::Delete { path, keys }),
            None => self.tables.entry(path).or_default().delete(&keys),
        }
        Ok(Response::empty())
    }

    pub(crate) fn lookup_rows(&self, params: &Params) -> Reply {
        let path: String = param(params, "path")?;
        let keys: Vec<Value> = param(params, "keys")?;
        self.readable(&path)?;
        let keep_missing = flag(params, "keep_missing_rows");
        let rows = match self.tables.get(&path) {
            Some(table) => table.lookup(&keys, keep_missing),
            None if keep_missing => vec![Value::Null; keys.len()],
            None => Vec::new(),
        };
        Ok(Response::new(json!(rows)))
    }

    pub(crate) fn select_rows(&self, params: &Params) -> Reply {
        let query: String = param(params, "query")?;
        let path = query_path(&query)
            .ok_or_else(|| fail(codes::GENERIC, format!("malformed query {query:?}")))?;
        self.readable(path)?;
        let mut rows = self
            .tables
            .get(path)
            .map(TableRows::rows)
            .unwrap_or_default();
        let fail_on_incomplete = flag(params, "fail_on_incomplete_result");
        for name in ["input_row_limit", "output_row_limit"] {
            let Some(limit) = params.get_as::<usize>(name) else {
                continue;
            };
            if rows.len() > limit {
                if fail_on_incomplete {
                    return Err(fail(
                        codes::GENERIC,
                        format!("query result is incomplete: {name} {limit} exceeded"),
                    )
                    .with_attribute("path", json!(path)));
                }
                rows.truncate(limit);
            }
        }
        Ok(Response::new(json!(rows)))
    }

    pub(crate) fn mount_table(&mut self, params: &Params) -> Reply {
        let path: String = param(params, "path")?;
        self.tablet_state(&path)?;
        self.check_tablet_range(&path, params)?;
        let state = if flag(params, "freeze") {
            TabletState::Frozen
        } else {
            TabletState::Mounted
        };
        self.set_tablet_state(&path, state);
        Ok(Response::empty())
    }

    pub(crate) fn unmount_table(&mut self, params: &Params) -> Reply {
        let path: String = param(params, "path")?;
        self.tablet_state(&path)?;
        self.check_tablet_range(&path, params)?;
        self.set_tablet_state(&path, TabletState::Unmounted);
        Ok(Response::empty())
    }

    pub(crate) fn remount_table(&mut self, params: &Params) -> Reply {
        let path: String = param(params, "path")?;
        self.readable(&path)?;
        self.check_tablet_range(&path, params)?;
        Ok(Response::empty())
    }

    pub(crate) fn freeze_table(&mut self, params: &Params) -> Reply {
        let path: String = param(params, "path")?;
        self.readable(&path)?;
        self.check_tablet_range(&path, params)?;
        self.set_tablet_state(&path, TabletState::Frozen);
        Ok(Response::empty())
    }

    pub(crate) fn unfreeze_table(&mut self, params: &Params) -> Reply {
        let path: String = param(params, "path")?;
        self.readable(&path)?;
        self.check_tablet_range(&path, params)?;
        self.set_tablet_state(&path, TabletState::Mounted);
        Ok(Response::empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_path() {
        assert_eq!(query_path("* from [//home/t]"), Some("//home/t"));
        assert_eq!(query_path("key, value from [ //t ] where key = 1"), Some("//t"));
        assert_eq!(query_path("* from //t"), None);
    }

    #[test]
    fn test_keyed_and_ordered_rows() {
        let mut table = TableRows::default();
        table.insert(vec![json!({"key": 1, "v": "a"}), json!({"v": "x"})], false);
        table.insert(vec![json!({"key": 1, "v": "b"}), json!({"v": "x"})], false);
        assert_eq!(table.rows().len(), 3);
        assert_eq!(
            table.lookup(&[json!(1), json!(2)], false),
            vec![json!({"key": 1, "v": "b"})]
        );
        assert_eq!(
            table.lookup(&[json!(2), json!(1)], true),
            vec![Value::Null, json!({"key": 1, "v": "b"})]
        );

        table.delete(&[json!(1)]);
        assert_eq!(table.rows(), vec![json!({"v": "x"}), json!({"v": "x"})]);
    }

    #[test]
    fn test_update_merges_fields() {
        let mut table = TableRows::default();
        table.insert(vec![json!({"key": 1, "a": 1, "b": 1})], false);
        table.insert(vec![json!({"key": 1, "b": 2})], true);
        assert_eq!(table.rows(), vec![json!({"key": 1, "a": 1, "b": 2})]);

        table.insert(vec![json!({"key": 1, "c": 3})], false);
        assert_eq!(table.rows(), vec![json!({"key": 1, "c": 3})]);

        table.insert(vec![json!({"key": 2, "d": 4})], true);
        assert_eq!(table.rows().len(), 2);
    }

    proptest::proptest! {
        #[test]
        fn prop_keyed_insert_is_idempotent(keys in proptest::collection::vec(0u32..16, 0..32)) {
            let rows: Vec<Value> = keys.iter().map(|k| json!({"key": k, "v": k * 2})).collect();
            let mut once = TableRows::default();
            once.insert(rows.clone(), false);
            let mut twice = once.clone();
            twice.insert(rows, false);
            proptest::prop_assert_eq!(once, twice);
        }
    }
}
