//! Node tree, locks and files.

use crate::state::{ClusterState, Reply, fail, flag, param};
use arbor_core::{LockId, NodeId, Params, RemoteError, Response, TransactionId, codes};
use bytes::Bytes;
use serde_json::{Map, Value, json};

pub(crate) const ROOT: &str = "//";

const NODE_TYPES: &[&str] = &["map_node", "table", "file", "document", "string_node"];

#[derive(Debug, Clone)]
pub(crate) struct Node {
    pub(crate) id: NodeId,
    pub(crate) node_type: String,
    pub(crate) value: Value,
    pub(crate) attributes: Map<String, Value>,
    pub(crate) revision: u64,
    pub(crate) content: Vec<u8>,
}

impl Node {
    pub(crate) fn new(node_type: &str, attributes: Map<String, Value>, revision: u64) -> Self {
        Self {
            id: NodeId::new(),
            node_type: node_type.to_string(),
            value: Value::Null,
            attributes,
            revision,
            content: Vec::new(),
        }
    }

    pub(crate) fn is_map(&self) -> bool {
        self.node_type == "map_node"
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct LockRecord {
    pub(crate) id: LockId,
    pub(crate) path: String,
    pub(crate) transaction: TransactionId,
    pub(crate) mode: String,
    pub(crate) child_key: Option<String>,
    pub(crate) attribute_key: Option<String>,
    pub(crate) pending: bool,
}

impl LockRecord {
    fn conflicts_with(&self, other: &LockRecord) -> bool {
        if self.transaction == other.transaction || self.path != other.path {
            return false;
        }
        match (self.mode.as_str(), other.mode.as_str()) {
            ("snapshot", _) | (_, "snapshot") => false,
            ("exclusive", _) | (_, "exclusive") => true,
            _ => {
                let same_child = self.child_key.is_some() && self.child_key == other.child_key;
                let same_attribute =
                    self.attribute_key.is_some() && self.attribute_key == other.attribute_key;
                same_child || same_attribute
            }
        }
    }
}

/// Parent of `path`; `None` for the root
pub(crate) fn parent_path(path: &str) -> Option<&str> {
    if path == ROOT {
        return None;
    }
    let (head, _) = path.rsplit_once('/')?;
    Some(if head == "/" { ROOT } else { head })
}

fn validate_path(path: &str) -> Result<(), RemoteError> {
    let valid = path == ROOT
        || (path.starts_with(ROOT)
            && !path.ends_with('/')
            && path[ROOT.len()..].split('/').all(|part| !part.is_empty()));
    if valid {
        Ok(())
    } else {
        Err(fail(codes::RESOLVE_ERROR, format!("malformed path {path:?}")))
    }
}

fn resolve_error(path: &str) -> RemoteError {
    fail(codes::RESOLVE_ERROR, format!("node {path} has no such child"))
        .with_attribute("path", json!(path))
}

fn subtree_prefix(path: &str) -> String {
    if path == ROOT {
        ROOT.to_string()
    } else {
        format!("{path}/")
    }
}

impl ClusterState {
    fn path_param(params: &Params, name: &str) -> Result<String, RemoteError> {
        let path: String = param(params, name)?;
        validate_path(&path)?;
        Ok(path)
    }

    fn node(&self, path: &str) -> Result<&Node, RemoteError> {
        self.nodes.get(path).ok_or_else(|| resolve_error(path))
    }

    /// Bump the revision of `path` and of its parent
    fn touch(&mut self, path: &str) {
        self.revision += 1;
        let revision = self.revision;
        if let Some(node) = self.nodes.get_mut(path) {
            node.revision = revision;
        }
        if let Some(parent) = parent_path(path) {
            if let Some(node) = self.nodes.get_mut(parent) {
                node.revision = revision;
            }
        }
    }

    /// Paths of the subtree rooted at `path`, root first
    fn subtree(&self, path: &str) -> Vec<String> {
        let prefix = subtree_prefix(path);
        let mut out = vec![path.to_string()];
        out.extend(
            self.nodes
                .range(prefix.clone()..)
                .take_while(|(p, _)| p.starts_with(&prefix))
                .filter(|(p, _)| p.as_str() != path)
                .map(|(p, _)| p.clone()),
        );
        out
    }

    fn children(&self, path: &str) -> Vec<String> {
        let prefix = subtree_prefix(path);
        self.subtree(path)
            .into_iter()
            .skip(1)
            .filter(|p| !p[prefix.len()..].contains('/'))
            .map(|p| p[prefix.len()..].to_string())
            .collect()
    }

    fn ensure_parent(&mut self, path: &str, recursive: bool) -> Result<(), RemoteError> {
        let Some(parent) = parent_path(path) else {
            return Ok(());
        };
        match self.nodes.get(parent).map(Node::is_map) {
            Some(true) => Ok(()),
            Some(false) => Err(fail(codes::GENERIC, format!("{parent} is not a map node"))),
            None if recursive => {
                let parent = parent.to_string();
                self.ensure_parent(&parent, true)?;
                self.nodes
                    .insert(parent.clone(), Node::new("map_node", Map::new(), 0));
                self.touch(&parent);
                Ok(())
            }
            None => Err(resolve_error(parent)),
        }
    }

    fn drop_subtree(&mut self, path: &str) {
        for p in self.subtree(path) {
            self.nodes.remove(&p);
            self.tables.remove(&p);
            self.locks.retain(|l| l.path != p);
        }
    }

    pub(crate) fn create(&mut self, params: &Params) -> Reply {
        let path = Self::path_param(params, "path")?;
        let node_type: String = param(params, "type")?;
        if !NODE_TYPES.contains(&node_type.as_str()) {
            return Err(fail(codes::GENERIC, format!("unknown node type {node_type:?}")));
        }

        let existing = self.nodes.get(&path).map(|n| (n.id, n.node_type.clone()));
        if let Some((existing_id, existing_type)) = existing {
            if flag(params, "ignore_existing") && existing_type == node_type {
                return Ok(Response::new(json!(existing_id)));
            }
            if !flag(params, "force") || path == ROOT {
                return Err(fail(codes::ALREADY_EXISTS, format!("node {path} already exists")));
            }
            self.drop_subtree(&path);
        }
        self.ensure_parent(&path, flag(params, "recursive"))?;

        let mut attributes: Map<String, Value> = params.get_as("attributes").unwrap_or_default();
        if node_type == "table" {
            attributes
                .entry("tablet_state")
                .or_insert_with(|| json!("unmounted"));
        }
        let node = Node::new(&node_type, attributes, 0);
        let id = node.id;
        self.nodes.insert(path.clone(), node);
        self.touch(&path);
        Ok(Response::new(json!(id)))
    }

    pub(crate) fn exists(&self, params: &Params) -> Reply {
        let path = Self::path_param(params, "path")?;
        Ok(Response::new(json!(self.nodes.contains_key(&path))))
    }

    fn render(&self, path: &str) -> Value {
        match self.nodes.get(path) {
            Some(node) if node.is_map() => {
                let prefix = subtree_prefix(path);
                let children = self
                    .children(path)
                    .into_iter()
                    .map(|name| {
                        let value = self.render(&format!("{prefix}{name}"));
                        (name, value)
                    })
                    .collect();
                Value::Object(children)
            }
            Some(node) => node.value.clone(),
            None => Value::Null,
        }
    }

    pub(crate) fn get(&self, params: &Params) -> Reply {
        let path = Self::path_param(params, "path")?;
        self.node(&path)?;
        Ok(Response::new(self.render(&path)))
    }

    pub(crate) fn set(&mut self, params: &Params, body: Option<&Bytes>) -> Reply {
        let path = Self::path_param(params, "path")?;
        let body = body.ok_or_else(|| fail(codes::GENERIC, "set requires a value"))?;
        let value: Value = serde_json::from_slice(body)
            .map_err(|e| fail(codes::GENERIC, format!("malformed value: {e}")))?;

        match self.nodes.get_mut(&path) {
            Some(node) if node.is_map() => {
                return Err(fail(codes::GENERIC, format!("cannot set map node {path}")));
            }
            Some(node) => node.value = value,
            None => {
                self.ensure_parent(&path, flag(params, "recursive"))?;
                let mut node = Node::new("document", Map::new(), 0);
                node.value = value;
                self.nodes.insert(path.clone(), node);
            }
        }
        self.touch(&path);
        Ok(Response::empty())
    }

    pub(crate) fn list(&self, params: &Params) -> Reply {
        let path = Self::path_param(params, "path")?;
        if !self.node(&path)?.is_map() {
            return Err(fail(codes::GENERIC, format!("{path} is not a map node")));
        }
        let mut children = self.children(&path);
        if let Some(max) = params.get_as::<usize>("max_size") {
            children.truncate(max);
        }
        Ok(Response::new(json!(children)))
    }

    pub(crate) fn remove(&mut self, params: &Params) -> Reply {
        let path = Self::path_param(params, "path")?;
        if path == ROOT {
            return Err(fail(codes::GENERIC, "cannot remove the root"));
        }
        if !self.nodes.contains_key(&path) {
            return if flag(params, "force") {
                Ok(Response::empty())
            } else {
                Err(resolve_error(&path))
            };
        }
        if !self.children(&path).is_empty() && !flag(params, "recursive") {
            return Err(fail(
                codes::GENERIC,
                format!("cannot remove non-empty {path} without recursive"),
            ));
        }
        self.drop_subtree(&path);
        self.touch(&path);
        Ok(Response::empty())
    }

    pub(crate) fn transfer(&mut self, params: &Params, is_move: bool) -> Reply {
        let source = Self::path_param(params, "source_path")?;
        let destination = Self::path_param(params, "destination_path")?;
        self.node(&source)?;
        if source == ROOT
            || destination == source
            || destination.starts_with(&subtree_prefix(&source))
        {
            return Err(fail(
                codes::GENERIC,
                format!("cannot transfer {source} into {destination}"),
            ));
        }
        if self.nodes.contains_key(&destination) {
            if !flag(params, "force") {
                return Err(fail(
                    codes::ALREADY_EXISTS,
                    format!("node {destination} already exists"),
                ));
            }
            self.drop_subtree(&destination);
        }
        self.ensure_parent(&destination, flag(params, "recursive"))?;

        let moved: Vec<(String, Node, Option<crate::tables::TableRows>)> = self
            .subtree(&source)
            .into_iter()
            .filter_map(|p| {
                let node = self.nodes.get(&p)?.clone();
                let rows = self.tables.get(&p).cloned();
                let suffix = p[source.len()..].to_string();
                Some((format!("{destination}{suffix}"), node, rows))
            })
            .collect();
        if is_move {
            self.drop_subtree(&source);
            self.touch(&source);
        }
        for (path, mut node, rows) in moved {
            if !is_move {
                node.id = NodeId::new();
            }
            self.nodes.insert(path.clone(), node);
            if let Some(rows) = rows {
                self.tables.insert(path, rows);
            }
        }
        self.touch(&destination);
        let id = self.node(&destination)?.id;
        Ok(Response::new(json!(id)))
    }

    pub(crate) fn link(&mut self, params: &Params) -> Reply {
        let target = Self::path_param(params, "target_path")?;
        let link = Self::path_param(params, "link_path")?;
        let existing = self.nodes.get(&link).map(|n| (n.id, n.node_type == "link"));
        if let Some((existing_id, is_link)) = existing {
            if flag(params, "ignore_existing") && is_link {
                return Ok(Response::new(json!(existing_id)));
            }
            if !flag(params, "force") {
                return Err(fail(codes::ALREADY_EXISTS, format!("node {link} already exists")));
            }
            self.drop_subtree(&link);
        }
        self.ensure_parent(&link, flag(params, "recursive"))?;

        let mut attributes = Map::new();
        attributes.insert("target_path".to_string(), json!(target));
        let node = Node::new("link", attributes, 0);
        let id = node.id;
        self.nodes.insert(link.clone(), node);
        self.touch(&link);
        Ok(Response::new(json!(id)))
    }

    pub(crate) fn lock(&mut self, params: &Params, tx: Option<TransactionId>) -> Reply {
        let tx = tx.ok_or_else(|| fail(codes::GENERIC, "lock requires a transaction"))?;
        let path = Self::path_param(params, "path")?;
        let node_id = self.node(&path)?.id;
        let mode: String = params
            .get_as("mode")
            .unwrap_or_else(|| "exclusive".to_string());
        if !["snapshot", "shared", "exclusive"].contains(&mode.as_str()) {
            return Err(fail(codes::GENERIC, format!("unknown lock mode {mode:?}")));
        }

        let mut record = LockRecord {
            id: LockId::new(),
            path,
            transaction: tx,
            mode,
            child_key: params.get_as("child_key"),
            attribute_key: params.get_as("attribute_key"),
            pending: false,
        };
        if let Some(winner) = self
            .locks
            .iter()
            .find(|held| !held.pending && held.conflicts_with(&record))
        {
            if !flag(params, "waitable") {
                return Err(fail(
                    codes::CONCURRENT_TRANSACTION_LOCK_CONFLICT,
                    format!("cannot take {} lock on {}", record.mode, record.path),
                )
                .with_attribute("winner_transaction", json!(winner.transaction)));
            }
            record.pending = true;
        }
        let lock_id = record.id;
        self.locks.push(record);
        Ok(Response::new(json!({ "node_id": node_id, "lock_id": lock_id })))
    }

    pub(crate) fn unlock(&mut self, params: &Params, tx: Option<TransactionId>) -> Reply {
        let tx = tx.ok_or_else(|| fail(codes::GENERIC, "unlock requires a transaction"))?;
        let path = Self::path_param(params, "path")?;
        self.node(&path)?;
        self.locks.retain(|l| !(l.transaction == tx && l.path == path));
        self.promote_pending_locks();
        Ok(Response::empty())
    }

    pub(crate) fn release_locks(&mut self, tx: TransactionId) {
        let before = self.locks.len();
        self.locks.retain(|l| l.transaction != tx);
        if self.locks.len() != before {
            self.promote_pending_locks();
        }
    }

    fn promote_pending_locks(&mut self) {
        for i in 0..self.locks.len() {
            if !self.locks[i].pending {
                continue;
            }
            let blocked = self
                .locks
                .iter()
                .any(|held| !held.pending && held.conflicts_with(&self.locks[i]));
            if !blocked {
                self.locks[i].pending = false;
            }
        }
    }

    pub(crate) fn write_file(&mut self, params: &Params, body: Option<&Bytes>) -> Reply {
        let path = Self::path_param(params, "path")?;
        let node = self
            .nodes
            .get_mut(&path)
            .ok_or_else(|| resolve_error(&path))?;
        if node.node_type != "file" {
            return Err(fail(codes::GENERIC, format!("{path} is not a file")));
        }
        let data = body.map(|b| b.as_ref()).unwrap_or_default();
        if !flag(params, "append") {
            node.content.clear();
        }
        node.content.extend_from_slice(data);
        self.touch(&path);
        Ok(Response::empty())
    }

    pub(crate) fn read_file(&self, params: &Params) -> Reply {
        let path = Self::path_param(params, "path")?;
        let node = self.node(&path)?;
        if node.node_type != "file" {
            return Err(fail(codes::GENERIC, format!("{path} is not a file")));
        }
        let len = node.content.len();
        let offset = params.get_as::<usize>("offset").unwrap_or(0).min(len);
        let end = params
            .get_as::<usize>("length")
            .map_or(len, |l| offset.saturating_add(l).min(len));
        Ok(Response::empty().with_body(Bytes::copy_from_slice(&node.content[offset..end])))
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

    #[test]
    fn test_parent_path() {
        assert_eq!(parent_path("//"), None);
        assert_eq!(parent_path("//a"), Some("//"));
        assert_eq!(parent_path("//a/b"), Some("//a"));
        assert!(validate_path("//a//b").is_err());
        assert!(validate_path("/a").is_err());
        assert!(validate_path("//a/").is_err());
    }

    #[tokio::test]
    async fn test_create_list_remove() {
        let mut state = ClusterState::new();
        let err = call(&mut state, Verb::Create, json!({"path": "//a/b", "type": "map_node"}))
            .unwrap_err();
        assert_eq!(err.code, codes::RESOLVE_ERROR);

        call(
            &mut state,
            Verb::Create,
            json!({"path": "//a/b", "type": "map_node", "recursive": true}),
        )
        .unwrap();
        call(&mut state, Verb::Create, json!({"path": "//a/c", "type": "document"})).unwrap();

        let listed = call(&mut state, Verb::List, json!({"path": "//a"})).unwrap();
        assert_eq!(listed.value, json!(["b", "c"]));

        let err = call(&mut state, Verb::Create, json!({"path": "//a/c", "type": "document"}))
            .unwrap_err();
        assert_eq!(err.code, codes::ALREADY_EXISTS);

        let err = call(&mut state, Verb::Remove, json!({"path": "//a"})).unwrap_err();
        assert_eq!(err.code, codes::GENERIC);
        call(&mut state, Verb::Remove, json!({"path": "//a", "recursive": true})).unwrap();
        assert!(!state.nodes.contains_key("//a/b"));
    }

    #[tokio::test]
    async fn test_revision_changes_on_write() {
        let mut state = ClusterState::new();
        call(&mut state, Verb::Create, json!({"path": "//doc", "type": "document"})).unwrap();
        let before = state.nodes["//doc"].revision;
        state
            .handle(
                &Request::new(Verb::Set, {
                    let mut p = Params::new();
                    p.insert("path", "//doc").unwrap();
                    p
                })
                .with_body(Bytes::from_static(b"{\"x\": 1}")),
                Instant::now(),
            )
            .unwrap();
        assert!(state.nodes["//doc"].revision > before);
        assert_eq!(state.render("//doc"), json!({"x": 1}));
        assert_eq!(state.render("//"), json!({"doc": {"x": 1}}));
    }

    #[tokio::test]
    async fn test_move_keeps_id_copy_does_not() {
        let mut state = ClusterState::new();
        let created = call(
            &mut state,
            Verb::Create,
            json!({"path": "//src/leaf", "type": "document", "recursive": true}),
        )
        .unwrap();
        let leaf: NodeId = created.decode().unwrap();

        call(&mut state, Verb::Copy, json!({"source_path": "//src", "destination_path": "//copy"}))
            .unwrap();
        assert_ne!(state.nodes["//copy/leaf"].id, leaf);

        call(&mut state, Verb::Move, json!({"source_path": "//src", "destination_path": "//moved"}))
            .unwrap();
        assert_eq!(state.nodes["//moved/leaf"].id, leaf);
        assert!(!state.nodes.contains_key("//src"));
    }

    #[tokio::test]
    async fn test_file_append_and_ranges() {
        let mut state = ClusterState::new();
        call(&mut state, Verb::Create, json!({"path": "//f", "type": "file"})).unwrap();
        let write = |append: bool, data: &'static [u8]| {
            let mut params = Params::new();
            params.insert("path", "//f").unwrap();
            params.insert("append", append).unwrap();
            Request::new(Verb::WriteFile, params).with_body(Bytes::from_static(data))
        };
        state.handle(&write(false, b"hello"), Instant::now()).unwrap();
        state.handle(&write(true, b" world"), Instant::now()).unwrap();

        let read = call(&mut state, Verb::ReadFile, json!({"path": "//f", "offset": 6, "length": 3}))
            .unwrap();
        assert_eq!(read.body, Some(Bytes::from_static(b"wor")));
    }
}
