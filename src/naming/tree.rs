//! In-memory directory tree owned by the naming server.
//!
//! Nodes are owned by their parent's child map and shared as `Arc`s so a
//! path walk can hold a node across lock acquisitions; there is no parent
//! back-pointer — navigation is always root-down by path. Structural state
//! sits behind a short-lived mutex per node, never held across an await.
//! A node removed from the tree is flagged detached so a walker that raced
//! with the removal observes absence instead of stale data.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::path::Path;
use crate::proto::StorageStub;

use super::lock::QueueLock;

pub(crate) struct Node {
    pub lock: QueueLock,
    detached: AtomicBool,
    kind: Mutex<NodeKind>,
}

pub(crate) enum NodeKind {
    Directory { children: HashMap<String, Arc<Node>> },
    File { replicas: Vec<StorageStub>, reads: u32 },
}

impl Node {
    pub fn directory() -> Arc<Node> {
        Arc::new(Node {
            lock: QueueLock::new(),
            detached: AtomicBool::new(false),
            kind: Mutex::new(NodeKind::Directory { children: HashMap::new() }),
        })
    }

    pub fn file(replica: StorageStub) -> Arc<Node> {
        Arc::new(Node {
            lock: QueueLock::new(),
            detached: AtomicBool::new(false),
            kind: Mutex::new(NodeKind::File { replicas: vec![replica], reads: 0 }),
        })
    }

    pub fn is_directory(&self) -> bool {
        matches!(*self.kind(), NodeKind::Directory { .. })
    }

    pub fn is_detached(&self) -> bool {
        self.detached.load(Ordering::Acquire)
    }

    /// Runs `body` with the node's structural state held.
    pub fn with_kind<R>(&self, body: impl FnOnce(&mut NodeKind) -> R) -> R {
        body(&mut self.kind())
    }

    /// The named child, if this node is a directory that has it.
    pub fn child(&self, name: &str) -> Option<Arc<Node>> {
        match &*self.kind() {
            NodeKind::Directory { children } => children.get(name).cloned(),
            NodeKind::File { .. } => None,
        }
    }

    /// Sorted child names; `None` for a file.
    pub fn child_names(&self) -> Option<Vec<String>> {
        match &*self.kind() {
            NodeKind::Directory { children } => {
                let mut names: Vec<String> = children.keys().cloned().collect();
                names.sort();
                Some(names)
            }
            NodeKind::File { .. } => None,
        }
    }

    /// The named child, created as a directory if absent; `None` if this
    /// node is a file.
    fn child_or_directory(&self, name: &str) -> Option<Arc<Node>> {
        match &mut *self.kind() {
            NodeKind::Directory { children } => {
                Some(children.entry(name.to_owned()).or_insert_with(Node::directory).clone())
            }
            NodeKind::File { .. } => None,
        }
    }

    /// Links `node` as a child; `false` if this node is a file or the name
    /// is taken.
    pub fn add_child(&self, name: &str, node: Arc<Node>) -> bool {
        match &mut *self.kind() {
            NodeKind::Directory { children } => {
                if children.contains_key(name) {
                    false
                } else {
                    children.insert(name.to_owned(), node);
                    true
                }
            }
            NodeKind::File { .. } => false,
        }
    }

    /// Unlinks and returns the named child.
    pub fn remove_child(&self, name: &str) -> Option<Arc<Node>> {
        match &mut *self.kind() {
            NodeKind::Directory { children } => children.remove(name),
            NodeKind::File { .. } => None,
        }
    }

    fn kind(&self) -> MutexGuard<'_, NodeKind> {
        self.kind.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Flags every node of the subtree as removed from the tree.
pub(crate) fn detach(node: &Arc<Node>) {
    node.detached.store(true, Ordering::Release);
    let children: Vec<Arc<Node>> = node.with_kind(|kind| match kind {
        NodeKind::Directory { children } => children.values().cloned().collect(),
        NodeKind::File { .. } => Vec::new(),
    });
    for child in &children {
        detach(child);
    }
}

/// Distinct storage servers holding any replica at or beneath `node`.
pub(crate) fn replicas_beneath(node: &Arc<Node>) -> Vec<StorageStub> {
    let mut found = Vec::new();
    collect_replicas(node, &mut found);
    found
}

fn collect_replicas(node: &Arc<Node>, found: &mut Vec<StorageStub>) {
    let children: Vec<Arc<Node>> = node.with_kind(|kind| match kind {
        NodeKind::Directory { children } => children.values().cloned().collect(),
        NodeKind::File { replicas, .. } => {
            for replica in replicas.iter() {
                if !found.contains(replica) {
                    found.push(replica.clone());
                }
            }
            Vec::new()
        }
    });
    for child in &children {
        collect_replicas(child, found);
    }
}

pub(crate) struct Tree {
    root: Arc<Node>,
}

impl Tree {
    pub fn new() -> Self {
        Tree { root: Node::directory() }
    }

    pub fn root(&self) -> Arc<Node> {
        self.root.clone()
    }

    /// Every node from the root to `path`, inclusive.
    pub fn chain(&self, path: &Path) -> Option<Vec<Arc<Node>>> {
        let mut nodes = vec![self.root.clone()];
        for component in path.components() {
            let next = nodes.last()?.child(component)?;
            nodes.push(next);
        }
        Some(nodes)
    }

    /// Inserts a file with one replica, creating missing ancestor
    /// directories. `false` if the leaf already exists or any ancestor is a
    /// file.
    pub fn insert_file(&self, path: &Path, replica: &StorageStub) -> bool {
        let components: Vec<&str> = path.components().collect();
        let Some((leaf, ancestors)) = components.split_last() else {
            return false;
        };
        let mut current = self.root.clone();
        for component in ancestors {
            match current.child_or_directory(component) {
                Some(next) => current = next,
                None => return false,
            }
        }
        current.add_child(leaf, Node::file(replica.clone()))
    }
}
