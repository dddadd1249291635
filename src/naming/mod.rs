//! The naming server: the directory tree, the per-node lock manager and the
//! replication/invalidation policy, served over two skeletons.
//!
//! Every public operation locks the path it touches: each ancestor is taken
//! shared root-first, then the target in the requested mode, and release
//! walks the exact reverse. The globally consistent prefix order makes
//! concurrent multi-path lockers deadlock-free, and a held descendant pins
//! every ancestor directory against deletion.

mod lock;
mod tree;

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use rand::seq::SliceRandom;
use rand::Rng;
use tracing::{debug, info, warn};

use crate::path::Path;
use crate::proto::dispatch::{RegistrationDispatch, ServiceDispatch};
use crate::proto::{
    Command, CommandStub, Registration, Service, ServiceError, StorageStub,
};
use crate::rmi::{RmiError, Skeleton};

use tree::{Node, NodeKind, Tree};

/// Well-known port of the client-facing service interface.
pub const SERVICE_PORT: u16 = 6000;
/// Well-known port of the storage-facing registration interface.
pub const REGISTRATION_PORT: u16 = 6001;
/// Shared acquisitions of a file node between replication attempts.
pub const REPLICATION_THRESHOLD: u32 = 20;

struct NamingState {
    tree: Tree,
    /// Reverse registration index: a storage server's client stub to the
    /// command stub the naming server drives it with.
    servers: DashMap<StorageStub, CommandStub>,
}

/// Locks held along one path, released in reverse acquisition order on drop.
struct PathGuard {
    held: Vec<Arc<Node>>,
}

impl PathGuard {
    fn target(&self) -> &Arc<Node> {
        // lock_path always holds at least the root
        &self.held[self.held.len() - 1]
    }

    fn parent(&self) -> Option<&Arc<Node>> {
        self.held.len().checked_sub(2).map(|index| &self.held[index])
    }

    /// Leaves the locks held; the state lives in the nodes and a later
    /// unlock walk releases them.
    fn forget(mut self) {
        self.held.clear();
    }
}

impl Drop for PathGuard {
    fn drop(&mut self) {
        for node in self.held.drain(..).rev() {
            node.lock.release();
        }
    }
}

impl NamingState {
    fn new() -> Self {
        NamingState { tree: Tree::new(), servers: DashMap::new() }
    }

    /// Acquires shared locks on every ancestor of `path` root-first, then
    /// `path` itself in the requested mode, running the replication or
    /// invalidation policy on a file target.
    async fn lock_path(&self, path: &Path, exclusive: bool) -> Result<PathGuard, ServiceError> {
        let components: Vec<&str> = path.components().collect();
        let mut guard = PathGuard { held: Vec::with_capacity(components.len() + 1) };
        let mut current = self.tree.root();
        let mut remaining = components.as_slice();
        loop {
            let target = remaining.is_empty();
            current.lock.acquire(target && exclusive).await;
            guard.held.push(current.clone());
            if current.is_detached() {
                return Err(ServiceError::NotFound(path.to_string()));
            }
            if target {
                break;
            }
            let (component, rest) = match remaining.split_first() {
                Some(split) => split,
                None => break,
            };
            match current.child(component) {
                Some(next) => {
                    current = next;
                    remaining = rest;
                }
                None => return Err(ServiceError::NotFound(path.to_string())),
            }
        }
        if !current.is_directory() {
            if exclusive {
                self.invalidate(path, &current).await;
            } else {
                self.count_read(path, &current).await;
            }
        }
        Ok(guard)
    }

    /// Read-driven replication: bump the file's read counter and, at the
    /// threshold, copy it onto one storage server that lacks a replica.
    async fn count_read(&self, path: &Path, node: &Arc<Node>) {
        let replicas = node.with_kind(|kind| match kind {
            NodeKind::File { replicas, reads } => {
                *reads += 1;
                if *reads >= REPLICATION_THRESHOLD {
                    *reads = 0;
                    Some(replicas.clone())
                } else {
                    None
                }
            }
            NodeKind::Directory { .. } => None,
        });
        let Some(replicas) = replicas else { return };

        let chosen = {
            let candidates: Vec<(StorageStub, CommandStub)> = self
                .servers
                .iter()
                .filter(|entry| !replicas.contains(entry.key()))
                .map(|entry| (entry.key().clone(), entry.value().clone()))
                .collect();
            let mut rng = rand::thread_rng();
            match (candidates.choose(&mut rng), replicas.choose(&mut rng)) {
                (Some(candidate), Some(source)) => Some((candidate.clone(), source.clone())),
                _ => None,
            }
        };
        let Some(((storage, command), source)) = chosen else { return };

        debug!(%path, target = %storage, %source, "replicating hot file");
        match command.copy(path, source).await {
            Ok(true) => node.with_kind(|kind| {
                if let NodeKind::File { replicas, .. } = kind {
                    if !replicas.contains(&storage) {
                        replicas.push(storage);
                    }
                }
            }),
            Ok(false) => warn!(%path, target = %storage, "replica copy refused"),
            Err(error) => warn!(%path, target = %storage, %error, "replica copy failed"),
        }
    }

    /// Write-driven invalidation: keep one replica, delete the file on every
    /// other storage server, reset the read counter.
    async fn invalidate(&self, path: &Path, node: &Arc<Node>) {
        let losers = node.with_kind(|kind| match kind {
            NodeKind::File { replicas, reads } => {
                *reads = 0;
                if replicas.len() > 1 {
                    let keep = rand::thread_rng().gen_range(0..replicas.len());
                    let kept = replicas.swap_remove(keep);
                    std::mem::replace(replicas, vec![kept])
                } else {
                    Vec::new()
                }
            }
            NodeKind::Directory { .. } => Vec::new(),
        });
        for loser in losers {
            let command = self.servers.get(&loser).map(|entry| entry.value().clone());
            let Some(command) = command else { continue };
            debug!(%path, replica = %loser, "invalidating stale replica");
            match command.delete(path).await {
                Ok(_) => {}
                Err(error) => warn!(%path, replica = %loser, %error, "replica delete failed"),
            }
        }
    }

    /// A uniformly chosen registered storage server, as (client, command)
    /// stubs.
    fn pick_server(&self) -> Option<(StorageStub, CommandStub)> {
        let servers: Vec<(StorageStub, CommandStub)> = self
            .servers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        let mut rng = rand::thread_rng();
        servers.choose(&mut rng).cloned()
    }
}

#[async_trait]
impl Service for NamingState {
    async fn is_directory(&self, path: &Path) -> Result<bool, ServiceError> {
        let guard = self.lock_path(path, false).await?;
        Ok(guard.target().is_directory())
    }

    async fn list(&self, directory: &Path) -> Result<Vec<String>, ServiceError> {
        let guard = self.lock_path(directory, false).await?;
        guard
            .target()
            .child_names()
            .ok_or_else(|| ServiceError::NotFound(format!("{directory} is not a directory")))
    }

    async fn create_file(&self, path: &Path) -> Result<bool, ServiceError> {
        if path.is_root() {
            return Ok(false);
        }
        let parent = parent_of(path)?;
        let name = leaf_of(path)?;
        let guard = self.lock_path(&parent, true).await?;
        let parent_node = guard.target();
        if !parent_node.is_directory() {
            return Err(ServiceError::NotFound(format!("{parent} is not a directory")));
        }
        if parent_node.child(&name).is_some() {
            return Ok(false);
        }
        let (storage, command) = self.pick_server().ok_or_else(|| {
            ServiceError::IllegalState("no storage servers registered".into())
        })?;
        match command.create(path).await {
            // The storage-side result is advisory: a leftover file there is
            // overwritten by the next write or cleaned by a later delete.
            Ok(_) => {}
            Err(crate::proto::StorageError::Rmi(error)) => {
                return Err(ServiceError::Rmi(error));
            }
            Err(error) => {
                warn!(%path, %storage, %error, "storage create failed");
                return Ok(false);
            }
        }
        Ok(parent_node.add_child(&name, Node::file(storage)))
    }

    async fn create_directory(&self, path: &Path) -> Result<bool, ServiceError> {
        if path.is_root() {
            return Ok(false);
        }
        let parent = parent_of(path)?;
        let name = leaf_of(path)?;
        let guard = self.lock_path(&parent, true).await?;
        let parent_node = guard.target();
        if !parent_node.is_directory() {
            return Err(ServiceError::NotFound(format!("{parent} is not a directory")));
        }
        Ok(parent_node.add_child(&name, Node::directory()))
    }

    async fn delete(&self, path: &Path) -> Result<bool, ServiceError> {
        if path.is_root() {
            return Ok(false);
        }
        let name = leaf_of(path)?;
        let guard = self.lock_path(path, true).await?;
        let target = guard.target().clone();

        for storage in tree::replicas_beneath(&target) {
            let command = self.servers.get(&storage).map(|entry| entry.value().clone());
            let Some(command) = command else { continue };
            match command.delete(path).await {
                Ok(true) => {}
                Ok(false) => warn!(%path, replica = %storage, "storage had nothing to delete"),
                Err(error) => warn!(%path, replica = %storage, %error, "storage delete failed"),
            }
        }

        if let Some(parent_node) = guard.parent() {
            parent_node.remove_child(&name);
        }
        tree::detach(&target);
        Ok(true)
    }

    async fn get_storage(&self, path: &Path) -> Result<StorageStub, ServiceError> {
        let guard = self.lock_path(path, false).await?;
        guard
            .target()
            .with_kind(|kind| match kind {
                NodeKind::File { replicas, .. } => {
                    let mut rng = rand::thread_rng();
                    replicas.choose(&mut rng).cloned()
                }
                NodeKind::Directory { .. } => None,
            })
            .ok_or_else(|| ServiceError::NotFound(format!("{path} is not a file")))
    }

    async fn lock(&self, path: &Path, exclusive: bool) -> Result<(), ServiceError> {
        let guard = self.lock_path(path, exclusive).await?;
        guard.forget();
        Ok(())
    }

    async fn unlock(&self, path: &Path, _exclusive: bool) -> Result<(), ServiceError> {
        let chain = self
            .tree
            .chain(path)
            .ok_or_else(|| ServiceError::InvalidArgument(format!("{path} is not locked")))?;
        for node in chain.iter().rev() {
            node.lock.release();
        }
        Ok(())
    }
}

#[async_trait]
impl Registration for NamingState {
    async fn register(
        &self,
        storage: StorageStub,
        command: CommandStub,
        files: Vec<Path>,
    ) -> Result<Vec<Path>, ServiceError> {
        let root = self.tree.root();
        root.lock.acquire(true).await;
        if self.servers.contains_key(&storage) {
            root.lock.release();
            return Err(ServiceError::IllegalState(format!(
                "{storage} is already registered"
            )));
        }
        self.servers.insert(storage.clone(), command);
        let mut duplicates = Vec::new();
        for file in files {
            if file.is_root() || !self.tree.insert_file(&file, &storage) {
                duplicates.push(file);
            }
        }
        root.lock.release();
        info!(%storage, duplicates = duplicates.len(), "storage server registered");
        Ok(duplicates)
    }
}

fn parent_of(path: &Path) -> Result<Path, ServiceError> {
    path.parent().map_err(|err| ServiceError::InvalidArgument(err.to_string()))
}

fn leaf_of(path: &Path) -> Result<String, ServiceError> {
    path.last()
        .map(str::to_owned)
        .map_err(|err| ServiceError::InvalidArgument(err.to_string()))
}

/// The naming server process: one shared state served by a service skeleton
/// and a registration skeleton on distinct addresses.
pub struct NamingServer {
    service: Skeleton,
    registration: Skeleton,
}

impl NamingServer {
    pub fn new(service_addr: SocketAddr, registration_addr: SocketAddr) -> Self {
        Self::build(Some(service_addr), Some(registration_addr))
    }

    /// Loopback skeletons on system-chosen ports, for tests and local runs.
    pub fn loopback() -> Self {
        Self::build(None, None)
    }

    fn build(service_addr: Option<SocketAddr>, registration_addr: Option<SocketAddr>) -> Self {
        let state = Arc::new(NamingState::new());
        let service = Skeleton::new(Arc::new(ServiceDispatch(state.clone())), service_addr);
        let registration =
            Skeleton::new(Arc::new(RegistrationDispatch(state)), registration_addr);
        NamingServer { service, registration }
    }

    /// Starts both skeletons; if the second bind fails the first is stopped
    /// again.
    pub fn start(&self) -> Result<(), RmiError> {
        self.service.start()?;
        if let Err(error) = self.registration.start() {
            self.service.stop();
            return Err(error);
        }
        Ok(())
    }

    pub fn stop(&self) {
        self.service.stop();
        self.registration.stop();
    }

    pub fn service_addr(&self) -> Option<SocketAddr> {
        self.service.local_addr()
    }

    pub fn registration_addr(&self) -> Option<SocketAddr> {
        self.registration.local_addr()
    }
}
