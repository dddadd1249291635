//! The storage server: the file-operations engine behind two skeletons,
//! plus the one-shot registration handshake with a naming server.

mod engine;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};

use crate::path::{Path, PathError};
use crate::proto::dispatch::{CommandDispatch, StorageDispatch};
use crate::proto::{Command, CommandStub, Registration, RegistrationStub, ServiceError, StorageStub};
use crate::rmi::{RmiError, Skeleton};

pub use engine::StorageEngine;

/// Failures of [`StorageServer::start`]. These stay on the server's side of
/// the wire, so unlike the interface errors they need no serde.
#[derive(Debug, Error)]
pub enum StartError {
    /// The configured root is absent or a regular file.
    #[error("storage root {0} is missing or not a directory")]
    NotFound(String),
    /// The naming server refused the registration.
    #[error("registration rejected: {0}")]
    Rejected(ServiceError),
    #[error(transparent)]
    Rmi(#[from] RmiError),
    #[error("local filesystem failure: {0}")]
    Io(String),
}

impl From<PathError> for StartError {
    fn from(err: PathError) -> Self {
        match err {
            PathError::NotFound(what) | PathError::InvalidArgument(what) => {
                StartError::NotFound(what)
            }
            PathError::Io(reason) => StartError::Io(reason),
        }
    }
}

/// One storage server process: a local root served over independent
/// client-facing and naming-facing skeletons.
pub struct StorageServer {
    root: PathBuf,
    engine: Arc<StorageEngine>,
    client: Skeleton,
    command: Skeleton,
}

impl StorageServer {
    /// Serves `root` on the given addresses; `None` asks for system-chosen
    /// loopback ports.
    pub fn new(
        root: PathBuf,
        client_addr: Option<SocketAddr>,
        command_addr: Option<SocketAddr>,
    ) -> Self {
        let engine = Arc::new(StorageEngine::new(root.clone()));
        let client = Skeleton::new(Arc::new(StorageDispatch(engine.clone())), client_addr);
        let command = Skeleton::new(Arc::new(CommandDispatch(engine.clone())), command_addr);
        StorageServer { root, engine, client, command }
    }

    /// Starts both skeletons and performs the registration handshake:
    /// announce the local inventory under the externally routable
    /// `hostname`, then delete every path the naming server reports as a
    /// duplicate and prune ancestor directories the deletions emptied.
    pub async fn start(
        &self,
        hostname: &str,
        registration: &RegistrationStub,
    ) -> Result<(), StartError> {
        let metadata = tokio::fs::metadata(&self.root)
            .await
            .map_err(|_| StartError::NotFound(self.root.display().to_string()))?;
        if !metadata.is_dir() {
            return Err(StartError::NotFound(self.root.display().to_string()));
        }

        self.client.start()?;
        if let Err(error) = self.command.start() {
            self.client.stop();
            return Err(error.into());
        }
        let storage_stub = StorageStub::for_skeleton_on(&self.client, hostname)?;
        let command_stub = CommandStub::for_skeleton_on(&self.command, hostname)?;

        let files = Path::list(&self.root).await?;
        info!(root = %self.root.display(), files = files.len(), "registering with naming server");
        let duplicates =
            registration.register(storage_stub, command_stub, files).await.map_err(|err| {
                match err {
                    ServiceError::Rmi(error) => StartError::Rmi(error),
                    other => StartError::Rejected(other),
                }
            })?;

        for path in &duplicates {
            debug!(%path, "deleting duplicate file");
            self.engine.delete(path).await.map_err(|err| StartError::Io(err.to_string()))?;
            self.prune_ancestors(path).await;
        }
        Ok(())
    }

    /// Removes now-empty directories above a deleted duplicate, up to but
    /// not including the root.
    async fn prune_ancestors(&self, path: &Path) {
        let mut current = match path.parent() {
            Ok(parent) => parent,
            Err(_) => return,
        };
        while !current.is_root() {
            let local = current.to_local(&self.root);
            let empty = match tokio::fs::read_dir(&local).await {
                Ok(mut entries) => matches!(entries.next_entry().await, Ok(None)),
                Err(_) => false,
            };
            if !empty || tokio::fs::remove_dir(&local).await.is_err() {
                break;
            }
            current = match current.parent() {
                Ok(parent) => parent,
                Err(_) => break,
            };
        }
    }

    pub fn stop(&self) {
        self.client.stop();
        self.command.stop();
    }

    /// Bound address of the client-facing interface, once started.
    pub fn client_addr(&self) -> Option<SocketAddr> {
        self.client.local_addr()
    }

    /// Bound address of the naming-facing interface, once started.
    pub fn command_addr(&self) -> Option<SocketAddr> {
        self.command.local_addr()
    }
}
