//! Remote interfaces of the distributed filesystem.
//!
//! Four interfaces cross the wire: [`Service`] and [`Registration`] are
//! served by the naming server (on separate ports), [`Storage`] and
//! [`Command`] by each storage server. Every method's error type converts
//! from [`RmiError`], which is what makes these traits remote interfaces.

pub mod dispatch;
pub mod stubs;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::path::{Path, PathError};
use crate::rmi::RmiError;

pub use stubs::{CommandStub, RegistrationStub, ServiceStub, StorageStub};

/// Errors declared by the naming server's interfaces.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceError {
    /// The path (or its parent, for creation) does not name what the
    /// operation requires.
    #[error("not found: {0}")]
    NotFound(String),
    /// The argument violates the path grammar or targets the root where a
    /// non-root is required.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// The server cannot honor the request in its current state, e.g. a
    /// duplicate registration or file creation with no storage registered.
    #[error("illegal state: {0}")]
    IllegalState(String),
    #[error(transparent)]
    Rmi(#[from] RmiError),
}

/// Errors declared by the storage server's interfaces.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageError {
    /// The path is absent, a directory where a file is required, or the root.
    #[error("not found: {0}")]
    NotFound(String),
    /// Read arithmetic escapes the file's extent.
    #[error("out of bounds: {0}")]
    OutOfBounds(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// The local filesystem failed underneath the operation.
    #[error("i/o failure: {0}")]
    Io(String),
    #[error(transparent)]
    Rmi(#[from] RmiError),
}

impl From<PathError> for StorageError {
    fn from(err: PathError) -> Self {
        match err {
            PathError::InvalidArgument(reason) => StorageError::InvalidArgument(reason),
            PathError::NotFound(what) => StorageError::NotFound(what),
            PathError::Io(reason) => StorageError::Io(reason),
        }
    }
}

/// Client-facing naming interface: resolution, namespace mutation and
/// advisory multi-operation locking.
#[async_trait]
pub trait Service: Send + Sync {
    /// Reports whether `path` names a directory; the root always does.
    async fn is_directory(&self, path: &Path) -> Result<bool, ServiceError>;

    /// Lists the child names of a directory.
    async fn list(&self, directory: &Path) -> Result<Vec<String>, ServiceError>;

    /// Creates an empty file on some registered storage server and links it
    /// into the tree. `false` if the path already exists or is the root.
    async fn create_file(&self, path: &Path) -> Result<bool, ServiceError>;

    /// Creates a directory node. `false` if the path already exists or is
    /// the root.
    async fn create_directory(&self, path: &Path) -> Result<bool, ServiceError>;

    /// Deletes the subtree at `path` on every storage server that holds any
    /// part of it. `false` for the root.
    async fn delete(&self, path: &Path) -> Result<bool, ServiceError>;

    /// Returns a stub for one storage server holding the file.
    async fn get_storage(&self, path: &Path) -> Result<StorageStub, ServiceError>;

    /// Acquires the path for the caller, shared or exclusive, honoring the
    /// path-prefix locking protocol. Blocks until granted.
    async fn lock(&self, path: &Path, exclusive: bool) -> Result<(), ServiceError>;

    /// Releases a previously acquired path.
    async fn unlock(&self, path: &Path, exclusive: bool) -> Result<(), ServiceError>;
}

/// Storage-facing naming interface: the one-shot join handshake.
#[async_trait]
pub trait Registration: Send + Sync {
    /// Announces a storage server and its file inventory; returns the paths
    /// the caller must delete locally because the tree already knows them.
    async fn register(
        &self,
        storage: StorageStub,
        command: CommandStub,
        files: Vec<Path>,
    ) -> Result<Vec<Path>, ServiceError>;
}

/// Client-facing storage interface: bulk file access.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn size(&self, path: &Path) -> Result<u64, StorageError>;

    /// Reads exactly `length` bytes at `offset`.
    async fn read(&self, path: &Path, offset: u64, length: u32) -> Result<Vec<u8>, StorageError>;

    /// Overwrites or extends the file at `offset`; a gap past the current
    /// end is materialized.
    async fn write(&self, path: &Path, offset: u64, data: Vec<u8>) -> Result<(), StorageError>;
}

/// Naming-facing storage interface: namespace mutations issued by the
/// naming server.
#[async_trait]
pub trait Command: Send + Sync {
    /// Creates an empty file, with missing parent directories. `false` if
    /// the path exists or is the root.
    async fn create(&self, path: &Path) -> Result<bool, StorageError>;

    /// Recursively deletes the subtree. `false` if absent or the root.
    async fn delete(&self, path: &Path) -> Result<bool, StorageError>;

    /// Replaces the local file with the bytes held by `source`.
    async fn copy(&self, path: &Path, source: StorageStub) -> Result<bool, StorageError>;
}

/// Method signatures shared by the stubs and the dispatchers, so the two
/// sides cannot drift apart.
pub(crate) mod sig {
    use super::{Path, StorageStub};
    use crate::rmi::message::{type_ref, MethodSig};

    fn of<T: ?Sized>() -> String {
        type_ref::<T>()
    }

    pub fn is_directory() -> MethodSig {
        MethodSig { name: "is_directory".into(), params: vec![of::<Path>()], returns: of::<bool>() }
    }

    pub fn list() -> MethodSig {
        MethodSig { name: "list".into(), params: vec![of::<Path>()], returns: of::<Vec<String>>() }
    }

    pub fn create_file() -> MethodSig {
        MethodSig { name: "create_file".into(), params: vec![of::<Path>()], returns: of::<bool>() }
    }

    pub fn create_directory() -> MethodSig {
        MethodSig {
            name: "create_directory".into(),
            params: vec![of::<Path>()],
            returns: of::<bool>(),
        }
    }

    pub fn delete() -> MethodSig {
        MethodSig { name: "delete".into(), params: vec![of::<Path>()], returns: of::<bool>() }
    }

    pub fn get_storage() -> MethodSig {
        MethodSig {
            name: "get_storage".into(),
            params: vec![of::<Path>()],
            returns: of::<StorageStub>(),
        }
    }

    pub fn lock() -> MethodSig {
        MethodSig {
            name: "lock".into(),
            params: vec![of::<Path>(), of::<bool>()],
            returns: of::<()>(),
        }
    }

    pub fn unlock() -> MethodSig {
        MethodSig {
            name: "unlock".into(),
            params: vec![of::<Path>(), of::<bool>()],
            returns: of::<()>(),
        }
    }

    pub fn register() -> MethodSig {
        MethodSig {
            name: "register".into(),
            params: vec![of::<StorageStub>(), of::<super::CommandStub>(), of::<Vec<Path>>()],
            returns: of::<Vec<Path>>(),
        }
    }

    pub fn size() -> MethodSig {
        MethodSig { name: "size".into(), params: vec![of::<Path>()], returns: of::<u64>() }
    }

    pub fn read() -> MethodSig {
        MethodSig {
            name: "read".into(),
            params: vec![of::<Path>(), of::<u64>(), of::<u32>()],
            returns: of::<Vec<u8>>(),
        }
    }

    pub fn write() -> MethodSig {
        MethodSig {
            name: "write".into(),
            params: vec![of::<Path>(), of::<u64>(), of::<Vec<u8>>()],
            returns: of::<()>(),
        }
    }

    pub fn create() -> MethodSig {
        MethodSig { name: "create".into(), params: vec![of::<Path>()], returns: of::<bool>() }
    }

    pub fn copy() -> MethodSig {
        MethodSig {
            name: "copy".into(),
            params: vec![of::<Path>(), of::<StorageStub>()],
            returns: of::<bool>(),
        }
    }
}
