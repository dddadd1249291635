//! Concrete stubs for the four remote interfaces.
//!
//! A stub is a serializable value: the naming server hands out
//! [`StorageStub`]s as return values, and storage servers send their own
//! stubs during registration. Two stubs are equal iff they are the same
//! interface (the Rust type) bound to the same host and port.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::path::Path;
use crate::rmi::skeleton::Skeleton;
use crate::rmi::stub::{call, StubAddr};
use crate::rmi::RmiError;

use super::{sig, Command, Registration, Service, ServiceError, Storage, StorageError};

macro_rules! stub_factories {
    ($name:ident) => {
        impl $name {
            pub fn new(host: impl Into<String>, port: u16) -> Self {
                $name { addr: StubAddr::new(host, port) }
            }

            /// Stub bound to the skeleton's own address; fails if the
            /// skeleton has never been started.
            pub fn for_skeleton(skeleton: &Skeleton) -> Result<Self, RmiError> {
                Ok($name { addr: StubAddr::for_skeleton(skeleton)? })
            }

            /// Stub using the skeleton's port under an externally routable
            /// hostname.
            pub fn for_skeleton_on(skeleton: &Skeleton, host: &str) -> Result<Self, RmiError> {
                Ok($name { addr: StubAddr::for_skeleton_on(skeleton, host)? })
            }

            pub fn addr(&self) -> &StubAddr {
                &self.addr
            }
        }

        impl From<StubAddr> for $name {
            fn from(addr: StubAddr) -> Self {
                $name { addr }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}@{}", stringify!($name), self.addr)
            }
        }
    };
}

/// Stub for the naming server's [`Service`] interface.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceStub {
    addr: StubAddr,
}

stub_factories!(ServiceStub);

#[async_trait]
impl Service for ServiceStub {
    async fn is_directory(&self, path: &Path) -> Result<bool, ServiceError> {
        call(&self.addr, sig::is_directory(), &(path,)).await
    }

    async fn list(&self, directory: &Path) -> Result<Vec<String>, ServiceError> {
        call(&self.addr, sig::list(), &(directory,)).await
    }

    async fn create_file(&self, path: &Path) -> Result<bool, ServiceError> {
        call(&self.addr, sig::create_file(), &(path,)).await
    }

    async fn create_directory(&self, path: &Path) -> Result<bool, ServiceError> {
        call(&self.addr, sig::create_directory(), &(path,)).await
    }

    async fn delete(&self, path: &Path) -> Result<bool, ServiceError> {
        call(&self.addr, sig::delete(), &(path,)).await
    }

    async fn get_storage(&self, path: &Path) -> Result<StorageStub, ServiceError> {
        call(&self.addr, sig::get_storage(), &(path,)).await
    }

    async fn lock(&self, path: &Path, exclusive: bool) -> Result<(), ServiceError> {
        call(&self.addr, sig::lock(), &(path, exclusive)).await
    }

    async fn unlock(&self, path: &Path, exclusive: bool) -> Result<(), ServiceError> {
        call(&self.addr, sig::unlock(), &(path, exclusive)).await
    }
}

/// Stub for the naming server's [`Registration`] interface.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegistrationStub {
    addr: StubAddr,
}

stub_factories!(RegistrationStub);

#[async_trait]
impl Registration for RegistrationStub {
    async fn register(
        &self,
        storage: StorageStub,
        command: CommandStub,
        files: Vec<Path>,
    ) -> Result<Vec<Path>, ServiceError> {
        call(&self.addr, sig::register(), &(storage, command, files)).await
    }
}

/// Stub for a storage server's client-facing [`Storage`] interface.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StorageStub {
    addr: StubAddr,
}

stub_factories!(StorageStub);

#[async_trait]
impl Storage for StorageStub {
    async fn size(&self, path: &Path) -> Result<u64, StorageError> {
        call(&self.addr, sig::size(), &(path,)).await
    }

    async fn read(&self, path: &Path, offset: u64, length: u32) -> Result<Vec<u8>, StorageError> {
        call(&self.addr, sig::read(), &(path, offset, length)).await
    }

    async fn write(&self, path: &Path, offset: u64, data: Vec<u8>) -> Result<(), StorageError> {
        call(&self.addr, sig::write(), &(path, offset, data)).await
    }
}

/// Stub for a storage server's naming-facing [`Command`] interface.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CommandStub {
    addr: StubAddr,
}

stub_factories!(CommandStub);

#[async_trait]
impl Command for CommandStub {
    async fn create(&self, path: &Path) -> Result<bool, StorageError> {
        call(&self.addr, sig::create(), &(path,)).await
    }

    async fn delete(&self, path: &Path) -> Result<bool, StorageError> {
        call(&self.addr, sig::delete(), &(path,)).await
    }

    async fn copy(&self, path: &Path, source: StorageStub) -> Result<bool, StorageError> {
        call(&self.addr, sig::copy(), &(path, source)).await
    }
}
