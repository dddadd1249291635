//! Skeleton-side adapters mapping wire requests onto the remote traits.
//!
//! One dispatcher per interface: it matches the request's method name,
//! verifies the full signature, decodes the argument tuple, invokes the
//! served object and encodes the outcome as a [`Response`].

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::path::Path;
use crate::rmi::message::{MethodSig, Request, Response};
use crate::rmi::skeleton::Dispatch;
use crate::rmi::RmiError;

use super::{sig, Command, CommandStub, Registration, Service, Storage, StorageStub};

fn check(got: &MethodSig, want: &MethodSig) -> Result<(), RmiError> {
    if got.params != want.params || got.returns != want.returns {
        return Err(RmiError::SignatureMismatch(want.name.clone()));
    }
    Ok(())
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, RmiError> {
    bincode::deserialize(bytes).map_err(|err| RmiError::Codec(err.to_string()))
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, RmiError> {
    bincode::serialize(value).map_err(|err| RmiError::Codec(err.to_string()))
}

/// Encodes a method outcome: a value becomes `Return`, a declared error
/// becomes `MethodException` carrying the error itself.
fn respond<T: Serialize, E: Serialize>(outcome: Result<T, E>) -> Result<Response, RmiError> {
    match outcome {
        Ok(value) => Ok(Response::Return(encode(&value)?)),
        Err(error) => Ok(Response::MethodException(encode(&error)?)),
    }
}

/// Dispatcher for the naming server's [`Service`] interface.
pub struct ServiceDispatch<T>(pub Arc<T>);

#[async_trait]
impl<T: Service + 'static> Dispatch for ServiceDispatch<T> {
    fn interface(&self) -> &'static str {
        "Service"
    }

    async fn dispatch(&self, request: Request) -> Result<Response, RmiError> {
        let Request { sig: got, args } = request;
        match got.name.as_str() {
            "is_directory" => {
                check(&got, &sig::is_directory())?;
                let (path,): (Path,) = decode(&args)?;
                respond(self.0.is_directory(&path).await)
            }
            "list" => {
                check(&got, &sig::list())?;
                let (directory,): (Path,) = decode(&args)?;
                respond(self.0.list(&directory).await)
            }
            "create_file" => {
                check(&got, &sig::create_file())?;
                let (path,): (Path,) = decode(&args)?;
                respond(self.0.create_file(&path).await)
            }
            "create_directory" => {
                check(&got, &sig::create_directory())?;
                let (path,): (Path,) = decode(&args)?;
                respond(self.0.create_directory(&path).await)
            }
            "delete" => {
                check(&got, &sig::delete())?;
                let (path,): (Path,) = decode(&args)?;
                respond(self.0.delete(&path).await)
            }
            "get_storage" => {
                check(&got, &sig::get_storage())?;
                let (path,): (Path,) = decode(&args)?;
                respond(self.0.get_storage(&path).await)
            }
            "lock" => {
                check(&got, &sig::lock())?;
                let (path, exclusive): (Path, bool) = decode(&args)?;
                respond(self.0.lock(&path, exclusive).await)
            }
            "unlock" => {
                check(&got, &sig::unlock())?;
                let (path, exclusive): (Path, bool) = decode(&args)?;
                respond(self.0.unlock(&path, exclusive).await)
            }
            _ => Err(RmiError::UnknownMethod(got.name)),
        }
    }
}

/// Dispatcher for the naming server's [`Registration`] interface.
pub struct RegistrationDispatch<T>(pub Arc<T>);

#[async_trait]
impl<T: Registration + 'static> Dispatch for RegistrationDispatch<T> {
    fn interface(&self) -> &'static str {
        "Registration"
    }

    async fn dispatch(&self, request: Request) -> Result<Response, RmiError> {
        let Request { sig: got, args } = request;
        match got.name.as_str() {
            "register" => {
                check(&got, &sig::register())?;
                let (storage, command, files): (StorageStub, CommandStub, Vec<Path>) =
                    decode(&args)?;
                respond(self.0.register(storage, command, files).await)
            }
            _ => Err(RmiError::UnknownMethod(got.name)),
        }
    }
}

/// Dispatcher for a storage server's client-facing [`Storage`] interface.
pub struct StorageDispatch<T>(pub Arc<T>);

#[async_trait]
impl<T: Storage + 'static> Dispatch for StorageDispatch<T> {
    fn interface(&self) -> &'static str {
        "Storage"
    }

    async fn dispatch(&self, request: Request) -> Result<Response, RmiError> {
        let Request { sig: got, args } = request;
        match got.name.as_str() {
            "size" => {
                check(&got, &sig::size())?;
                let (path,): (Path,) = decode(&args)?;
                respond(self.0.size(&path).await)
            }
            "read" => {
                check(&got, &sig::read())?;
                let (path, offset, length): (Path, u64, u32) = decode(&args)?;
                respond(self.0.read(&path, offset, length).await)
            }
            "write" => {
                check(&got, &sig::write())?;
                let (path, offset, data): (Path, u64, Vec<u8>) = decode(&args)?;
                respond(self.0.write(&path, offset, data).await)
            }
            _ => Err(RmiError::UnknownMethod(got.name)),
        }
    }
}

/// Dispatcher for a storage server's naming-facing [`Command`] interface.
pub struct CommandDispatch<T>(pub Arc<T>);

#[async_trait]
impl<T: Command + 'static> Dispatch for CommandDispatch<T> {
    fn interface(&self) -> &'static str {
        "Command"
    }

    async fn dispatch(&self, request: Request) -> Result<Response, RmiError> {
        let Request { sig: got, args } = request;
        match got.name.as_str() {
            "create" => {
                check(&got, &sig::create())?;
                let (path,): (Path,) = decode(&args)?;
                respond(self.0.create(&path).await)
            }
            "delete" => {
                check(&got, &sig::delete())?;
                let (path,): (Path,) = decode(&args)?;
                respond(self.0.delete(&path).await)
            }
            "copy" => {
                check(&got, &sig::copy())?;
                let (path, source): (Path, StorageStub) = decode(&args)?;
                respond(self.0.copy(&path, source).await)
            }
            _ => Err(RmiError::UnknownMethod(got.name)),
        }
    }
}
