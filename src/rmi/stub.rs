//! Client side of the RMI runtime.
//!
//! Concrete stubs (one struct per remote interface, see `proto::stubs`) wrap
//! a [`StubAddr`] and forward each trait method through [`call`]. Equality,
//! hashing and display never touch the network.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use super::codec;
use super::message::{MethodSig, Request, Response};
use super::skeleton::Skeleton;
use super::RmiError;

/// Network identity of a remote object: hostname and port.
///
/// The hostname is kept unresolved so a stub minted behind a NAT remains
/// routable when handed to a third party.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StubAddr {
    pub host: String,
    pub port: u16,
}

impl StubAddr {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        StubAddr { host: host.into(), port }
    }

    /// Copies the bound address of `skeleton`.
    pub fn for_skeleton(skeleton: &Skeleton) -> Result<Self, RmiError> {
        let local = skeleton.local_addr().ok_or(RmiError::NotStarted)?;
        Ok(StubAddr { host: local.ip().to_string(), port: local.port() })
    }

    /// Uses the skeleton's port with an alternative hostname.
    pub fn for_skeleton_on(skeleton: &Skeleton, host: &str) -> Result<Self, RmiError> {
        let local = skeleton.local_addr().ok_or(RmiError::NotStarted)?;
        Ok(StubAddr { host: host.to_owned(), port: local.port() })
    }
}

impl fmt::Display for StubAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Performs one remote call: dial, send the request, read the response,
/// close.
///
/// The argument tuple is encoded with bincode; the response maps to the
/// method's return value, its declared error (the direct cause, raised as
/// `Err`), or a transport error converted into the method's error type.
pub async fn call<A, R, E>(addr: &StubAddr, sig: MethodSig, args: &A) -> Result<R, E>
where
    A: Serialize + ?Sized,
    R: DeserializeOwned,
    E: DeserializeOwned + From<RmiError>,
{
    let encoded =
        bincode::serialize(args).map_err(|err| RmiError::Codec(err.to_string()))?;
    let mut socket = TcpStream::connect((addr.host.as_str(), addr.port)).await.map_err(|err| {
        RmiError::Connect { addr: addr.to_string(), reason: err.to_string() }
    })?;
    codec::write_frame(&mut socket, &Request { sig, args: encoded }).await?;
    let response: Response = codec::read_frame(&mut socket).await?;
    let _ = socket.shutdown().await;
    match response {
        Response::Return(bytes) => bincode::deserialize(&bytes)
            .map_err(|err| E::from(RmiError::Codec(err.to_string()))),
        Response::MethodException(bytes) => {
            let cause: E = bincode::deserialize(&bytes)
                .map_err(|err| RmiError::Codec(err.to_string()))?;
            Err(cause)
        }
        Response::RmiException(error) => Err(E::from(error)),
    }
}
