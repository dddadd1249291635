//! Remote method invocation runtime.
//!
//! A remote interface is an `async` trait whose every method returns a
//! `Result` with an error type convertible from [`RmiError`] — the Rust
//! rendering of "every method declares the transport error". The server side
//! wraps an implementation in a [`skeleton::Skeleton`] through a small
//! per-interface [`skeleton::Dispatch`] adapter; the client side holds a
//! serializable stub carrying a [`stub::StubAddr`] and forwards each call
//! through [`stub::call`].
//!
//! One method call is one framed request/response exchange on a fresh TCP
//! connection; the connection closes after the response. Method identity
//! travels with the request as a [`message::MethodSig`] and is checked before
//! dispatch.

pub mod codec;
pub mod message;
pub mod skeleton;
pub mod stub;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use message::{MethodSig, Request, Response};
pub use skeleton::{Dispatch, Skeleton, SkeletonHooks};
pub use stub::StubAddr;

/// Transport and dispatch failures of the RMI runtime.
///
/// Serializable so a skeleton can ship the reason for a failed dispatch back
/// to the caller inside [`Response::RmiException`].
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum RmiError {
    /// Dialing the peer failed.
    #[error("failed to connect to {addr}: {reason}")]
    Connect { addr: String, reason: String },
    /// A read or write on an established connection failed.
    #[error("i/o failure during a remote call: {0}")]
    Io(String),
    /// A message could not be encoded or decoded.
    #[error("failed to encode or decode a message: {0}")]
    Codec(String),
    /// The peer has no method with the requested name.
    #[error("no method named {0}")]
    UnknownMethod(String),
    /// The peer's method with that name declares a different signature.
    #[error("method {0} exists with a different signature")]
    SignatureMismatch(String),
    /// The connection closed before a complete response arrived.
    #[error("connection closed before a response arrived")]
    NoResponse,
    /// `start` was invoked on a skeleton that is not ready to start.
    #[error("skeleton is already started")]
    AlreadyStarted,
    /// A stub was requested for a skeleton with no bound address.
    #[error("skeleton has not been started")]
    NotStarted,
}
