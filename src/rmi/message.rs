//! Wire objects exchanged by stubs and skeletons.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::RmiError;

/// Method identity: name plus parameter-type list, with the declared return
/// type carried along for verification on dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodSig {
    pub name: String,
    pub params: Vec<String>,
    pub returns: String,
}

impl MethodSig {
    pub fn new(name: &str, params: &[&str], returns: &str) -> Self {
        MethodSig {
            name: name.to_owned(),
            params: params.iter().map(|p| (*p).to_owned()).collect(),
            returns: returns.to_owned(),
        }
    }
}

impl fmt::Display for MethodSig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({}) -> {}", self.name, self.params.join(", "), self.returns)
    }
}

/// One method call: the signature plus the encoded argument tuple.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub sig: MethodSig,
    /// bincode encoding of the argument tuple.
    pub args: Vec<u8>,
}

/// Outcome of one method call.
///
/// `Return` and `MethodException` carry the bincode encoding of the method's
/// return value or declared error type; only the caller knows the concrete
/// types. `RmiException` is self-describing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Response {
    Return(Vec<u8>),
    MethodException(Vec<u8>),
    RmiException(RmiError),
}

/// The on-wire name of a Rust type, used in [`MethodSig`] parameter lists.
pub fn type_ref<T: ?Sized>() -> String {
    std::any::type_name::<T>().to_owned()
}
