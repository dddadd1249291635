//! tundra - a small distributed filesystem in Rust.
//!
//! A central naming server owns the directory tree, coordinates concurrent
//! access through per-node FIFO reader/writer locks, and replicates hot
//! files across storage servers; storage servers hold the file bytes and
//! serve bulk reads and writes directly to clients. Everything speaks a
//! small RMI runtime: serializable stubs on the client side, multithreaded
//! skeletons on the server side, one framed request/response exchange per
//! TCP connection.

pub mod config;
pub mod naming;
pub mod path;
pub mod proto;
pub mod rmi;
pub mod storage;
