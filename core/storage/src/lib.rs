//! Storage layer for the dav sync client.
//!
//! Two seams live here, both trait-based so the engine never depends on a
//! concrete backend:
//! - [`CacheStore`]: the durable on-device key-value store, with an
//!   in-memory and a file-backed implementation, plus the typed
//!   [`LocalCache`] view the engine works with
//! - [`TableObjectGateway`]: the network operations of the dav backend,
//!   with [`MemoryGateway`] as an in-memory backend for tests and demos
//!
//! # Design Principles
//! - Atomic single-key writes, no multi-key transactions
//! - Unified error semantics: NotFound, Conflict and session errors mean
//!   the same thing for every backend

pub mod cache;
pub mod local;
pub mod memory;
pub mod provider;
pub mod records;

pub use cache::{CacheStore, MemoryCacheStore, RecordKind};
pub use local::FileCacheStore;
pub use memory::{GatewayOp, MemoryGateway};
pub use provider::{
    ObjectStub, ObjectWrite, ObjectWriteResponse, RemoteTableObject, SessionRenewer,
    TableObjectGateway, TablePage,
};
pub use records::LocalCache;
