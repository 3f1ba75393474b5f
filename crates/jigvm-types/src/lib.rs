//! Shared types for the jigvm workspace.
//!
//! This crate holds the identifiers and records that cross the boundary
//! between the execution engine and its collaborators (state stores,
//! registries, transaction builders):
//!
//! - [`Pointer`](pointer::Pointer) - 32-byte hash + index naming origins, locations and classes
//! - [`Address`](pointer::Address) - public-key hash used by address locks
//! - [`PackageId`](pointer::PackageId) - content hash of a deployed package
//! - [`SerializedLock`](lock::SerializedLock) - persisted lock triple
//! - [`Output`](output::Output) - persisted jig record

pub mod encoding;
pub mod lock;
pub mod output;
pub mod pointer;

// Re-export commonly used types at crate root
pub use lock::{LockKind, SerializedLock};
pub use output::Output;
pub use pointer::{Address, PackageId, Pointer, ADDRESS_SIZE, POINTER_SIZE};
