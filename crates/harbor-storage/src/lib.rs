//! Harbor Storage - bucketed key-value persistence.
//!
//! Values are JSON documents addressed by `(bucket, key)`. Two backends
//! implement [`KvStore`]:
//!
//! - [`MemoryKvStore`] for tests and ephemeral hosts
//! - [`FileKvStore`], one JSON file per bucket under a data directory
//!
//! Extensions never see buckets directly; the host hands them a
//! [`ScopedKvStore`] pre-bound to their own bucket.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod error;
pub mod kv;

pub use error::{StorageError, StorageResult};
pub use kv::{FileKvStore, KvStore, MemoryKvStore, ScopedKvStore};
