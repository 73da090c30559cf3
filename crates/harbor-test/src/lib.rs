//! Harbor Test - shared test utilities for the Harbor crates.
//!
//! This crate provides manifest builders, an extension directory fixture
//! and recording host collaborators. Use it as a dev-dependency:
//!
//! ```toml
//! [dev-dependencies]
//! harbor-test.workspace = true
//! ```
//!
//! ```rust,ignore
//! use harbor_test::{ExtensionDirFixture, ManifestBuilder};
//!
//! let dir = ExtensionDirFixture::new();
//! dir.write(&ManifestBuilder::provider("my-source").build());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

pub mod dir;
pub mod fixtures;
pub mod mocks;

pub use dir::ExtensionDirFixture;
pub use fixtures::*;
pub use mocks::{RecordingNotifier, init_test_logging};
