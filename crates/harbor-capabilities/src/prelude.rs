//! Commonly used capability types.
//!
//! ```rust
//! use harbor_capabilities::prelude::*;
//! use harbor_core::PermissionManifest;
//!
//! let gate = CapabilityGate::new(&PermissionManifest::default(), &PathPlaceholders::default());
//! assert!(gate.check_read("$os.readFile", std::path::Path::new("/etc/hosts")).is_err());
//! ```

pub use crate::{CapabilityError, CapabilityResult};

pub use crate::{AccessMode, CapabilityGate, CommandPolicy, DomainPolicy, PathPlaceholders, PathPolicy};
