//! Harbor Capabilities - permission enforcement for host bindings.
//!
//! Each extension's permission manifest compiles into a [`CapabilityGate`]:
//! - [`PathPolicy`]: read/write glob allow-lists with placeholder expansion
//! - [`CommandPolicy`]: executable and per-argument rules
//! - [`DomainPolicy`]: outbound request hosts
//!
//! The [`dom_filter`] module holds the predicates used to vet HTML,
//! attributes and CSS before they reach a client DOM.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod dom_filter;
pub mod prelude;

mod commands;
mod domains;
mod error;
mod gate;
mod paths;

pub use commands::CommandPolicy;
pub use domains::DomainPolicy;
pub use error::{CapabilityError, CapabilityResult};
pub use gate::CapabilityGate;
pub use paths::{AccessMode, PathPlaceholders, PathPolicy, normalize_lexically, resolve_symlinks, try_resolve_symlinks};
