//! Identifiers namespacing custom-source media ids.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use harbor_core::{MAX_EXTENSION_IDENTIFIER, MIN_EXTENSION_IDENTIFIER};
use rand::Rng;
use tracing::warn;

/// Hands out custom-source identifiers.
///
/// An extension keeps its identifier across reloads while it stays loaded.
/// New extensions get the smallest free identifier; when every identifier
/// is taken a random one is reused.
#[derive(Debug, Default)]
pub struct IdentifierAllocator {
    assigned: Mutex<BTreeMap<String, u16>>,
}

impl IdentifierAllocator {
    /// Empty allocator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The identifier of `extension_id`, assigning one if needed.
    pub fn allocate(&self, extension_id: &str) -> u16 {
        let mut assigned = self.assigned.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = assigned.get(extension_id) {
            return *existing;
        }
        let mut taken: Vec<u16> = assigned.values().copied().collect();
        taken.sort_unstable();
        let mut candidate = MIN_EXTENSION_IDENTIFIER;
        for used in taken {
            if used == candidate {
                candidate = candidate.saturating_add(1);
            } else if used > candidate {
                break;
            }
        }
        let identifier = if assigned.len() >= usize::from(MAX_EXTENSION_IDENTIFIER) {
            let random = rand::thread_rng().gen_range(MIN_EXTENSION_IDENTIFIER..=MAX_EXTENSION_IDENTIFIER);
            warn!(extension_id = %extension_id, identifier = random, "custom source identifiers exhausted");
            random
        } else {
            candidate
        };
        assigned.insert(extension_id.to_string(), identifier);
        identifier
    }

    /// The identifier of `extension_id`, if assigned.
    #[must_use]
    pub fn get(&self, extension_id: &str) -> Option<u16> {
        self.assigned
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(extension_id)
            .copied()
    }

    /// Free the identifier of `extension_id`.
    pub fn release(&self, extension_id: &str) -> Option<u16> {
        self.assigned
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(extension_id)
    }
}
