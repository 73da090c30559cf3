//! Reactive state cells and the effects that watch them.
//!
//! Values live on the host side so every read from script code sees the
//! latest `set`, whichever callback made it. A `set` that changes the JSON
//! value reports the effects to run; the caller queues them as callbacks.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde_json::Value;

/// Effect runs allowed per [`EFFECT_WINDOW`] before the effect is skipped.
pub const MAX_EFFECT_RUNS: u32 = 100;
/// Window of the effect run limit.
pub const EFFECT_WINDOW: Duration = Duration::from_secs(1);

#[derive(Debug)]
struct Effect {
    callback: u64,
    deps: Vec<u64>,
    window_start: Instant,
    runs: u32,
}

/// Outcome of [`StateStore::set`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StateChange {
    /// Whether the stored value changed.
    pub changed: bool,
    /// Callbacks of the effects to run.
    pub effects: Vec<u64>,
    /// Callbacks skipped because they ran too often.
    pub throttled: Vec<u64>,
}

/// State cells and effects of one plugin.
#[derive(Debug, Default)]
pub struct StateStore {
    cells: HashMap<u64, Value>,
    effects: HashMap<u64, Effect>,
    next_id: u64,
}

impl StateStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn mint(&mut self) -> u64 {
        self.next_id = self.next_id.saturating_add(1);
        self.next_id
    }

    /// Create a cell holding `initial`.
    pub fn create(&mut self, initial: Value) -> u64 {
        let id = self.mint();
        self.cells.insert(id, initial);
        id
    }

    /// Current value of cell `id`.
    #[must_use]
    pub fn get(&self, id: u64) -> Option<&Value> {
        self.cells.get(&id)
    }

    /// Number of cells.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Whether no cell exists.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Store `value` in cell `id`. Unknown ids are created on the fly.
    pub fn set(&mut self, id: u64, value: Value) -> StateChange {
        self.set_at(id, value, Instant::now())
    }

    pub(crate) fn set_at(&mut self, id: u64, value: Value, now: Instant) -> StateChange {
        if self.cells.get(&id) == Some(&value) {
            return StateChange::default();
        }
        self.cells.insert(id, value);

        let mut change = StateChange {
            changed: true,
            ..StateChange::default()
        };
        let mut watching: Vec<(&u64, &mut Effect)> = self
            .effects
            .iter_mut()
            .filter(|(_, e)| e.deps.contains(&id))
            .collect();
        watching.sort_by_key(|(effect_id, _)| **effect_id);
        for (_, effect) in watching {
            if now.saturating_duration_since(effect.window_start) >= EFFECT_WINDOW {
                effect.window_start = now;
                effect.runs = 0;
            }
            effect.runs = effect.runs.saturating_add(1);
            if effect.runs > MAX_EFFECT_RUNS {
                change.throttled.push(effect.callback);
            } else {
                change.effects.push(effect.callback);
            }
        }
        change
    }

    /// Watch `deps` with the script callback `callback`.
    pub fn add_effect(&mut self, callback: u64, deps: Vec<u64>) -> u64 {
        let id = self.mint();
        self.effects.insert(
            id,
            Effect {
                callback,
                deps,
                window_start: Instant::now(),
                runs: 0,
            },
        );
        id
    }

    /// Stop effect `id`, returning its callback.
    pub fn remove_effect(&mut self, id: u64) -> Option<u64> {
        self.effects.remove(&id).map(|e| e.callback)
    }

    /// Drop every effect, returning their callbacks.
    pub fn clear_effects(&mut self) -> Vec<u64> {
        self.effects.drain().map(|(_, e)| e.callback).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_set_reports_changes_only() {
        let mut store = StateStore::new();
        let id = store.create(json!(1));
        assert_eq!(store.get(id), Some(&json!(1)));
        assert!(!store.set(id, json!(1)).changed);
        assert!(store.set(id, json!(2)).changed);
        assert_eq!(store.get(id), Some(&json!(2)));
        assert!(store.set(id, json!({ "a": [1] })).changed);
        assert!(!store.set(id, json!({ "a": [1] })).changed);
    }

    #[test]
    fn test_effects_follow_deps() {
        let mut store = StateStore::new();
        let a = store.create(json!(""));
        let b = store.create(json!(""));
        let ea = store.add_effect(10, vec![a]);
        store.add_effect(11, vec![a, b]);

        assert_eq!(store.set(a, json!("x")).effects, vec![10, 11]);
        assert_eq!(store.set(b, json!("y")).effects, vec![11]);
        assert_eq!(store.remove_effect(ea), Some(10));
        assert_eq!(store.set(a, json!("z")).effects, vec![11]);
        assert_eq!(store.clear_effects(), vec![11]);
        assert!(store.set(a, json!("w")).effects.is_empty());
    }

    #[test]
    fn test_runaway_effect_is_throttled() {
        let mut store = StateStore::new();
        let a = store.create(json!(0));
        store.add_effect(5, vec![a]);
        let now = Instant::now();
        for i in 1..=MAX_EFFECT_RUNS {
            let change = store.set_at(a, json!(i), now);
            assert_eq!(change.effects, vec![5]);
        }
        let change = store.set_at(a, json!(-1), now);
        assert!(change.effects.is_empty());
        assert_eq!(change.throttled, vec![5]);

        let later = now + EFFECT_WINDOW;
        assert_eq!(store.set_at(a, json!(-2), later).effects, vec![5]);
    }
}
