//! JSON merge helper for layered configuration.

use serde_json::Value;

/// Merge `top` into `base`. Objects merge key by key; any other value in
/// `top` replaces what `base` holds at that position.
pub(super) fn overlay(base: &mut Value, top: &Value) {
    match (base, top) {
        (Value::Object(base_map), Value::Object(top_map)) => {
            for (key, value) in top_map {
                match base_map.get_mut(key) {
                    Some(slot) => overlay(slot, value),
                    None => {
                        base_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (slot, value) => *slot = value.clone(),
    }
}
