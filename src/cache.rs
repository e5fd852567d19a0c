use sha2::{Digest, Sha256};
use std::collections::HashMap;

use crate::codegen::generate_client_module;
use crate::payload::ComponentPayload;

/// Per-process memo of generated module text, keyed by a SHA-256 hash of
/// the serialized payload. Strictly a cache of derived artifacts — live
/// component data never crosses requests.
pub struct ModuleCache {
    entries: HashMap<String, String>,
}

impl ModuleCache {
    pub fn new() -> Self {
        ModuleCache { entries: HashMap::new() }
    }

    pub fn compute_hash(payload_json: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(payload_json.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Generate the client module for `payload`, reusing the memoized text
    /// when an identical payload was generated before in this process.
    pub fn get_or_generate(&mut self, payload: &ComponentPayload) -> Result<String, String> {
        let json = serde_json::to_string(payload)
            .map_err(|e| format!("payload serialize error: {}", e))?;
        let hash = Self::compute_hash(&json);
        if let Some(hit) = self.entries.get(&hash) {
            return Ok(hit.clone());
        }
        let module = generate_client_module(payload);
        for warning in &module.warnings {
            eprintln!("[VeilNative] {}", warning);
        }
        self.entries.insert(hash, module.source.clone());
        Ok(module.source)
    }
}

impl Default for ModuleCache {
    fn default() -> Self {
        ModuleCache::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::ActionMap;

    #[test]
    fn test_identical_payloads_hit_the_memo() {
        let payload = ComponentPayload {
            id: "c0".to_string(),
            states: vec![],
            actions: ActionMap(vec![]),
            effects: vec![],
        };
        let mut cache = ModuleCache::new();
        let first = cache.get_or_generate(&payload).unwrap();
        let second = cache.get_or_generate(&payload).unwrap();
        assert_eq!(first, second);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_distinct_payloads_generate_distinct_entries() {
        let a = ComponentPayload {
            id: "c0".to_string(),
            states: vec![],
            actions: ActionMap(vec![]),
            effects: vec![],
        };
        let mut b = a.clone();
        b.id = "c1".to_string();
        let mut cache = ModuleCache::new();
        cache.get_or_generate(&a).unwrap();
        cache.get_or_generate(&b).unwrap();
        assert_eq!(cache.len(), 2);
    }
}
