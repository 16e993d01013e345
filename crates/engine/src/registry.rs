//! In-memory registry of active uploads.
//!
//! Process-wide state with lifetime equal to the worker, owned by the
//! engine and mutated only from its command handlers. Holds exactly one
//! entry per content id: the cancel token that reaches every suspension
//! point of that upload's in-flight work.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio_util::sync::CancellationToken;

#[derive(Default)]
pub(crate) struct Registry {
    inner: Mutex<HashMap<String, CancellationToken>>,
}

impl Registry {
    /// Registers an upload and returns its fresh cancel token, or `None`
    /// if the content id is already active. This guard is what makes
    /// resume idempotent.
    pub(crate) fn insert(&self, content_id: &str) -> Option<CancellationToken> {
        let mut map = self.inner.lock().expect("registry mutex poisoned");
        if map.contains_key(content_id) {
            return None;
        }
        let token = CancellationToken::new();
        map.insert(content_id.to_string(), token.clone());
        Some(token)
    }

    pub(crate) fn contains(&self, content_id: &str) -> bool {
        self.inner
            .lock()
            .expect("registry mutex poisoned")
            .contains_key(content_id)
    }

    /// Removes an upload, returning its token so the caller can fire it.
    pub(crate) fn remove(&self, content_id: &str) -> Option<CancellationToken> {
        self.inner
            .lock()
            .expect("registry mutex poisoned")
            .remove(content_id)
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.inner.lock().expect("registry mutex poisoned").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_is_exclusive_per_content_id() {
        let registry = Registry::default();
        assert!(registry.insert("c1").is_some());
        // Second insert for the same id is refused.
        assert!(registry.insert("c1").is_none());
        assert!(registry.insert("c2").is_some());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn remove_returns_the_token() {
        let registry = Registry::default();
        let token = registry.insert("c1").unwrap();
        let removed = registry.remove("c1").unwrap();
        removed.cancel();
        assert!(token.is_cancelled());
        assert!(!registry.contains("c1"));
        // Idempotent.
        assert!(registry.remove("c1").is_none());
    }

    #[test]
    fn reinsert_after_remove_gets_fresh_token() {
        let registry = Registry::default();
        let first = registry.insert("c1").unwrap();
        registry.remove("c1").unwrap().cancel();

        let second = registry.insert("c1").unwrap();
        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());
    }
}
