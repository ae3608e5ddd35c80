//! Shared-key check for `/fetch` and `/ws`.

use subtle::ConstantTimeEq;
use std::sync::Arc;

/// The static secret clients pass as `?key=`. Compared in constant time.
#[derive(Clone)]
pub struct SharedKey(Arc<str>);

impl SharedKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(Arc::from(key.into()))
    }

    /// True when `candidate` equals the configured key. A missing key never matches.
    pub fn verify(&self, candidate: Option<&str>) -> bool {
        let Some(candidate) = candidate else {
            return false;
        };
        bool::from(candidate.as_bytes().ct_eq(self.0.as_bytes()))
    }
}

impl std::fmt::Debug for SharedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SharedKey(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verifies_exact_key_only() {
        let key = SharedKey::new("228");
        assert!(key.verify(Some("228")));
        assert!(!key.verify(Some("2280")));
        assert!(!key.verify(Some("")));
        assert!(!key.verify(None));
    }

    #[test]
    fn debug_does_not_leak_the_key() {
        let key = SharedKey::new("hunter2");
        assert!(!format!("{:?}", key).contains("hunter2"));
    }
}
