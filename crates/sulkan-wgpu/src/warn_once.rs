//! Log-once key sets

use parking_lot::Mutex;
use std::collections::HashSet;

/// Remembers which keys have already been reported
///
/// Runtime failures repeat every frame; callers log only when
/// [`WarnOnce::first`] returns true, and clear the set when the state they
/// describe is invalidated.
#[derive(Debug, Default)]
pub struct WarnOnce {
    seen: Mutex<HashSet<String>>,
}

impl WarnOnce {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `key`, returning true the first time it is seen
    pub fn first(&self, key: &str) -> bool {
        let mut seen = self.seen.lock();
        if seen.contains(key) {
            return false;
        }
        seen.insert(key.to_string())
    }

    pub fn clear(&self) {
        self.seen.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.seen.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_only_once_until_cleared() {
        let warned = WarnOnce::new();
        assert!(warned.first("compute:blur#0"));
        assert!(!warned.first("compute:blur#0"));
        assert!(warned.first("compute:blur#1"));
        assert_eq!(warned.len(), 2);
        warned.clear();
        assert!(warned.first("compute:blur#0"));
    }
}
