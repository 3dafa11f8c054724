//! World candidate lists
//!
//! Stage files are looked up under the first world id, in a fixed fallback
//! order, that the pack provides. For `minecraft:the_nether` the order is:
//!
//! ```text
//! minecraft:the_nether > minecraft_the_nether > world-1 > the_nether > any
//! ```

use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use sulkan_pack::pipelines::FALLBACK_WORLD;

const NO_WORLD: &str = "__none__";

/// Request and hit counters of a cache
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub requests: u64,
    pub hits: u64,
}

/// Ordered world ids to try for a world identity such as `minecraft:the_end`
///
/// The list is deduplicated and always ends with `any`.
pub fn world_candidates(identity: Option<&str>) -> Vec<String> {
    let mut candidates = Vec::new();
    let key = identity.map(|id| id.trim().to_lowercase()).filter(|id| !id.is_empty());
    if let Some(key) = &key {
        let (namespace, path) = match key.split_once(':') {
            Some((namespace, path)) => (namespace, path),
            None => ("", key.as_str()),
        };
        push_unique(&mut candidates, key.clone());
        push_unique(&mut candidates, key.replace([':', '/'], "_"));
        add_canonical(&mut candidates, namespace, path);
        if !path.trim().is_empty() {
            push_unique(&mut candidates, path.to_string());
            push_unique(&mut candidates, path.replace('/', "_"));
        }
    }
    push_unique(&mut candidates, FALLBACK_WORLD.to_string());
    candidates
}

fn add_canonical(candidates: &mut Vec<String>, namespace: &str, path: &str) {
    let path = path.trim();
    if path.is_empty() {
        return;
    }
    let vanilla = namespace.is_empty() || namespace == "minecraft";
    match path {
        "the_nether" if vanilla => {
            push_unique(candidates, "world-1".to_string());
            return;
        }
        "the_end" if vanilla => {
            push_unique(candidates, "world1".to_string());
            return;
        }
        "overworld" if vanilla => push_unique(candidates, "world0".to_string()),
        _ => {}
    }
    if is_numbered_world(path) {
        push_unique(candidates, path.to_string());
    }
}

/// `world` followed by an optionally negative integer
fn is_numbered_world(path: &str) -> bool {
    let Some(rest) = path.strip_prefix("world") else {
        return false;
    };
    let digits = rest.strip_prefix('-').unwrap_or(rest);
    !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
}

fn push_unique(candidates: &mut Vec<String>, value: String) {
    if !candidates.contains(&value) {
        candidates.push(value);
    }
}

/// Memoizes the candidate list of the last seen world identity
#[derive(Debug)]
pub struct WorldCandidateCache {
    cached: RwLock<(String, Arc<[String]>)>,
    requests: AtomicU64,
    hits: AtomicU64,
}

impl Default for WorldCandidateCache {
    fn default() -> Self {
        Self {
            cached: RwLock::new((NO_WORLD.to_string(), Arc::from(vec![FALLBACK_WORLD.to_string()]))),
            requests: AtomicU64::new(0),
            hits: AtomicU64::new(0),
        }
    }
}

impl WorldCandidateCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Candidate list for `identity`, recomputed only when the identity changes
    pub fn candidates(&self, identity: Option<&str>) -> Arc<[String]> {
        let key = identity.map(|id| id.trim().to_lowercase()).filter(|id| !id.is_empty()).unwrap_or_else(|| NO_WORLD.to_string());
        self.requests.fetch_add(1, Ordering::Relaxed);
        {
            let cached = self.cached.read();
            if cached.0 == key {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return cached.1.clone();
            }
        }
        let resolved: Arc<[String]> = Arc::from(world_candidates(identity));
        *self.cached.write() = (key, resolved.clone());
        resolved
    }

    /// Candidates of the last seen identity
    pub fn current(&self) -> Arc<[String]> {
        self.cached.read().1.clone()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            requests: self.requests.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
        }
    }
}
