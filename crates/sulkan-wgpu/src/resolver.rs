//! Request path to segment resolution
//!
//! For a host shader request the resolver walks the world candidates and,
//! within each world, the enabled stages in render order. The first stage
//! whose first enabled segment claims the request owns it; within that
//! stage the segment providing a source for the requested file type wins,
//! otherwise the first enabled segment does.
//!
//! Results, misses included, are memoized by normalized request path. The
//! memo is dropped whole when it fills up, when the world candidate list
//! changes, or when the engine state generation moves on. It is copy-on-write:
//! lookups read a shared snapshot, segment matching runs without any lock
//! held, and a miss publishes a new map under a short write lock.

use crate::state::{ActivePack, EngineState};
use crate::warn_once::WarnOnce;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use sulkan_pack::expression::{self, ExprValue, ExprVariables};
use sulkan_pack::pipelines::segment::normalize_request_path;
use sulkan_pack::{OptionValue, Segment, Stage};

/// Entries kept before the lookup cache is cleared
pub const LOOKUP_CACHE_LIMIT: usize = 512;

/// Counters of the lookup cache
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LookupStats {
    pub requests: u64,
    pub cache_hits: u64,
    /// Lookups that had to match segments and found one
    pub segment_hits: u64,
}

/// Position of a segment inside the manifest it was resolved against
#[derive(Debug, Clone, PartialEq, Eq)]
struct SegmentRef {
    world: String,
    stage: Stage,
    position: usize,
}

impl SegmentRef {
    fn get<'a>(&self, pack: &'a ActivePack) -> Option<&'a Segment> {
        pack.manifest.pipelines.segments(&self.world, self.stage).get(self.position)
    }
}

#[derive(Debug, Clone, Default)]
struct LookupCache {
    generation: u64,
    signature: String,
    entries: HashMap<String, Option<SegmentRef>>,
}

impl LookupCache {
    fn is_current(&self, generation: u64, signature: &str) -> bool {
        self.generation == generation && self.signature == signature
    }
}

/// Resolves host requests and dispatch lists against an [`EngineState`]
#[derive(Debug, Default)]
pub struct PipelineResolver {
    cache: RwLock<Arc<LookupCache>>,
    warned: WarnOnce,
    requests: AtomicU64,
    cache_hits: AtomicU64,
    segment_hits: AtomicU64,
}

impl PipelineResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Finds the segment serving `request_path`
    ///
    /// # Arguments
    /// * `state` - Current engine state
    /// * `worlds` - World candidates, ending with `any`
    /// * `request_path` - Host resource path of the requested shader
    pub fn resolve<'a>(&self, state: &'a EngineState, worlds: &[String], request_path: &str) -> Option<&'a Segment> {
        let pack = state.pack.as_ref()?;
        let normalized = normalize_request_path(request_path);
        if normalized.trim().is_empty() {
            return None;
        }
        self.requests.fetch_add(1, Ordering::Relaxed);
        let signature = worlds.join(">");

        let snapshot = self.cache.read().clone();
        if snapshot.generation != state.generation {
            self.reset_for(state.generation);
        } else if let Some(cached) = snapshot.entries.get(&normalized).filter(|_| snapshot.signature == signature) {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
            return cached.as_ref().and_then(|found| found.get(pack));
        }

        let found = self.match_segments(pack, worlds, &normalized);
        if found.is_some() {
            self.segment_hits.fetch_add(1, Ordering::Relaxed);
        }
        self.publish_entry(state.generation, signature, normalized, found.clone());
        found.and_then(|found| found.get(pack))
    }

    /// Starts an empty memo for `generation` unless another lookup already did
    fn reset_for(&self, generation: u64) {
        let mut cache = self.cache.write();
        if cache.generation != generation {
            *cache = Arc::new(LookupCache {
                generation,
                ..LookupCache::default()
            });
            self.warned.clear();
        }
    }

    /// Swaps in a copy of the memo holding `request`
    fn publish_entry(&self, generation: u64, signature: String, request: String, found: Option<SegmentRef>) {
        let mut cache = self.cache.write();
        if cache.generation != generation {
            // a newer state was published while matching
            return;
        }
        let mut next = if cache.is_current(generation, &signature) && cache.entries.len() < LOOKUP_CACHE_LIMIT {
            LookupCache::clone(&cache)
        } else {
            LookupCache {
                generation,
                signature,
                entries: HashMap::new(),
            }
        };
        next.entries.insert(request, found);
        *cache = Arc::new(next);
    }

    /// Enabled segments of every enabled stage in render order
    ///
    /// Each stage contributes the segments of the first world candidate
    /// that has at least one enabled segment for it.
    pub fn resolve_all<'a>(&self, state: &'a EngineState, worlds: &[String]) -> Vec<&'a Segment> {
        let Some(pack) = state.pack.as_ref() else {
            return Vec::new();
        };
        let mut resolved = Vec::new();
        for stage in Stage::ALL {
            if !pack.manifest.stage_enabled(stage) {
                continue;
            }
            for world in worlds {
                let enabled: Vec<&Segment> = pack.manifest.pipelines.segments(world, stage).iter().filter(|s| self.is_enabled(pack, s)).collect();
                if !enabled.is_empty() {
                    resolved.extend(enabled);
                    break;
                }
            }
        }
        resolved
    }

    pub fn stats(&self) -> LookupStats {
        LookupStats {
            requests: self.requests.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            segment_hits: self.segment_hits.load(Ordering::Relaxed),
        }
    }

    /// Drops memoized lookups and the invalid-expression warnings
    pub fn invalidate(&self) {
        let mut cache = self.cache.write();
        *cache = Arc::new(LookupCache {
            generation: cache.generation,
            ..LookupCache::default()
        });
        self.warned.clear();
    }

    fn match_segments(&self, pack: &ActivePack, worlds: &[String], request: &str) -> Option<SegmentRef> {
        for world in worlds {
            if !pack.manifest.pipelines.has_world(world) {
                continue;
            }
            for stage in Stage::ALL {
                if !pack.manifest.stage_enabled(stage) {
                    continue;
                }
                let enabled: Vec<(usize, &Segment)> =
                    pack.manifest.pipelines.segments(world, stage).iter().enumerate().filter(|(_, s)| self.is_enabled(pack, s)).collect();
                let Some((first, first_segment)) = enabled.first() else {
                    continue;
                };
                if !first_segment.matches_request(request) {
                    continue;
                }
                let position = enabled
                    .iter()
                    .find(|(_, segment)| segment.resolve_source_path(request).is_some())
                    .map(|(position, _)| *position)
                    .unwrap_or(*first);
                return Some(SegmentRef {
                    world: world.clone(),
                    stage,
                    position,
                });
            }
        }
        None
    }

    /// Evaluates the segment's enabled expression; blank means enabled
    pub fn is_enabled(&self, pack: &ActivePack, segment: &Segment) -> bool {
        let Some(expression) = segment.enabled.as_deref().filter(|e| !e.trim().is_empty()) else {
            return true;
        };
        match expression::evaluate(expression, &enabled_variables(pack, segment)) {
            Ok(enabled) => enabled,
            Err(e) => {
                if self.warned.first(&format!("{}|{expression}", segment.key())) {
                    tracing::warn!(
                        "Invalid enabled expression '{expression}' for segment {}:{}#{} ({e})",
                        segment.stage,
                        segment.name,
                        segment.index
                    );
                }
                false
            }
        }
    }
}

/// Bindings visible to enabled expressions
///
/// Built-ins bind first, then segment params, then option values; earlier
/// bindings shadow later ones under every alias.
fn enabled_variables(pack: &ActivePack, segment: &Segment) -> ExprVariables {
    let mut variables = ExprVariables::new();
    variables.insert("true", ExprValue::Bool(true));
    variables.insert("false", ExprValue::Bool(false));
    variables.insert("segment_index", ExprValue::from(segment.index as i64));
    variables.insert("stage", ExprValue::from(segment.stage.as_str()));
    variables.insert("world", ExprValue::from(segment.world.as_str()));
    for (key, value) in &segment.params {
        variables.insert_aliased(key, ExprValue::from(value.as_str()));
    }
    for (decl, leaf) in pack.manifest.options.leaves() {
        let value = match pack.value_of(decl, leaf) {
            OptionValue::Bool(b) => ExprValue::Bool(*b),
            OptionValue::Int(n) => ExprValue::from(*n),
            OptionValue::Float(n) => ExprValue::Number(*n),
            raw @ (OptionValue::Str(_) | OptionValue::Enum(_)) => ExprValue::Text(leaf.raw_text(raw)),
        };
        variables.insert_aliased(&decl.path, value);
    }
    variables
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OptionConfig;
    use crate::test_support::load_fixture;
    use crate::world::world_candidates;
    use sulkan_pack::DirectoryStorage;

    fn fixture_state(root: &std::path::Path, generation: u64) -> EngineState {
        let manifest = load_fixture(root);
        let config = OptionConfig::defaults(&manifest.options);
        let storage = Arc::new(DirectoryStorage::new(root.to_path_buf()));
        EngineState::new(generation, Some(ActivePack::new(manifest, storage, root.to_path_buf(), config)))
    }

    fn set_option(state: &EngineState, generation: u64, path: &str, value: OptionValue) -> EngineState {
        let pack = state.pack.as_ref().unwrap();
        let mut config = (*pack.config).clone();
        config.set(&pack.manifest.options, path, value).unwrap();
        EngineState::new(generation, Some(pack.with_config(config)))
    }

    #[test]
    fn test_resolves_owning_segment() {
        let dir = tempfile::tempdir().unwrap();
        let state = fixture_state(dir.path(), 1);
        let resolver = PipelineResolver::new();
        let worlds = world_candidates(Some("minecraft:overworld"));

        // bloom defaults to true, which disables terrain_lite
        let terrain = resolver.resolve(&state, &worlds, "minecraft:shaders/basic/terrain/terrain.fsh").unwrap();
        assert_eq!(terrain.name, "terrain");
        let vertex = resolver.resolve(&state, &worlds, "shaders/basic/terrain/terrain.vsh").unwrap();
        assert_eq!(vertex.key(), "gbuffer:terrain#1");

        let quad = resolver.resolve(&state, &worlds, "shaders/core/screenquad/screenquad.fsh").unwrap();
        assert_eq!(quad.stage, Stage::Final);
        assert!(resolver.resolve(&state, &worlds, "shaders/unknown/foo.fsh").is_none());
    }

    #[test]
    fn test_lookup_memo_is_copy_on_write() {
        let dir = tempfile::tempdir().unwrap();
        let state = fixture_state(dir.path(), 1);
        let resolver = PipelineResolver::new();
        let worlds = world_candidates(None);

        resolver.resolve(&state, &worlds, "shaders/basic/terrain/terrain.fsh");
        let before = resolver.cache.read().clone();
        resolver.resolve(&state, &worlds, "shaders/core/screenquad/screenquad.fsh");
        assert_eq!(before.entries.len(), 1);
        assert_eq!(resolver.cache.read().entries.len(), 2);

        // readers holding a snapshot are not blocked by a concurrent insert
        let held = resolver.cache.read().clone();
        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    for request in ["shaders/basic/terrain/terrain.fsh", "shaders/post/blit/blit.fsh", "shaders/unknown/foo.fsh"] {
                        resolver.resolve(&state, &worlds, request);
                    }
                });
            }
        });
        assert_eq!(held.entries.len(), 2);
        let current = resolver.cache.read().clone();
        assert!(current.is_current(1, &worlds.join(">")));
        assert!(current.entries.contains_key("shaders/unknown/foo.fsh"));
        assert_eq!(resolver.stats().requests, 14);
        assert_eq!(
            resolver.resolve(&state, &worlds, "shaders/basic/terrain/terrain.fsh").map(Segment::key).as_deref(),
            Some("gbuffer:terrain#1")
        );
    }

    #[test]
    fn test_world_candidates_pick_scoped_segments() {
        let dir = tempfile::tempdir().unwrap();
        let state = fixture_state(dir.path(), 1);
        let resolver = PipelineResolver::new();

        let nether = world_candidates(Some("minecraft:the_nether"));
        let segment = resolver.resolve(&state, &nether, "shaders/basic/terrain/terrain.fsh").unwrap();
        assert_eq!(segment.world, "world-1");
        assert_eq!(segment.name, "nether");

        let overworld = world_candidates(Some("minecraft:overworld"));
        let segment = resolver.resolve(&state, &overworld, "shaders/basic/terrain/terrain.fsh").unwrap();
        assert_eq!(segment.world, "any");
    }

    #[test]
    fn test_cache_hits_and_invalidation() {
        let dir = tempfile::tempdir().unwrap();
        let state = fixture_state(dir.path(), 1);
        let resolver = PipelineResolver::new();
        let worlds = world_candidates(None);

        resolver.resolve(&state, &worlds, "shaders/basic/terrain/terrain.fsh");
        resolver.resolve(&state, &worlds, "shaders/basic/terrain/terrain.fsh");
        resolver.resolve(&state, &worlds, "shaders/unknown/foo.fsh");
        resolver.resolve(&state, &worlds, "shaders/unknown/foo.fsh");
        assert_eq!(resolver.stats(), LookupStats { requests: 4, cache_hits: 2, segment_hits: 1 });

        // disabling bloom enables terrain_lite under a new generation
        let updated = set_option(&state, 2, "bloom", OptionValue::Bool(false));
        let segment = resolver.resolve(&updated, &worlds, "shaders/basic/terrain/terrain.fsh").unwrap();
        assert_eq!(segment.name, "terrain_lite");
        assert_eq!(resolver.stats().cache_hits, 2);
    }

    #[test]
    fn test_resolve_all_in_stage_order() {
        let dir = tempfile::tempdir().unwrap();
        let state = fixture_state(dir.path(), 1);
        let resolver = PipelineResolver::new();

        let keys: Vec<String> = resolver.resolve_all(&state, &world_candidates(None)).iter().map(|s| s.key()).collect();
        assert_eq!(keys, ["gbuffer:terrain#1", "postprocess:blur#0", "postprocess:composite#1", "final:main#0"]);

        let nether: Vec<String> = resolver.resolve_all(&state, &world_candidates(Some("minecraft:the_nether"))).iter().map(|s| s.key()).collect();
        assert_eq!(nether[0], "gbuffer:nether#0");
        assert!(resolver.resolve_all(&EngineState::default(), &world_candidates(None)).is_empty());
    }

    #[test]
    fn test_enabled_variables_and_invalid_expressions() {
        let dir = tempfile::tempdir().unwrap();
        let state = fixture_state(dir.path(), 1);
        let pack = state.pack.as_ref().unwrap();
        let resolver = PipelineResolver::new();
        let mut segment = pack.manifest.pipelines.segments("any", Stage::Gbuffer)[1].clone();

        for (expression, expected) in [
            ("quality == 'medium' && stage == \"gbuffer\"", true),
            ("SAMPLES == 4 && segment_index == 1", true),
            ("world == 'any' && tint == 'warm'", true),
            ("final_style == 'toon'", false),
            ("exposure != 1", false),
            ("undeclared", false),
        ] {
            segment.enabled = Some(expression.to_string());
            assert_eq!(resolver.is_enabled(pack, &segment), expected, "{expression}");
        }

        segment.enabled = Some("bloom &&".to_string());
        assert!(!resolver.is_enabled(pack, &segment));
        assert!(!resolver.is_enabled(pack, &segment));
        assert_eq!(resolver.warned.len(), 1);
        resolver.invalidate();
        assert!(resolver.warned.is_empty());
    }
}
