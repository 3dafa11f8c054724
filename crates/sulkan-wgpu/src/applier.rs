//! Shader source replacement
//!
//! [`ShaderApplier`] answers the host's "give me the source for this shader
//! resource" calls and builds the compute sources the dispatcher compiles.
//! Source precedence for a host request is:
//!
//! 1. a `[use_file]` enum option targeting the request, by selected render value
//! 2. the owning segment's source for the requested shader type
//! 3. a pack file at the request path, for include resources
//! 4. the host's own text, only when option markers or segment params apply
//!
//! Whatever is chosen then goes through include expansion, parameter and
//! option markers and the interface define block. Every read is cached,
//! misses included, until the engine generation changes.

use crate::host::EngineHost;
use crate::settings::EngineSettings;
use crate::state::ActivePack;
use crate::transform::compat::{CompatPolicy, source_candidates};
use crate::transform::defines::inject_defines;
use crate::transform::includes::expand_includes;
use crate::transform::markers::{apply_option_markers, apply_params};
use crate::transform::{SHADERS_PREFIX, ShaderSources, add_with_extension_alias, is_include_resource, normalize_path};
use crate::warn_once::WarnOnce;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use sulkan_pack::options::MarkerKey;
use sulkan_pack::options::auto_extract::is_shader_text_path;
use sulkan_pack::pipelines::segment::HOST_ASSET_PREFIX;
use sulkan_pack::{LeafOption, OptionValue, Segment};
use xxhash_rust::xxh3::xxh3_64;

/// Distinct exported files remembered before the set is reset
pub const MAX_EXPORTED_SHADERS: usize = 4096;

/// Global settings that turn on debug export; the first one present decides
const EXPORT_SWITCH_KEYS: &[&str] = &[
    "debug.save_shaders",
    "debug.save_shader",
    "debug_save_shaders",
    "shader_debug_save",
    "shader_export_debug",
    "debug.export_shaders",
    "debug.dump_shaders",
];

/// Read and lookup counters of the current applier cache
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplierStats {
    pub target_lookups: u64,
    pub target_hits: u64,
    pub pack_reads: u64,
    pub pack_hits: u64,
    pub host_reads: u64,
    pub host_hits: u64,
}

/// A fully transformed pipeline source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedSource {
    /// Pack path the source was read from
    pub path: String,
    pub source: String,
}

/// Everything a transform needs from the engine for one call
pub struct ApplyContext<'a> {
    pub pack: &'a ActivePack,
    pub generation: u64,
    pub settings: &'a EngineSettings,
    pub host: &'a dyn EngineHost,
    /// World candidates of the current world, ending with `any`
    pub worlds: &'a [String],
}

/// Pack-relative shader path of a host resource locator
///
/// Only locators under the host asset root are considered. The result is
/// normalized and `None` unless it lies under `shaders/`.
pub fn relative_shader_path(locator: &str) -> Option<String> {
    let locator = locator.replace('\\', "/");
    let root = format!("/{HOST_ASSET_PREFIX}");
    let (index, offset) = match locator.find(&root) {
        Some(index) => (index, root.len()),
        None => (locator.find(&format!("!{root}"))?, root.len() + 1),
    };
    let relative = normalize_path(&locator[index + offset..]);
    relative.starts_with(SHADERS_PREFIX).then_some(relative)
}

/// Option index key for a target path: normalized and rooted at `shaders/`
fn normalize_target(target: &str) -> String {
    let normalized = normalize_path(target);
    if normalized.starts_with(SHADERS_PREFIX) { normalized } else { format!("{SHADERS_PREFIX}{normalized}") }
}

/// Adds `path`, its alias, and `shaders/<file name>` with its alias
fn add_target_candidates(output: &mut Vec<String>, path: &str) {
    let normalized = normalize_path(path);
    add_with_extension_alias(output, &normalized);
    if let Some((_, file)) = normalized.rsplit_once('/').filter(|(_, file)| !file.is_empty()) {
        add_with_extension_alias(output, &format!("{SHADERS_PREFIX}{file}"));
    }
}

#[derive(Debug)]
struct ApplierCache {
    generation: u64,
    /// Option paths by normalized target, in declaration order
    options_by_target: HashMap<String, Vec<String>>,
    pack_text: Mutex<HashMap<String, Option<String>>>,
    host_text: Mutex<HashMap<String, Option<String>>>,
    incompatible: WarnOnce,
    fallbacks: WarnOnce,
    exported: Mutex<HashSet<String>>,
    export_errors: WarnOnce,
    target_lookups: AtomicU64,
    target_hits: AtomicU64,
    pack_reads: AtomicU64,
    pack_hits: AtomicU64,
    host_reads: AtomicU64,
    host_hits: AtomicU64,
}

impl ApplierCache {
    fn build(pack: &ActivePack, generation: u64) -> Self {
        let mut options_by_target: HashMap<String, Vec<String>> = HashMap::new();
        for (decl, leaf) in pack.manifest.options.leaves() {
            if leaf.target.trim().is_empty() {
                continue;
            }
            options_by_target.entry(normalize_target(&leaf.target)).or_default().push(decl.path.clone());
        }
        Self {
            generation,
            options_by_target,
            pack_text: Mutex::default(),
            host_text: Mutex::default(),
            incompatible: WarnOnce::new(),
            fallbacks: WarnOnce::new(),
            exported: Mutex::default(),
            export_errors: WarnOnce::new(),
            target_lookups: AtomicU64::new(0),
            target_hits: AtomicU64::new(0),
            pack_reads: AtomicU64::new(0),
            pack_hits: AtomicU64::new(0),
            host_reads: AtomicU64::new(0),
            host_hits: AtomicU64::new(0),
        }
    }

    fn stats(&self) -> ApplierStats {
        ApplierStats {
            target_lookups: self.target_lookups.load(Ordering::Relaxed),
            target_hits: self.target_hits.load(Ordering::Relaxed),
            pack_reads: self.pack_reads.load(Ordering::Relaxed),
            pack_hits: self.pack_hits.load(Ordering::Relaxed),
            host_reads: self.host_reads.load(Ordering::Relaxed),
            host_hits: self.host_hits.load(Ordering::Relaxed),
        }
    }

    /// Paths of the options targeting any of `candidates`, deduplicated
    fn target_options(&self, candidates: &[String]) -> Vec<&str> {
        let mut matched: Vec<&str> = Vec::new();
        for candidate in candidates {
            let options = self.options_by_target.get(candidate).filter(|options| !options.is_empty());
            self.target_lookups.fetch_add(1, Ordering::Relaxed);
            let Some(options) = options else {
                continue;
            };
            self.target_hits.fetch_add(1, Ordering::Relaxed);
            for path in options {
                if !matched.contains(&path.as_str()) {
                    matched.push(path);
                }
            }
        }
        matched
    }

    fn read_pack_text(&self, pack: &ActivePack, path: &str) -> Option<String> {
        let normalized = normalize_path(path);
        self.pack_reads.fetch_add(1, Ordering::Relaxed);
        if let Some(cached) = self.pack_text.lock().get(&normalized) {
            self.pack_hits.fetch_add(1, Ordering::Relaxed);
            return cached.clone();
        }
        let loaded = if pack.storage.exists(&normalized) {
            match pack.storage.read_string(&normalized) {
                Ok(text) => Some(text),
                Err(e) => {
                    tracing::warn!("Failed to read shaderpack file {normalized}: {e}");
                    None
                }
            }
        } else {
            None
        };
        self.pack_text.lock().entry(normalized).or_insert(loaded).clone()
    }

    fn read_host_text(&self, host: &dyn EngineHost, locator: &str) -> Option<String> {
        self.host_reads.fetch_add(1, Ordering::Relaxed);
        if let Some(cached) = self.host_text.lock().get(locator) {
            self.host_hits.fetch_add(1, Ordering::Relaxed);
            return cached.clone();
        }
        let loaded = host.read_resource(locator);
        if loaded.is_none() {
            tracing::debug!("Host has no source for {locator}");
        }
        self.host_text.lock().entry(locator.to_string()).or_insert(loaded).clone()
    }
}

/// Include lookups backed by the applier cache and the host's bundled shaders
struct CachedSources<'a> {
    cache: &'a ApplierCache,
    pack: &'a ActivePack,
    host: &'a dyn EngineHost,
}

impl ShaderSources for CachedSources<'_> {
    fn pack_text(&self, path: &str) -> Option<String> {
        self.cache.read_pack_text(self.pack, path)
    }

    fn bundled_text(&self, path: &str) -> Option<String> {
        self.host.read_bundled_shader(path)
    }
}

/// Serves transformed shader sources for the active pack
#[derive(Debug, Default)]
pub struct ShaderApplier {
    cache: Mutex<Option<Arc<ApplierCache>>>,
}

impl ShaderApplier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops every cached read, warning set and export record
    pub fn invalidate(&self) {
        *self.cache.lock() = None;
    }

    pub fn stats(&self) -> ApplierStats {
        self.cache.lock().as_ref().map(|cache| cache.stats()).unwrap_or_default()
    }

    fn ensure_cache(&self, ctx: &ApplyContext<'_>) -> Arc<ApplierCache> {
        let mut slot = self.cache.lock();
        match slot.as_ref() {
            Some(cache) if cache.generation == ctx.generation => cache.clone(),
            _ => {
                let rebuilt = Arc::new(ApplierCache::build(ctx.pack, ctx.generation));
                *slot = Some(rebuilt.clone());
                rebuilt
            }
        }
    }

    /// Replacement bytes for the host resource `locator`, `None` to keep the host's
    ///
    /// # Arguments
    /// * `ctx` - Active pack and host services
    /// * `locator` - Host resource locator, passed back to [`EngineHost::read_resource`]
    /// * `target` - Normalized pack-relative path of the request, see [`relative_shader_path`]
    /// * `segment` - Segment owning the request, if any
    pub fn replace(&self, ctx: &ApplyContext<'_>, locator: &str, target: &str, segment: Option<&Segment>) -> Option<Bytes> {
        let cache = self.ensure_cache(ctx);
        let target = normalize_path(target);

        let mut candidates = Vec::new();
        add_target_candidates(&mut candidates, &target);
        let mapped = segment.and_then(|segment| {
            segment
                .resolve_source_path(&target)
                .or_else(|| candidates.iter().find_map(|candidate| segment.resolve_source_path(candidate)))
                .map(str::to_string)
        });
        if let Some(mapped) = &mapped {
            add_target_candidates(&mut candidates, mapped);
        }

        let (replacement, markers) = split_target_options(&cache, ctx.pack, &candidates);

        let mut loaded: Option<(String, String)> = None;
        if let Some(path) = replacement.and_then(|(leaf, value)| replacement_path(leaf, value)) {
            loaded = self.resolve_source(&cache, ctx, path, "replace");
        }
        if loaded.is_none() {
            if let Some(mapped) = &mapped {
                loaded = self.resolve_source(&cache, ctx, mapped, "mapped");
            }
        }
        if loaded.is_none() && is_include_resource(&target) {
            loaded = self.resolve_raw_source(&cache, ctx, &target, "include");
        }
        let has_params = segment.is_some_and(|segment| !segment.params.is_empty());
        let (source_path, source) = match loaded {
            Some(found) => found,
            None if markers.is_empty() && !has_params => return None,
            None => (target.clone(), cache.read_host_text(ctx.host, locator)?),
        };

        let sources = CachedSources {
            cache: &cache,
            pack: ctx.pack,
            host: ctx.host,
        };
        let mut source = expand_includes(&source, &source_path, &sources);
        if let Some(segment) = segment.filter(|segment| !segment.params.is_empty()) {
            source = apply_params(&source, &segment.params);
        }
        if !markers.is_empty() {
            source = apply_option_markers(&source, markers);
        }
        if let Some(segment) = segment.filter(|_| is_shader_text_path(&target)) {
            source = inject_defines(&source, segment, &ctx.pack.manifest.global, &ctx.pack.manifest.ids, &target);
        }
        self.export(&cache, ctx, &target, &source_path, segment, &source);
        Some(Bytes::from(source))
    }

    /// Loads and transforms a segment source straight from the pack
    ///
    /// Used for compute sources, which the host never requests itself. Option
    /// targets are matched against `path` the same way host requests are.
    pub fn load_pipeline_source(&self, ctx: &ApplyContext<'_>, segment: &Segment, path: &str, kind: &str) -> Option<LoadedSource> {
        if path.trim().is_empty() {
            return None;
        }
        let cache = self.ensure_cache(ctx);
        let mut candidates = Vec::new();
        add_target_candidates(&mut candidates, path);
        let (replacement, markers) = split_target_options(&cache, ctx.pack, &candidates);

        let (resolved, source) = replacement
            .and_then(|(leaf, value)| replacement_path(leaf, value))
            .and_then(|replaced| self.resolve_source(&cache, ctx, replaced, "replace"))
            .or_else(|| self.resolve_source(&cache, ctx, path, kind))?;
        let sources = CachedSources {
            cache: &cache,
            pack: ctx.pack,
            host: ctx.host,
        };
        let mut source = expand_includes(&source, &resolved, &sources);
        if !segment.params.is_empty() {
            source = apply_params(&source, &segment.params);
        }
        if !markers.is_empty() {
            source = apply_option_markers(&source, markers);
        }
        if is_shader_text_path(&resolved) {
            source = inject_defines(&source, segment, &ctx.pack.manifest.global, &ctx.pack.manifest.ids, &resolved);
        }
        self.export(&cache, ctx, &resolved, &resolved, Some(segment), &source);
        Some(LoadedSource { path: resolved, source })
    }

    /// First readable candidate that passes the compatibility policy
    fn resolve_source(&self, cache: &ApplierCache, ctx: &ApplyContext<'_>, path: &str, kind: &str) -> Option<(String, String)> {
        let normalized = normalize_path(path);
        let policy: &CompatPolicy = &ctx.settings.compat;
        for candidate in source_candidates(&normalized, ctx.worlds) {
            let Some(source) = cache.read_pack_text(ctx.pack, &candidate) else {
                continue;
            };
            if policy.is_path_compatible(&candidate, &source) {
                log_fallback(cache, kind, &normalized, &candidate);
                return Some((candidate, source));
            }
            if cache.incompatible.first(&format!("{kind}:{candidate}")) {
                tracing::warn!("Skip incompatible {kind} shader source '{candidate}'.");
            }
        }
        None
    }

    /// First readable candidate, without the compatibility check
    fn resolve_raw_source(&self, cache: &ApplierCache, ctx: &ApplyContext<'_>, path: &str, kind: &str) -> Option<(String, String)> {
        let normalized = normalize_path(path);
        source_candidates(&normalized, ctx.worlds).into_iter().find_map(|candidate| {
            let source = cache.read_pack_text(ctx.pack, &candidate)?;
            log_fallback(cache, kind, &normalized, &candidate);
            Some((candidate, source))
        })
    }

    fn export(&self, cache: &ApplierCache, ctx: &ApplyContext<'_>, request: &str, resolved: &str, segment: Option<&Segment>, source: &str) {
        if source.trim().is_empty() || !export_enabled(ctx) {
            return;
        }
        let stage = match segment {
            Some(segment) => segment.stage.as_str(),
            None => infer_stage(request),
        };
        let hash = format!("{:016x}", xxh3_64(source.as_bytes()));
        let mut path = normalize_path(if resolved.trim().is_empty() { request } else { resolved });
        if path.trim().is_empty() {
            path = format!("unknown/generated_{hash}.glsl");
        }
        if !path.contains('.') {
            path.push_str(".glsl");
        }
        let key = format!("{stage}|{path}|{hash}");
        {
            let mut exported = cache.exported.lock();
            if !exported.insert(key.clone()) {
                return;
            }
            if exported.len() > MAX_EXPORTED_SHADERS {
                exported.clear();
                exported.insert(key);
            }
        }

        let target = export_path(&ctx.settings.debug_export_dir, &ctx.pack.file_name(), stage, &path);
        let written = match target.parent() {
            Some(parent) => fs::create_dir_all(parent).and_then(|_| fs::write(&target, source)),
            None => fs::write(&target, source),
        };
        if let Err(e) = written {
            if cache.export_errors.first(&target.display().to_string()) {
                tracing::warn!("Failed to export shader source '{}': {e}", target.display());
            }
        }
    }
}

fn log_fallback(cache: &ApplierCache, kind: &str, requested: &str, resolved: &str) {
    if requested != resolved && cache.fallbacks.first(&format!("{kind}:{requested}->{resolved}")) {
        tracing::info!("Using {kind} compatibility shader source '{resolved}' for '{requested}'.");
    }
}

/// A leaf option and its current value
type BoundOption<'a> = (&'a LeafOption, &'a OptionValue);

/// Options targeting any of `candidates`: the first `[use_file]` option and every marker option
fn split_target_options<'a>(cache: &ApplierCache, pack: &'a ActivePack, candidates: &[String]) -> (Option<BoundOption<'a>>, Vec<BoundOption<'a>>) {
    let mut replacement: Option<BoundOption<'a>> = None;
    let mut markers: Vec<BoundOption<'a>> = Vec::new();
    for path in cache.target_options(candidates) {
        let Some((decl, leaf)) = pack.manifest.options.get(path).and_then(|decl| decl.leaf().map(|leaf| (decl, leaf))) else {
            continue;
        };
        let value = pack.value_of(decl, leaf);
        match leaf.marker {
            MarkerKey::UseFile => {
                replacement.get_or_insert((leaf, value));
            }
            MarkerKey::Marker(_) => markers.push((leaf, value)),
        }
    }
    (replacement, markers)
}

/// Render value selected by a `[use_file]` option
fn replacement_path<'a>(leaf: &'a LeafOption, value: &OptionValue) -> Option<&'a str> {
    let index = match value {
        OptionValue::Enum(index) => Some(*index),
        OptionValue::Str(raw) => leaf.enum_index(raw),
        _ => None,
    }?;
    leaf.render_values.get(index).map(String::as_str)
}

fn export_enabled(ctx: &ApplyContext<'_>) -> bool {
    if ctx.settings.debug_export_shaders {
        return true;
    }
    let global = &ctx.pack.manifest.global;
    EXPORT_SWITCH_KEYS
        .iter()
        .find(|key| global.get(key).is_some())
        .is_some_and(|key| global.get_bool(key, false))
}

/// Stage name guessed from a host shader path
fn infer_stage(path: &str) -> &'static str {
    let lower = normalize_path(path).to_ascii_lowercase();
    if lower.contains("terrain_earlyz") {
        "shadow"
    } else if lower.contains("terrain") {
        "gbuffer"
    } else if lower.contains("cloud") {
        "lighting"
    } else if lower.contains("rendertype_item_entity_translucent_cull") {
        "translucent"
    } else if lower.contains("blit") {
        "postprocess"
    } else if lower.contains("screenquad") || lower.contains("animate_sprite") {
        "final"
    } else {
        "unknown"
    }
}

fn export_path(root: &std::path::Path, pack: &str, stage: &str, path: &str) -> PathBuf {
    root.join(sanitize(pack)).join(sanitize(stage)).join(sanitize(path))
}

/// Makes `input` safe as a relative export path
fn sanitize(input: &str) -> String {
    let mapped: String = input
        .replace('\\', "/")
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '/' | '-') { c } else { '_' })
        .collect();
    let value = mapped.replace("../", "");
    let value = value.trim_matches('/');
    if value.trim().is_empty() { "unknown".to_string() } else { value.to_string() }
}
