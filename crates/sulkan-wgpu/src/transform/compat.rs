//! Shader source compatibility heuristics and fallback candidates
//!
//! Packs written for legacy OpenGL pipelines often ship sources the target
//! Vulkan-style GLSL profile cannot compile. Rather than parse GLSL, a few
//! patterns decide whether a source is worth handing to the compiler, and a
//! set of conventional fallback paths (`.sulkan`/`.vulkan` variants and the
//! `shaders/sulkan/`, `shaders/vulkan/` roots) is searched for a port.

use super::{SHADERS_PREFIX, add_with_extension_alias, normalize_path};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use sulkan_pack::options::auto_extract::is_shader_text_path;

static VERSION_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^[ \t]*#version[ \t]+(\d+)(?:[ \t]+(\w+))?").expect("valid regex"));

static LEGACY_KEYWORD_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^\s*(attribute|varying)\b").expect("valid regex"));

static LEGACY_BUILTIN_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(gl_Vertex|gl_Normal|gl_Color|gl_MultiTexCoord[0-9]+|gl_TextureMatrix|gl_ModelViewMatrix|gl_NormalMatrix)\b").expect("valid regex")
});

static BARE_USER_INTERFACE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?m)^\s*(?:flat\s+|smooth\s+|noperspective\s+|centroid\s+|sample\s+|invariant\s+)*(in|out)\s+[A-Za-z_][A-Za-z0-9_]*\s+[A-Za-z_][A-Za-z0-9_]*(\s*\[[^\]]*\])?\s*;",
    )
    .expect("valid regex")
});

static UNIFORM_DECLARATION_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*uniform\s+([A-Za-z_][A-Za-z0-9_]*)\s+[A-Za-z_][A-Za-z0-9_]*(\s*\[[^\]]*\])?\s*;").expect("valid regex"));

/// Type name prefixes of opaque uniforms, which may stand outside a block
const OPAQUE_TYPE_PREFIXES: &[&str] = &["sampler", "image", "texture", "subpassInput", "accelerationStructure"];

/// Suffixes tried before the extension, e.g. `a.fsh` -> `a.sulkan.fsh`
const VARIANT_SUFFIXES: &[&str] = &[".sulkan", ".vulkan"];

/// Roots tried in place of `shaders/`
const VARIANT_ROOTS: &[&str] = &["shaders/sulkan/", "shaders/vulkan/"];

/// Thresholds of the compatibility heuristics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompatPolicy {
    /// Lowest accepted `#version`
    pub min_version: u32,
    /// Reject `#version ... compatibility`
    pub reject_compatibility_profile: bool,
    /// Reject `gl_FragData[`, `attribute`/`varying` and fixed-function built-ins
    pub reject_legacy_constructs: bool,
    /// Reject `in`/`out` declarations without an explicit location
    pub reject_bare_interfaces: bool,
    /// Reject non-opaque uniforms declared outside a block
    pub reject_loose_uniforms: bool,
}

impl Default for CompatPolicy {
    fn default() -> Self {
        Self {
            min_version: 450,
            reject_compatibility_profile: true,
            reject_legacy_constructs: true,
            reject_bare_interfaces: true,
            reject_loose_uniforms: true,
        }
    }
}

impl CompatPolicy {
    /// Returns true if `source` loaded from `path` looks usable
    ///
    /// Non-shader files always pass. Compute and geometry sources are only
    /// checked for their version pragma.
    pub fn is_path_compatible(&self, path: &str, source: &str) -> bool {
        let lower = normalize_path(path).to_ascii_lowercase();
        if !is_shader_text_path(&lower) {
            return true;
        }
        if [".csh", ".comp", ".gsh", ".geom"].iter().any(|ext| lower.ends_with(ext)) {
            return self.has_compatible_version(source);
        }
        self.is_likely_compatible(source)
    }

    /// Checks the `#version` pragma against `min_version` and the profile
    pub fn has_compatible_version(&self, source: &str) -> bool {
        let Some(caps) = VERSION_PATTERN.captures(source) else {
            return false;
        };
        let Ok(version) = caps[1].parse::<u32>() else {
            return false;
        };
        let compatibility = caps.get(2).is_some_and(|profile| profile.as_str().eq_ignore_ascii_case("compatibility"));
        version >= self.min_version && !(self.reject_compatibility_profile && compatibility)
    }

    /// Full heuristic for vertex, fragment and include sources
    pub fn is_likely_compatible(&self, source: &str) -> bool {
        if !self.has_compatible_version(source) {
            return false;
        }
        if self.reject_legacy_constructs
            && (source.contains("gl_FragData[") || LEGACY_KEYWORD_PATTERN.is_match(source) || LEGACY_BUILTIN_PATTERN.is_match(source))
        {
            return false;
        }
        if self.reject_bare_interfaces && BARE_USER_INTERFACE_PATTERN.is_match(source) {
            return false;
        }
        !(self.reject_loose_uniforms && has_loose_uniform(source))
    }
}

/// Byte offset just past the `#version` pragma, if any
pub(crate) fn version_pragma_end(source: &str) -> Option<usize> {
    VERSION_PATTERN.find(source).map(|found| found.end())
}

fn has_loose_uniform(source: &str) -> bool {
    UNIFORM_DECLARATION_PATTERN.captures_iter(source).any(|caps| {
        let ty = &caps[1];
        ty != "atomic_uint" && !OPAQUE_TYPE_PREFIXES.iter().any(|prefix| ty.starts_with(prefix))
    })
}

/// Adds `path`, its extension alias and its compatibility variants to `output`
pub fn add_with_compat_candidates(output: &mut Vec<String>, path: &str) {
    let normalized = normalize_path(path);
    if normalized.trim().is_empty() {
        return;
    }
    add_with_extension_alias(output, &normalized);

    let slash = normalized.rfind('/');
    if let Some(dot) = normalized.rfind('.').filter(|dot| slash.is_none_or(|slash| *dot > slash)) {
        let (base, ext) = normalized.split_at(dot);
        for suffix in VARIANT_SUFFIXES {
            add_with_extension_alias(output, &format!("{base}{suffix}{ext}"));
        }
    }
    if let Some(relative) = normalized.strip_prefix(SHADERS_PREFIX) {
        for root in VARIANT_ROOTS {
            add_with_extension_alias(output, &normalize_path(&format!("{root}{relative}")));
        }
    }
}

/// Ordered source candidates for a pack shader path
///
/// World-scoped copies `shaders/<world>/<rel>` come first for every world
/// candidate that names a directory, then the path itself; each with its
/// compatibility variants.
pub fn source_candidates(path: &str, worlds: &[String]) -> Vec<String> {
    let normalized = normalize_path(path);
    let mut candidates = Vec::new();
    if let Some(relative) = normalized.strip_prefix(SHADERS_PREFIX).filter(|relative| !relative.trim().is_empty()) {
        for world in worlds {
            let world = normalize_path(world);
            if world.trim().is_empty() || world == "any" || world.contains(':') {
                continue;
            }
            add_with_compat_candidates(&mut candidates, &format!("{SHADERS_PREFIX}{world}/{relative}"));
        }
    }
    add_with_compat_candidates(&mut candidates, &normalized);
    candidates
}
