//! Pipeline segment model
//!
//! A segment is one ordered unit of work inside a (world, stage). Segments are
//! immutable once the stage file that declares them has been parsed.

use super::render_state::{AlphaState, BlendState};
use super::stage::{PortMap, Stage};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::LazyLock;

static RENDER_TARGET_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^colortex([0-9]|1[0-5])$").expect("valid regex"));
static CUSTOM_RENDER_TARGET_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9_]{0,63}$").expect("valid regex"));
static BARE_TARGET_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^([0-9]|1[0-5])$").expect("valid regex"));
static COLOR_IMAGE_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^colorimg([0-5])$").expect("valid regex"));
static SHADOW_COLOR_IMAGE_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^shadowcolorimg([0-1])$").expect("valid regex"));

/// Resource prefix the host uses for its bundled shader assets
pub const HOST_ASSET_PREFIX: &str = "assets/vulkanmod/";

/// Which ping-pong buffer a segment reads by default
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PingPong {
    #[default]
    Main,
    Alt,
}

impl PingPong {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Main => "main",
            Self::Alt => "alt",
        }
    }

    pub fn is_alt(&self) -> bool {
        matches!(self, Self::Alt)
    }
}

/// Shader source slot of a segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceSlot {
    Vertex,
    Fragment,
    Geometry,
    Compute,
    Config,
}

impl SourceSlot {
    pub const ALL: [SourceSlot; 5] = [SourceSlot::Vertex, SourceSlot::Fragment, SourceSlot::Geometry, SourceSlot::Compute, SourceSlot::Config];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Vertex => "vertex",
            Self::Fragment => "fragment",
            Self::Geometry => "geometry",
            Self::Compute => "compute",
            Self::Config => "config",
        }
    }

    /// Infers the slot a request path addresses from its extension
    pub fn detect(path: &str) -> Option<Self> {
        let lower = path.to_ascii_lowercase();
        let ends = |exts: &[&str]| exts.iter().any(|ext| lower.ends_with(ext));
        if ends(&[".vsh", ".vert"]) {
            Some(Self::Vertex)
        } else if ends(&[".fsh", ".frag"]) {
            Some(Self::Fragment)
        } else if ends(&[".gsh", ".geom"]) {
            Some(Self::Geometry)
        } else if ends(&[".csh", ".comp"]) {
            Some(Self::Compute)
        } else if ends(&[".json"]) {
            Some(Self::Config)
        } else {
            None
        }
    }
}

impl fmt::Display for SourceSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shaderpack paths of a segment's sources
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSlots {
    pub vertex: Option<String>,
    pub fragment: Option<String>,
    pub geometry: Option<String>,
    pub compute: Option<String>,
    pub config: Option<String>,
}

impl SourceSlots {
    pub fn get(&self, slot: SourceSlot) -> Option<&str> {
        match slot {
            SourceSlot::Vertex => self.vertex.as_deref(),
            SourceSlot::Fragment => self.fragment.as_deref(),
            SourceSlot::Geometry => self.geometry.as_deref(),
            SourceSlot::Compute => self.compute.as_deref(),
            SourceSlot::Config => self.config.as_deref(),
        }
    }

    pub fn is_empty(&self) -> bool {
        SourceSlot::ALL.iter().all(|slot| self.get(*slot).is_none())
    }
}

/// One ordered unit of work within a (world, stage)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub world: String,
    pub stage: Stage,
    pub name: String,
    pub index: u32,
    pub inputs: PortMap,
    pub outputs: PortMap,
    pub sources: SourceSlots,
    /// Stage params merged with this segment's resolved params
    pub params: BTreeMap<String, String>,
    pub render_targets: Vec<String>,
    pub ping_pong: PingPong,
    pub flips: BTreeMap<String, bool>,
    pub work_groups: Option<[u32; 3]>,
    pub work_groups_render: Option<[u32; 3]>,
    pub images_read: Vec<String>,
    pub images_write: Vec<String>,
    /// Enabled expression; `None` means always enabled
    pub enabled: Option<String>,
    pub alpha: AlphaState,
    pub blend: BlendState,
    pub buffer_sizes: BTreeMap<String, [u32; 2]>,
    pub buffer_scales: BTreeMap<String, [f64; 2]>,
}

impl Segment {
    /// Returns true if this segment's stage owns `request_path`
    pub fn matches_request(&self, request_path: &str) -> bool {
        request_candidates(request_path).iter().any(|candidate| self.stage.owns_path(candidate))
    }

    /// Shaderpack source serving `request_path`, chosen by its extension
    pub fn resolve_source_path(&self, request_path: &str) -> Option<&str> {
        SourceSlot::detect(&normalize_request_path(request_path)).and_then(|slot| self.sources.get(slot))
    }

    /// Identifier `stage:name#index` used in logs
    pub fn key(&self) -> String {
        format!("{}:{}#{}", self.stage, self.name, self.index)
    }

    /// Whether the segment is flagged to flip `target` after dispatch
    pub fn flips(&self, target: &str) -> bool {
        self.flips.get(target).copied().unwrap_or(false)
    }
}

/// Normalizes a host request path: '/' separators, no leading '/'
pub fn normalize_request_path(path: &str) -> String {
    path.replace('\\', "/").trim_start_matches('/').to_string()
}

/// Builds the equivalent forms of a host request path
///
/// Jar prefixes (`...!/`), the host asset prefix and `namespace:` prefixes
/// are stripped in turn; the first entry is always the normalized input.
pub fn request_candidates(path: &str) -> Vec<String> {
    let normalized = normalize_request_path(path);
    if normalized.trim().is_empty() {
        return Vec::new();
    }
    let mut candidates = Vec::new();
    push_unique(&mut candidates, normalized.clone());
    if let Some(index) = normalized.find("!/") {
        let stripped = normalize_request_path(&normalized[index + 2..]);
        if !stripped.trim().is_empty() {
            push_unique(&mut candidates, stripped.clone());
            push_asset_candidate(&mut candidates, &stripped);
        }
    }
    push_asset_candidate(&mut candidates, &normalized);
    if let Some(index) = normalized.find(':') {
        if index > 0 && index + 1 < normalized.len() {
            let stripped = normalize_request_path(&normalized[index + 1..]);
            if !stripped.trim().is_empty() {
                push_unique(&mut candidates, stripped.clone());
                push_asset_candidate(&mut candidates, &stripped);
            }
        }
    }
    candidates
}

fn push_asset_candidate(candidates: &mut Vec<String>, path: &str) {
    if let Some(index) = path.find(HOST_ASSET_PREFIX) {
        let stripped = normalize_request_path(&path[index + HOST_ASSET_PREFIX.len()..]);
        if !stripped.trim().is_empty() {
            push_unique(candidates, stripped);
        }
    }
}

fn push_unique(candidates: &mut Vec<String>, value: String) {
    if !candidates.contains(&value) {
        candidates.push(value);
    }
}

/// Normalizes a render target token
///
/// Accepts `colortexN` (N in 0..=15), a bare number 0..=15, or a custom
/// lowercase identifier.
pub fn normalize_render_target(raw: &str) -> Option<String> {
    let normalized = raw.trim().to_ascii_lowercase();
    if normalized.is_empty() {
        return None;
    }
    let normalized = if BARE_TARGET_PATTERN.is_match(&normalized) { format!("colortex{normalized}") } else { normalized };
    if RENDER_TARGET_PATTERN.is_match(&normalized) || CUSTOM_RENDER_TARGET_PATTERN.is_match(&normalized) {
        Some(normalized)
    } else {
        None
    }
}

/// Normalizes a compute image binding, `colorimgN` or `shadowcolorimgN`
pub fn normalize_image_binding(raw: &str) -> Option<String> {
    let normalized = raw.trim().to_ascii_lowercase();
    if COLOR_IMAGE_PATTERN.is_match(&normalized) || SHADOW_COLOR_IMAGE_PATTERN.is_match(&normalized) {
        Some(normalized)
    } else {
        None
    }
}

/// Normalizes a flip key, which may name a render target or an image binding
pub fn normalize_flip_target(raw: &str) -> Option<String> {
    normalize_render_target(raw).or_else(|| normalize_image_binding(raw))
}

/// Render target backing a compute image binding
///
/// `colorimgN` maps to `colortexN`, `shadowcolorimgN` to `shadowcolorN`.
pub fn image_render_target(binding: &str) -> Option<String> {
    if let Some(caps) = COLOR_IMAGE_PATTERN.captures(binding) {
        return Some(format!("colortex{}", &caps[1]));
    }
    SHADOW_COLOR_IMAGE_PATTERN.captures(binding).map(|caps| format!("shadowcolor{}", &caps[1]))
}

/// Compute image binding backed by a render target, the inverse of [`image_render_target`]
pub fn render_target_image(target: &str) -> Option<String> {
    let target = target.trim().to_ascii_lowercase();
    if let Some(n) = target.strip_prefix("colortex") {
        let binding = format!("colorimg{n}");
        return COLOR_IMAGE_PATTERN.is_match(&binding).then_some(binding);
    }
    if let Some(n) = target.strip_prefix("shadowcolor") {
        let binding = format!("shadowcolorimg{n}");
        return SHADOW_COLOR_IMAGE_PATTERN.is_match(&binding).then_some(binding);
    }
    normalize_image_binding(&target)
}

/// Deduplicated, order-preserving set of strings
pub(crate) fn ordered_unique(values: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut seen = BTreeSet::new();
    values.into_iter().filter(|value| seen.insert(value.clone())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_target_normalization() {
        assert_eq!(normalize_render_target(" ColorTex3 ").as_deref(), Some("colortex3"));
        assert_eq!(normalize_render_target("7").as_deref(), Some("colortex7"));
        assert_eq!(normalize_render_target("bloom_half").as_deref(), Some("bloom_half"));
        assert_eq!(normalize_render_target("16").as_deref(), None);
        assert_eq!(normalize_render_target("colortex16").as_deref(), Some("colortex16"));
        assert_eq!(normalize_render_target("1bad"), None);
        assert_eq!(normalize_render_target(""), None);
    }

    #[test]
    fn test_image_binding_mapping() {
        assert_eq!(normalize_image_binding("ColorImg5").as_deref(), Some("colorimg5"));
        assert_eq!(normalize_image_binding("colorimg6"), None);
        assert_eq!(image_render_target("colorimg2").as_deref(), Some("colortex2"));
        assert_eq!(image_render_target("shadowcolorimg1").as_deref(), Some("shadowcolor1"));
        assert_eq!(render_target_image("colortex0").as_deref(), Some("colorimg0"));
        assert_eq!(render_target_image("colortex9"), None);
        assert_eq!(normalize_flip_target("colorimg0").as_deref(), Some("colorimg0"));
    }

    #[test]
    fn test_request_candidates() {
        let candidates = request_candidates("minecraft:/assets/vulkanmod/shaders/basic/terrain/terrain.fsh");
        assert_eq!(candidates[0], "minecraft:/assets/vulkanmod/shaders/basic/terrain/terrain.fsh");
        assert!(candidates.contains(&"shaders/basic/terrain/terrain.fsh".to_string()));

        let jar = request_candidates("file.jar!/assets/vulkanmod/shaders/core/screenquad/a.vsh");
        assert!(jar.contains(&"shaders/core/screenquad/a.vsh".to_string()));
        assert!(request_candidates("  ").is_empty());
    }

    #[test]
    fn test_source_slot_detection() {
        assert_eq!(SourceSlot::detect("a/B.FSH"), Some(SourceSlot::Fragment));
        assert_eq!(SourceSlot::detect("a/b.comp"), Some(SourceSlot::Compute));
        assert_eq!(SourceSlot::detect("a/b.json"), Some(SourceSlot::Config));
        assert_eq!(SourceSlot::detect("a/b.txt"), None);
    }
}
