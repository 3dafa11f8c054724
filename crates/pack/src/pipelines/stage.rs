//! Render stages and typed ports
//!
//! Each stage has a fixed external contract: the typed inputs its first
//! segment must consume and the typed outputs its last segment must produce.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// One phase of the render pipeline, in canonical order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Shadow,
    Gbuffer,
    Lighting,
    Translucent,
    Postprocess,
    Final,
}

impl Stage {
    /// All stages in canonical execution order
    pub const ALL: [Stage; 6] = [Stage::Shadow, Stage::Gbuffer, Stage::Lighting, Stage::Translucent, Stage::Postprocess, Stage::Final];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Shadow => "shadow",
            Self::Gbuffer => "gbuffer",
            Self::Lighting => "lighting",
            Self::Translucent => "translucent",
            Self::Postprocess => "postprocess",
            Self::Final => "final",
        }
    }

    /// Numeric stage-order code exposed to shaders as `SULKAN_RENDER_STAGE`
    pub fn render_code(&self) -> u32 {
        (*self as u32 + 1) * 100
    }

    /// Typed inputs the first segment of this stage must declare exactly
    pub fn fixed_inputs(&self) -> PortMap {
        use ResourceType::*;
        ports(match self {
            Self::Shadow => &[("scene_geometry", Buffer), ("light_params", Buffer)],
            Self::Gbuffer => &[("scene_geometry", Buffer), ("material_params", Buffer), ("camera_matrices", Buffer)],
            Self::Lighting => &[
                ("gbuffer_albedo", Texture2D),
                ("gbuffer_normal", Texture2D),
                ("gbuffer_depth", DepthTexture),
                ("shadow_map", DepthTexture),
            ],
            Self::Translucent => &[("lit_color", Texture2D), ("gbuffer_depth", DepthTexture), ("translucent_geometry", Buffer)],
            Self::Postprocess => &[("scene_color", Texture2D), ("scene_depth", DepthTexture)],
            Self::Final => &[("post_color", Texture2D), ("post_depth", DepthTexture), ("motion_vectors", MotionTexture)],
        })
    }

    /// Typed outputs the last segment of this stage must declare exactly
    pub fn fixed_outputs(&self) -> PortMap {
        use ResourceType::*;
        ports(match self {
            Self::Shadow => &[("shadow_map", DepthTexture)],
            Self::Gbuffer => &[("gbuffer_albedo", Texture2D), ("gbuffer_normal", Texture2D), ("gbuffer_depth", DepthTexture)],
            Self::Lighting => &[("lit_color", Texture2D)],
            Self::Translucent => &[("scene_color", Texture2D)],
            Self::Postprocess => &[("post_color", Texture2D), ("post_depth", DepthTexture)],
            Self::Final => &[("final_color", Texture2D), ("final_depth", DepthTexture), ("final_motion", MotionTexture)],
        })
    }

    /// Host shader path patterns owned by this stage
    ///
    /// A trailing `*` matches any remainder.
    pub fn match_targets(&self) -> &'static [&'static str] {
        match self {
            Self::Shadow => &["shaders/basic/terrain_earlyz/*"],
            Self::Gbuffer => &["shaders/basic/terrain/*"],
            Self::Lighting => &["shaders/basic/clouds/*"],
            Self::Translucent => &["shaders/core/rendertype_item_entity_translucent_cull/*"],
            Self::Postprocess => &["shaders/basic/blit/*", "shaders/post/blit/*"],
            Self::Final => &[
                "shaders/core/screenquad/*",
                "shaders/core/animate_sprite/*",
                "shaders/core/animate_sprite_blit/*",
                "shaders/core/animate_sprite_blit.fsh",
            ],
        }
    }

    /// Returns true if `path` matches one of [`Stage::match_targets`]
    pub fn owns_path(&self, path: &str) -> bool {
        let path = path.to_ascii_lowercase();
        self.match_targets().iter().any(|pattern| match pattern.strip_suffix('*') {
            Some(prefix) => path.starts_with(prefix),
            None => path == *pattern,
        })
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = UnknownName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::ALL
            .into_iter()
            .find(|stage| stage.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownName(s.to_string()))
    }
}

/// Type of a resource or typed port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceType {
    Texture2D,
    Texture3D,
    TextureCube,
    Buffer,
    DepthTexture,
    MotionTexture,
}

impl ResourceType {
    pub const ALL: [ResourceType; 6] = [
        ResourceType::Texture2D,
        ResourceType::Texture3D,
        ResourceType::TextureCube,
        ResourceType::Buffer,
        ResourceType::DepthTexture,
        ResourceType::MotionTexture,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Texture2D => "Texture2D",
            Self::Texture3D => "Texture3D",
            Self::TextureCube => "TextureCube",
            Self::Buffer => "Buffer",
            Self::DepthTexture => "DepthTexture",
            Self::MotionTexture => "MotionTexture",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceType {
    type Err = UnknownName;

    /// Resource type names are case-sensitive
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResourceType::ALL.into_iter().find(|t| t.as_str() == s).ok_or_else(|| UnknownName(s.to_string()))
    }
}

/// Error for a name outside a fixed vocabulary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownName(pub String);

impl fmt::Display for UnknownName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Unknown name '{}'", self.0)
    }
}

impl std::error::Error for UnknownName {}

/// Typed port map: port name to resource type
pub type PortMap = BTreeMap<String, ResourceType>;

fn ports(entries: &[(&str, ResourceType)]) -> PortMap {
    entries.iter().map(|(name, ty)| (name.to_string(), *ty)).collect()
}

/// Formats a port map as `[Type:name, ...]`
pub fn format_ports(ports: &PortMap) -> String {
    let entries: Vec<String> = ports.iter().map(|(name, ty)| format!("{ty}:{name}")).collect();
    format!("[{}]", entries.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_order_and_codes() {
        assert!(Stage::Shadow < Stage::Final);
        assert_eq!(Stage::Shadow.render_code(), 100);
        assert_eq!(Stage::Final.render_code(), 600);
        assert_eq!("PostProcess".parse::<Stage>().unwrap(), Stage::Postprocess);
        assert!("deferred".parse::<Stage>().is_err());
    }

    #[test]
    fn test_fixed_contracts() {
        let lighting = Stage::Lighting.fixed_inputs();
        assert_eq!(lighting.len(), 4);
        assert_eq!(lighting["shadow_map"], ResourceType::DepthTexture);
        assert_eq!(format_ports(&Stage::Shadow.fixed_outputs()), "[DepthTexture:shadow_map]");
    }

    #[test]
    fn test_stage_path_ownership() {
        assert!(Stage::Gbuffer.owns_path("shaders/basic/terrain/terrain.fsh"));
        assert!(!Stage::Gbuffer.owns_path("shaders/basic/terrain_earlyz/terrain.fsh"));
        assert!(Stage::Final.owns_path("shaders/core/animate_sprite_blit.fsh"));
        assert!(!Stage::Final.owns_path("shaders/core/animate_sprite_blit.vsh"));
    }

    #[test]
    fn test_resource_type_is_case_sensitive() {
        assert_eq!("DepthTexture".parse::<ResourceType>().unwrap(), ResourceType::DepthTexture);
        assert!("texture2d".parse::<ResourceType>().is_err());
    }
}
