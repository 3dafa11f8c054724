//! `[[resources]]` declarations

use crate::diagnostics::{Diagnostics, require_string};
use crate::pipelines::ResourceType;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use toml::Value;

macro_rules! name_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $text)] $variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        /// Case-insensitive
        impl FromStr for $name {
            type Err = ();

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let lower = s.to_lowercase();
                Self::ALL.iter().copied().find(|v| v.as_str() == lower).ok_or(())
            }
        }
    };
}

name_enum! {
    /// Which extent a resource is sized against
    ResourceResolution {
        Internal => "internal",
        Output => "output",
        Fixed => "fixed",
    }
}

name_enum! {
    /// Texel format of a resource
    ResourceFormat {
        Rgba16f => "rgba16f",
        Rgba32f => "rgba32f",
        Rgba8 => "rgba8",
        Rgba8Srgb => "rgba8_srgb",
        Rg16f => "rg16f",
        Rg32f => "rg32f",
        Rg8 => "rg8",
        R16f => "r16f",
        R32f => "r32f",
        R8 => "r8",
        Depth24 => "depth24",
        Depth32f => "depth32f",
        Depth24Stencil8 => "depth24_stencil8",
        Depth32fStencil8 => "depth32f_stencil8",
    }
}

name_enum! {
    /// How long a resource's contents are kept
    ResourceLifetime {
        PerFrame => "per-frame",
        Persistent => "persistent",
        Temporal => "temporal",
    }
}

impl ResourceFormat {
    pub fn is_depth(&self) -> bool {
        matches!(self, Self::Depth24 | Self::Depth32f | Self::Depth24Stencil8 | Self::Depth32fStencil8)
    }
}

/// A named GPU resource declared by the shaderpack
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDecl {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ResourceType,
    pub resolution: ResourceResolution,
    pub format: ResourceFormat,
    pub lifetime: ResourceLifetime,
}

/// Parses the `[[resources]]` array; entries with any invalid field are dropped
pub fn parse_resources(array: Option<&Value>, diag: &mut Diagnostics) -> Vec<ResourceDecl> {
    let Some(Value::Array(entries)) = array else {
        if array.is_some() {
            diag.error("Invalid array for resources");
        }
        return Vec::new();
    };
    let mut resources = Vec::new();
    let mut names = HashSet::new();
    for (i, entry) in entries.iter().enumerate() {
        let Value::Table(table) = entry else {
            diag.error(format!("Invalid resource entry at index {i}"));
            continue;
        };
        let context = format!("resources[{i}]");
        let name = require_string(table, "name", &context, diag);
        let kind = require_string(table, "type", &context, diag);
        let resolution = require_string(table, "resolution", &context, diag);
        let format = require_string(table, "format", &context, diag);
        let lifetime = require_string(table, "lifetime", &context, diag);

        if let Some(name) = &name {
            if !names.insert(name.clone()) {
                diag.error(format!("Duplicate resource name: {name}"));
            }
        }
        let kind = kind.and_then(|kind| {
            kind.parse::<ResourceType>().map_err(|_| diag.error(format!("Unsupported resource type: {kind}"))).ok()
        });
        let resolution = resolution.and_then(|resolution| {
            resolution.parse::<ResourceResolution>().map_err(|_| diag.error(format!("Unsupported resource resolution: {resolution}"))).ok()
        });
        let format = format.and_then(|format| {
            format.parse::<ResourceFormat>().map_err(|_| diag.error(format!("Unsupported resource format: {format}"))).ok()
        });
        let lifetime = lifetime.and_then(|lifetime| {
            lifetime.parse::<ResourceLifetime>().map_err(|_| diag.error(format!("Unsupported resource lifetime: {lifetime}"))).ok()
        });

        if let (Some(name), Some(kind), Some(resolution), Some(format), Some(lifetime)) = (name, kind, resolution, format, lifetime) {
            resources.push(ResourceDecl {
                name,
                kind,
                resolution,
                format,
                lifetime,
            });
        }
    }
    resources
}

#[cfg(test)]
mod tests {
    use super::*;
    use toml::Table;

    #[test]
    fn test_parse_resources() {
        let root: Table = toml::from_str(
            r#"
[[resources]]
name = "hdr_color"
type = "Texture2D"
resolution = "Internal"
format = "RGBA16F"
lifetime = "per-frame"

[[resources]]
name = "hdr_color"
type = "texture2d"
resolution = "half"
format = "bgra8"
lifetime = "temporal"

[[resources]]
type = "Buffer"
"#,
        )
        .unwrap();
        let mut diag = Diagnostics::new();
        let resources = parse_resources(root.get("resources"), &mut diag);

        assert_eq!(resources.len(), 1);
        assert_eq!(resources[0].format, ResourceFormat::Rgba16f);
        assert_eq!(resources[0].resolution, ResourceResolution::Internal);
        assert_eq!(
            diag.errors,
            vec![
                "Duplicate resource name: hdr_color",
                "Unsupported resource type: texture2d",
                "Unsupported resource resolution: half",
                "Unsupported resource format: bgra8",
                "Missing resources[2].name",
                "Missing resources[2].resolution",
                "Missing resources[2].format",
                "Missing resources[2].lifetime",
            ]
        );
    }
}
