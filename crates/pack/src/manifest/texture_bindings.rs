//! `[textures]` sampler overrides

use crate::diagnostics::Diagnostics;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use toml::{Table, Value};

/// Stage key whose bindings apply to every stage
pub const ANY_STAGE: &str = "any";

/// Where a bound texture comes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TextureSource {
    /// A host resource id, `resource:<id>`
    Resource(String),
    /// A host dynamic texture id, `dynamic:<id>`
    Dynamic(String),
    /// An image file inside the shaderpack, `shaderpack:<path>`
    Shaderpack(String),
    /// Anything else, including the unsupported `raw:` form
    Unsupported(String),
}

impl TextureSource {
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if let Some(id) = trimmed.strip_prefix("resource:") {
            Self::Resource(id.trim().to_string())
        } else if let Some(id) = trimmed.strip_prefix("dynamic:") {
            Self::Dynamic(id.trim().to_string())
        } else if let Some(path) = trimmed.strip_prefix("shaderpack:") {
            Self::Shaderpack(path.trim().to_string())
        } else {
            Self::Unsupported(trimmed.to_string())
        }
    }
}

impl fmt::Display for TextureSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resource(id) => write!(f, "resource:{id}"),
            Self::Dynamic(id) => write!(f, "dynamic:{id}"),
            Self::Shaderpack(path) => write!(f, "shaderpack:{path}"),
            Self::Unsupported(raw) => f.write_str(raw),
        }
    }
}

/// Sampler bindings by stage, then sampler name
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TextureBindings {
    by_stage: BTreeMap<String, BTreeMap<String, String>>,
}

impl TextureBindings {
    /// Parses the `[textures]` table
    ///
    /// Accepts `[textures.<stage>]` sub-tables and flat `"<stage>.<sampler>"`
    /// keys; a flat key without a stage binds for every stage.
    pub fn parse(table: Option<&Table>, diag: &mut Diagnostics) -> Self {
        let mut bindings = Self::default();
        let Some(table) = table else {
            return bindings;
        };
        for (key, value) in table {
            if key.trim().is_empty() {
                continue;
            }
            match value {
                Value::Table(stage_table) => {
                    for (sampler, source) in stage_table {
                        match source.as_str() {
                            Some(source) if !source.trim().is_empty() => bindings.insert(key, sampler, source, diag),
                            _ => diag.error(format!("Invalid texture source for textures.{key}.{sampler} (expected string).")),
                        }
                    }
                }
                Value::String(source) => {
                    let (stage, sampler) = match key.split_once('.') {
                        Some((stage, sampler)) if !stage.is_empty() && !sampler.is_empty() => (stage, sampler),
                        _ => (ANY_STAGE, key.as_str()),
                    };
                    bindings.insert(stage, sampler, source, diag);
                }
                _ => diag.error(format!("Invalid value for textures.{key} (expected string or table).")),
            }
        }
        bindings
    }

    fn insert(&mut self, stage: &str, sampler: &str, source: &str, diag: &mut Diagnostics) {
        let (stage, sampler, source) = (normalize_stage(stage), sampler.trim(), source.trim());
        if sampler.is_empty() || source.is_empty() {
            return;
        }
        if let TextureSource::Unsupported(raw) = TextureSource::parse(source) {
            diag.warn(format!("Unsupported texture source '{raw}' for textures.{stage}.{sampler}."));
        }
        let stage_bindings = self.by_stage.entry(stage.clone()).or_default();
        if let Some(previous) = stage_bindings.insert(sampler.to_string(), source.to_string()) {
            if previous != source {
                diag.warn(format!("Texture binding textures.{stage}.{sampler} overwritten from '{previous}' to '{source}'."));
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.by_stage.is_empty()
    }

    /// Source bound to `sampler` for `stage`, falling back to the `any` stage
    pub fn resolve(&self, stage: &str, sampler: &str) -> Option<TextureSource> {
        let sampler = sampler.trim();
        if sampler.is_empty() {
            return None;
        }
        self.by_stage
            .get(&normalize_stage(stage))
            .and_then(|bindings| bindings.get(sampler))
            .or_else(|| self.by_stage.get(ANY_STAGE).and_then(|bindings| bindings.get(sampler)))
            .map(|source| TextureSource::parse(source))
    }

    /// Samplers bound for `stage` or `any`, stage entries first
    pub fn samplers(&self, stage: &str) -> Vec<&str> {
        let mut samplers: Vec<&str> = Vec::new();
        for key in [normalize_stage(stage), ANY_STAGE.to_string()] {
            if let Some(bindings) = self.by_stage.get(&key) {
                for sampler in bindings.keys() {
                    if !samplers.contains(&sampler.as_str()) {
                        samplers.push(sampler);
                    }
                }
            }
        }
        samplers
    }
}

fn normalize_stage(stage: &str) -> String {
    let trimmed = stage.trim();
    if trimmed.is_empty() { ANY_STAGE.to_string() } else { trimmed.to_lowercase() }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> (TextureBindings, Diagnostics) {
        let root: Table = toml::from_str(source).unwrap();
        let mut diag = Diagnostics::new();
        let bindings = TextureBindings::parse(root.get("textures").and_then(Value::as_table), &mut diag);
        (bindings, diag)
    }

    #[test]
    fn test_stage_tables_and_flat_keys() {
        let (bindings, diag) = parse(
            r#"
[textures]
"Lighting.noisetex" = "shaderpack:textures/noise.png"
Sampler0 = "resource:minecraft:textures/atlas/blocks.png"

[textures.final]
Sampler1 = "dynamic:lightmap"
"#,
        );
        assert!(diag.errors.is_empty() && diag.warnings.is_empty());
        assert_eq!(bindings.resolve("LIGHTING", "noisetex"), Some(TextureSource::Shaderpack("textures/noise.png".to_string())));
        assert_eq!(bindings.resolve("final", "Sampler1"), Some(TextureSource::Dynamic("lightmap".to_string())));
        assert_eq!(
            bindings.resolve("gbuffer", "Sampler0"),
            Some(TextureSource::Resource("minecraft:textures/atlas/blocks.png".to_string()))
        );
        assert_eq!(bindings.resolve("gbuffer", "Sampler1"), None);
        assert_eq!(bindings.samplers("final"), vec!["Sampler1", "Sampler0"]);
    }

    #[test]
    fn test_overwrites_and_raw_sources_warn() {
        let (bindings, diag) = parse(
            r#"
[textures]
"any.Sampler0" = "dynamic:a"
Sampler0 = "dynamic:b"
"final.Sampler2" = "raw:0x1234"
"final.Sampler3" = 7
"#,
        );
        assert_eq!(bindings.resolve("any", "Sampler0"), Some(TextureSource::Dynamic("b".to_string())));
        assert_eq!(
            diag.warnings,
            vec![
                "Texture binding textures.any.Sampler0 overwritten from 'dynamic:a' to 'dynamic:b'.",
                "Unsupported texture source 'raw:0x1234' for textures.final.Sampler2.",
            ]
        );
        assert_eq!(diag.errors, vec!["Invalid value for textures.final.Sampler3 (expected string or table)."]);
    }
}
