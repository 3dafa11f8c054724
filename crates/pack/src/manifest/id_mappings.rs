//! `[id]` / `[ids]` block, item and entity id tables

use crate::diagnostics::{Diagnostics, coerce_positive_int};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use toml::{Table, Value};

/// Render layer a block is classified into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockLayer {
    Solid,
    Cutout,
    Translucent,
}

impl BlockLayer {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "solid" => Some(Self::Solid),
            "cutout" => Some(Self::Cutout),
            "translucent" => Some(Self::Translucent),
            _ => None,
        }
    }

    pub fn code(&self) -> u32 {
        match self {
            Self::Solid => 1,
            Self::Cutout => 2,
            Self::Translucent => 3,
        }
    }
}

/// Layer code of a stored layer name, 0 when unknown
pub fn layer_code(name: &str) -> u32 {
    BlockLayer::parse(name).map_or(0, |layer| layer.code())
}

/// Name to id tables; keys are lowercased
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdMappings {
    pub blocks: BTreeMap<String, u32>,
    pub items: BTreeMap<String, u32>,
    pub entities: BTreeMap<String, u32>,
    /// Block name to layer name; unknown names are kept as written
    pub layers: BTreeMap<String, String>,
}

impl IdMappings {
    /// Parses id tables from the manifest root
    ///
    /// Layers are merged from root `[layer]`, root `[layers]`, then the
    /// `layer`/`layers` sub-table of `[id]`/`[ids]`.
    pub fn parse(root: &Table, diag: &mut Diagnostics) -> Self {
        let id = root.get("id").and_then(Value::as_table);
        let ids = root.get("ids").and_then(Value::as_table);
        let mut mappings = Self {
            blocks: read_id_map(select_sub_table(id, ids, "blocks", "block"), "ids.blocks", diag),
            items: read_id_map(select_sub_table(id, ids, "items", "item"), "ids.items", diag),
            entities: read_id_map(select_sub_table(id, ids, "entities", "entity"), "ids.entities", diag),
            layers: BTreeMap::new(),
        };
        for (table, context) in [
            (root.get("layer").and_then(Value::as_table), "layer"),
            (root.get("layers").and_then(Value::as_table), "layers"),
            (select_sub_table(id, ids, "layer", "layers"), "ids.layer"),
        ] {
            if let Some(table) = table {
                read_layer_map(&mut mappings.layers, table, context, diag);
            }
        }
        mappings
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty() && self.items.is_empty() && self.entities.is_empty() && self.layers.is_empty()
    }
}

fn select_sub_table<'a>(primary: Option<&'a Table>, secondary: Option<&'a Table>, key_a: &str, key_b: &str) -> Option<&'a Table> {
    [primary, secondary]
        .into_iter()
        .flatten()
        .find_map(|table| table.get(key_a).and_then(Value::as_table).or_else(|| table.get(key_b).and_then(Value::as_table)))
}

fn read_id_map(table: Option<&Table>, context: &str, diag: &mut Diagnostics) -> BTreeMap<String, u32> {
    let mut ids = BTreeMap::new();
    for (key, value) in table.into_iter().flatten() {
        if let Some(id) = coerce_positive_int(value, &format!("{context}.{key}"), diag) {
            let key = key.trim().to_lowercase();
            if !key.is_empty() {
                ids.insert(key, id);
            }
        }
    }
    ids
}

fn read_layer_map(output: &mut BTreeMap<String, String>, table: &Table, context: &str, diag: &mut Diagnostics) {
    for (key, value) in table {
        let layer = match value.as_str() {
            Some(layer) if !layer.trim().is_empty() => layer,
            _ => {
                diag.error(format!("Invalid layer value for {context}.{key} (expected string)."));
                continue;
            }
        };
        let normalized = layer.trim().to_lowercase();
        if BlockLayer::parse(&normalized).is_none() {
            diag.warn(format!("Unknown layer '{layer}' in {context}.{key} (kept as-is)."));
        }
        let key = key.trim().to_lowercase();
        if !key.is_empty() {
            output.insert(key, normalized);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_tables_and_layers() {
        let root: Table = toml::from_str(
            r#"
[layer]
"minecraft:glass" = "Translucent"

[id.blocks]
"minecraft:Stone" = 1
"minecraft:grass" = "2"

[ids.items]
"minecraft:torch" = 10.0

[ids.entity]
"minecraft:zombie" = -3

[ids.layers]
"minecraft:leaves" = "cutout"
"minecraft:portal" = "emissive"
"minecraft:water" = 4
"#,
        )
        .unwrap();
        let mut diag = Diagnostics::new();
        let ids = IdMappings::parse(&root, &mut diag);

        assert_eq!(ids.blocks.get("minecraft:stone"), Some(&1));
        assert_eq!(ids.blocks.get("minecraft:grass"), Some(&2));
        assert_eq!(ids.items.get("minecraft:torch"), Some(&10));
        assert!(ids.entities.is_empty());
        assert_eq!(ids.layers.get("minecraft:glass").map(String::as_str), Some("translucent"));
        assert_eq!(layer_code(&ids.layers["minecraft:leaves"]), 2);
        assert_eq!(layer_code(&ids.layers["minecraft:portal"]), 0);
        assert_eq!(
            diag.errors,
            vec![
                "Invalid positive integer in ids.entities.minecraft:zombie.",
                "Invalid layer value for ids.layer.minecraft:water (expected string).",
            ]
        );
        assert_eq!(diag.warnings, vec!["Unknown layer 'emissive' in ids.layer.minecraft:portal (kept as-is)."]);
    }
}
