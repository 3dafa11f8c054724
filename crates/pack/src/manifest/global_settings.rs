//! `[global]` and `[runtime]` settings

use crate::diagnostics::Diagnostics;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use toml::{Table, Value};

/// A global setting scalar
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GlobalScalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl GlobalScalar {
    fn from_toml(value: &Value) -> Option<Self> {
        match value {
            Value::Boolean(b) => Some(Self::Bool(*b)),
            Value::Integer(n) => Some(Self::Int(*n)),
            Value::Float(n) => Some(Self::Float(*n)),
            Value::String(s) => Some(Self::Text(s.clone())),
            _ => None,
        }
    }

    /// Loose boolean view; `None` if the value has no boolean reading
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            Self::Int(n) => Some(*n != 0),
            Self::Float(n) => Some(*n != 0.0),
            Self::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "on" | "yes" | "1" => Some(true),
                "false" | "off" | "no" | "0" => Some(false),
                _ => None,
            },
        }
    }
}

/// A global setting value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GlobalValue {
    Scalar(GlobalScalar),
    List(Vec<GlobalScalar>),
}

/// Flattened global settings keyed by normalized dotted path
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GlobalSettings {
    values: BTreeMap<String, GlobalValue>,
}

impl GlobalSettings {
    /// Parses `[global]` then `[runtime]`; later keys overwrite earlier ones
    pub fn parse(root: &Table, diag: &mut Diagnostics) -> Self {
        let mut values = BTreeMap::new();
        for section in ["global", "runtime"] {
            if let Some(table) = root.get(section).and_then(Value::as_table) {
                read_table(&mut values, table, "", section, diag);
            }
        }
        Self { values }
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &GlobalValue)> {
        self.values.iter().map(|(key, value)| (key.as_str(), value))
    }

    pub fn get(&self, key: &str) -> Option<&GlobalValue> {
        self.values.get(&normalize_key(key))
    }

    /// Boolean reading of a scalar setting, or `fallback`
    pub fn get_bool(&self, key: &str, fallback: bool) -> bool {
        match self.get(key) {
            Some(GlobalValue::Scalar(scalar)) => scalar.as_bool().unwrap_or(fallback),
            _ => fallback,
        }
    }
}

/// Lowercases a key and maps '-' to '_'
pub fn normalize_key(key: &str) -> String {
    key.trim().to_lowercase().replace('-', "_")
}

fn read_table(output: &mut BTreeMap<String, GlobalValue>, table: &Table, prefix: &str, context: &str, diag: &mut Diagnostics) {
    for (key, value) in table {
        if key.trim().is_empty() {
            continue;
        }
        let path = if prefix.is_empty() { key.clone() } else { format!("{prefix}.{key}") };
        let key_context = format!("{context}.{key}");
        match value {
            Value::Table(nested) => read_table(output, nested, &path, &key_context, diag),
            Value::Array(items) => {
                let parsed: Result<Vec<GlobalScalar>, usize> =
                    items.iter().enumerate().map(|(i, item)| GlobalScalar::from_toml(item).ok_or(i)).collect();
                match parsed {
                    Ok(list) => {
                        output.insert(normalize_key(&path), GlobalValue::List(list));
                    }
                    Err(i) => diag.error(format!("Unsupported value in {key_context} at index {i} (expected scalar array).")),
                }
            }
            scalar => match GlobalScalar::from_toml(scalar) {
                Some(scalar) => {
                    output.insert(normalize_key(&path), GlobalValue::Scalar(scalar));
                }
                None => diag.error(format!("Unsupported value type in {key_context}.")),
            },
        }
    }
}
