//! Per-shaderpack option values and their JSON sidecar
//!
//! Values are persisted next to the pack as `<pack file name>.sscfg`:
//!
//! ```json
//! {
//!   "options": {
//!     "shadows.quality": "high",
//!     "bloom": true
//!   }
//! }
//! ```
//!
//! Loading reconciles the stored values against the current declarations.
//! Anything missing, mistyped or out of range falls back to the declared
//! default and causes the file to be rewritten.

use serde::Serialize;
use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use sulkan_pack::options::{LeafOption, OptionKind};
use sulkan_pack::{OptionSet, OptionValue};

/// File extension of the option sidecar
pub const CONFIG_EXTENSION: &str = "sscfg";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to write shaderpack config {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to encode shaderpack config {path}: {source}")]
    Encode {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("Unknown option: {0}")]
    UnknownOption(String),
    #[error("Invalid value for option {0}")]
    InvalidValue(String),
}

/// Sidecar path for the pack at `pack_path`
pub fn config_path(shaderpacks_dir: &Path, pack_path: &Path) -> PathBuf {
    let name = pack_path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "shaderpack".to_string());
    shaderpacks_dir.join(format!("{name}.{CONFIG_EXTENSION}"))
}

#[derive(Serialize)]
struct ConfigDocument {
    options: Map<String, Value>,
}

/// Current value of every declared leaf option, keyed by dotted path
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OptionConfig {
    values: BTreeMap<String, OptionValue>,
}

impl OptionConfig {
    /// Every leaf at its declared default
    pub fn defaults(options: &OptionSet) -> Self {
        Self {
            values: options.leaves().map(|(decl, leaf)| (decl.path.clone(), leaf.default.clone())).collect(),
        }
    }

    pub fn get(&self, path: &str) -> Option<&OptionValue> {
        self.values.get(path)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &OptionValue)> {
        self.values.iter().map(|(path, value)| (path.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Sets `path` to `value` after checking it against the declaration
    ///
    /// Returns whether the stored value changed.
    pub fn set(&mut self, options: &OptionSet, path: &str, value: OptionValue) -> Result<bool, ConfigError> {
        let leaf = options
            .get(path)
            .and_then(|decl| decl.leaf())
            .ok_or_else(|| ConfigError::UnknownOption(path.to_string()))?;
        let value = accept_value(leaf, value).ok_or_else(|| ConfigError::InvalidValue(path.to_string()))?;
        if self.values.get(path) == Some(&value) {
            return Ok(false);
        }
        self.values.insert(path.to_string(), value);
        Ok(true)
    }

    /// Builds a config from a parsed sidecar document
    ///
    /// Returns the config and whether anything had to fall back to a default.
    pub fn reconcile(document: Option<&Value>, options: &OptionSet) -> (Self, bool) {
        let stored = document.and_then(Value::as_object).and_then(|root| root.get("options")).and_then(Value::as_object);
        let mut changed = stored.is_none();
        let mut values = BTreeMap::new();
        for (decl, leaf) in options.leaves() {
            let parsed = stored.and_then(|stored| stored.get(&decl.path)).and_then(|raw| parse_json_value(leaf, raw));
            let value = parsed.unwrap_or_else(|| {
                changed = true;
                leaf.default.clone()
            });
            values.insert(decl.path.clone(), value);
        }
        (Self { values }, changed)
    }

    /// Loads the sidecar at `path`, rewriting it when reconciliation changed anything
    ///
    /// Read and parse failures are logged and yield defaults.
    pub fn load_or_create(path: &Path, options: &OptionSet) -> Self {
        let name = path.file_name().map(|name| name.to_string_lossy().into_owned()).unwrap_or_default();
        let document = match fs::read_to_string(path) {
            Ok(text) => match serde_json::from_str::<Value>(&text) {
                Ok(document) => Some(document),
                Err(e) => {
                    tracing::warn!("Invalid shaderpack config {name}, using defaults: {e}");
                    None
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                tracing::warn!("Failed to read shaderpack config {name}, using defaults: {e}");
                None
            }
        };
        let (config, changed) = Self::reconcile(document.as_ref(), options);
        if changed {
            if let Err(e) = config.save(path, options) {
                tracing::warn!("{e}");
            }
        }
        config
    }

    /// Writes the sidecar as pretty-printed JSON
    pub fn save(&self, path: &Path, options: &OptionSet) -> Result<(), ConfigError> {
        let display = path.display().to_string();
        let mut stored = Map::new();
        for (option_path, value) in &self.values {
            let leaf = options.get(option_path).and_then(|decl| decl.leaf());
            stored.insert(option_path.clone(), to_json_value(leaf, value));
        }
        let text = serde_json::to_string_pretty(&ConfigDocument { options: stored }).map_err(|source| ConfigError::Encode {
            path: display.clone(),
            source,
        })?;
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: display.clone(),
                source,
            })?;
        }
        fs::write(path, text).map_err(|source| ConfigError::Write { path: display, source })
    }
}

/// Normalizes `value` for `leaf`, or `None` if the declaration rejects it
fn accept_value(leaf: &LeafOption, value: OptionValue) -> Option<OptionValue> {
    match (leaf.kind, value) {
        (OptionKind::Bool, OptionValue::Bool(b)) => Some(OptionValue::Bool(b)),
        (OptionKind::Int, OptionValue::Int(n)) => leaf.bounds.contains(n as f64).then_some(OptionValue::Int(n)),
        (OptionKind::Float, OptionValue::Float(n)) => (n.is_finite() && leaf.bounds.contains(n)).then_some(OptionValue::Float(n)),
        (OptionKind::Float, OptionValue::Int(n)) => leaf.bounds.contains(n as f64).then_some(OptionValue::Float(n as f64)),
        (OptionKind::String, OptionValue::Str(s)) => Some(OptionValue::Str(s)),
        (OptionKind::Enum, OptionValue::Enum(index)) => (index < leaf.values.len()).then_some(OptionValue::Enum(index)),
        (OptionKind::Enum, OptionValue::Str(raw)) => leaf.enum_index(&raw).map(OptionValue::Enum),
        _ => None,
    }
}

fn parse_json_value(leaf: &LeafOption, raw: &Value) -> Option<OptionValue> {
    match leaf.kind {
        OptionKind::Bool => raw.as_bool().map(OptionValue::Bool),
        OptionKind::Int => {
            let n = match raw.as_i64() {
                Some(n) => n,
                None => {
                    let f = raw.as_f64()?;
                    if !f.is_finite() || f.fract() != 0.0 || f.abs() > i64::MAX as f64 {
                        return None;
                    }
                    f as i64
                }
            };
            accept_value(leaf, OptionValue::Int(n))
        }
        OptionKind::Float => accept_value(leaf, OptionValue::Float(raw.as_f64()?)),
        OptionKind::String => raw.as_str().map(|s| OptionValue::Str(s.to_string())),
        OptionKind::Enum => raw.as_str().and_then(|s| leaf.enum_index(s)).map(OptionValue::Enum),
    }
}

fn to_json_value(leaf: Option<&LeafOption>, value: &OptionValue) -> Value {
    match value {
        OptionValue::Bool(b) => Value::Bool(*b),
        OptionValue::Int(n) => Value::Number((*n).into()),
        OptionValue::Float(n) => Number::from_f64(*n).map(Value::Number).unwrap_or(Value::Null),
        OptionValue::Str(s) => Value::String(s.clone()),
        OptionValue::Enum(index) => leaf
            .and_then(|leaf| leaf.values.get(*index))
            .map(|raw| Value::String(raw.clone()))
            .unwrap_or(Value::Null),
    }
}

/// Editable working copy of a pack's option values
///
/// Edits stay local until the owning engine commits the session.
#[derive(Debug, Clone)]
pub struct ConfigSession {
    pack_path: PathBuf,
    config: OptionConfig,
    dirty: bool,
}

impl ConfigSession {
    pub fn new(pack_path: PathBuf, config: OptionConfig) -> Self {
        Self {
            pack_path,
            config,
            dirty: false,
        }
    }

    /// Pack the session was opened for
    pub fn pack_path(&self) -> &Path {
        &self.pack_path
    }

    pub fn config(&self) -> &OptionConfig {
        &self.config
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    /// Sets one option, marking the session dirty if the value changed
    pub fn set(&mut self, options: &OptionSet, path: &str, value: OptionValue) -> Result<(), ConfigError> {
        if self.config.set(options, path, value)? {
            self.dirty = true;
        }
        Ok(())
    }

    /// Resets every option to its default
    pub fn reset(&mut self, options: &OptionSet) {
        let defaults = OptionConfig::defaults(options);
        if defaults != self.config {
            self.config = defaults;
            self.dirty = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::load_fixture;

    fn test_options() -> OptionSet {
        let dir = tempfile::tempdir().unwrap();
        load_fixture(dir.path()).options
    }

    #[test]
    fn test_config_path() {
        assert_eq!(config_path(Path::new("/run/shaderpacks"), Path::new("/run/shaderpacks/Lumen.zip")), PathBuf::from("/run/shaderpacks/Lumen.zip.sscfg"));
    }

    #[test]
    fn test_reconcile_falls_back_to_defaults() {
        let options = test_options();
        let document: Value = serde_json::from_str(
            r#"{"options": {"bloom": "yes", "samples": 32, "exposure": 2.5, "label": "hdr", "quality": "ultra", "stale": 1}}"#,
        )
        .unwrap();
        let (config, changed) = OptionConfig::reconcile(Some(&document), &options);
        assert!(changed);
        assert_eq!(config.get("bloom"), Some(&OptionValue::Bool(true)));
        assert_eq!(config.get("samples"), Some(&OptionValue::Int(4)));
        assert_eq!(config.get("exposure"), Some(&OptionValue::Float(2.5)));
        assert_eq!(config.get("label"), Some(&OptionValue::Str("hdr".to_string())));
        assert_eq!(config.get("quality"), Some(&OptionValue::Enum(1)));
        assert_eq!(config.get("stale"), None);

        let (_, changed) = OptionConfig::reconcile(None, &options);
        assert!(changed);
        let integral: Value = serde_json::from_str(r#"{"options": {"bloom": false, "samples": 8.0, "exposure": 0, "label": "x", "quality": "high", "final_style": "toon"}}"#).unwrap();
        let (config, changed) = OptionConfig::reconcile(Some(&integral), &options);
        assert!(!changed);
        assert_eq!(config.get("samples"), Some(&OptionValue::Int(8)));
        assert_eq!(config.get("quality"), Some(&OptionValue::Enum(2)));
    }

    #[test]
    fn test_save_and_reload_round_trip() {
        let options = test_options();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("packs").join("Test.sscfg");

        let created = OptionConfig::load_or_create(&path, &options);
        assert_eq!(created, OptionConfig::defaults(&options));
        assert!(path.exists());

        let mut config = created.clone();
        assert!(config.set(&options, "bloom", OptionValue::Bool(false)).unwrap());
        assert!(config.set(&options, "samples", OptionValue::Int(12)).unwrap());
        assert!(config.set(&options, "exposure", OptionValue::Float(0.75)).unwrap());
        assert!(config.set(&options, "label", OptionValue::Str("night".to_string())).unwrap());
        assert!(config.set(&options, "quality", OptionValue::Str("low".to_string())).unwrap());
        assert!(!config.set(&options, "bloom", OptionValue::Bool(false)).unwrap());
        config.save(&path, &options).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"quality\": \"low\""));
        assert_eq!(OptionConfig::load_or_create(&path, &options), config);
    }

    #[test]
    fn test_set_rejects_invalid_values() {
        let options = test_options();
        let mut config = OptionConfig::defaults(&options);
        assert!(matches!(config.set(&options, "samples", OptionValue::Int(0)), Err(ConfigError::InvalidValue(_))));
        assert!(matches!(config.set(&options, "quality", OptionValue::Enum(3)), Err(ConfigError::InvalidValue(_))));
        assert!(matches!(config.set(&options, "bloom", OptionValue::Int(1)), Err(ConfigError::InvalidValue(_))));
        assert!(matches!(config.set(&options, "missing", OptionValue::Bool(true)), Err(ConfigError::UnknownOption(_))));
        assert_eq!(config, OptionConfig::defaults(&options));
    }

    #[test]
    fn test_invalid_file_is_rewritten() {
        let options = test_options();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Broken.sscfg");
        fs::write(&path, "{ not json").unwrap();
        let config = OptionConfig::load_or_create(&path, &options);
        assert_eq!(config, OptionConfig::defaults(&options));
        let rewritten: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(rewritten["options"]["quality"], Value::String("medium".to_string()));
    }

    #[test]
    fn test_session_dirty_tracking() {
        let options = test_options();
        let mut session = ConfigSession::new(PathBuf::from("Test"), OptionConfig::defaults(&options));
        assert!(!session.is_dirty());
        session.set(&options, "bloom", OptionValue::Bool(true)).unwrap();
        assert!(!session.is_dirty());
        session.set(&options, "samples", OptionValue::Int(2)).unwrap();
        assert!(session.is_dirty());
        session.clear_dirty();
        session.reset(&options);
        assert!(session.is_dirty());
        assert_eq!(session.config(), &OptionConfig::defaults(&options));
    }
}
