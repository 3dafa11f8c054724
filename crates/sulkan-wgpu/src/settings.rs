//! Host-owned engine settings
//!
//! The host persists this record however it likes; the engine only reads it.
//! Every field has a default so partial documents deserialize.

use crate::transform::compat::CompatPolicy;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Directory scanned for shaderpacks, relative to the host run directory
pub const DEFAULT_SHADERPACKS_DIR: &str = "shaderpacks";

/// Directory transformed shaders are exported to when debug export is on
pub const DEFAULT_DEBUG_EXPORT_DIR: &str = "sulkan_shader_debug";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Master switch; when off every boundary call is a no-op
    pub enable_shaderpack: bool,
    /// File name of the selected pack inside `shaderpacks_dir`
    pub selected_shaderpack: String,
    pub enable_hot_reload: bool,
    pub debug_export_shaders: bool,
    pub shaderpacks_dir: PathBuf,
    pub debug_export_dir: PathBuf,
    /// Heuristics used to reject shader sources the target profile cannot compile
    pub compat: CompatPolicy,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            enable_shaderpack: false,
            selected_shaderpack: String::new(),
            enable_hot_reload: true,
            debug_export_shaders: false,
            shaderpacks_dir: PathBuf::from(DEFAULT_SHADERPACKS_DIR),
            debug_export_dir: PathBuf::from(DEFAULT_DEBUG_EXPORT_DIR),
            compat: CompatPolicy::default(),
        }
    }
}
