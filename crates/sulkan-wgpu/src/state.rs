//! Published engine state
//!
//! The engine never mutates a live state. Applying, clearing or refreshing a
//! shaderpack builds a new [`EngineState`] with the next generation and
//! swaps it in; caches remember the generation they were built against and
//! rebuild themselves when it no longer matches.

use crate::config::OptionConfig;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use sulkan_pack::{LeafOption, Manifest, OptionDecl, OptionValue, ShaderpackStorage};

/// The active shaderpack with its option values
#[derive(Debug, Clone)]
pub struct ActivePack {
    pub manifest: Arc<Manifest>,
    pub storage: Arc<dyn ShaderpackStorage>,
    /// Directory or archive the pack was applied from
    pub path: PathBuf,
    pub config: Arc<OptionConfig>,
}

impl ActivePack {
    pub fn new(manifest: Manifest, storage: Arc<dyn ShaderpackStorage>, path: PathBuf, config: OptionConfig) -> Self {
        Self {
            manifest: Arc::new(manifest),
            storage,
            path,
            config: Arc::new(config),
        }
    }

    /// File name of the pack directory or archive
    pub fn file_name(&self) -> String {
        file_name(&self.path)
    }

    /// Current value of a leaf option, falling back to its default
    pub fn value_of<'a>(&'a self, decl: &OptionDecl, leaf: &'a LeafOption) -> &'a OptionValue {
        self.config.get(&decl.path).unwrap_or(&leaf.default)
    }

    /// Same pack with different option values
    pub fn with_config(&self, config: OptionConfig) -> Self {
        Self {
            config: Arc::new(config),
            ..self.clone()
        }
    }
}

/// Immutable snapshot of everything the runtime reads
#[derive(Debug, Default)]
pub struct EngineState {
    /// Bumped on every apply, clear and refresh
    pub generation: u64,
    pub pack: Option<ActivePack>,
}

impl EngineState {
    pub fn new(generation: u64, pack: Option<ActivePack>) -> Self {
        Self { generation, pack }
    }

    pub fn manifest(&self) -> Option<&Manifest> {
        self.pack.as_ref().map(|pack| pack.manifest.as_ref())
    }

    pub fn is_active(&self) -> bool {
        self.pack.is_some()
    }
}

pub(crate) fn file_name(path: &Path) -> String {
    path.file_name().map(|name| name.to_string_lossy().into_owned()).unwrap_or_else(|| path.display().to_string())
}
