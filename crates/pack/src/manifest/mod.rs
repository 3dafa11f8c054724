//! Shaderpack manifest model
//!
//! A [`Manifest`] is only ever built from a document that produced no
//! errors; see [`loader`] for how one is read and validated.

pub mod global_settings;
pub mod id_mappings;
pub mod lang;
pub mod loader;
pub mod resources;
pub mod semver;
pub mod texture_bindings;
pub mod ui_layout;

pub use global_settings::{GlobalScalar, GlobalSettings, GlobalValue};
pub use id_mappings::{BlockLayer, IdMappings};
pub use loader::{load_from_storage, load_shaderpack};
pub use resources::{ResourceDecl, ResourceFormat, ResourceLifetime, ResourceResolution};
pub use semver::SemVer;
pub use texture_bindings::{TextureBindings, TextureSource};
pub use ui_layout::UiLayout;

use crate::options::OptionSet;
use crate::pipelines::{PipelinePrograms, Stage};
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;

/// `[features]` flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Features {
    /// The pack exposes user options through the config screen
    pub config_options: bool,
    /// Options are discovered from `@sulkan_option` directives
    pub auto_extract_options: bool,
}

/// `[extensions]` lists
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extensions {
    pub required: Vec<String>,
    pub optional: Vec<String>,
}

/// A validated shaderpack
#[derive(Debug, Clone, PartialEq)]
pub struct Manifest {
    pub name: String,
    pub version: SemVer,
    pub spec_version: SemVer,
    /// Stages set to `true` under `[stages]`
    pub stages: BTreeSet<Stage>,
    pub resources: Vec<ResourceDecl>,
    pub features: Features,
    pub extensions: Extensions,
    pub options: OptionSet,
    pub global: GlobalSettings,
    pub textures: TextureBindings,
    pub ui: UiLayout,
    pub ids: IdMappings,
    pub pipelines: PipelinePrograms,
    pub translations: HashMap<String, String>,
    /// Directory or archive the pack was loaded from
    pub source_path: PathBuf,
}

impl Manifest {
    pub fn stage_enabled(&self, stage: Stage) -> bool {
        self.stages.contains(&stage)
    }

    pub fn resource(&self, name: &str) -> Option<&ResourceDecl> {
        self.resources.iter().find(|resource| resource.name == name)
    }

    /// Translated text for `key`, if any
    pub fn translate(&self, key: &str) -> Option<&str> {
        self.translations.get(key).map(String::as_str)
    }

    /// `"<name> v<version>"`
    pub fn display_name(&self) -> String {
        format!("{} v{}", self.name, self.version)
    }
}

/// Outcome of loading a shaderpack
///
/// `manifest` is `Some` exactly when `errors` is empty.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadResult {
    pub manifest: Option<Manifest>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl LoadResult {
    /// A failed result carrying one error
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            manifest: None,
            errors: vec![message.into()],
            warnings: Vec::new(),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty() && self.manifest.is_some()
    }
}
