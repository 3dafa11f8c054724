//! Per-world, per-stage segment graphs
//!
//! Stage files live under `pipelines/<world>/<stage>.toml`. The `any` world
//! is the mandatory fallback and must provide every enabled stage.

pub mod interface;
pub mod render_state;
pub mod segment;
pub mod stage;
pub mod stage_file;

pub use render_state::{AlphaFunc, AlphaState, BlendFactor, BlendState};
pub use segment::{PingPong, Segment, SourceSlot, SourceSlots};
pub use stage::{PortMap, ResourceType, Stage};

use crate::diagnostics::Diagnostics;
use crate::storage::ShaderpackStorage;
use std::collections::{BTreeMap, BTreeSet};

/// Directory holding the stage files
pub const PIPELINES_DIR: &str = "pipelines";

/// World id every shaderpack must provide
pub const FALLBACK_WORLD: &str = "any";

/// Segments of one world, by stage
pub type StagePrograms = BTreeMap<Stage, Vec<Segment>>;

/// All segments of a shaderpack: world to stage to sorted segments
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelinePrograms {
    worlds: BTreeMap<String, StagePrograms>,
}

impl PipelinePrograms {
    pub fn new(worlds: BTreeMap<String, StagePrograms>) -> Self {
        Self { worlds }
    }

    /// Segments declared for `stage` in `world`, empty if none
    pub fn segments(&self, world: &str, stage: Stage) -> &[Segment] {
        self.worlds.get(world).and_then(|stages| stages.get(&stage)).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn has_world(&self, world: &str) -> bool {
        self.worlds.contains_key(world)
    }

    pub fn worlds(&self) -> impl Iterator<Item = &str> {
        self.worlds.keys().map(String::as_str)
    }

    /// Iterates every segment of every world
    pub fn iter(&self) -> impl Iterator<Item = &Segment> {
        self.worlds.values().flat_map(|stages| stages.values().flatten())
    }
}

/// Parses every stage file of the shaderpack
///
/// # Arguments
/// * `storage` - Shaderpack files
/// * `enabled` - Stages the manifest enables; the `any` world must supply each of them
/// * `diag` - Receives errors and warnings
pub fn load_pipelines(storage: &dyn ShaderpackStorage, enabled: &BTreeSet<Stage>, diag: &mut Diagnostics) -> PipelinePrograms {
    let mut worlds: Vec<String> = storage.list_dir(PIPELINES_DIR).into_iter().filter(|entry| entry.is_dir).map(|entry| entry.name).collect();
    worlds.sort_by_key(|world| world.to_lowercase());

    let mut programs = BTreeMap::new();
    for world in worlds {
        let mut stages = StagePrograms::new();
        let mut has_stage_file = false;
        for stage in Stage::ALL {
            let label = format!("{PIPELINES_DIR}/{world}/{stage}.toml");
            if !storage.exists(&label) {
                continue;
            }
            has_stage_file = true;
            let text = match storage.read_string(&label) {
                Ok(text) => text,
                Err(e) => {
                    diag.error(format!("Failed to read {label}: {e}"));
                    continue;
                }
            };
            let segments = stage_file::parse_stage_file(&world, stage, &text, &label, diag);
            if !segments.is_empty() {
                stages.insert(stage, segments);
            }
        }
        if has_stage_file {
            programs.insert(world, stages);
        }
    }

    if programs.is_empty() {
        diag.error(format!("Missing pipeline mappings under {PIPELINES_DIR}/[world_id]/[stage].toml."));
        return PipelinePrograms::default();
    }

    match programs.get(FALLBACK_WORLD) {
        None => diag.error(format!("Missing fallback pipeline mappings under {PIPELINES_DIR}/{FALLBACK_WORLD}/.")),
        Some(fallback) => {
            for stage in enabled {
                if fallback.get(stage).is_none_or(Vec::is_empty) {
                    diag.error(format!("Missing pipeline stage file: {PIPELINES_DIR}/{FALLBACK_WORLD}/{stage}.toml"));
                }
            }
        }
    }
    PipelinePrograms::new(programs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::DirectoryStorage;
    use std::fs;

    const FINAL_STAGE: &str = r#"
[[segments]]
name = "main"
index = 0
fragment = "shaders/final.fsh"
inputs = ["Texture2D:post_color", "DepthTexture:post_depth", "MotionTexture:motion_vectors"]
outputs = ["Texture2D:final_color", "DepthTexture:final_depth", "MotionTexture:final_motion"]
"#;

    fn write(root: &std::path::Path, path: &str, text: &str) {
        let path = root.join(path);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, text).unwrap();
    }

    #[test]
    fn test_loads_worlds_and_requires_fallback_stages() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "pipelines/any/final.toml", FINAL_STAGE);
        write(dir.path(), "pipelines/world-1/final.toml", FINAL_STAGE);
        write(dir.path(), "pipelines/notes/readme.txt", "ignored");
        let storage = DirectoryStorage::new(dir.path());

        let mut diag = Diagnostics::new();
        let enabled = BTreeSet::from([Stage::Final, Stage::Lighting]);
        let programs = load_pipelines(&storage, &enabled, &mut diag);
        assert_eq!(diag.errors, vec!["Missing pipeline stage file: pipelines/any/lighting.toml"]);
        assert_eq!(programs.worlds().collect::<Vec<_>>(), vec!["any", "world-1"]);
        assert_eq!(programs.segments("world-1", Stage::Final)[0].world, "world-1");
        assert!(programs.segments("any", Stage::Shadow).is_empty());
        assert!(!programs.has_world("notes"));
    }

    #[test]
    fn test_missing_fallback_world() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "pipelines/world0/final.toml", FINAL_STAGE);
        let mut diag = Diagnostics::new();
        load_pipelines(&DirectoryStorage::new(dir.path()), &BTreeSet::new(), &mut diag);
        assert_eq!(diag.errors, vec!["Missing fallback pipeline mappings under pipelines/any/."]);

        let empty = tempfile::tempdir().unwrap();
        let mut diag = Diagnostics::new();
        load_pipelines(&DirectoryStorage::new(empty.path()), &BTreeSet::new(), &mut diag);
        assert_eq!(diag.errors, vec!["Missing pipeline mappings under pipelines/[world_id]/[stage].toml."]);
    }
}
