//! The shaderpack engine
//!
//! [`ShaderpackEngine`] owns the published [`EngineState`] and every runtime
//! cache, and serves the host's calls:
//!
//! - [`ShaderpackEngine::try_replace_shader_source`] when the host loads a shader
//! - [`ShaderpackEngine::dispatch_frame`] once per completed render pass
//! - [`ShaderpackEngine::apply_image_bindings`] when the host binds draw textures
//!
//! Lifecycle calls (apply, clear, refresh, committing option edits) publish a
//! new state under the next generation first, then wait for the device to go
//! idle and drop the GPU objects built for the previous generation.

use crate::applier::{ApplierStats, ApplyContext, ShaderApplier, relative_shader_path};
use crate::config::{ConfigError, ConfigSession, OptionConfig, config_path};
use crate::dispatch::backend::ComputeBackend;
use crate::dispatch::wgpu_backend::WgpuBackend;
use crate::dispatch::{ComputeDispatcher, DispatchStats};
use crate::host::EngineHost;
use crate::resolver::{LookupStats, PipelineResolver};
use crate::settings::EngineSettings;
use crate::state::{ActivePack, EngineState, file_name};
use crate::texture_binder::{BindingTarget, TextureBinder, TextureStore, WgpuTextureStore};
use crate::world::{CacheStats, WorldCandidateCache};
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use sulkan_pack::{LoadResult, Segment, ShaderpackCandidate, ShaderpackStorage, discover_shaderpacks, load_shaderpack, open_storage};

/// Global settings that switch runtime hot reload; the first one present decides
const HOT_RELOAD_KEYS: &[&str] = &["hot_reload", "runtime.hot_reload", "debug.hot_reload", "debug_hot_reload"];

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("No shaderpack is active")]
    NoActivePack,
    #[error("Config session belongs to {session}, but {active} is active")]
    PackMismatch { session: String, active: String },
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Runtime side of the shaderpack system
pub struct ShaderpackEngine<B: ComputeBackend = WgpuBackend, S: TextureStore = WgpuTextureStore> {
    host: Arc<dyn EngineHost>,
    settings: RwLock<EngineSettings>,
    /// Replaced whole; the next generation is derived under the write lock
    state: RwLock<Arc<EngineState>>,
    worlds: WorldCandidateCache,
    resolver: PipelineResolver,
    applier: ShaderApplier,
    dispatcher: Mutex<ComputeDispatcher<B>>,
    textures: Mutex<TextureBinder<S>>,
}

impl<B: ComputeBackend, S: TextureStore> ShaderpackEngine<B, S> {
    /// Creates an engine with no active shaderpack
    ///
    /// # Arguments
    /// * `host` - Outward services of the host renderer
    /// * `settings` - Host-owned settings, replaceable later with [`Self::set_settings`]
    /// * `backend` - GPU backend compute segments are recorded through
    /// * `store` - Host texture registry used for sampler overrides
    pub fn new(host: Arc<dyn EngineHost>, settings: EngineSettings, backend: B, store: S) -> Self {
        Self {
            host,
            settings: RwLock::new(settings),
            state: RwLock::new(Arc::new(EngineState::default())),
            worlds: WorldCandidateCache::new(),
            resolver: PipelineResolver::new(),
            applier: ShaderApplier::new(),
            dispatcher: Mutex::new(ComputeDispatcher::new(backend)),
            textures: Mutex::new(TextureBinder::new(store)),
        }
    }

    pub fn settings(&self) -> EngineSettings {
        self.settings.read().clone()
    }

    pub fn set_settings(&self, settings: EngineSettings) {
        *self.settings.write() = settings;
    }

    /// The currently published state
    pub fn state(&self) -> Arc<EngineState> {
        self.state.read().clone()
    }

    pub fn generation(&self) -> u64 {
        self.state.read().generation
    }

    /// Every shaderpack in the configured shaderpacks directory
    pub fn discover(&self) -> Vec<ShaderpackCandidate> {
        let dir = self.settings.read().shaderpacks_dir.clone();
        discover_shaderpacks(&dir, &self.host.locale())
    }

    /// Loads and activates the shaderpack at `path`
    ///
    /// An invalid pack deactivates the current one. The result carries the
    /// manifest and every error and warning found while loading.
    pub fn apply(&self, path: &Path) -> LoadResult {
        let result = load_shaderpack(path, &self.host.locale());
        let name = file_name(path);
        for warning in &result.warnings {
            tracing::warn!("Shaderpack {name}: {warning}");
        }
        let Some(manifest) = result.manifest.clone().filter(|_| result.is_valid()) else {
            tracing::warn!("Failed to load shaderpack {name}:");
            for error in &result.errors {
                tracing::warn!("  {error}");
            }
            self.publish(None);
            return result;
        };
        let storage: Arc<dyn ShaderpackStorage> = match open_storage(path) {
            Ok(storage) => Arc::from(storage),
            Err(e) => {
                self.publish(None);
                return LoadResult::error(format!("Failed to open shaderpack {name}: {e}"));
            }
        };
        let sidecar = config_path(&self.settings.read().shaderpacks_dir, path);
        let config = OptionConfig::load_or_create(&sidecar, &manifest.options);
        tracing::info!("Applied shaderpack {}", manifest.display_name());
        self.publish(Some(ActivePack::new(manifest, storage, path.to_path_buf(), config)));
        result
    }

    /// Applies the pack selected in the settings, or clears when none is selected
    pub fn apply_selected(&self) -> LoadResult {
        let (dir, selected) = {
            let settings = self.settings.read();
            (settings.shaderpacks_dir.clone(), settings.selected_shaderpack.trim().to_string())
        };
        if selected.is_empty() {
            self.clear();
            return LoadResult::error("No shaderpack selected.");
        }
        self.apply(&dir.join(selected))
    }

    /// Deactivates the current shaderpack
    pub fn clear(&self) {
        self.publish(None);
    }

    /// Re-reads the active pack's option sidecar
    pub fn refresh_config(&self) {
        let state = self.state();
        let pack = state.pack.as_ref().map(|pack| {
            let sidecar = config_path(&self.settings.read().shaderpacks_dir, &pack.path);
            pack.with_config(OptionConfig::load_or_create(&sidecar, &pack.manifest.options))
        });
        self.publish(pack);
    }

    /// Opens an editable copy of the active pack's option values
    pub fn open_config_session(&self) -> Option<ConfigSession> {
        let state = self.state();
        let pack = state.pack.as_ref()?;
        Some(ConfigSession::new(pack.path.clone(), (*pack.config).clone()))
    }

    /// Persists a dirty session and publishes its values
    ///
    /// Asks the host to reload its resources afterwards. Returns false when
    /// the session had no changes.
    pub fn commit_config(&self, session: &mut ConfigSession) -> Result<bool, EngineError> {
        if !session.is_dirty() {
            return Ok(false);
        }
        let state = self.state();
        let pack = state.pack.as_ref().ok_or(EngineError::NoActivePack)?;
        if pack.path != session.pack_path() {
            return Err(EngineError::PackMismatch {
                session: file_name(session.pack_path()),
                active: pack.file_name(),
            });
        }
        let sidecar = config_path(&self.settings.read().shaderpacks_dir, &pack.path);
        session.config().save(&sidecar, &pack.manifest.options)?;
        self.publish(Some(pack.with_config(session.config().clone())));
        session.clear_dirty();
        self.host.request_reload();
        Ok(true)
    }

    /// Whether the host may reload the pack at runtime
    ///
    /// Both the host setting and the pack's global hot reload switch must allow it.
    pub fn is_hot_reload_enabled(&self) -> bool {
        if !self.settings.read().enable_hot_reload {
            return false;
        }
        let state = self.state();
        let Some(manifest) = state.manifest() else {
            return true;
        };
        HOT_RELOAD_KEYS
            .iter()
            .find(|key| manifest.global.get(key).is_some())
            .is_none_or(|key| manifest.global.get_bool(key, true))
    }

    /// Re-applies the selected pack and asks the host for a full reload
    ///
    /// Returns `None` when hot reload is disabled.
    pub fn hot_reload(&self) -> Option<LoadResult> {
        if !self.is_hot_reload_enabled() {
            tracing::debug!("Hot reload is disabled");
            return None;
        }
        let result = if self.settings.read().enable_shaderpack {
            self.apply_selected()
        } else {
            self.clear();
            LoadResult {
                manifest: None,
                errors: Vec::new(),
                warnings: Vec::new(),
            }
        };
        self.host.request_reload();
        Some(result)
    }

    /// Swaps in a new state, then tears down everything built for the old one
    fn publish(&self, pack: Option<ActivePack>) {
        let previous = {
            let mut state = self.state.write();
            let generation = state.generation + 1;
            std::mem::replace(&mut *state, Arc::new(EngineState::new(generation, pack)))
        };
        tracing::debug!("Published engine state generation {} (was {})", previous.generation + 1, previous.generation);
        self.host.wait_idle();
        self.resolver.invalidate();
        self.applier.invalidate();
        self.dispatcher.lock().invalidate();
        self.textures.lock().invalidate();
    }

    fn is_enabled(&self) -> bool {
        self.settings.read().enable_shaderpack
    }

    /// Source to use for a host shader resource, `None` to keep the host's own
    pub fn try_replace_shader_source(&self, locator: &str) -> Option<Bytes> {
        let relative = relative_shader_path(locator)?;
        if !self.is_enabled() {
            return None;
        }
        let state = self.state();
        let pack = state.pack.as_ref()?;
        let worlds = self.worlds.candidates(self.host.world_identity().as_deref());
        let segment = self.resolver.resolve(&state, &worlds, &relative);
        let settings = self.settings();
        let ctx = ApplyContext {
            pack,
            generation: state.generation,
            settings: &settings,
            host: self.host.as_ref(),
            worlds: &worlds,
        };
        self.applier.replace(&ctx, locator, &relative, segment)
    }

    /// Enabled segments of the current world, in stage order
    pub fn resolve_active_segments_for_dispatch(&self) -> Vec<Segment> {
        if !self.is_enabled() {
            return Vec::new();
        }
        let state = self.state();
        let worlds = self.worlds.candidates(self.host.world_identity().as_deref());
        self.resolver.resolve_all(&state, &worlds).into_iter().cloned().collect()
    }

    /// Records the compute segments of the current world into `frame`
    ///
    /// # Returns
    /// The number of dispatches recorded
    pub fn dispatch_frame(&self, frame: &mut B::Frame) -> usize {
        if !self.is_enabled() {
            return 0;
        }
        let state = self.state();
        let Some(pack) = state.pack.as_ref() else {
            return 0;
        };
        let Some(extent) = self.host.frame_extent() else {
            return 0;
        };
        let worlds = self.worlds.candidates(self.host.world_identity().as_deref());
        let segments = self.resolver.resolve_all(&state, &worlds);
        if !segments.iter().any(|segment| segment.sources.compute.is_some()) {
            return 0;
        }
        let settings = self.settings();
        let ctx = ApplyContext {
            pack,
            generation: state.generation,
            settings: &settings,
            host: self.host.as_ref(),
            worlds: &worlds,
        };
        self.dispatcher
            .lock()
            .dispatch_frame(frame, &segments, extent, |segment, path| self.applier.load_pipeline_source(&ctx, segment, path, "compute"))
    }

    /// Overrides the sampler bindings of a host pipeline
    ///
    /// # Returns
    /// The number of samplers rebound
    pub fn apply_image_bindings(&self, target: &mut dyn BindingTarget<S::Texture>) -> usize {
        if !self.is_enabled() {
            return 0;
        }
        let state = self.state();
        match state.pack.as_ref() {
            Some(pack) => self.textures.lock().apply_bindings(pack, target),
            None => 0,
        }
    }

    /// Path of the active pack
    pub fn active_path(&self) -> Option<PathBuf> {
        self.state().pack.as_ref().map(|pack| pack.path.clone())
    }

    /// World candidates of the last seen world identity
    pub fn cached_world_candidates(&self) -> Vec<String> {
        self.worlds.current().to_vec()
    }

    pub fn world_candidate_stats(&self) -> CacheStats {
        self.worlds.stats()
    }

    pub fn lookup_stats(&self) -> LookupStats {
        self.resolver.stats()
    }

    pub fn applier_stats(&self) -> ApplierStats {
        self.applier.stats()
    }

    pub fn dispatch_stats(&self) -> DispatchStats {
        self.dispatcher.lock().stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{MockBackend, write, write_fixture_pack};
    use std::sync::atomic::{AtomicU64, Ordering};
    use crate::texture_binder::{SamplerSlot, TextureError};
    use sulkan_pack::OptionValue;

    #[derive(Default)]
    struct TestHost {
        world: Mutex<Option<String>>,
        waits: AtomicU64,
        reloads: AtomicU64,
    }

    impl EngineHost for TestHost {
        fn world_identity(&self) -> Option<String> {
            self.world.lock().clone()
        }

        fn frame_extent(&self) -> Option<(u32, u32)> {
            Some((1920, 1080))
        }

        fn read_resource(&self, _locator: &str) -> Option<String> {
            None
        }

        fn wait_idle(&self) {
            self.waits.fetch_add(1, Ordering::SeqCst);
        }

        fn request_reload(&self) {
            self.reloads.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct HostTextures;

    impl TextureStore for HostTextures {
        type Texture = String;

        fn host_texture(&self, id: &str) -> Option<String> {
            Some(format!("host:{id}"))
        }

        fn register(&mut self, id: &str, _image: &image::RgbaImage) -> Result<String, TextureError> {
            Ok(id.to_string())
        }

        fn release(&mut self, _id: &str) {}
    }

    struct Target(Vec<(u32, String)>);

    impl BindingTarget<String> for Target {
        fn pipeline_name(&self) -> &str {
            "core/screenquad"
        }

        fn sampler_slots(&self) -> Vec<SamplerSlot> {
            vec![SamplerSlot {
                index: 2,
                name: "lightmap".to_string(),
            }]
        }

        fn bind(&mut self, slot: u32, texture: &String) {
            self.0.push((slot, texture.clone()));
        }
    }

    type TestEngine = ShaderpackEngine<MockBackend, HostTextures>;

    fn engine(dir: &Path, host: Arc<TestHost>) -> TestEngine {
        write_fixture_pack(&dir.join("Fixture"));
        let settings = EngineSettings {
            enable_shaderpack: true,
            selected_shaderpack: "Fixture".to_string(),
            shaderpacks_dir: dir.to_path_buf(),
            ..Default::default()
        };
        ShaderpackEngine::new(host, settings, MockBackend::default(), HostTextures)
    }

    fn keys(engine: &TestEngine) -> Vec<String> {
        engine.resolve_active_segments_for_dispatch().iter().map(Segment::key).collect()
    }

    const TERRAIN: &str = "file:/mods/host.jar!/assets/vulkanmod/shaders/basic/terrain/terrain.fsh";

    #[test]
    fn test_apply_selected_serves_sources() {
        let dir = tempfile::tempdir().unwrap();
        let host = Arc::new(TestHost::default());
        let engine = engine(dir.path(), host.clone());
        assert!(engine.try_replace_shader_source(TERRAIN).is_none());

        let result = engine.apply_selected();
        assert!(result.is_valid(), "{:?}", result.errors);
        assert_eq!(engine.generation(), 1);
        assert_eq!(engine.active_path(), Some(dir.path().join("Fixture")));
        assert!(dir.path().join("Fixture.sscfg").is_file());

        let source = String::from_utf8(engine.try_replace_shader_source(TERRAIN).unwrap().to_vec()).unwrap();
        assert!(source.contains("#define SULKAN_STAGE_GBUFFER 1\n"));
        assert!(engine.try_replace_shader_source("file:/mods/host.jar!/assets/vulkanmod/textures/a.png").is_none());
        assert_eq!(engine.lookup_stats().requests, 1);

        engine.set_settings(EngineSettings {
            enable_shaderpack: false,
            ..engine.settings()
        });
        assert!(engine.try_replace_shader_source(TERRAIN).is_none());
        assert!(engine.resolve_active_segments_for_dispatch().is_empty());
    }

    #[test]
    fn test_blank_selection_and_invalid_packs_clear() {
        let dir = tempfile::tempdir().unwrap();
        let host = Arc::new(TestHost::default());
        let engine = engine(dir.path(), host.clone());
        assert!(engine.apply_selected().is_valid());

        engine.set_settings(EngineSettings {
            selected_shaderpack: "  ".to_string(),
            ..engine.settings()
        });
        let result = engine.apply_selected();
        assert_eq!(result.errors, ["No shaderpack selected."]);
        assert!(!engine.state().is_active());
        assert_eq!(engine.generation(), 2);

        write(&dir.path().join("Broken"), "shaderpack.toml", "[shaderpack]\nname = \"Broken\"\n");
        let result = engine.apply(&dir.path().join("Broken"));
        assert!(!result.is_valid());
        assert!(!engine.state().is_active());
        assert_eq!(engine.generation(), 3);
        assert_eq!(host.waits.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_concurrent_publishes_keep_generations_increasing() {
        let dir = tempfile::tempdir().unwrap();
        let host = Arc::new(TestHost::default());
        let engine = engine(dir.path(), host.clone());
        assert!(engine.apply_selected().is_valid());

        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    let mut last = 0;
                    for _ in 0..25 {
                        engine.clear();
                        let generation = engine.generation();
                        assert!(generation > last);
                        last = generation;
                    }
                });
            }
        });
        assert_eq!(engine.generation(), 201);
        assert_eq!(host.waits.load(Ordering::SeqCst), 201);
        assert!(!engine.state().is_active());
    }

    #[test]
    fn test_dispatch_and_world_switch() {
        let dir = tempfile::tempdir().unwrap();
        let host = Arc::new(TestHost::default());
        let engine = engine(dir.path(), host.clone());
        engine.apply_selected();

        assert_eq!(keys(&engine), ["gbuffer:terrain#1", "postprocess:blur#0", "postprocess:composite#1", "final:main#0"]);
        let mut frame = Vec::new();
        assert_eq!(engine.dispatch_frame(&mut frame), 1);
        assert_eq!(frame.len(), 1);
        assert!(frame[0].starts_with("shaders/post/blur.csh [240, 135, 1] colorimg0_main@1920x1080,colorimg1_main@1920x1080"));
        assert_eq!(engine.dispatch_stats().pipelines, 1);

        *host.world.lock() = Some("minecraft:the_nether".to_string());
        assert_eq!(keys(&engine)[0], "gbuffer:nether#0");
        assert_eq!(engine.cached_world_candidates(), ["minecraft:the_nether", "minecraft_the_nether", "world-1", "the_nether", "any"]);

        engine.clear();
        assert_eq!(engine.dispatch_stats().pipelines, 0);
        assert_eq!(engine.backend_events(), ["wait", "wait", "drop shaders/post/blur.csh"]);
        assert_eq!(engine.dispatch_frame(&mut frame), 0);
    }

    #[test]
    fn test_commit_config_session() {
        let dir = tempfile::tempdir().unwrap();
        let host = Arc::new(TestHost::default());
        let engine = engine(dir.path(), host.clone());
        engine.apply_selected();

        let mut session = engine.open_config_session().unwrap();
        assert!(!engine.commit_config(&mut session).unwrap());
        let options = engine.state().manifest().unwrap().options.clone();
        session.set(&options, "bloom", OptionValue::Bool(false)).unwrap();
        assert!(engine.commit_config(&mut session).unwrap());
        assert!(!session.is_dirty());
        assert_eq!(engine.generation(), 2);
        assert_eq!(host.reloads.load(Ordering::SeqCst), 1);
        assert_eq!(keys(&engine)[0], "gbuffer:terrain_lite#0");

        let sidecar = std::fs::read_to_string(dir.path().join("Fixture.sscfg")).unwrap();
        assert!(sidecar.contains("\"bloom\": false"));
        engine.refresh_config();
        assert_eq!(engine.state().pack.as_ref().unwrap().config.get("bloom"), Some(&OptionValue::Bool(false)));

        engine.clear();
        assert!(matches!(engine.commit_config(&mut session), Ok(false)));
        session.mark_dirty();
        assert!(matches!(engine.commit_config(&mut session), Err(EngineError::NoActivePack)));
    }

    #[test]
    fn test_hot_reload_and_image_bindings() {
        let dir = tempfile::tempdir().unwrap();
        let host = Arc::new(TestHost::default());
        let engine = engine(dir.path(), host.clone());
        assert!(engine.is_hot_reload_enabled());
        assert!(engine.hot_reload().unwrap().is_valid());
        assert_eq!(host.reloads.load(Ordering::SeqCst), 1);

        let mut target = Target(Vec::new());
        assert_eq!(engine.apply_image_bindings(&mut target), 1);
        assert_eq!(target.0, [(2, "host:minecraft:textures/misc/lightmap.png".to_string())]);

        engine.set_settings(EngineSettings {
            enable_hot_reload: false,
            ..engine.settings()
        });
        assert!(engine.hot_reload().is_none());
        assert_eq!(host.reloads.load(Ordering::SeqCst), 1);
    }

    impl TestEngine {
        fn backend_events(&self) -> Vec<String> {
            self.dispatcher.lock().backend().events.lock().clone()
        }
    }
}
