//! Custom sampler bindings
//!
//! When the host binds the textures of a draw pipeline, samplers named in the
//! pack's `[textures]` table are pointed at another texture: a host texture
//! by id, or an image file shipped inside the pack. Pack images are decoded
//! once per activation and registered under a stable id of the form
//! `sulkan:shaderpack/<pack>/<path>_<hash>`.

use crate::state::ActivePack;
use crate::transform::normalize_path;
use crate::warn_once::WarnOnce;
use std::collections::HashMap;
use sulkan_pack::manifest::TextureSource;
use sulkan_pack::StorageError;
use xxhash_rust::xxh3::xxh3_64;

/// Namespace of textures registered by the engine
pub const TEXTURE_NAMESPACE: &str = "sulkan";

/// Namespace assumed for host ids written without one
const DEFAULT_NAMESPACE: &str = "minecraft";

/// Errors raised while loading a pack texture
#[derive(Debug, thiserror::Error)]
pub enum TextureError {
    #[error(transparent)]
    Read(#[from] StorageError),
    #[error(transparent)]
    Decode(#[from] image::ImageError),
    #[error("{0}")]
    Upload(String),
}

/// Sampler slot of a host pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamplerSlot {
    pub index: u32,
    pub name: String,
}

/// Host pipeline whose sampler bindings may be overridden
pub trait BindingTarget<T> {
    /// Host pipeline name, used to infer the stage
    fn pipeline_name(&self) -> &str;

    fn sampler_slots(&self) -> Vec<SamplerSlot>;

    fn bind(&mut self, slot: u32, texture: &T);
}

/// Host texture registry
pub trait TextureStore {
    /// Cheap handle to a bindable texture
    type Texture: Clone;

    /// Texture the host registered under `id`, e.g. `minecraft:textures/misc/lightmap.png`
    fn host_texture(&self, id: &str) -> Option<Self::Texture>;

    /// Uploads a decoded pack image and registers it under `id`
    fn register(&mut self, id: &str, image: &image::RgbaImage) -> Result<Self::Texture, TextureError>;

    fn release(&mut self, id: &str);
}

/// Applies `[textures]` overrides to host pipelines
pub struct TextureBinder<S: TextureStore> {
    store: S,
    /// Pack textures by `<pack path>|<relative path>`; `None` caches a failed load
    pack_textures: HashMap<String, Option<S::Texture>>,
    registered: Vec<String>,
    warned: WarnOnce,
}

impl<S: TextureStore> TextureBinder<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            pack_textures: HashMap::new(),
            registered: Vec::new(),
            warned: WarnOnce::new(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// Ids of the pack textures registered so far
    pub fn registered(&self) -> &[String] {
        &self.registered
    }

    /// Binds every sampler of `target` that the pack overrides
    ///
    /// # Returns
    /// The number of samplers rebound
    pub fn apply_bindings(&mut self, pack: &ActivePack, target: &mut dyn BindingTarget<S::Texture>) -> usize {
        let bindings = &pack.manifest.textures;
        if bindings.is_empty() {
            return 0;
        }
        let stage = infer_binding_stage(target.pipeline_name());
        let mut bound = 0;
        for slot in target.sampler_slots() {
            let Some(source) = bindings.resolve(stage, &slot.name) else {
                continue;
            };
            match self.resolve_texture(pack, &source) {
                Some(texture) => {
                    target.bind(slot.index, &texture);
                    bound += 1;
                }
                None => self.warn_binding(stage, &slot.name, &source.to_string()),
            }
        }
        bound
    }

    fn resolve_texture(&mut self, pack: &ActivePack, source: &TextureSource) -> Option<S::Texture> {
        match source {
            TextureSource::Resource(id) | TextureSource::Dynamic(id) => parse_identifier(id).and_then(|id| self.store.host_texture(&id)),
            TextureSource::Shaderpack(path) => self.load_pack_texture(pack, path),
            TextureSource::Unsupported(raw) if raw.starts_with("raw:") => {
                self.warn_binding("any", "raw", &format!("{raw} (raw textures are not enabled yet)"));
                None
            }
            TextureSource::Unsupported(raw) => match parse_identifier(raw) {
                Some(id) => self.store.host_texture(&id),
                None => self.load_pack_texture(pack, raw),
            },
        }
    }

    fn load_pack_texture(&mut self, pack: &ActivePack, path: &str) -> Option<S::Texture> {
        let relative = normalize_path(path);
        if relative.is_empty() {
            return None;
        }
        let key = format!("{}|{relative}", pack.path.display());
        if let Some(cached) = self.pack_textures.get(&key) {
            return cached.clone();
        }
        let id = texture_id(pack, &relative);
        let loaded = match self.register(pack, &id, &relative) {
            Ok(texture) => {
                tracing::debug!("Registered shaderpack texture {id}");
                self.registered.push(id);
                Some(texture)
            }
            Err(e) => {
                if self.warned.first(&format!("register:{relative}")) {
                    tracing::warn!("Failed to register shaderpack texture '{relative}': {e}");
                }
                None
            }
        };
        self.pack_textures.insert(key, loaded.clone());
        loaded
    }

    fn register(&mut self, pack: &ActivePack, id: &str, relative: &str) -> Result<S::Texture, TextureError> {
        let bytes = pack.storage.read_bytes(relative)?;
        let image = image::load_from_memory(&bytes)?.to_rgba8();
        self.store.register(id, &image)
    }

    fn warn_binding(&self, stage: &str, sampler: &str, source: &str) {
        if self.warned.first(&format!("{stage}|{sampler}|{source}")) {
            tracing::warn!("Unable to resolve custom texture binding stage='{stage}', sampler='{sampler}', source='{source}'.");
        }
    }

    /// Releases every registered pack texture
    pub fn invalidate(&mut self) {
        for id in self.registered.drain(..) {
            self.store.release(&id);
        }
        self.pack_textures.clear();
        self.warned.clear();
    }
}

/// Stage whose bindings apply to a host pipeline, `any` when unknown
pub fn infer_binding_stage(pipeline_name: &str) -> &'static str {
    let lower = pipeline_name.trim().to_ascii_lowercase();
    if lower.contains("terrain_earlyz") {
        "shadow"
    } else if lower == "terrain" || lower.contains("/terrain") {
        "gbuffer"
    } else if lower.contains("cloud") {
        "lighting"
    } else if lower.contains("rendertype_item_entity_translucent_cull") {
        "translucent"
    } else if lower.contains("blit") {
        "postprocess"
    } else if lower.contains("screenquad") || lower.contains("animate_sprite") {
        "final"
    } else {
        "any"
    }
}

/// Parses a `namespace:path` id; a bare path gets the `minecraft` namespace
pub fn parse_identifier(value: &str) -> Option<String> {
    let value = value.trim();
    let (namespace, path) = value.split_once(':').unwrap_or((DEFAULT_NAMESPACE, value));
    let valid_namespace = !namespace.is_empty() && namespace.chars().all(|c| matches!(c, 'a'..='z' | '0'..='9' | '_' | '.' | '-'));
    let valid_path = !path.is_empty() && path.chars().all(|c| matches!(c, 'a'..='z' | '0'..='9' | '_' | '.' | '-' | '/'));
    (valid_namespace && valid_path).then(|| format!("{namespace}:{path}"))
}

/// Registry id of a pack texture
pub fn texture_id(pack: &ActivePack, relative: &str) -> String {
    let pack_segment = sanitize_segment(&pack.file_name().to_lowercase());
    let texture_segment = sanitize_segment(relative);
    let hash = xxh3_64(format!("{}|{relative}", pack.path.display()).as_bytes());
    format!("{TEXTURE_NAMESPACE}:shaderpack/{pack_segment}/{texture_segment}_{:08x}", hash as u32)
}

fn sanitize_segment(value: &str) -> String {
    let mapped: String = value
        .replace('\\', "/")
        .chars()
        .map(|c| if matches!(c, 'a'..='z' | '0'..='9' | '.' | '_' | '/' | '-') { c } else { '_' })
        .collect();
    let mapped = mapped.replace("../", "");
    let trimmed = mapped.trim_matches('/');
    if trimmed.is_empty() { "unknown".to_string() } else { trimmed.to_string() }
}

/// Texture store backed by a wgpu device
///
/// Host textures are made known with [`WgpuTextureStore::insert_host_texture`].
#[derive(Debug)]
pub struct WgpuTextureStore {
    device: wgpu::Device,
    queue: wgpu::Queue,
    host: HashMap<String, wgpu::TextureView>,
    uploaded: HashMap<String, wgpu::Texture>,
}

impl WgpuTextureStore {
    pub fn new(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        Self {
            device,
            queue,
            host: HashMap::new(),
            uploaded: HashMap::new(),
        }
    }

    pub fn insert_host_texture(&mut self, id: &str, view: wgpu::TextureView) {
        self.host.insert(id.to_string(), view);
    }
}

impl TextureStore for WgpuTextureStore {
    type Texture = wgpu::TextureView;

    fn host_texture(&self, id: &str) -> Option<Self::Texture> {
        self.host.get(id).cloned()
    }

    fn register(&mut self, id: &str, image: &image::RgbaImage) -> Result<Self::Texture, TextureError> {
        let (width, height) = image.dimensions();
        let size = wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        };
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(id),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8UnormSrgb,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            image.as_raw(),
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(width * 4),
                rows_per_image: Some(height),
            },
            size,
        );
        if let Some(error) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(TextureError::Upload(error.to_string()));
        }
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        self.host.insert(id.to_string(), view.clone());
        self.uploaded.insert(id.to_string(), texture);
        Ok(view)
    }

    fn release(&mut self, id: &str) {
        self.host.remove(id);
        if let Some(texture) = self.uploaded.remove(id) {
            texture.destroy();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OptionConfig;
    use crate::test_support::load_fixture;
    use std::io::Cursor;
    use std::path::Path;
    use std::sync::Arc;
    use sulkan_pack::DirectoryStorage;

    #[derive(Default)]
    struct MapStore {
        host: HashMap<String, String>,
        uploads: Vec<(String, u32, u32)>,
        released: Vec<String>,
    }

    impl TextureStore for MapStore {
        type Texture = String;

        fn host_texture(&self, id: &str) -> Option<String> {
            self.host.get(id).cloned()
        }

        fn register(&mut self, id: &str, image: &image::RgbaImage) -> Result<String, TextureError> {
            self.uploads.push((id.to_string(), image.width(), image.height()));
            Ok(format!("pack:{id}"))
        }

        fn release(&mut self, id: &str) {
            self.released.push(id.to_string());
        }
    }

    struct Target {
        name: &'static str,
        slots: Vec<SamplerSlot>,
        bound: Vec<(u32, String)>,
    }

    impl Target {
        fn new(name: &'static str, samplers: &[&str]) -> Self {
            let slots = samplers
                .iter()
                .enumerate()
                .map(|(index, name)| SamplerSlot {
                    index: index as u32,
                    name: name.to_string(),
                })
                .collect();
            Self { name, slots, bound: Vec::new() }
        }
    }

    impl BindingTarget<String> for Target {
        fn pipeline_name(&self) -> &str {
            self.name
        }

        fn sampler_slots(&self) -> Vec<SamplerSlot> {
            self.slots.clone()
        }

        fn bind(&mut self, slot: u32, texture: &String) {
            self.bound.push((slot, texture.clone()));
        }
    }

    fn fixture_pack(root: &Path) -> ActivePack {
        let manifest = load_fixture(root);
        let mut png = Vec::new();
        image::DynamicImage::ImageRgba8(image::RgbaImage::new(4, 2)).write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png).unwrap();
        std::fs::create_dir_all(root.join("textures")).unwrap();
        std::fs::write(root.join("textures/noise.png"), png).unwrap();
        let config = OptionConfig::defaults(&manifest.options);
        ActivePack::new(manifest, Arc::new(DirectoryStorage::new(root.to_path_buf())), root.to_path_buf(), config)
    }

    #[test]
    fn test_stage_inference() {
        assert_eq!(infer_binding_stage("basic/terrain_earlyZ"), "shadow");
        assert_eq!(infer_binding_stage("Terrain"), "gbuffer");
        assert_eq!(infer_binding_stage("basic/terrain"), "gbuffer");
        assert_eq!(infer_binding_stage("rendertype_clouds"), "lighting");
        assert_eq!(infer_binding_stage("core/blit_screen"), "postprocess");
        assert_eq!(infer_binding_stage("core/screenquad"), "final");
        assert_eq!(infer_binding_stage("rendertype_solid"), "any");
    }

    #[test]
    fn test_identifiers() {
        assert_eq!(parse_identifier("textures/misc/lightmap.png").as_deref(), Some("minecraft:textures/misc/lightmap.png"));
        assert_eq!(parse_identifier(" mod:atlas/blocks ").as_deref(), Some("mod:atlas/blocks"));
        assert_eq!(parse_identifier("Textures/Upper.png"), None);
        assert_eq!(parse_identifier("a:b:c"), None);
        assert_eq!(parse_identifier(""), None);
    }

    #[test]
    fn test_pack_and_host_textures_are_bound() {
        let dir = tempfile::tempdir().unwrap();
        let pack = fixture_pack(dir.path());
        let mut store = MapStore::default();
        store.host.insert("minecraft:textures/misc/lightmap.png".to_string(), "host:lightmap".to_string());
        let mut binder = TextureBinder::new(store);

        let mut terrain = Target::new("basic/terrain", &["Sampler0", "noisetex", "lightmap"]);
        assert_eq!(binder.apply_bindings(&pack, &mut terrain), 2);
        let id = texture_id(&pack, "textures/noise.png");
        assert!(id.starts_with("sulkan:shaderpack/"));
        assert!(id.contains("/textures/noise.png_"));
        assert_eq!(terrain.bound, [(1, format!("pack:{id}")), (2, "host:lightmap".to_string())]);

        let mut again = Target::new("basic/terrain", &["noisetex"]);
        binder.apply_bindings(&pack, &mut again);
        assert_eq!(binder.store().uploads, [(id.clone(), 4, 2)]);

        let mut screen = Target::new("core/screenquad", &["noisetex", "lightmap"]);
        assert_eq!(binder.apply_bindings(&pack, &mut screen), 1);
        assert_eq!(screen.bound, [(1, "host:lightmap".to_string())]);

        binder.invalidate();
        assert_eq!(binder.store().released, [id]);
        assert!(binder.registered().is_empty());
    }

    #[test]
    fn test_unresolved_sources_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let pack = fixture_pack(dir.path());
        std::fs::write(dir.path().join("textures/noise.png"), b"not a png").unwrap();
        let mut binder = TextureBinder::new(MapStore::default());

        let mut terrain = Target::new("terrain", &["noisetex", "lightmap", "rawtex"]);
        assert_eq!(binder.apply_bindings(&pack, &mut terrain), 0);
        assert!(terrain.bound.is_empty());
        assert!(binder.store().uploads.is_empty());
        assert!(binder.registered().is_empty());
    }
}
