//! Compute dispatch
//!
//! Every enabled segment that declares a compute source and at least one
//! storage image is dispatched once per frame, in stage order. Pipelines are
//! cached by segment, source hash and binding signature; images come from a
//! pool of main/alt pairs sized against the frame extent.
//!
//! Failures never abort a frame. A segment that fails is logged once and
//! skipped; the remaining segments still run.

pub mod backend;
pub mod wgpu_backend;

use crate::applier::LoadedSource;
use crate::warn_once::WarnOnce;
use backend::{BackendError, ComputeBackend, ImageBinding};
use std::collections::HashMap;
use sulkan_pack::Segment;
use sulkan_pack::pipelines::segment::{image_render_target, render_target_image};
use xxhash_rust::xxh3::xxh3_64;

/// Pipelines kept before the whole cache is flushed
pub const MAX_PIPELINES: usize = 64;

/// Smallest buffer scale factor honored
const MIN_BUFFER_SCALE: f64 = 0.01;

/// Counters of the dispatcher's caches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Pipelines built successfully and cached
    pub pipelines: usize,
    /// Cached pipeline keys whose build failed
    pub failed_pipelines: usize,
    pub images: usize,
    /// Dispatches recorded since creation
    pub dispatches: u64,
}

#[derive(Debug)]
struct ImagePair<I> {
    main: Option<I>,
    alt: Option<I>,
}

impl<I> Default for ImagePair<I> {
    fn default() -> Self {
        Self { main: None, alt: None }
    }
}

impl<I> ImagePair<I> {
    fn slot(&mut self, alt: bool) -> &mut Option<I> {
        if alt { &mut self.alt } else { &mut self.main }
    }

    fn get(&self, alt: bool) -> Option<&I> {
        if alt { self.alt.as_ref() } else { self.main.as_ref() }
    }

    fn len(&self) -> usize {
        usize::from(self.main.is_some()) + usize::from(self.alt.is_some())
    }
}

/// Records the compute segments of a frame through a [`ComputeBackend`]
///
/// Ping-pong state persists across frames: a segment flipping `colortex1`
/// makes the next dispatch touching `colorimg1` use the other image of the
/// pair, whether that happens later in the frame or in the next one.
pub struct ComputeDispatcher<B: ComputeBackend> {
    backend: B,
    /// `None` marks a key whose build failed; it is not retried until invalidation
    pipelines: HashMap<String, Option<B::Pipeline>>,
    images: HashMap<String, ImagePair<B::Image>>,
    alt_state: HashMap<String, bool>,
    warned_segments: WarnOnce,
    warned_pipelines: WarnOnce,
    dispatches: u64,
}

impl<B: ComputeBackend> ComputeDispatcher<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            pipelines: HashMap::new(),
            images: HashMap::new(),
            alt_state: HashMap::new(),
            warned_segments: WarnOnce::new(),
            warned_pipelines: WarnOnce::new(),
            dispatches: 0,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            pipelines: self.pipelines.values().filter(|pipeline| pipeline.is_some()).count(),
            failed_pipelines: self.pipelines.values().filter(|pipeline| pipeline.is_none()).count(),
            images: self.images.values().map(ImagePair::len).sum(),
            dispatches: self.dispatches,
        }
    }

    /// Current ping-pong state of an image binding, if it was ever flipped
    pub fn is_alt(&self, binding: &str) -> Option<bool> {
        self.alt_state.get(&normalize_binding(binding)).copied()
    }

    /// Records every dispatchable segment of `segments` into `frame`
    ///
    /// # Arguments
    /// * `frame` - Backend recording context of the current render pass
    /// * `segments` - Enabled segments in stage order
    /// * `extent` - Current frame extent; a zero dimension skips the frame
    /// * `load` - Loads the transformed compute source of a segment
    ///
    /// # Returns
    /// The number of dispatches recorded
    pub fn dispatch_frame<F>(&mut self, frame: &mut B::Frame, segments: &[&Segment], extent: (u32, u32), mut load: F) -> usize
    where
        F: FnMut(&Segment, &str) -> Option<LoadedSource>,
    {
        if extent.0 == 0 || extent.1 == 0 {
            return 0;
        }
        let mut recorded = 0;
        for segment in segments {
            let Some(path) = segment.sources.compute.as_deref().filter(|path| !path.trim().is_empty()) else {
                continue;
            };
            match self.dispatch_segment(frame, segment, path, extent, &mut load) {
                Ok(true) => recorded += 1,
                Ok(false) => {}
                Err(e) => {
                    let key = segment.key();
                    if self.warned_segments.first(&key) {
                        tracing::warn!("Failed to dispatch compute segment '{key}': {e}");
                    }
                }
            }
        }
        self.dispatches += recorded as u64;
        recorded
    }

    fn dispatch_segment<F>(&mut self, frame: &mut B::Frame, segment: &Segment, path: &str, extent: (u32, u32), load: &mut F) -> Result<bool, BackendError>
    where
        F: FnMut(&Segment, &str) -> Option<LoadedSource>,
    {
        let bindings = collect_bindings(segment);
        if bindings.is_empty() {
            return Ok(false);
        }
        let Some(loaded) = load(segment, path).filter(|loaded| !loaded.source.trim().is_empty()) else {
            return Ok(false);
        };

        let key = pipeline_key(segment, &loaded.source, &bindings);
        if !self.pipelines.contains_key(&key) {
            let built = self.build_pipeline(&key, &loaded, &bindings);
            if self.pipelines.len() >= MAX_PIPELINES {
                tracing::debug!("Compute pipeline cache is full, flushing {} entries", self.pipelines.len());
                self.flush_pipelines();
            }
            self.pipelines.insert(key.clone(), built);
        }
        if !matches!(self.pipelines.get(&key), Some(Some(_))) {
            return Ok(false);
        }

        let groups = dispatch_groups(segment, extent);
        if groups.contains(&0) {
            return Ok(false);
        }

        let default_alt = segment.ping_pong.is_alt();
        let mut slots = Vec::with_capacity(bindings.len());
        for binding in &bindings {
            let alt = self.alt_state.get(&binding.name).copied().unwrap_or(default_alt);
            let (width, height) = image_extent(segment, &binding.name, extent);
            self.ensure_image(&binding.name, alt, width, height)?;
            slots.push((binding.name.as_str(), alt));
        }

        let Self {
            backend,
            pipelines,
            images,
            alt_state,
            ..
        } = self;
        let Some(Some(pipeline)) = pipelines.get(&key) else {
            return Ok(false);
        };
        let mut bound = Vec::with_capacity(slots.len());
        for (name, alt) in &slots {
            match images.get(*name).and_then(|pair| pair.get(*alt)) {
                Some(image) => bound.push(image),
                None => return Ok(false),
            }
        }
        backend.dispatch(frame, pipeline, &bound, groups)?;

        for (target, _) in segment.flips.iter().filter(|(_, flip)| **flip) {
            let binding = render_target_image(target).unwrap_or_else(|| normalize_binding(target));
            let current = alt_state.get(&binding).copied().unwrap_or(default_alt);
            alt_state.insert(binding, !current);
        }
        Ok(true)
    }

    fn build_pipeline(&mut self, key: &str, loaded: &LoadedSource, bindings: &[ImageBinding]) -> Option<B::Pipeline> {
        match self.backend.create_pipeline(&loaded.path, &loaded.source, bindings) {
            Ok(pipeline) => {
                tracing::debug!("Created compute pipeline for '{}' with {} image bindings", loaded.path, bindings.len());
                Some(pipeline)
            }
            Err(BackendError::Compile { message, .. }) => {
                if self.warned_pipelines.first(key) {
                    tracing::warn!("Failed to compile compute shader '{}'.", loaded.path);
                    tracing::debug!("{message}");
                }
                None
            }
            Err(e) => {
                if self.warned_pipelines.first(key) {
                    tracing::warn!("Failed to create compute pipeline '{}': {e}", loaded.path);
                }
                None
            }
        }
    }

    /// Creates the pool image, or recreates it when its extent changed
    fn ensure_image(&mut self, name: &str, alt: bool, width: u32, height: u32) -> Result<(), BackendError> {
        let pair = self.images.entry(name.to_string()).or_default();
        let slot = pair.slot(alt);
        if let Some(image) = slot.as_ref() {
            if self.backend.image_extent(image) == (width, height) {
                return Ok(());
            }
        }
        let label = format!("{name}_{}", if alt { "alt" } else { "main" });
        *slot = Some(self.backend.create_image(&label, width, height)?);
        Ok(())
    }

    fn flush_pipelines(&mut self) {
        if let Err(e) = self.backend.wait_idle() {
            tracing::warn!("{e}");
        }
        self.pipelines.clear();
    }

    /// Waits for the device, then drops every pipeline, image and ping-pong state
    ///
    /// Called whenever the engine generation changes.
    pub fn invalidate(&mut self) {
        if let Err(e) = self.backend.wait_idle() {
            tracing::warn!("{e}");
        }
        self.pipelines.clear();
        self.images.clear();
        self.alt_state.clear();
        self.warned_segments.clear();
        self.warned_pipelines.clear();
    }
}

fn normalize_binding(binding: &str) -> String {
    binding.trim().to_lowercase()
}

/// Declared image bindings in slot order; a write declaration wins over a read
pub fn collect_bindings(segment: &Segment) -> Vec<ImageBinding> {
    let mut bindings: Vec<ImageBinding> = Vec::new();
    let declared = segment.images_read.iter().map(|name| (name, false)).chain(segment.images_write.iter().map(|name| (name, true)));
    for (name, writable) in declared {
        let name = normalize_binding(name);
        if name.is_empty() {
            continue;
        }
        match bindings.iter_mut().find(|binding| binding.name == name) {
            Some(existing) => existing.writable |= writable,
            None => bindings.push(ImageBinding { name, writable }),
        }
    }
    bindings
}

/// Cache key: `world|stage|name|index|source hash|binding:r|binding:w...`
pub fn pipeline_key(segment: &Segment, source: &str, bindings: &[ImageBinding]) -> String {
    let mut key = format!("{}|{}|{}|{}|{:016x}", segment.world, segment.stage, segment.name, segment.index, xxh3_64(source.as_bytes()));
    for binding in bindings {
        key.push('|');
        key.push_str(&binding.name);
        key.push_str(if binding.writable { ":w" } else { ":r" });
    }
    key
}

/// Extent of the image behind `binding`
///
/// An explicit buffer size of the backing render target wins, then a buffer
/// scale against the frame extent, then the frame extent itself.
pub fn image_extent(segment: &Segment, binding: &str, (width, height): (u32, u32)) -> (u32, u32) {
    let target = image_render_target(binding).unwrap_or_else(|| normalize_binding(binding));
    if let Some([w, h]) = segment.buffer_sizes.get(&target) {
        return ((*w).max(1), (*h).max(1));
    }
    if let Some([sx, sy]) = segment.buffer_scales.get(&target) {
        let scaled = |size: u32, scale: f64| (size as f64 * scale.max(MIN_BUFFER_SCALE)).round().max(1.0) as u32;
        return (scaled(width, *sx), scaled(height, *sy));
    }
    (width.max(1), height.max(1))
}

/// Work group count of a dispatch
///
/// Fixed `work_groups` are used as declared; `work_groups_render` is a group
/// size divided into the frame extent, rounding up.
pub fn dispatch_groups(segment: &Segment, (width, height): (u32, u32)) -> [u32; 3] {
    if let Some(groups) = segment.work_groups {
        return groups;
    }
    if let Some([x, y, z]) = segment.work_groups_render {
        return [width.div_ceil(x.max(1)).max(1), height.div_ceil(y.max(1)).max(1), z.max(1)];
    }
    [1, 1, 1]
}
