//! GPU backend seam of the compute dispatcher

/// Storage image binding of a compute segment, in binding-slot order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageBinding {
    /// Normalized binding name such as `colorimg1`
    pub name: String,
    pub writable: bool,
}

/// Errors raised by a [`ComputeBackend`]
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("Failed to compile {path}: {message}")]
    Compile { path: String, message: String },
    #[error("{0}")]
    Pipeline(String),
    #[error("Failed to create image {label}: {message}")]
    Image { label: String, message: String },
    #[error("{0}")]
    Dispatch(String),
    #[error("Device did not become idle: {0}")]
    Idle(String),
}

/// Creates and records the native objects a compute segment needs
///
/// Every call happens on the render thread. Dropping a pipeline or image
/// destroys it, so callers wait for idle before dropping a batch.
pub trait ComputeBackend {
    /// A compiled compute pipeline with its binding layout
    type Pipeline;
    /// A 2D storage image
    type Image;
    /// Per-frame recording context, e.g. a command encoder
    type Frame;

    /// Compiles `source` and builds a pipeline whose binding `i` is `bindings[i]`
    ///
    /// # Arguments
    /// * `path` - Pack path of the source, used for labels and errors
    /// * `source` - Fully transformed GLSL compute source
    /// * `bindings` - Storage image bindings in slot order
    fn create_pipeline(&mut self, path: &str, source: &str, bindings: &[ImageBinding]) -> Result<Self::Pipeline, BackendError>;

    fn create_image(&mut self, label: &str, width: u32, height: u32) -> Result<Self::Image, BackendError>;

    fn image_extent(&self, image: &Self::Image) -> (u32, u32);

    /// Records one dispatch; `images[i]` is bound to slot `i`
    ///
    /// Images must be usable as storage images afterwards, and writes made
    /// by this dispatch must be visible to the next recorded dispatch.
    fn dispatch(&mut self, frame: &mut Self::Frame, pipeline: &Self::Pipeline, images: &[&Self::Image], groups: [u32; 3]) -> Result<(), BackendError>;

    /// Blocks until no submitted work references backend objects
    fn wait_idle(&mut self) -> Result<(), BackendError>;
}
