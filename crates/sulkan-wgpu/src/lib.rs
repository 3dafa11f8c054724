//! Shaderpack runtime for wgpu renderers
//!
//! This crate sits between a host renderer and a loaded shaderpack. It
//! substitutes pack sources for the host's own shaders, records the pack's
//! compute segments after each render pass, and overrides sampler bindings
//! with pack or host textures. Pack parsing and validation live in
//! [`sulkan_pack`].

pub mod applier;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod host;
pub mod resolver;
pub mod settings;
pub mod state;
pub mod texture_binder;
pub mod transform;
pub mod world;

mod warn_once;

#[cfg(test)]
mod test_support;

pub use applier::ShaderApplier;
pub use config::{ConfigError, ConfigSession, OptionConfig};
pub use dispatch::ComputeDispatcher;
pub use dispatch::backend::{BackendError, ComputeBackend};
pub use dispatch::wgpu_backend::WgpuBackend;
pub use engine::{EngineError, ShaderpackEngine};
pub use host::EngineHost;
pub use resolver::PipelineResolver;
pub use settings::EngineSettings;
pub use state::{ActivePack, EngineState};
pub use texture_binder::{BindingTarget, TextureBinder, TextureStore, WgpuTextureStore};
pub use world::WorldCandidateCache;
