//! Shaderpack model and loader
//!
//! This crate reads user-supplied shaderpacks (a directory or `.zip` archive
//! with a `shaderpack.toml` manifest and per-world stage pipeline files),
//! validates them strictly, and exposes the resulting immutable model. It has
//! no GPU dependencies; the runtime side lives in `sulkan-wgpu`.

pub mod diagnostics;
pub mod discovery;
pub mod expression;
pub mod manifest;
pub mod options;
pub mod pipelines;
pub mod storage;

pub use diagnostics::Diagnostics;
pub use discovery::{ShaderpackCandidate, discover_shaderpacks, find_candidate};
pub use expression::{ExprValue, ExprVariables, ExpressionError};
pub use manifest::{LoadResult, Manifest, load_from_storage, load_shaderpack};
pub use options::{LeafOption, OptionDecl, OptionKind, OptionSet, OptionValue};
pub use pipelines::{PipelinePrograms, ResourceType, Segment, Stage};
pub use storage::{ArchiveStorage, DirectoryStorage, ShaderpackStorage, StorageError, open_storage};
