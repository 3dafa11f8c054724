//! Shaderpack fixture and GPU stand-ins shared by the unit tests

use crate::dispatch::backend::{BackendError, ComputeBackend, ImageBinding};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use sulkan_pack::{Manifest, load_shaderpack};

pub const MANIFEST: &str = r#"
[shaderpack]
name = "Fixture"
version = "1.2.0"
spec_version = "1.0.0"

[stages]
shadow = false
gbuffer = true
lighting = false
translucent = false
postprocess = true
final = true

[features]
sulkan_config_options = true

[options.bloom]
type = "bool"
default = true
target = "shaders/basic/terrain/terrain.fsh"
key = "BLOOM"

[options.samples]
type = "int"
default = 4
min = 1
max = 16
target = "shaders/basic/terrain/terrain.fsh"
key = "SAMPLES"

[options.exposure]
type = "float"
default = 1.0
min = 0.0
max = 4.0
target = "shaders/basic/terrain/terrain.fsh"
key = "EXPOSURE"

[options.label]
type = "string"
default = "none"
target = "shaders/basic/terrain/terrain.fsh"
key = "LABEL"

[options.quality]
type = "enum"
default = "medium"
values = ["low", "medium", "high"]
render_values = ["1", "2", "3"]
target = "shaders/basic/terrain/terrain.fsh"
key = "QUALITY"

[options.final_style]
type = "enum"
default = "plain"
values = ["plain", "toon"]
render_values = ["shaders/final.fsh", "shaders/styles/toon.fsh"]
target = "shaders/core/screenquad/screenquad.fsh"
key = "[use_file]"

[global]
shadow_distance = 128
sky_tint = [1, 0.5, "blue"]
debug = { save_shaders = false }

[ids.blocks]
"minecraft:grass_block" = 10

[ids.layer]
"minecraft:glass" = "translucent"

[textures.gbuffer]
noisetex = "shaderpack:textures/noise.png"

[textures.any]
lightmap = "resource:textures/misc/lightmap.png"
rawtex = "raw:data.bin"
"#;

pub const GBUFFER: &str = r#"
[params]
tint = "warm"

[[segments]]
name = "terrain_lite"
index = 0
enabled = "!bloom"
fragment = "shaders/gbuffer/lite.fsh"
inputs = ["Buffer:scene_geometry", "Buffer:material_params", "Buffer:camera_matrices"]
outputs = ["Texture2D:gbuffer_albedo", "Texture2D:gbuffer_normal", "DepthTexture:gbuffer_depth"]

[[segments]]
name = "terrain"
index = 1
vertex = "shaders/gbuffer/terrain.vsh"
fragment = "shaders/gbuffer/terrain.fsh"
drawbuffers = "01"
outputs = ["Texture2D:gbuffer_albedo", "Texture2D:gbuffer_normal", "DepthTexture:gbuffer_depth"]
"#;

pub const NETHER_GBUFFER: &str = r#"
[[segments]]
name = "nether"
index = 0
fragment = "shaders/nether/terrain.fsh"
inputs = ["Buffer:scene_geometry", "Buffer:material_params", "Buffer:camera_matrices"]
outputs = ["Texture2D:gbuffer_albedo", "Texture2D:gbuffer_normal", "DepthTexture:gbuffer_depth"]
"#;

pub const POSTPROCESS: &str = r#"
[[segments]]
name = "blur"
index = 0
compute = "shaders/post/blur.csh"
inputs = ["Texture2D:scene_color", "DepthTexture:scene_depth"]
outputs = ["Texture2D:post_color", "DepthTexture:post_depth"]
images_read = ["colorimg0"]
images_write = ["colorimg1"]
work_groups_render = [8, 8, 1]
flip = { colortex1 = true }

[[segments]]
name = "composite"
index = 1
fragment = "shaders/post/composite.fsh"
outputs = ["Texture2D:post_color", "DepthTexture:post_depth"]
"#;

pub const FINAL: &str = r#"
[[segments]]
name = "main"
index = 0
vertex = "shaders/final.vsh"
fragment = "shaders/final.fsh"
inputs = ["Texture2D:post_color", "DepthTexture:post_depth", "MotionTexture:motion_vectors"]
outputs = ["Texture2D:final_color", "DepthTexture:final_depth", "MotionTexture:final_motion"]
"#;

pub const TERRAIN_FSH: &str = "#version 450\n#include \"lib/common.glsl\"\nconst int SAMPLES = @SULKAN:SAMPLES@;\nconst int QUALITY = @SULKAN:QUALITY@;\nlayout(location = 0) out vec4 fragColor;\nvoid main() {\n    fragColor = vec4(common_tint(), 1.0); // @SULKAN_PARAM:tint@\n}\n";

pub const COMMON_GLSL: &str = "#pragma once\nvec3 common_tint() { return vec3(1.0); }\n";

pub const BLUR_CSH: &str = "#version 450\nlayout(local_size_x = 8, local_size_y = 8) in;\nlayout(rgba8, binding = 0) uniform readonly image2D colorimg0;\nlayout(rgba8, binding = 1) uniform writeonly image2D colorimg1;\nvoid main() {\n    ivec2 p = ivec2(gl_GlobalInvocationID.xy);\n    imageStore(colorimg1, p, imageLoad(colorimg0, p));\n}\n";

pub fn write(root: &Path, path: &str, text: &str) {
    let path = root.join(path);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, text).unwrap();
}

/// Writes the fixture pack into directory `root`
pub fn write_fixture_pack(root: &Path) {
    write(root, "shaderpack.toml", MANIFEST);
    write(root, "pipelines/any/gbuffer.toml", GBUFFER);
    write(root, "pipelines/any/postprocess.toml", POSTPROCESS);
    write(root, "pipelines/any/final.toml", FINAL);
    write(root, "pipelines/world-1/gbuffer.toml", NETHER_GBUFFER);
    write(root, "shaders/gbuffer/lite.fsh", "#version 450\nlayout(location = 0) out vec4 fragColor;\nvoid main() { fragColor = vec4(0.5); }\n");
    write(root, "shaders/gbuffer/terrain.vsh", "#version 450\nlayout(location = 0) in vec3 Position;\nvoid main() { gl_Position = vec4(Position, 1.0); }\n");
    write(root, "shaders/gbuffer/terrain.fsh", TERRAIN_FSH);
    write(root, "shaders/include/lib/common.glsl", COMMON_GLSL);
    write(root, "shaders/nether/terrain.fsh", "#version 450\nlayout(location = 0) out vec4 fragColor;\nvoid main() { fragColor = vec4(1.0, 0.0, 0.0, 1.0); }\n");
    write(root, "shaders/post/blur.csh", BLUR_CSH);
    write(root, "shaders/post/composite.fsh", "#version 450\nlayout(location = 0) out vec4 fragColor;\nvoid main() { fragColor = vec4(1.0); }\n");
    write(root, "shaders/final.vsh", "#version 450\nlayout(location = 0) in vec3 Position;\nvoid main() { gl_Position = vec4(Position, 1.0); }\n");
    write(root, "shaders/final.fsh", "#version 450\nlayout(location = 0) out vec4 fragColor;\nvoid main() { fragColor = vec4(1.0); }\n");
    write(root, "shaders/styles/toon.fsh", "#version 450\nlayout(location = 0) out vec4 fragColor;\nvoid main() { fragColor = vec4(0.25); }\n");
}

/// Writes and loads the fixture pack, failing the test on any load error
pub fn load_fixture(root: &Path) -> Manifest {
    write_fixture_pack(root);
    let result = load_shaderpack(root, "en_us");
    assert!(result.errors.is_empty(), "{:?}", result.errors);
    result.manifest.unwrap()
}

/// Shared log of backend waits and pipeline drops
pub type Events = Arc<Mutex<Vec<String>>>;

pub struct MockPipeline {
    pub path: String,
    events: Events,
}

impl Drop for MockPipeline {
    fn drop(&mut self) {
        self.events.lock().push(format!("drop {}", self.path));
    }
}

/// Compute backend recording dispatches as text lines
#[derive(Default)]
pub struct MockBackend {
    pub events: Events,
    /// Source paths whose compilation fails
    pub failing: HashSet<String>,
    pub builds: usize,
}

impl ComputeBackend for MockBackend {
    type Pipeline = MockPipeline;
    type Image = (String, u32, u32);
    type Frame = Vec<String>;

    fn create_pipeline(&mut self, path: &str, _source: &str, _bindings: &[ImageBinding]) -> Result<Self::Pipeline, BackendError> {
        self.builds += 1;
        if self.failing.contains(path) {
            return Err(BackendError::Compile {
                path: path.to_string(),
                message: "syntax error".to_string(),
            });
        }
        Ok(MockPipeline {
            path: path.to_string(),
            events: self.events.clone(),
        })
    }

    fn create_image(&mut self, label: &str, width: u32, height: u32) -> Result<Self::Image, BackendError> {
        Ok((label.to_string(), width, height))
    }

    fn image_extent(&self, image: &Self::Image) -> (u32, u32) {
        (image.1, image.2)
    }

    fn dispatch(&mut self, frame: &mut Self::Frame, pipeline: &Self::Pipeline, images: &[&Self::Image], groups: [u32; 3]) -> Result<(), BackendError> {
        let images = images.iter().map(|(label, w, h)| format!("{label}@{w}x{h}")).collect::<Vec<_>>();
        frame.push(format!("{} {groups:?} {}", pipeline.path, images.join(",")));
        Ok(())
    }

    fn wait_idle(&mut self) -> Result<(), BackendError> {
        self.events.lock().push("wait".to_string());
        Ok(())
    }
}
