//! Generated pipeline interface defines
//!
//! Every shader served for a segment gets a block of `#define`s describing
//! the segment's static configuration, inserted right after the `#version`
//! pragma (or at the top when there is none). Shaders use them to adapt to
//! the stage they run in, the targets they write and pack-wide settings.

use super::compat::version_pragma_end;
use super::{format_number, macro_token, normalize_path};
use sulkan_pack::manifest::id_mappings::layer_code;
use sulkan_pack::manifest::{GlobalScalar, GlobalSettings, GlobalValue, IdMappings};
use sulkan_pack::{Segment, Stage};

/// First line of every generated block
pub const DEFINE_HEADER: &str = "// Sulkan pipeline interface\n";

/// Vertex attribute aliases, emitted for vertex shaders only
const VERTEX_ATTRIBUTES: &[(&str, &str)] = &[
    ("POSITION", "Position"),
    ("COLOR", "Color"),
    ("UV0", "UV0"),
    ("UV1", "UV1"),
    ("UV2", "UV2"),
    ("NORMAL", "Normal"),
    ("MC_ENTITY", "mc_Entity"),
    ("AT_TANGENT", "at_tangent"),
    ("AT_VELOCITY", "at_velocity"),
];

struct Defines {
    lines: Vec<String>,
}

impl Defines {
    fn define(&mut self, name: impl AsRef<str>, value: impl ToString) {
        self.lines.push(format!("#define {} {}", name.as_ref(), value.to_string()));
    }
}

fn flag(value: bool) -> u32 {
    value as u32
}

/// Inserts the define block for `segment` into `source`
///
/// Blank sources are returned unchanged.
///
/// # Arguments
/// * `source` - Shader text, already include-expanded
/// * `segment` - Segment the shader is served for
/// * `global` - Pack global settings
/// * `ids` - Pack id mappings
/// * `shader_path` - Path the shader is served as; decides the vertex-only defines
pub fn inject_defines(source: &str, segment: &Segment, global: &GlobalSettings, ids: &IdMappings, shader_path: &str) -> String {
    if source.trim().is_empty() {
        return source.to_string();
    }
    let block = build_define_block(segment, global, ids, shader_path);
    match version_pragma_end(source) {
        Some(end) => format!("{}\n{block}{}", &source[..end], &source[end..]),
        None => format!("{block}{source}"),
    }
}

/// Builds the define block, header included, one define per line
pub fn build_define_block(segment: &Segment, global: &GlobalSettings, ids: &IdMappings, shader_path: &str) -> String {
    let mut out = Defines { lines: Vec::new() };

    out.define("SULKAN_PROGRAM_ENABLED", 1);
    out.define(format!("SULKAN_STAGE_{}", macro_token(segment.stage.as_str())), 1);
    out.define("SULKAN_SEGMENT_INDEX", segment.index);
    out.define("SULKAN_HAS_VERTEX", flag(segment.sources.vertex.is_some()));
    out.define("SULKAN_HAS_FRAGMENT", flag(segment.sources.fragment.is_some()));
    out.define("SULKAN_HAS_GEOMETRY", flag(segment.sources.geometry.is_some()));
    out.define("SULKAN_HAS_COMPUTE", flag(segment.sources.compute.is_some()));
    out.define("SULKAN_HAS_CONFIG", flag(segment.sources.config.is_some()));
    out.define("SULKAN_RENDER_STAGE", segment.stage.render_code());
    for stage in Stage::ALL {
        out.define(format!("SULKAN_RENDER_STAGE_{}", macro_token(stage.as_str())), stage.render_code());
    }
    out.define("SULKAN_UNIFORM_RENDER_STAGE", "SULKAN_RENDER_STAGE");
    out.define("SULKAN_UNIFORM_SEGMENT_INDEX", "SULKAN_SEGMENT_INDEX");
    out.define("SULKAN_UNIFORM_FRAME_TIME", "GameTime");
    out.define("SULKAN_UNIFORM_SCREEN_SIZE", "ScreenSize");
    out.define("SULKAN_UNIFORM_CAMERA_POSITION", "ChunkOffset");

    append_globals(&mut out, global);
    append_ids(&mut out, ids);

    out.define("SULKAN_RENDER_TARGET_COUNT", segment.render_targets.len());
    for target in &segment.render_targets {
        out.define(format!("SULKAN_RT_{}", macro_token(target)), 1);
    }
    out.define("SULKAN_PING_PONG_MAIN", flag(!segment.ping_pong.is_alt()));
    out.define("SULKAN_PING_PONG_ALT", flag(segment.ping_pong.is_alt()));
    for (target, enabled) in &segment.flips {
        out.define(format!("SULKAN_FLIP_{}", macro_token(target)), flag(*enabled));
    }
    if let Some([x, y, z]) = segment.work_groups {
        out.define("SULKAN_WORK_GROUP_X", x);
        out.define("SULKAN_WORK_GROUP_Y", y);
        out.define("SULKAN_WORK_GROUP_Z", z);
    }
    if let Some([x, y, z]) = segment.work_groups_render {
        out.define("SULKAN_WORK_GROUP_RENDER_X", x);
        out.define("SULKAN_WORK_GROUP_RENDER_Y", y);
        out.define("SULKAN_WORK_GROUP_RENDER_Z", z);
    }
    for binding in &segment.images_read {
        out.define(format!("SULKAN_IMAGE_READ_{}", macro_token(binding)), 1);
    }
    for binding in &segment.images_write {
        out.define(format!("SULKAN_IMAGE_WRITE_{}", macro_token(binding)), 1);
    }

    let alpha = &segment.alpha;
    out.define("SULKAN_ALPHA_ENABLED", flag(alpha.enabled));
    out.define("SULKAN_ALPHA_FUNC", alpha.function.code());
    out.define("SULKAN_ALPHA_REF", format_number(alpha.reference));
    out.define(format!("SULKAN_ALPHA_FUNC_{}", macro_token(alpha.function.as_str())), 1);

    let blend = &segment.blend;
    out.define("SULKAN_BLEND_ENABLED", flag(blend.enabled));
    out.define("SULKAN_BLEND_SRC_COLOR", blend.src_color.code());
    out.define("SULKAN_BLEND_DST_COLOR", blend.dst_color.code());
    out.define("SULKAN_BLEND_SRC_ALPHA", blend.src_alpha.code());
    out.define("SULKAN_BLEND_DST_ALPHA", blend.dst_alpha.code());

    out.define("SULKAN_BUFFER_SIZE_COUNT", segment.buffer_sizes.len());
    for (target, [x, y]) in &segment.buffer_sizes {
        let token = macro_token(target);
        out.define(format!("SULKAN_SIZE_BUFFER_{token}_X"), (*x).max(1));
        out.define(format!("SULKAN_SIZE_BUFFER_{token}_Y"), (*y).max(1));
    }
    out.define("SULKAN_BUFFER_SCALE_COUNT", segment.buffer_scales.len());
    for (target, [x, y]) in &segment.buffer_scales {
        let token = macro_token(target);
        out.define(format!("SULKAN_SCALE_{token}_X"), format_number(*x));
        out.define(format!("SULKAN_SCALE_{token}_Y"), format_number(*y));
    }

    if is_vertex_path(shader_path) {
        for (name, attribute) in VERTEX_ATTRIBUTES {
            out.define(format!("SULKAN_ATTR_{name}"), attribute);
        }
    }

    let mut block = String::from(DEFINE_HEADER);
    for line in out.lines {
        block.push_str(&line);
        block.push('\n');
    }
    block
}

fn append_globals(out: &mut Defines, global: &GlobalSettings) {
    if global.is_empty() {
        return;
    }
    out.define("SULKAN_GLOBAL_COUNT", global.len());
    for (key, value) in global.iter() {
        if key.trim().is_empty() {
            continue;
        }
        let token = macro_token(key);
        match value {
            GlobalValue::Scalar(scalar) => out.define(format!("SULKAN_GLOBAL_{token}"), scalar_literal(scalar)),
            GlobalValue::List(items) => {
                out.define(format!("SULKAN_GLOBAL_{token}_COUNT"), items.len());
                for (i, item) in items.iter().enumerate() {
                    out.define(format!("SULKAN_GLOBAL_{token}_{i}"), scalar_literal(item));
                }
            }
        }
    }
}

fn append_ids(out: &mut Defines, ids: &IdMappings) {
    if ids.is_empty() {
        return;
    }
    for (kind, table) in [("BLOCK", &ids.blocks), ("ITEM", &ids.items), ("ENTITY", &ids.entities)] {
        out.define(format!("SULKAN_ID_{kind}_COUNT"), table.len());
        for (name, id) in table {
            out.define(format!("SULKAN_ID_{kind}_{}", macro_token(name)), id);
        }
    }
    out.define("SULKAN_LAYER_SOLID", 1);
    out.define("SULKAN_LAYER_CUTOUT", 2);
    out.define("SULKAN_LAYER_TRANSLUCENT", 3);
    out.define("SULKAN_LAYER_MAP_COUNT", ids.layers.len());
    for (block, layer) in &ids.layers {
        out.define(format!("SULKAN_LAYER_{}", macro_token(block)), layer_code(layer));
    }
}

fn scalar_literal(scalar: &GlobalScalar) -> String {
    match scalar {
        GlobalScalar::Bool(b) => flag(*b).to_string(),
        GlobalScalar::Int(n) => format_number(*n as f64),
        GlobalScalar::Float(n) => format_number(*n),
        GlobalScalar::Text(text) => format!("\"{}\"", text.replace('\\', "\\\\").replace('"', "\\\"")),
    }
}

fn is_vertex_path(path: &str) -> bool {
    let lower = normalize_path(path).to_ascii_lowercase();
    lower.ends_with(".vsh") || lower.ends_with(".vert")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::load_fixture;

    #[test]
    fn test_block_inserted_after_version() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = load_fixture(dir.path());
        let segment = &manifest.pipelines.segments("any", Stage::Gbuffer)[1];
        let source = "#version 450 core\nvoid main() {}\n";

        let injected = inject_defines(source, segment, &manifest.global, &manifest.ids, "shaders/basic/terrain/terrain.fsh");
        assert!(injected.starts_with("#version 450 core\n// Sulkan pipeline interface\n#define SULKAN_PROGRAM_ENABLED 1\n"));
        assert!(injected.ends_with("\nvoid main() {}\n"));

        let headless = inject_defines("void main() {}\n", segment, &manifest.global, &manifest.ids, "a.fsh");
        assert!(headless.starts_with(DEFINE_HEADER));
        assert_eq!(inject_defines("  \n", segment, &manifest.global, &manifest.ids, "a.fsh"), "  \n");
    }

    #[test]
    fn test_segment_defines() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = load_fixture(dir.path());
        let terrain = &manifest.pipelines.segments("any", Stage::Gbuffer)[1];
        let block = build_define_block(terrain, &manifest.global, &manifest.ids, "shaders/basic/terrain/terrain.fsh");
        let lines: Vec<&str> = block.lines().collect();
        for expected in [
            "#define SULKAN_STAGE_GBUFFER 1",
            "#define SULKAN_SEGMENT_INDEX 1",
            "#define SULKAN_HAS_VERTEX 1",
            "#define SULKAN_HAS_COMPUTE 0",
            "#define SULKAN_RENDER_STAGE 200",
            "#define SULKAN_RENDER_STAGE_FINAL 600",
            "#define SULKAN_RENDER_TARGET_COUNT 2",
            "#define SULKAN_RT_COLORTEX1 1",
            "#define SULKAN_PING_PONG_MAIN 1",
            "#define SULKAN_ALPHA_ENABLED 0",
            "#define SULKAN_ALPHA_FUNC 7",
            "#define SULKAN_ALPHA_REF 0",
            "#define SULKAN_ALPHA_FUNC_ALWAYS 1",
            "#define SULKAN_BUFFER_SIZE_COUNT 0",
            "#define SULKAN_GLOBAL_SHADOW_DISTANCE 128",
            "#define SULKAN_GLOBAL_SKY_TINT_COUNT 3",
            "#define SULKAN_GLOBAL_SKY_TINT_1 0.5",
            "#define SULKAN_GLOBAL_SKY_TINT_2 \"blue\"",
            "#define SULKAN_GLOBAL_DEBUG_SAVE_SHADERS 0",
            "#define SULKAN_ID_BLOCK_COUNT 1",
            "#define SULKAN_ID_BLOCK_MINECRAFT_GRASS_BLOCK 10",
            "#define SULKAN_ID_ITEM_COUNT 0",
            "#define SULKAN_LAYER_MINECRAFT_GLASS 3",
        ] {
            assert!(lines.contains(&expected), "missing {expected}");
        }
        assert!(!block.contains("SULKAN_ATTR_POSITION"));
        assert!(!block.contains("SULKAN_WORK_GROUP_X"));

        let vertex = build_define_block(terrain, &manifest.global, &manifest.ids, "shaders/basic/terrain/terrain.vsh");
        assert!(vertex.contains("#define SULKAN_ATTR_MC_ENTITY mc_Entity\n"));
    }

    #[test]
    fn test_compute_defines() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = load_fixture(dir.path());
        let blur = &manifest.pipelines.segments("any", Stage::Postprocess)[0];
        let block = build_define_block(blur, &GlobalSettings::default(), &IdMappings::default(), "shaders/post/blur.csh");
        for expected in [
            "#define SULKAN_STAGE_POSTPROCESS 1\n",
            "#define SULKAN_WORK_GROUP_RENDER_X 8\n",
            "#define SULKAN_WORK_GROUP_RENDER_Z 1\n",
            "#define SULKAN_IMAGE_READ_COLORIMG0 1\n",
            "#define SULKAN_IMAGE_WRITE_COLORIMG1 1\n",
            "#define SULKAN_FLIP_COLORTEX1 1\n",
        ] {
            assert!(block.contains(expected), "missing {expected}");
        }
        assert!(!block.contains("SULKAN_GLOBAL_COUNT"));
        assert!(!block.contains("SULKAN_LAYER_SOLID"));
    }
}
