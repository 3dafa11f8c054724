//! Stage pipeline file parser
//!
//! Parses `pipelines/<world>/<stage>.toml` into sorted [`Segment`]s. Every
//! field is coerced strictly; problems are recorded in [`Diagnostics`] and the
//! offending segment (or field) is skipped so the rest of the file is still
//! checked.

use super::interface::validate_segment_flow;
use super::render_state::{AlphaState, BlendState, read_alpha_state, read_blend_state, split_tokens};
use super::segment::{PingPong, Segment, SourceSlots, normalize_flip_target, normalize_image_binding, normalize_render_target, ordered_unique};
use super::stage::{PortMap, ResourceType, Stage};
use crate::diagnostics::{Diagnostics, as_number, first_present, read_string, read_table};
use crate::expression;
use crate::options::normalize_path;
use regex::{Captures, Regex};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::LazyLock;
use toml::{Table, Value};

static PARAM_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\$\{([A-Za-z0-9_.-]+)\}").expect("valid regex"));
static TYPED_PORT_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^([A-Za-z0-9_.-]+):([A-Za-z0-9_.-]+)$").expect("valid regex"));
static ENABLED_IDENTIFIER_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_.-]*$").expect("valid regex"));
static DRAWBUFFER_DIGITS_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[0-9,\s]+$").expect("valid regex"));

/// Maximum number of `${name}` expansion rounds per parameter value
pub const MAX_PARAM_DEPTH: usize = 8;

/// Stage-level defaults inherited by every segment
struct StageDefaults {
    context: BTreeMap<String, String>,
    program_enabled: HashMap<String, String>,
    alpha: AlphaState,
    blend: BlendState,
    buffer_sizes: BTreeMap<String, [u32; 2]>,
    buffer_scales: BTreeMap<String, [f64; 2]>,
}

/// Parses one stage file
///
/// # Arguments
/// * `world` - World id the file belongs to
/// * `stage` - Stage the file declares
/// * `source` - TOML text of the file
/// * `source_label` - Path used as message prefix, e.g. `pipelines/any/final.toml`
/// * `diag` - Receives errors and warnings
///
/// # Returns
/// Segments sorted by `(index, name)`, or an empty list if the file declares none
pub fn parse_stage_file(world: &str, stage: Stage, source: &str, source_label: &str, diag: &mut Diagnostics) -> Vec<Segment> {
    let root: Table = match toml::from_str(source) {
        Ok(root) => root,
        Err(e) => {
            diag.error(format!("{source_label}: {}", e.message()));
            return Vec::new();
        }
    };

    let stage_params = read_string_table(read_table(&root, "params", source_label, diag), &format!("{source_label}.params"), diag);
    let mut defaults = StageDefaults {
        context: resolve_params(&stage_params, &BTreeMap::new(), &format!("{source_label}.params"), diag).into_iter().collect(),
        program_enabled: read_program_rules(read_table(&root, "program", source_label, diag), &format!("{source_label}.program"), diag),
        alpha: read_alpha_state(&root, source_label, diag).unwrap_or_default(),
        blend: read_blend_state(&root, source_label, diag).unwrap_or_default(),
        buffer_sizes: read_buffer_sizes(&root, source_label, diag),
        buffer_scales: read_buffer_scales(&root, source_label, diag),
    };

    let entries = match root.get("segments").and_then(Value::as_array) {
        Some(entries) if !entries.is_empty() => entries,
        _ => {
            if root.get("programs").and_then(Value::as_array).is_some_and(|legacy| !legacy.is_empty()) {
                diag.error(format!("{source_label} uses legacy [[programs]] format. Please migrate to [[segments]]."));
            } else {
                diag.error(format!("{source_label} must define at least one [[segments]] entry."));
            }
            return Vec::new();
        }
    };

    let mut used_names = HashSet::new();
    let mut used_indexes = HashSet::new();
    let mut segments = Vec::new();
    for (i, entry) in entries.iter().enumerate() {
        let context = format!("{source_label}.segments[{i}]");
        let Value::Table(table) = entry else {
            diag.error(format!("Invalid segment entry in {context} (expected table)."));
            continue;
        };
        if let Some(segment) = parse_segment(world, stage, table, &context, source_label, &mut defaults, &mut used_names, &mut used_indexes, diag) {
            segments.push(segment);
        }
    }

    if segments.is_empty() {
        diag.error(format!("No valid stage segments loaded from {source_label}."));
        return Vec::new();
    }
    segments.sort_by(|a, b| a.index.cmp(&b.index).then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase())));
    validate_segment_flow(source_label, &segments, diag);
    segments
}

#[allow(clippy::too_many_arguments)]
fn parse_segment(
    world: &str,
    stage: Stage,
    table: &Table,
    context: &str,
    source_label: &str,
    defaults: &mut StageDefaults,
    used_names: &mut HashSet<String>,
    used_indexes: &mut HashSet<u32>,
    diag: &mut Diagnostics,
) -> Option<Segment> {
    let name = match read_string(table, "name", context, diag) {
        Some(name) if !name.trim().is_empty() => name.trim().to_string(),
        _ => {
            diag.error(format!("Missing {context}.name"));
            return None;
        }
    };
    if !used_names.insert(name.clone()) {
        diag.error(format!("Duplicate segment name '{name}' in {source_label}."));
        return None;
    }

    let index = match table.get("index") {
        None => {
            diag.error(format!("Missing {context}.index"));
            return None;
        }
        Some(Value::Integer(index)) => *index,
        Some(_) => {
            diag.error(format!("Invalid integer for {context}.index"));
            diag.error(format!("Missing {context}.index"));
            return None;
        }
    };
    let index = match u32::try_from(index) {
        Ok(index) if index <= i32::MAX as u32 => index,
        _ => {
            diag.error(format!("{context}.index must be between 0 and {}.", i32::MAX));
            return None;
        }
    };
    if !used_indexes.insert(index) {
        diag.error(format!("Duplicate segment index '{index}' in {source_label}."));
        return None;
    }

    if table.contains_key("selectors") {
        diag.warn(format!("{context}.selectors is deprecated and ignored. Stage matching is now stage-wide."));
    }

    let mut source = |key: &str| {
        read_string(table, key, context, diag)
            .filter(|path| !path.trim().is_empty())
            .map(|path| normalize_path(&path))
    };
    let sources = SourceSlots {
        vertex: source("vertex"),
        fragment: source("fragment"),
        geometry: source("geometry"),
        compute: source("compute"),
        config: source("config"),
    };
    let files = read_string_table(read_table(table, "files", context, diag), &format!("{context}.files"), diag);
    if !files.is_empty() {
        diag.warn(format!("{context}.files is deprecated and ignored. Stage matching is now stage-wide."));
    }
    if sources.is_empty() {
        diag.error(format!("{context} must define at least one of vertex/fragment/geometry/compute/config."));
        return None;
    }
    if sources.compute.is_some() && stage == Stage::Gbuffer {
        diag.error(format!("{context}.compute is not allowed in gbuffer stage."));
        return None;
    }

    let inputs = read_typed_ports(table, "inputs", context, diag);
    let outputs = read_typed_ports(table, "outputs", context, diag);
    let draw_buffers = read_draw_buffers(table, context, diag);
    let render_targets = read_render_targets(table, context, diag);
    if !draw_buffers.is_empty() && !render_targets.is_empty() && draw_buffers != render_targets {
        diag.error(format!("{context}.drawbuffers and .rendertargets must resolve to the same targets when both are present."));
    }
    let render_targets = if render_targets.is_empty() { draw_buffers } else { render_targets };
    if render_targets.len() > 1 && sources.compute.is_none() {
        diag.warn(format!("{context} declares multiple render targets; current graphics backend may only use the first target."));
    }

    let ping_pong = read_ping_pong(table, context, diag);
    let flips = read_flips(table, context, diag);
    let work_groups = read_vec3(table, context, "work_groups", "workGroups", diag);
    let work_groups_render = read_vec3(table, context, "work_groups_render", "workGroupsRender", diag);
    if (work_groups.is_some() || work_groups_render.is_some()) && sources.compute.is_none() {
        diag.error(format!("{context}.work_groups/work_groups_render requires .compute shader."));
    }
    let images_read = read_image_bindings(table, context, "images_read", "imagesRead", diag);
    let images_write = read_image_bindings(table, context, "images_write", "imagesWrite", diag);

    let enabled = read_enabled_expression(table, context, diag).or_else(|| defaults.program_enabled.get(&name).cloned());
    let alpha = read_alpha_state(table, context, diag).unwrap_or(defaults.alpha);
    let blend = read_blend_state(table, context, diag).unwrap_or(defaults.blend);
    let mut buffer_sizes = defaults.buffer_sizes.clone();
    buffer_sizes.extend(read_buffer_sizes(table, context, diag));
    let mut buffer_scales = defaults.buffer_scales.clone();
    buffer_scales.extend(read_buffer_scales(table, context, diag));

    let params_context = format!("{context}.params");
    let raw_params = read_string_table(read_table(table, "params", context, diag), &params_context, diag);
    let local = resolve_params(&raw_params, &defaults.context, &params_context, diag);
    defaults.context.extend(local);
    let params = defaults.context.clone();

    Some(Segment {
        world: world.to_string(),
        stage,
        name,
        index,
        inputs,
        outputs,
        sources,
        params,
        render_targets,
        ping_pong,
        flips,
        work_groups,
        work_groups_render,
        images_read,
        images_write,
        enabled,
        alpha,
        blend,
        buffer_sizes,
        buffer_scales,
    })
}

/// Reads a table of strings, keeping declaration order
fn read_string_table(table: Option<&Table>, context: &str, diag: &mut Diagnostics) -> Vec<(String, String)> {
    let Some(table) = table else {
        return Vec::new();
    };
    table
        .iter()
        .filter_map(|(key, value)| match value {
            Value::String(text) => Some((key.clone(), text.clone())),
            _ => {
                diag.error(format!("Invalid string for {context}.{key}"));
                None
            }
        })
        .collect()
}

/// Resolves `${name}` references of each raw param against `inherited` and
/// the params resolved before it
pub fn resolve_params(raw: &[(String, String)], inherited: &BTreeMap<String, String>, context: &str, diag: &mut Diagnostics) -> Vec<(String, String)> {
    let mut resolved: Vec<(String, String)> = Vec::new();
    for (key, value) in raw {
        let mut available = inherited.clone();
        available.extend(resolved.iter().cloned());
        let value = resolve_param_value(value, &available, &format!("{context}.{key}"), diag);
        match resolved.iter_mut().find(|(existing, _)| existing == key) {
            Some(slot) => slot.1 = value,
            None => resolved.push((key.clone(), value)),
        }
    }
    resolved
}

fn resolve_param_value(raw: &str, available: &BTreeMap<String, String>, context: &str, diag: &mut Diagnostics) -> String {
    let mut current = raw.to_string();
    for _ in 0..MAX_PARAM_DEPTH {
        if !PARAM_PATTERN.is_match(&current) {
            return current;
        }
        let mut unresolved = false;
        let next = PARAM_PATTERN
            .replace_all(&current, |caps: &Captures| match available.get(&caps[1]) {
                Some(value) => value.clone(),
                None => {
                    diag.error(format!("Unknown pipeline parameter '{}' in {context}", &caps[1]));
                    unresolved = true;
                    String::new()
                }
            })
            .into_owned();
        if next == current || unresolved {
            return next;
        }
        current = next;
    }
    diag.error(format!("Pipeline parameter expansion too deep in {context}."));
    current
}

fn read_program_rules(table: Option<&Table>, context: &str, diag: &mut Diagnostics) -> HashMap<String, String> {
    let mut rules = HashMap::new();
    let Some(table) = table else {
        return rules;
    };
    for (name, raw) in table {
        if name.trim().is_empty() {
            diag.error(format!("Invalid empty program name in {context}."));
            continue;
        }
        let rule_context = format!("{context}.{name}");
        let expression = match raw {
            Value::Table(program) => {
                let expression = read_enabled_expression(program, &rule_context, diag);
                if expression.is_none() {
                    diag.error(format!("Missing {rule_context}.enabled"));
                }
                expression
            }
            Value::Boolean(flag) => Some(flag.to_string()),
            Value::String(text) => normalize_enabled_expression(text, &rule_context, diag),
            _ => {
                diag.error(format!("Invalid value for {rule_context} (expected table, string or boolean)."));
                None
            }
        };
        if let Some(expression) = expression {
            rules.insert(name.trim().to_string(), expression);
        }
    }
    rules
}

fn read_enabled_expression(table: &Table, context: &str, diag: &mut Diagnostics) -> Option<String> {
    let (_, raw) = first_present(table, &["enabled", "program_enabled", "programEnabled"])?;
    match raw {
        Value::Boolean(flag) => Some(flag.to_string()),
        Value::String(text) => normalize_enabled_expression(text, &format!("{context}.enabled"), diag),
        _ => {
            diag.error(format!("Invalid value for {context}.enabled (expected string or boolean)."));
            None
        }
    }
}

/// Trims an enabled expression and checks its syntax
fn normalize_enabled_expression(raw: &str, context: &str, diag: &mut Diagnostics) -> Option<String> {
    let normalized = raw.trim();
    if normalized.is_empty() {
        diag.error(format!("Empty enabled expression at {context}."));
        return None;
    }
    if ENABLED_IDENTIFIER_PATTERN.is_match(normalized) {
        return Some(normalized.to_string());
    }
    match expression::check_syntax(normalized) {
        Ok(()) => Some(normalized.to_string()),
        Err(e) => {
            diag.error(format!("Invalid enabled expression at {context}: {e}"));
            None
        }
    }
}

/// Reads `inputs`/`outputs`, an array of `"Type:name"` strings
fn read_typed_ports(table: &Table, key: &str, context: &str, diag: &mut Diagnostics) -> PortMap {
    let mut ports = PortMap::new();
    let context = format!("{context}.{key}");
    let entries = match table.get(key) {
        None => return ports,
        Some(Value::Array(entries)) => entries,
        Some(_) => {
            diag.error(format!("Invalid array for {context}"));
            return ports;
        }
    };
    for (i, entry) in entries.iter().enumerate() {
        let Some(text) = entry.as_str() else {
            diag.error(format!("Invalid string in {context} at index {i}"));
            continue;
        };
        let Some(caps) = TYPED_PORT_PATTERN.captures(text.trim()) else {
            diag.error(format!("Invalid typed parameter in {context} at index {i} (expected 'Type:name')."));
            continue;
        };
        let Ok(ty) = caps[1].parse::<ResourceType>() else {
            diag.error(format!("Unsupported typed parameter resource type '{}' in {context} at index {i}.", &caps[1]));
            continue;
        };
        let name = caps[2].to_string();
        match ports.get(&name) {
            Some(previous) if *previous != ty => {
                diag.error(format!("Conflicting typed parameter '{name}' in {context} (types '{previous}' and '{ty}')."));
            }
            _ => {
                ports.insert(name, ty);
            }
        }
    }
    ports
}

fn read_draw_buffers(table: &Table, context: &str, diag: &mut Diagnostics) -> Vec<String> {
    let Some((_, raw)) = first_present(table, &["drawbuffers", "draw_buffers"]) else {
        return Vec::new();
    };
    let context = format!("{context}.drawbuffers");
    let mut targets = Vec::new();
    match raw {
        Value::String(text) => {
            let trimmed = text.trim();
            if DRAWBUFFER_DIGITS_PATTERN.is_match(trimmed) {
                targets.extend(trimmed.chars().filter_map(|c| c.to_digit(10)).map(|n| format!("colortex{n}")));
            } else {
                for token in split_tokens(trimmed) {
                    match normalize_render_target(token) {
                        Some(target) => targets.push(target),
                        None => diag.error(format!("{context} contains invalid render target '{token}'.")),
                    }
                }
            }
        }
        Value::Array(entries) => {
            for (i, entry) in entries.iter().enumerate() {
                match entry {
                    Value::Integer(n) if (0..=15).contains(n) => targets.push(format!("colortex{n}")),
                    Value::Integer(_) => diag.error(format!("{context} index out of range at position {i} (expected 0..15).")),
                    Value::String(text) => match normalize_render_target(text) {
                        Some(target) => targets.push(target),
                        None => diag.error(format!("{context} contains invalid render target '{text}' at position {i}.")),
                    },
                    _ => diag.error(format!("Invalid value in {context} at position {i} (expected integer or string).")),
                }
            }
        }
        _ => diag.error(format!("Invalid value for {context} (expected string or string/integer array).")),
    }
    ordered_unique(targets)
}

fn read_render_targets(table: &Table, context: &str, diag: &mut Diagnostics) -> Vec<String> {
    let Some((_, raw)) = first_present(table, &["rendertargets", "render_targets"]) else {
        return Vec::new();
    };
    let context = format!("{context}.rendertargets");
    let mut targets = Vec::new();
    match raw {
        Value::String(text) => {
            for token in split_tokens(text) {
                match normalize_render_target(token) {
                    Some(target) => targets.push(target),
                    None => diag.error(format!("{context} contains invalid render target '{token}'.")),
                }
            }
        }
        Value::Array(entries) => {
            for (i, entry) in entries.iter().enumerate() {
                let Some(text) = entry.as_str() else {
                    diag.error(format!("Invalid string in {context} at index {i}."));
                    continue;
                };
                match normalize_render_target(text) {
                    Some(target) => targets.push(target),
                    None => diag.error(format!("{context} contains invalid render target '{text}' at index {i}.")),
                }
            }
        }
        _ => diag.error(format!("Invalid value for {context} (expected string or string array).")),
    }
    ordered_unique(targets)
}

fn read_ping_pong(table: &Table, context: &str, diag: &mut Diagnostics) -> PingPong {
    let raw = read_string(table, "ping_pong", context, diag).or_else(|| read_string(table, "pingPong", context, diag));
    match raw.as_deref().map(|s| s.trim().to_ascii_lowercase()).as_deref() {
        None | Some("") | Some("main") => PingPong::Main,
        Some("alt") => PingPong::Alt,
        Some(_) => {
            diag.error(format!("{context}.ping_pong must be one of [main, alt]."));
            PingPong::Main
        }
    }
}

fn read_flips(table: &Table, context: &str, diag: &mut Diagnostics) -> BTreeMap<String, bool> {
    let mut flips = BTreeMap::new();
    let Some(raw) = table.get("flip") else {
        return flips;
    };
    let Value::Table(entries) = raw else {
        diag.error(format!("Invalid table for {context}.flip"));
        return flips;
    };
    for (key, value) in entries {
        let Some(target) = normalize_flip_target(key) else {
            diag.error(format!("{context}.flip.{key} is not a valid target."));
            continue;
        };
        let Value::Boolean(enabled) = value else {
            diag.error(format!("Invalid boolean for {context}.flip.{key}"));
            continue;
        };
        match flips.get(&target) {
            Some(existing) if existing != enabled => diag.error(format!("{context}.flip defines conflicting values for '{target}'.")),
            Some(_) => {}
            None => {
                flips.insert(target, *enabled);
            }
        }
    }
    flips
}

fn read_vec3(table: &Table, context: &str, key: &str, alias: &str, diag: &mut Diagnostics) -> Option<[u32; 3]> {
    let (key, raw) = first_present(table, &[key, alias])?;
    if table.contains_key(alias) && key != alias {
        diag.error(format!("{context} defines both .{key} and .{alias}; use only one."));
    }
    let context = format!("{context}.{key}");
    let Value::Array(entries) = raw else {
        diag.error(format!("Invalid array for {context} (expected [x, y, z])."));
        return None;
    };
    if entries.len() != 3 {
        diag.error(format!("{context} must contain exactly 3 integers."));
        return None;
    }
    let mut values = [0u32; 3];
    for (i, entry) in entries.iter().enumerate() {
        let Value::Integer(n) = entry else {
            diag.error(format!("Invalid integer in {context} at index {i}."));
            return None;
        };
        if !(1..=i32::MAX as i64).contains(n) {
            diag.error(format!("{context} values must be between 1 and {}.", i32::MAX));
            return None;
        }
        values[i] = *n as u32;
    }
    Some(values)
}

fn read_image_bindings(table: &Table, context: &str, key: &str, alias: &str, diag: &mut Diagnostics) -> Vec<String> {
    let Some((key, raw)) = first_present(table, &[key, alias]) else {
        return Vec::new();
    };
    let context = format!("{context}.{key}");
    match raw {
        Value::String(text) => match normalize_image_binding(text) {
            Some(binding) => vec![binding],
            None => {
                diag.error(format!("{context} contains invalid image binding '{text}'."));
                Vec::new()
            }
        },
        Value::Array(entries) => {
            let mut bindings = Vec::new();
            for (i, entry) in entries.iter().enumerate() {
                let Some(text) = entry.as_str() else {
                    diag.error(format!("Invalid string in {context} at index {i}."));
                    continue;
                };
                match normalize_image_binding(text) {
                    Some(binding) => bindings.push(binding),
                    None => diag.error(format!("{context} contains invalid image binding '{text}' at index {i}.")),
                }
            }
            ordered_unique(bindings)
        }
        _ => {
            diag.error(format!("Invalid value for {context} (expected string or string array)."));
            Vec::new()
        }
    }
}

/// Entries of `size.buffer` (or `size`) / `scale.buffer` (or `scale`)
fn buffer_target_entries<'a>(table: &'a Table, key: &str) -> Vec<(&'a String, &'a Value)> {
    let Some(outer) = table.get(key).and_then(Value::as_table) else {
        return Vec::new();
    };
    let targets = outer.get("buffer").and_then(Value::as_table).unwrap_or(outer);
    targets.iter().filter(|(name, value)| !(name.as_str() == "buffer" && value.is_table())).collect()
}

fn read_buffer_sizes(table: &Table, context: &str, diag: &mut Diagnostics) -> BTreeMap<String, [u32; 2]> {
    let mut sizes = BTreeMap::new();
    for (key, value) in buffer_target_entries(table, "size") {
        let Some(target) = normalize_render_target(key) else {
            diag.error(format!("Invalid render target in {context}.size.buffer: '{key}'."));
            continue;
        };
        if let Some(pair) = parse_integer_pair(value, &format!("{context}.size.buffer.{key}"), diag) {
            sizes.insert(target, pair);
        }
    }
    sizes
}

fn read_buffer_scales(table: &Table, context: &str, diag: &mut Diagnostics) -> BTreeMap<String, [f64; 2]> {
    let mut scales = BTreeMap::new();
    for (key, value) in buffer_target_entries(table, "scale") {
        let Some(target) = normalize_render_target(key) else {
            diag.error(format!("Invalid render target in {context}.scale: '{key}'."));
            continue;
        };
        if let Some(pair) = parse_positive_pair(value, &format!("{context}.scale.{key}"), diag) {
            scales.insert(target, pair);
        }
    }
    scales
}

fn parse_integer_pair(raw: &Value, context: &str, diag: &mut Diagnostics) -> Option<[u32; 2]> {
    let pair = parse_positive_pair(raw, context, diag)?;
    let mut converted = [0u32; 2];
    for (slot, value) in converted.iter_mut().zip(pair) {
        let rounded = value.round();
        if (rounded - value).abs() > 0.000001 {
            diag.error(format!("Expected integer values in {context}."));
            return None;
        }
        if rounded > i32::MAX as f64 {
            diag.error(format!("Integer out of range in {context}."));
            return None;
        }
        *slot = rounded as u32;
    }
    Some(converted)
}

/// Parses a positive pair from a number, an `"x y"` string or `[x, y]`
fn parse_positive_pair(raw: &Value, context: &str, diag: &mut Diagnostics) -> Option<[f64; 2]> {
    let positive = |v: f64| v.is_finite() && v > 0.0;
    match raw {
        Value::Integer(_) | Value::Float(_) => {
            let value = as_number(raw).unwrap_or_default();
            if !positive(value) {
                diag.error(format!("Invalid positive value in {context}."));
                return None;
            }
            Some([value, value])
        }
        Value::String(text) => {
            let tokens = split_tokens(text);
            if !(1..=2).contains(&tokens.len()) {
                diag.error(format!("Invalid pair value in {context} (expected one or two numbers)."));
                return None;
            }
            let parsed: Result<Vec<f64>, _> = tokens.iter().map(|t| t.parse::<f64>()).collect();
            let Ok(parsed) = parsed else {
                diag.error(format!("Invalid numeric value in {context}."));
                return None;
            };
            let (x, y) = (parsed[0], *parsed.last().unwrap_or(&parsed[0]));
            if !positive(x) || !positive(y) {
                diag.error(format!("Invalid positive values in {context}."));
                return None;
            }
            Some([x, y])
        }
        Value::Array(entries) => {
            if entries.len() != 2 {
                diag.error(format!("Invalid pair value in {context} (expected [x, y])."));
                return None;
            }
            let mut values = [0.0; 2];
            for (i, entry) in entries.iter().enumerate() {
                let Some(value) = as_number(entry) else {
                    diag.error(format!("Invalid numeric value in {context} at index {i}."));
                    return None;
                };
                if !positive(value) {
                    diag.error(format!("Invalid positive value in {context} at index {i}."));
                    return None;
                }
                values[i] = value;
            }
            Some(values)
        }
        _ => {
            diag.error(format!("Invalid value in {context} (expected number, string, or [x, y])."));
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipelines::render_state::AlphaFunc;

    const LABEL: &str = "pipelines/any/postprocess.toml";

    fn parse(source: &str) -> (Vec<Segment>, Diagnostics) {
        let mut diag = Diagnostics::new();
        let segments = parse_stage_file("any", Stage::Postprocess, source, LABEL, &mut diag);
        (segments, diag)
    }

    const VALID: &str = r#"
alpha_test = "greater 0.1"

[params]
root = "post"
dir = "${root}/fx"

[program]
bloom = { enabled = "BLOOM && quality != 'low'" }

[[segments]]
name = "composite"
index = 1
fragment = "shaders/${unused}.fsh"
inputs = ["Texture2D:bloom_color"]
outputs = ["Texture2D:post_color", "DepthTexture:post_depth"]
params = { file = "${dir}/composite" }

[[segments]]
name = "bloom"
index = 0
compute = "./shaders/bloom.csh"
inputs = ["Texture2D:scene_color", "DepthTexture:scene_depth"]
outputs = ["Texture2D:bloom_color"]
work_groups_render = [8, 8, 1]
images_write = ["colorimg0", "ColorImg0"]
images_read = "colorimg1"
ping_pong = "alt"
flip = { colorimg0 = true }
blend = "one one"
size.buffer = { colortex0 = "960 540" }
scale.buffer = { colortex1 = 0.5 }
"#;

    #[test]
    fn test_parses_and_sorts_segments() {
        let (segments, diag) = parse(VALID);
        assert!(diag.errors.is_empty(), "{:?}", diag.errors);
        assert_eq!(segments.len(), 2);

        let bloom = &segments[0];
        assert_eq!(bloom.name, "bloom");
        assert_eq!(bloom.sources.compute.as_deref(), Some("shaders/bloom.csh"));
        assert_eq!(bloom.work_groups_render, Some([8, 8, 1]));
        assert_eq!(bloom.images_write, vec!["colorimg0"]);
        assert_eq!(bloom.images_read, vec!["colorimg1"]);
        assert_eq!(bloom.ping_pong, PingPong::Alt);
        assert!(bloom.flips("colorimg0"));
        assert_eq!(bloom.enabled.as_deref(), Some("BLOOM && quality != 'low'"));
        assert_eq!(bloom.alpha, AlphaState::enabled(AlphaFunc::Greater, 0.1));
        assert!(bloom.blend.enabled);
        assert_eq!(bloom.buffer_sizes["colortex0"], [960, 540]);
        assert_eq!(bloom.buffer_scales["colortex1"], [0.5, 0.5]);

        let composite = &segments[1];
        assert_eq!(composite.params["dir"], "post/fx");
        assert_eq!(composite.params["file"], "post/fx/composite");
        assert!(!composite.blend.enabled);
        assert_eq!(composite.enabled, None);
    }

    #[test]
    fn test_unknown_parameter_is_error() {
        let source = VALID.replace("${dir}/composite", "${missing}/composite");
        let (_, diag) = parse(&source);
        assert_eq!(diag.errors, vec![format!("Unknown pipeline parameter 'missing' in {LABEL}.segments[0].params.file")]);
    }

    #[test]
    fn test_parameter_expansion_depth() {
        let mut diag = Diagnostics::new();
        let raw: Vec<(String, String)> = vec![("a".to_string(), "${a}".to_string())];
        let inherited = BTreeMap::from([("a".to_string(), "${a}x".to_string())]);
        let resolved = resolve_params(&raw, &inherited, "ctx", &mut diag);
        assert_eq!(resolved[0].1, "${a}xxxxxxxx");
        assert_eq!(diag.errors, vec!["Pipeline parameter expansion too deep in ctx.a."]);
    }

    #[test]
    fn test_segment_errors() {
        let (segments, diag) = parse(
            r#"
[[segments]]
name = "a"
index = 0
inputs = ["Texture2D:scene_color", "Sampler:x", "bad", "Buffer:scene_color"]

[[segments]]
name = "a"
index = 1
fragment = "x.fsh"

[[segments]]
name = "b"
index = -1
fragment = "x.fsh"
"#,
        );
        assert!(segments.is_empty());
        assert_eq!(
            diag.errors,
            vec![
                format!("{LABEL}.segments[0] must define at least one of vertex/fragment/geometry/compute/config."),
                format!("Duplicate segment name 'a' in {LABEL}."),
                format!("{LABEL}.segments[2].index must be between 0 and 2147483647."),
                format!("No valid stage segments loaded from {LABEL}."),
            ]
        );
    }

    #[test]
    fn test_typed_port_errors() {
        let table: Table = toml::from_str(r#"inputs = ["Texture2D:a", "Sampler:x", "bad", "Buffer:a", 3]"#).unwrap();
        let mut diag = Diagnostics::new();
        let ports = read_typed_ports(&table, "inputs", "seg", &mut diag);
        assert_eq!(ports.len(), 1);
        assert_eq!(
            diag.errors,
            vec![
                "Unsupported typed parameter resource type 'Sampler' in seg.inputs at index 1.",
                "Invalid typed parameter in seg.inputs at index 2 (expected 'Type:name').",
                "Conflicting typed parameter 'a' in seg.inputs (types 'Texture2D' and 'Buffer').",
                "Invalid string in seg.inputs at index 4",
            ]
        );
    }

    #[test]
    fn test_legacy_programs_rejected() {
        let (_, diag) = parse("[[programs]]\nname = 'a'");
        assert_eq!(diag.errors, vec![format!("{LABEL} uses legacy [[programs]] format. Please migrate to [[segments]].")]);
    }

    #[test]
    fn test_render_target_forms() {
        let table: Table = toml::from_str("drawbuffers = '012'\nrendertargets = ['colortex0', '1', 'colortex2']").unwrap();
        let mut diag = Diagnostics::new();
        assert_eq!(read_draw_buffers(&table, "seg", &mut diag), vec!["colortex0", "colortex1", "colortex2"]);
        assert_eq!(read_render_targets(&table, "seg", &mut diag), vec!["colortex0", "colortex1", "colortex2"]);
        assert!(diag.errors.is_empty());
    }

    #[test]
    fn test_compute_rules() {
        let mut diag = Diagnostics::new();
        let segments = parse_stage_file(
            "any",
            Stage::Gbuffer,
            "[[segments]]\nname = 'g'\nindex = 0\ncompute = 'a.csh'",
            "pipelines/any/gbuffer.toml",
            &mut diag,
        );
        assert!(segments.is_empty());
        assert_eq!(diag.errors[0], "pipelines/any/gbuffer.toml.segments[0].compute is not allowed in gbuffer stage.");

        let table: Table = toml::from_str("work_groups = [8, 0, 1]\nworkGroups = [1, 1, 1]").unwrap();
        let mut diag = Diagnostics::new();
        assert_eq!(read_vec3(&table, "seg", "work_groups", "workGroups", &mut diag), None);
        assert_eq!(
            diag.errors,
            vec!["seg defines both .work_groups and .workGroups; use only one.", "seg.work_groups values must be between 1 and 2147483647."]
        );
    }

    #[test]
    fn test_invalid_enabled_expression() {
        let table: Table = toml::from_str("enabled = 'A && (B'").unwrap();
        let mut diag = Diagnostics::new();
        assert_eq!(read_enabled_expression(&table, "seg", &mut diag), None);
        assert_eq!(diag.errors, vec!["Invalid enabled expression at seg.enabled: Expected ')' at position 7"]);
    }
}
