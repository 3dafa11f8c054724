//! Reads and validates a shaderpack
//!
//! Loading is fail-closed: every problem found is recorded, and a
//! [`Manifest`] is only produced when no error was recorded at all.

use super::global_settings::GlobalSettings;
use super::id_mappings::IdMappings;
use super::lang::load_translations;
use super::resources::parse_resources;
use super::semver::SemVer;
use super::texture_bindings::TextureBindings;
use super::ui_layout::UiLayout;
use super::{Extensions, Features, LoadResult, Manifest};
use crate::diagnostics::{Diagnostics, read_bool, read_string_array, require_bool, require_string};
use crate::options::auto_extract::extract_options;
use crate::options::{OptionSet, parse_options};
use crate::pipelines::{Stage, load_pipelines};
use crate::storage::{MANIFEST_FILE, ShaderpackStorage, is_archive_path, open_storage};
use std::collections::BTreeSet;
use std::path::Path;
use toml::{Table, Value};

/// Spec versions this loader understands
pub const SUPPORTED_SPEC_VERSIONS: &[&str] = &["1.0.0"];

/// Extensions this loader implements
pub const SUPPORTED_EXTENSIONS: &[&str] = &[];

/// Loads the shaderpack directory or `.zip` archive at `path`
///
/// # Arguments
/// * `path` - Shaderpack directory or archive
/// * `locale` - Locale whose translations are loaded, e.g. `en_us`
pub fn load_shaderpack(path: &Path, locale: &str) -> LoadResult {
    let file_name = path.file_name().map(|name| name.to_string_lossy().into_owned()).unwrap_or_else(|| path.display().to_string());
    if !path.is_dir() && !(path.is_file() && is_archive_path(path)) {
        return LoadResult::error(format!("Unsupported shaderpack type: {file_name}"));
    }
    match open_storage(path) {
        Ok(storage) => load_from_storage(storage.as_ref(), locale),
        Err(e) => {
            tracing::debug!("open {}: {e}", path.display());
            LoadResult::error(format!("Failed to read {MANIFEST_FILE} from {file_name}"))
        }
    }
}

/// Loads a shaderpack from already opened storage
pub fn load_from_storage(storage: &dyn ShaderpackStorage, locale: &str) -> LoadResult {
    let file_name = storage
        .source_path()
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    if !storage.exists(MANIFEST_FILE) {
        return LoadResult::error(format!("Missing {MANIFEST_FILE} in {file_name}"));
    }
    let text = match storage.read_string(MANIFEST_FILE) {
        Ok(text) => text,
        Err(e) => {
            tracing::debug!("{e}");
            return LoadResult::error(format!("Failed to read {MANIFEST_FILE} from {file_name}"));
        }
    };
    let root: Table = match toml::from_str(&text) {
        Ok(root) => root,
        Err(e) => return LoadResult::error(format!("Failed to parse {MANIFEST_FILE}: {}", e.message())),
    };

    let mut diag = Diagnostics::new();
    let manifest = parse_manifest(&root, storage, locale, &mut diag);
    tracing::debug!(pack = %file_name, errors = diag.errors.len(), warnings = diag.warnings.len(), "loaded shaderpack manifest");
    LoadResult {
        manifest: if diag.has_errors() { None } else { manifest },
        errors: diag.errors,
        warnings: diag.warnings,
    }
}

fn parse_manifest(root: &Table, storage: &dyn ShaderpackStorage, locale: &str, diag: &mut Diagnostics) -> Option<Manifest> {
    let Some(header) = root.get("shaderpack").and_then(Value::as_table) else {
        diag.error(format!("Missing [shaderpack] table in {MANIFEST_FILE}"));
        return None;
    };

    let name = require_string(header, "name", "shaderpack", diag);
    let version = require_string(header, "version", "shaderpack", diag);
    let spec_version = require_string(header, "spec_version", "shaderpack", diag);

    let spec_version = spec_version.and_then(|raw| match raw.parse::<SemVer>() {
        Err(_) => {
            diag.error(format!("Invalid spec_version (expected semver): {raw}"));
            None
        }
        Ok(_) if !SUPPORTED_SPEC_VERSIONS.contains(&raw.as_str()) => {
            diag.error(format!("Unsupported spec_version: {raw}"));
            None
        }
        Ok(parsed) => Some(parsed),
    });
    let version = version.and_then(|raw| raw.parse::<SemVer>().map_err(|_| diag.error(format!("Invalid version (expected semver): {raw}"))).ok());

    let stages = parse_stages(root.get("stages").and_then(Value::as_table), diag);
    let resources = parse_resources(root.get("resources"), diag);
    let features = parse_features(root.get("features").and_then(Value::as_table), diag);
    let translations = load_translations(storage, locale, diag);

    let options_table = root.get("options").and_then(Value::as_table);
    if features.config_options && !features.auto_extract_options {
        match options_table {
            None => diag.error("Missing [options] table required by features.sulkan_config_options."),
            Some(table) if table.is_empty() => diag.error("[options] table must contain at least one option."),
            Some(_) => {}
        }
    }
    let declared = OptionSet::new(parse_options(options_table, &translations, diag));
    let extracted = if features.auto_extract_options { extract_options(storage, &translations, diag) } else { Vec::new() };
    let options = declared.merge_extracted(extracted, diag);
    if features.config_options && options.is_empty() {
        diag.error("No shader options available (define [options] or enable auto extraction directives).");
    }

    let extensions = parse_extensions(root.get("extensions").and_then(Value::as_table), diag);
    let global = GlobalSettings::parse(root, diag);
    let textures = TextureBindings::parse(root.get("textures").and_then(Value::as_table), diag);
    let ui = UiLayout::parse(root.get("ui").and_then(Value::as_table), diag);
    let ids = IdMappings::parse(root, diag);
    let pipelines = load_pipelines(storage, &stages, diag);

    for extension in &extensions.required {
        if !SUPPORTED_EXTENSIONS.contains(&extension.as_str()) {
            diag.error(format!("Required extension not supported: {extension}"));
        }
    }

    Some(Manifest {
        name: name?,
        version: version?,
        spec_version: spec_version?,
        stages,
        resources,
        features,
        extensions,
        options,
        global,
        textures,
        ui,
        ids,
        pipelines,
        translations,
        source_path: storage.source_path().to_path_buf(),
    })
}

fn parse_stages(table: Option<&Table>, diag: &mut Diagnostics) -> BTreeSet<Stage> {
    let Some(table) = table else {
        diag.error("Missing [stages] table.");
        return BTreeSet::new();
    };
    Stage::ALL
        .into_iter()
        .filter(|stage| require_bool(table, stage.as_str(), "stages", diag).unwrap_or(false))
        .collect()
}

fn parse_features(table: Option<&Table>, diag: &mut Diagnostics) -> Features {
    let Some(table) = table else {
        return Features::default();
    };
    let config_options = read_bool(table, "sulkan_config_options", "features", diag);
    let auto_extract = read_bool(table, "auto_extract_options", "features", diag).or_else(|| read_bool(table, "auto_extract", "features", diag));
    Features {
        config_options: config_options.unwrap_or(false),
        auto_extract_options: auto_extract.unwrap_or(false),
    }
}

fn parse_extensions(table: Option<&Table>, diag: &mut Diagnostics) -> Extensions {
    let Some(table) = table else {
        return Extensions::default();
    };
    let mut read = |key: &str| match table.get(key) {
        None => Vec::new(),
        Some(Value::Array(values)) => read_string_array(values, &format!("extensions.{key}"), diag),
        Some(_) => {
            diag.error(format!("Invalid array for extensions.{key}"));
            Vec::new()
        }
    };
    Extensions {
        required: read("required"),
        optional: read("optional"),
    }
}
