//! Typed option declarations
//!
//! Options are declared as a tree of pages and leaves under `[options]` in the
//! manifest, or discovered from `@sulkan_option` directives inside shader
//! sources (see [`auto_extract`]). The tree is kept for UI purposes and also
//! flattened by dotted path for value lookup.

pub mod auto_extract;

use crate::diagnostics::{Diagnostics, as_number, read_string, read_string_array};
use std::collections::HashMap;
use std::fmt;
use toml::{Table, Value};

/// Marker key that makes an enum option replace the whole target file
pub const USE_FILE_KEY: &str = "[use_file]";

/// Value kind of a leaf option
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OptionKind {
    Bool,
    Int,
    Float,
    String,
    Enum,
}

impl OptionKind {
    /// Parses a kind name, case-insensitively
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "bool" => Some(Self::Bool),
            "int" => Some(Self::Int),
            "float" => Some(Self::Float),
            "string" => Some(Self::String),
            "enum" => Some(Self::Enum),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Float => "float",
            Self::String => "string",
            Self::Enum => "enum",
        }
    }
}

impl fmt::Display for OptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A concrete option value
///
/// Enum values are stored as an index into the owning option's `values`.
#[derive(Debug, Clone, PartialEq)]
pub enum OptionValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Enum(usize),
}

/// How an option's value reaches shader source
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkerKey {
    /// Replace `@SULKAN:<key>@` markers in the target file
    Marker(String),
    /// Replace the whole target file with the selected render value
    UseFile,
}

impl MarkerKey {
    fn parse(key: &str) -> Self {
        if key == USE_FILE_KEY { Self::UseFile } else { Self::Marker(key.to_string()) }
    }
}

/// Optional numeric constraints of int and float options
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct NumericBounds {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub step: Option<f64>,
}

impl NumericBounds {
    /// Returns true if `value` lies within `min..=max`
    pub fn contains(&self, value: f64) -> bool {
        self.min.is_none_or(|min| value >= min) && self.max.is_none_or(|max| value <= max)
    }
}

/// A leaf option carrying a value
#[derive(Debug, Clone, PartialEq)]
pub struct LeafOption {
    pub kind: OptionKind,
    /// Shader path the option applies to, normalized to '/' separators
    pub target: String,
    pub marker: MarkerKey,
    pub default: OptionValue,
    pub bounds: NumericBounds,
    /// Allowed raw values of an enum option
    pub values: Vec<String>,
    /// Text substituted for each entry of `values`
    pub render_values: Vec<String>,
    /// True if discovered from a shader directive rather than `[options]`
    pub auto_extracted: bool,
}

impl LeafOption {
    /// Text substituted into shader source for `value`
    ///
    /// Enum options render `render_values[index]`, falling back to the raw
    /// value when no render values were declared.
    pub fn render(&self, value: &OptionValue) -> String {
        match value {
            OptionValue::Bool(b) => b.to_string(),
            OptionValue::Int(n) => n.to_string(),
            OptionValue::Float(n) => format_float(*n),
            OptionValue::Str(s) => s.clone(),
            OptionValue::Enum(index) => self
                .render_values
                .get(*index)
                .or_else(|| self.values.get(*index))
                .cloned()
                .unwrap_or_default(),
        }
    }

    /// Raw (non-rendered) text of `value`, used for expression variables
    pub fn raw_text(&self, value: &OptionValue) -> String {
        match value {
            OptionValue::Enum(index) => self.values.get(*index).cloned().unwrap_or_default(),
            other => self.render(other),
        }
    }

    /// Index of `raw` in `values`
    pub fn enum_index(&self, raw: &str) -> Option<usize> {
        self.values.iter().position(|v| v == raw)
    }
}

/// Formats a float so that integral values keep a decimal point
fn format_float(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 { format!("{value:.1}") } else { value.to_string() }
}

/// Body of an option declaration
#[derive(Debug, Clone, PartialEq)]
pub enum OptionBody {
    Page { children: Vec<OptionDecl> },
    Leaf(LeafOption),
}

/// A declared option, either a page or a leaf
#[derive(Debug, Clone, PartialEq)]
pub struct OptionDecl {
    /// Last segment of the dotted path
    pub id: String,
    /// Full dotted path, unique across the tree
    pub path: String,
    pub label: Option<String>,
    pub description: Option<String>,
    pub label_key: Option<String>,
    pub description_key: Option<String>,
    pub body: OptionBody,
}

impl OptionDecl {
    pub fn leaf(&self) -> Option<&LeafOption> {
        match &self.body {
            OptionBody::Leaf(leaf) => Some(leaf),
            OptionBody::Page { .. } => None,
        }
    }

    pub fn is_page(&self) -> bool {
        matches!(self.body, OptionBody::Page { .. })
    }
}

/// The option tree plus a flat index of its leaves
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OptionSet {
    roots: Vec<OptionDecl>,
    by_path: HashMap<String, Vec<usize>>,
}

impl OptionSet {
    /// Builds a set from root declarations
    pub fn new(roots: Vec<OptionDecl>) -> Self {
        let mut by_path = HashMap::new();
        for (i, root) in roots.iter().enumerate() {
            index_leaves(root, &mut vec![i], &mut by_path);
        }
        Self { roots, by_path }
    }

    pub fn roots(&self) -> &[OptionDecl] {
        &self.roots
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Looks up a leaf declaration by dotted path
    pub fn get(&self, path: &str) -> Option<&OptionDecl> {
        let trail = self.by_path.get(path)?;
        let (first, rest) = trail.split_first()?;
        let mut decl = self.roots.get(*first)?;
        for index in rest {
            let OptionBody::Page { children } = &decl.body else {
                return None;
            };
            decl = children.get(*index)?;
        }
        Some(decl)
    }

    /// Iterates all leaves in declaration order
    pub fn leaves(&self) -> impl Iterator<Item = (&OptionDecl, &LeafOption)> {
        let mut stack: Vec<&OptionDecl> = self.roots.iter().rev().collect();
        std::iter::from_fn(move || {
            while let Some(decl) = stack.pop() {
                match &decl.body {
                    OptionBody::Leaf(leaf) => return Some((decl, leaf)),
                    OptionBody::Page { children } => stack.extend(children.iter().rev()),
                }
            }
            None
        })
    }

    /// Adds auto-extracted options that are not already declared
    ///
    /// Declared options take precedence; each ignored collision is reported
    /// as a warning.
    pub fn merge_extracted(self, extracted: Vec<OptionDecl>, diag: &mut Diagnostics) -> Self {
        let mut roots = self.roots;
        let mut known: std::collections::HashSet<String> = self.by_path.into_keys().collect();
        for option in extracted {
            if known.contains(&option.path) {
                diag.warn(format!("Auto extracted option '{}' ignored (already declared in [options]).", option.path));
                continue;
            }
            known.insert(option.path.clone());
            roots.push(option);
        }
        Self::new(roots)
    }
}

fn index_leaves(decl: &OptionDecl, trail: &mut Vec<usize>, by_path: &mut HashMap<String, Vec<usize>>) {
    match &decl.body {
        OptionBody::Leaf(_) => {
            by_path.entry(decl.path.clone()).or_insert_with(|| trail.clone());
        }
        OptionBody::Page { children } => {
            for (i, child) in children.iter().enumerate() {
                trail.push(i);
                index_leaves(child, trail, by_path);
                trail.pop();
            }
        }
    }
}

/// Parses the `[options]` table
///
/// # Arguments
/// * `table` - The `[options]` table, if present
/// * `translations` - Loaded translations, used to warn about missing keys
/// * `diag` - Receives errors and warnings
pub fn parse_options(table: Option<&Table>, translations: &HashMap<String, String>, diag: &mut Diagnostics) -> Vec<OptionDecl> {
    match table {
        Some(table) if !table.is_empty() => parse_options_table(table, "", translations, diag),
        _ => Vec::new(),
    }
}

fn parse_options_table(table: &Table, prefix: &str, translations: &HashMap<String, String>, diag: &mut Diagnostics) -> Vec<OptionDecl> {
    let mut options = Vec::new();
    for (key, value) in table {
        let path = if prefix.is_empty() { key.clone() } else { format!("{prefix}.{key}") };
        let context = format!("options.{path}");
        let Value::Table(option) = value else {
            diag.error(format!("Option '{path}' must be a table."));
            continue;
        };

        let type_name = match option.get("type").and_then(Value::as_str) {
            Some(name) if !name.trim().is_empty() => Some(name.trim().to_string()),
            _ => {
                diag.error(format!("Missing {context}.type"));
                None
            }
        };
        let label_key = read_string(option, "label_key", &context, diag);
        let description_key = read_string(option, "description_key", &context, diag);
        let label = read_string(option, "label", &context, diag);
        let description = read_string(option, "description", &context, diag);
        check_lang_key(label_key.as_deref(), &context, translations, diag);
        check_lang_key(description_key.as_deref(), &context, translations, diag);

        let children_table = option.get("options").and_then(Value::as_table);
        let is_page = type_name.as_deref().is_some_and(|t| t.eq_ignore_ascii_case("page"));

        let body = if is_page {
            if ["target", "key", "render_values"].iter().any(|k| option.contains_key(*k)) {
                diag.error(format!("{context}.target/key/render_values is not allowed for page options."));
            }
            if option.contains_key("default") {
                diag.error(format!("{context}.default is not allowed for page options."));
            }
            if option.contains_key("values") {
                diag.error(format!("{context}.values is not allowed for page options."));
            }
            if ["min", "max", "step"].iter().any(|k| option.contains_key(*k)) {
                diag.error(format!("{context}.min/max/step is not allowed for page options."));
            }
            let children = match children_table {
                None => {
                    diag.error(format!("Missing {context}.options for page option."));
                    Vec::new()
                }
                Some(children) => {
                    if children.is_empty() {
                        diag.error(format!("{context}.options must contain at least one option."));
                    }
                    parse_options_table(children, &path, translations, diag)
                }
            };
            Some(OptionBody::Page { children })
        } else {
            if children_table.is_some() {
                diag.error(format!("{context}.options is only allowed for page options."));
            }
            parse_leaf(option, type_name.as_deref(), &context, diag).map(OptionBody::Leaf)
        };

        if let Some(body) = body {
            options.push(OptionDecl {
                id: key.clone(),
                path,
                label,
                description,
                label_key,
                description_key,
                body,
            });
        }
    }
    options
}

fn parse_leaf(option: &Table, type_name: Option<&str>, context: &str, diag: &mut Diagnostics) -> Option<LeafOption> {
    let target = read_string(option, "target", context, diag).filter(|t| !t.trim().is_empty());
    if target.is_none() {
        diag.error(format!("Missing {context}.target"));
    }
    let key = read_string(option, "key", context, diag).filter(|k| !k.trim().is_empty());
    if key.is_none() {
        diag.error(format!("Missing {context}.key"));
    }
    let render_values = match option.get("render_values") {
        None => None,
        Some(Value::Array(items)) => Some(read_string_array(items, &format!("{context}.render_values"), diag)),
        Some(_) => {
            diag.error(format!("Invalid array for {context}.render_values"));
            None
        }
    };
    let default = option.get("default");
    if default.is_none() {
        diag.error(format!("Missing {context}.default"));
    }

    let kind = match type_name {
        None => None,
        Some(name) => {
            let kind = OptionKind::parse(name);
            if kind.is_none() {
                diag.error(format!("{context}.type unsupported: {name}"));
            }
            kind
        }
    };

    let mut values = Vec::new();
    let default_value = match kind {
        None => None,
        Some(OptionKind::Bool) => match default {
            Some(Value::Boolean(b)) => Some(OptionValue::Bool(*b)),
            _ => {
                diag.error(format!("{context}.default must be boolean."));
                None
            }
        },
        Some(OptionKind::Int) => {
            for field in ["min", "max", "step"] {
                if option.get(field).is_some_and(|v| !v.is_integer()) {
                    diag.error(format!("{context}.{field} must be integer."));
                }
            }
            match default {
                Some(Value::Integer(n)) => Some(OptionValue::Int(*n)),
                _ => {
                    diag.error(format!("{context}.default must be integer."));
                    None
                }
            }
        }
        Some(OptionKind::Float) => {
            for field in ["min", "max", "step"] {
                if option.get(field).is_some_and(|v| as_number(v).is_none()) {
                    diag.error(format!("{context}.{field} must be number."));
                }
            }
            match default.and_then(as_number) {
                Some(n) => Some(OptionValue::Float(n)),
                None => {
                    diag.error(format!("{context}.default must be number."));
                    None
                }
            }
        }
        Some(OptionKind::String) => match default {
            Some(Value::String(s)) => Some(OptionValue::Str(s.clone())),
            _ => {
                diag.error(format!("{context}.default must be string."));
                None
            }
        },
        Some(OptionKind::Enum) => {
            match option.get("values").and_then(Value::as_array) {
                Some(items) if !items.is_empty() => {
                    if items.iter().all(Value::is_str) {
                        values = items.iter().filter_map(Value::as_str).map(str::to_string).collect();
                    } else {
                        diag.error(format!("{context}.values must contain only strings."));
                    }
                }
                _ => diag.error(format!("{context}.values must be a non-empty string array.")),
            }
            match &render_values {
                None => diag.error(format!("Missing {context}.render_values")),
                Some(render) if !values.is_empty() && render.len() != values.len() => {
                    diag.error(format!("{context}.render_values must match values length."));
                }
                Some(_) => {}
            }
            match default {
                Some(Value::String(selected)) => match values.iter().position(|v| v == selected) {
                    Some(index) => Some(OptionValue::Enum(index)),
                    None => {
                        if !values.is_empty() {
                            diag.error(format!("{context}.default must be one of values."));
                        }
                        None
                    }
                },
                _ => {
                    diag.error(format!("{context}.default must be string for enum."));
                    None
                }
            }
        }
    };

    if kind.is_some_and(|k| k != OptionKind::Enum) && render_values.is_some() {
        diag.error(format!("{context}.render_values is only allowed for enum options."));
    }
    if key.as_deref() == Some(USE_FILE_KEY) && kind != Some(OptionKind::Enum) {
        diag.error(format!("{context}.key={USE_FILE_KEY} is only allowed for enum options."));
    }

    Some(LeafOption {
        kind: kind?,
        target: normalize_path(&target?),
        marker: MarkerKey::parse(&key?),
        default: default_value?,
        bounds: NumericBounds {
            min: option.get("min").and_then(as_number),
            max: option.get("max").and_then(as_number),
            step: option.get("step").and_then(as_number),
        },
        values,
        render_values: render_values.unwrap_or_default(),
        auto_extracted: false,
    })
}

/// Warns about a translation key missing from a non-empty translation map
pub(crate) fn check_lang_key(key: Option<&str>, context: &str, translations: &HashMap<String, String>, diag: &mut Diagnostics) {
    if let Some(key) = key {
        if !translations.is_empty() && !translations.contains_key(key) {
            diag.warn(format!("Missing lang key: {key} ({context})"));
        }
    }
}

/// Normalizes a shaderpack-relative path: '/' separators, no leading "./" or '/'
pub fn normalize_path(path: &str) -> String {
    let path = path.trim().replace('\\', "/");
    let mut path = path.as_str();
    loop {
        if let Some(rest) = path.strip_prefix("./") {
            path = rest;
        } else if let Some(rest) = path.strip_prefix('/') {
            path = rest;
        } else {
            break;
        }
    }
    path.to_string()
}
