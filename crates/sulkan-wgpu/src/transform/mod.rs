//! Shader source transforms
//!
//! A pack-provided or host-provided source passes through, in order:
//! include expansion ([`includes`]), pipeline parameter markers and option
//! markers ([`markers`]), then the generated interface define block
//! ([`defines`]). Candidate selection and the compatibility filter live in
//! [`compat`].

pub mod compat;
pub mod defines;
pub mod includes;
pub mod markers;

/// Prefix every host shader path and pack shader path starts with
pub const SHADERS_PREFIX: &str = "shaders/";

/// Text lookups used while expanding includes
pub trait ShaderSources {
    /// Text of a pack-relative file, `None` if missing or unreadable
    fn pack_text(&self, path: &str) -> Option<String>;

    /// Text of a shader bundled with the host, addressed relative to its asset root
    fn bundled_text(&self, path: &str) -> Option<String>;
}

/// Normalizes a relative path
///
/// Uses '/' separators, drops empty and `.` components, and resolves `..`
/// by popping the previous component. The result never starts with '/'.
pub fn normalize_path(path: &str) -> String {
    let path = path.replace('\\', "/");
    let mut cleaned: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            _ if part.trim().is_empty() => {}
            ".." => {
                cleaned.pop();
            }
            part => cleaned.push(part),
        }
    }
    cleaned.join("/")
}

/// Path with its shader extension swapped to the other naming convention
///
/// `.vsh`/`.vert`, `.fsh`/`.frag`, `.gsh`/`.geom` and `.csh`/`.comp` pair up.
pub fn extension_alias(path: &str) -> Option<String> {
    const PAIRS: &[(&str, &str)] = &[
        (".vsh", ".vert"),
        (".vert", ".vsh"),
        (".fsh", ".frag"),
        (".frag", ".fsh"),
        (".gsh", ".geom"),
        (".geom", ".gsh"),
        (".csh", ".comp"),
        (".comp", ".csh"),
    ];
    PAIRS
        .iter()
        .find_map(|(from, to)| path.strip_suffix(from).map(|base| format!("{base}{to}")))
}

pub(crate) fn push_unique(output: &mut Vec<String>, value: String) {
    if !output.contains(&value) {
        output.push(value);
    }
}

/// Adds `path` and its extension alias to `output`, skipping duplicates
pub fn add_with_extension_alias(output: &mut Vec<String>, path: &str) {
    push_unique(output, path.to_string());
    if let Some(alias) = extension_alias(path) {
        push_unique(output, alias);
    }
}

/// Returns true if `path` looks like an include file rather than a stage source
pub fn is_include_resource(path: &str) -> bool {
    let lower = normalize_path(path).to_ascii_lowercase();
    lower.ends_with(".glsl") || lower.contains("/include/")
}

/// Turns arbitrary text into a preprocessor identifier fragment
///
/// Uppercases, maps everything outside `[A-Z0-9]` to '_', collapses runs of
/// '_' and prefixes a leading digit with '_'. Blank input yields `UNKNOWN`.
pub fn macro_token(value: &str) -> String {
    let upper = value.trim().to_uppercase();
    let mut token = String::with_capacity(upper.len());
    for c in upper.chars() {
        let c = if c.is_ascii_uppercase() || c.is_ascii_digit() { c } else { '_' };
        if c == '_' && token.ends_with('_') {
            continue;
        }
        token.push(c);
    }
    if token.is_empty() {
        return "UNKNOWN".to_string();
    }
    if token.starts_with(|c: char| c.is_ascii_digit()) {
        token.insert(0, '_');
    }
    token
}

/// Formats a number for a preprocessor define
///
/// Integral values print without a fraction; others use at most eight
/// fractional digits with trailing zeros removed. Non-finite values print `0.0`.
pub fn format_number(value: f64) -> String {
    if !value.is_finite() {
        return "0.0".to_string();
    }
    if value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        return (value as i64).to_string();
    }
    let text = format!("{value:.8}");
    let trimmed = text.trim_end_matches('0');
    if trimmed.ends_with('.') { format!("{trimmed}0") } else { trimmed.to_string() }
}
