//! Option discovery from shader directives
//!
//! A shader line containing `@sulkan_option` (any case) declares a leaf option
//! inline, e.g.
//!
//! ```glsl
//! // @sulkan_option path=post.bloom type=bool default=on key=BLOOM
//! ```

use super::{LeafOption, MarkerKey, NumericBounds, OptionBody, OptionDecl, OptionKind, OptionValue, check_lang_key, normalize_path};
use crate::diagnostics::Diagnostics;
use crate::storage::ShaderpackStorage;
use std::collections::HashMap;

const DIRECTIVE: &str = "@sulkan_option";

/// File extensions scanned for directives
pub const SHADER_TEXT_EXTENSIONS: &[&str] = &[".vsh", ".vert", ".fsh", ".frag", ".gsh", ".geom", ".csh", ".comp", ".glsl"];

/// Returns true if `name` has one of [`SHADER_TEXT_EXTENSIONS`]
pub fn is_shader_text_path(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    SHADER_TEXT_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

/// Scans every shader text file under `shaders/` for option directives
///
/// Files are visited in case-insensitive path order. Duplicate paths keep the
/// first declaration and warn.
pub fn extract_options(storage: &dyn ShaderpackStorage, translations: &HashMap<String, String>, diag: &mut Diagnostics) -> Vec<OptionDecl> {
    let mut files: Vec<String> = storage.list_files("shaders").into_iter().filter(|path| is_shader_text_path(path)).collect();
    files.sort_by_key(|path| path.to_ascii_lowercase());

    let mut extracted: Vec<OptionDecl> = Vec::new();
    for file in files {
        let text = match storage.read_string(&file) {
            Ok(text) => text,
            Err(e) => {
                diag.error(format!("Failed to scan shader files for auto options: {e}"));
                continue;
            }
        };
        extract_from_text(&text, &file, translations, &mut extracted, diag);
    }
    extracted
}

/// Parses directives from one source text, appending to `extracted`
pub fn extract_from_text(source: &str, source_path: &str, translations: &HashMap<String, String>, extracted: &mut Vec<OptionDecl>, diag: &mut Diagnostics) {
    for (i, line) in source.lines().enumerate() {
        let Some(marker) = line.to_ascii_lowercase().find(DIRECTIVE) else {
            continue;
        };
        let payload = line[marker + DIRECTIVE.len()..].trim();
        let context = format!("{source_path}:{}", i + 1);
        let Some(option) = parse_payload(payload, source_path, &context, translations, diag) else {
            continue;
        };
        if extracted.iter().any(|existing| existing.path == option.path) {
            diag.warn(format!("Duplicate auto option '{}' ignored at {context}.", option.path));
            continue;
        }
        extracted.push(option);
    }
}

fn parse_payload(payload: &str, source_path: &str, context: &str, translations: &HashMap<String, String>, diag: &mut Diagnostics) -> Option<OptionDecl> {
    if payload.is_empty() {
        diag.error(format!("Empty auto option directive at {context}."));
        return None;
    }
    let fields = parse_key_values(payload);
    let (Some(path), Some(type_name), Some(default_raw)) = (fields.get("path"), fields.get("type"), fields.get("default")) else {
        diag.error(format!("Auto option directive missing required fields path/type/default at {context}."));
        return None;
    };
    let path = path.trim().to_string();
    let label_key = fields.get("label_key").cloned();
    let description_key = fields.get("description_key").cloned();
    check_lang_key(label_key.as_deref(), context, translations, diag);
    check_lang_key(description_key.as_deref(), context, translations, diag);

    let Some(kind) = OptionKind::parse(type_name) else {
        diag.error(format!("Unsupported auto option type '{type_name}' at {context}."));
        return None;
    };

    let mut values = Vec::new();
    let mut render_values = Vec::new();
    let default = match kind {
        OptionKind::Bool => match parse_bool_literal(default_raw) {
            Some(b) => OptionValue::Bool(b),
            None => {
                diag.error(format!("Invalid bool default '{default_raw}' in auto option at {context}."));
                return None;
            }
        },
        OptionKind::Int => match default_raw.trim().parse::<i64>() {
            Ok(n) => OptionValue::Int(n),
            Err(_) => {
                diag.error(format!("Invalid int default '{default_raw}' in auto option at {context}."));
                return None;
            }
        },
        OptionKind::Float => match default_raw.trim().parse::<f64>() {
            Ok(n) => OptionValue::Float(n),
            Err(_) => {
                diag.error(format!("Invalid float default '{default_raw}' in auto option at {context}."));
                return None;
            }
        },
        OptionKind::String => OptionValue::Str(strip_quotes(default_raw).to_string()),
        OptionKind::Enum => {
            let selected = strip_quotes(default_raw).to_string();
            values = split_list(fields.get("values").map(String::as_str));
            render_values = split_list(fields.get("render_values").map(String::as_str));
            if values.is_empty() {
                values.push(selected.clone());
            }
            let Some(index) = values.iter().position(|v| *v == selected) else {
                diag.error(format!("Enum default '{selected}' not present in values at {context}."));
                return None;
            };
            if !render_values.is_empty() && render_values.len() != values.len() {
                diag.error(format!("render_values length mismatch in auto option at {context}."));
                return None;
            }
            OptionValue::Enum(index)
        }
    };

    let number = |key: &str| fields.get(key).and_then(|raw| raw.trim().parse::<f64>().ok());
    let id = match path.rsplit_once('.') {
        Some((_, last)) if !last.is_empty() => last.to_string(),
        _ => path.clone(),
    };
    Some(OptionDecl {
        id,
        label: fields.get("label").cloned(),
        description: fields.get("description").cloned(),
        label_key,
        description_key,
        body: OptionBody::Leaf(LeafOption {
            kind,
            target: normalize_path(fields.get("target").map(String::as_str).unwrap_or(source_path)),
            marker: MarkerKey::parse(fields.get("key").map(String::as_str).unwrap_or(&path)),
            default,
            bounds: NumericBounds {
                min: number("min"),
                max: number("max"),
                step: number("step"),
            },
            values,
            render_values,
            auto_extracted: true,
        }),
        path,
    })
}

/// Splits a directive payload into `key=value` pairs, honoring quotes
fn parse_key_values(payload: &str) -> HashMap<String, String> {
    tokenize(payload)
        .into_iter()
        .filter_map(|token| {
            let (key, value) = token.split_once('=')?;
            let key = key.trim().to_ascii_lowercase();
            let value = value.trim();
            if key.is_empty() || value.is_empty() {
                return None;
            }
            Some((key, strip_quotes(value).to_string()))
        })
        .collect()
}

fn tokenize(payload: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    for c in payload.chars() {
        if let Some(q) = quote {
            current.push(c);
            if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => {
                quote = Some(c);
                current.push(c);
            }
            c if c.is_whitespace() => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

fn strip_quotes(value: &str) -> &str {
    let trimmed = value.trim();
    for quote in ['"', '\''] {
        if trimmed.len() >= 2 && trimmed.starts_with(quote) && trimmed.ends_with(quote) {
            return &trimmed[1..trimmed.len() - 1];
        }
    }
    trimmed
}

fn split_list(raw: Option<&str>) -> Vec<String> {
    raw.map(|raw| {
        raw.split(['|', ','])
            .filter(|token| !token.trim().is_empty())
            .map(|token| strip_quotes(token).to_string())
            .collect()
    })
    .unwrap_or_default()
}

fn parse_bool_literal(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "on" | "yes" | "1" => Some(true),
        "false" | "off" | "no" | "0" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extract(source: &str) -> (Vec<OptionDecl>, Diagnostics) {
        let mut diag = Diagnostics::new();
        let mut extracted = Vec::new();
        extract_from_text(source, "shaders/final.fsh", &HashMap::new(), &mut extracted, &mut diag);
        (extracted, diag)
    }

    #[test]
    fn test_directive_parsing() {
        let (options, diag) = extract(
            r#"#version 450
// @SULKAN_OPTION path=post.bloom type=bool default=on
// @sulkan_option path=post.mode type=enum default="soft light" values="hard|soft light" render_values=0,1 key=MODE
void main() {}
"#,
        );
        assert!(diag.errors.is_empty(), "{:?}", diag.errors);
        assert_eq!(options.len(), 2);

        let bloom = &options[0];
        assert_eq!(bloom.id, "bloom");
        let leaf = bloom.leaf().unwrap();
        assert_eq!(leaf.default, OptionValue::Bool(true));
        assert_eq!(leaf.target, "shaders/final.fsh");
        assert_eq!(leaf.marker, MarkerKey::Marker("post.bloom".to_string()));
        assert!(leaf.auto_extracted);

        let mode = options[1].leaf().unwrap();
        assert_eq!(mode.values, vec!["hard", "soft light"]);
        assert_eq!(mode.render_values, vec!["0", "1"]);
        assert_eq!(mode.default, OptionValue::Enum(1));
        assert_eq!(mode.marker, MarkerKey::Marker("MODE".to_string()));
    }

    #[test]
    fn test_invalid_directives() {
        let (options, diag) = extract(
            "// @sulkan_option\n// @sulkan_option path=a type=int default=x\n// @sulkan_option path=b type=enum default=c values=a|b\n// @sulkan_option path=c type=vec3 default=1",
        );
        assert!(options.is_empty());
        assert_eq!(
            diag.errors,
            vec![
                "Empty auto option directive at shaders/final.fsh:1.",
                "Invalid int default 'x' in auto option at shaders/final.fsh:2.",
                "Enum default 'c' not present in values at shaders/final.fsh:3.",
                "Unsupported auto option type 'vec3' at shaders/final.fsh:4.",
            ]
        );
    }

    #[test]
    fn test_duplicate_directive_warns() {
        let (options, diag) = extract("// @sulkan_option path=a type=int default=1\n// @sulkan_option path=a type=int default=2");
        assert_eq!(options.len(), 1);
        assert_eq!(diag.warnings, vec!["Duplicate auto option 'a' ignored at shaders/final.fsh:2."]);
    }

    #[test]
    fn test_shader_text_paths() {
        assert!(is_shader_text_path("shaders/lib/common.GLSL"));
        assert!(is_shader_text_path("a.comp"));
        assert!(!is_shader_text_path("shaders/post.json"));
    }
}
