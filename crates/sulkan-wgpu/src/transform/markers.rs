//! Textual marker substitution
//!
//! `@SULKAN:<key>@` is replaced by the rendered value of the option whose
//! marker key is `<key>`, and `@SULKAN_PARAM:<name>@` by the segment's
//! resolved pipeline parameter `<name>`.

use std::collections::BTreeMap;
use sulkan_pack::options::MarkerKey;
use sulkan_pack::{LeafOption, OptionValue};

pub const MARKER_PREFIX: &str = "@SULKAN:";
pub const PARAM_MARKER_PREFIX: &str = "@SULKAN_PARAM:";
pub const MARKER_SUFFIX: &str = "@";

/// Replaces pipeline parameter markers
pub fn apply_params(source: &str, params: &BTreeMap<String, String>) -> String {
    let mut updated = source.to_string();
    for (key, value) in params {
        if key.trim().is_empty() {
            continue;
        }
        let marker = format!("{PARAM_MARKER_PREFIX}{key}{MARKER_SUFFIX}");
        if updated.contains(&marker) {
            updated = updated.replace(&marker, value);
        }
    }
    updated
}

/// Replaces option markers with each option's rendered current value
///
/// Options without a marker key (whole-file replacements) are skipped.
pub fn apply_option_markers<'a>(source: &str, options: impl IntoIterator<Item = (&'a LeafOption, &'a OptionValue)>) -> String {
    let mut updated = source.to_string();
    for (leaf, value) in options {
        let MarkerKey::Marker(key) = &leaf.marker else {
            continue;
        };
        if key.trim().is_empty() {
            continue;
        }
        let marker = format!("{MARKER_PREFIX}{key}{MARKER_SUFFIX}");
        if updated.contains(&marker) {
            updated = updated.replace(&marker, &leaf.render(value));
        }
    }
    updated
}

#[cfg(test)]
mod tests {
    use super::*;
    use sulkan_pack::OptionKind;
    use sulkan_pack::options::NumericBounds;

    fn leaf(kind: OptionKind, marker: MarkerKey, default: OptionValue) -> LeafOption {
        LeafOption {
            kind,
            target: "shaders/final.fsh".to_string(),
            marker,
            default,
            bounds: NumericBounds::default(),
            values: vec!["low".to_string(), "high".to_string()],
            render_values: vec!["1".to_string(), "4".to_string()],
            auto_extracted: false,
        }
    }

    #[test]
    fn test_params_replaced() {
        let params = BTreeMap::from([("tint".to_string(), "vec3(1.0, 0.9, 0.8)".to_string()), ("unused".to_string(), "x".to_string())]);
        let source = "vec3 a = @SULKAN_PARAM:tint@;\nvec3 b = @SULKAN_PARAM:tint@;\nfloat c = @SULKAN_PARAM:other@;\n";
        assert_eq!(
            apply_params(source, &params),
            "vec3 a = vec3(1.0, 0.9, 0.8);\nvec3 b = vec3(1.0, 0.9, 0.8);\nfloat c = @SULKAN_PARAM:other@;\n"
        );
    }

    #[test]
    fn test_option_markers_render_values() {
        let quality = leaf(OptionKind::Enum, MarkerKey::Marker("QUALITY".to_string()), OptionValue::Enum(0));
        let strength = leaf(OptionKind::Float, MarkerKey::Marker("STRENGTH".to_string()), OptionValue::Float(0.5));
        let file = leaf(OptionKind::Enum, MarkerKey::UseFile, OptionValue::Enum(0));
        let high = OptionValue::Enum(1);
        let strong = OptionValue::Float(2.0);
        let source = "#define QUALITY @SULKAN:QUALITY@\n#define STRENGTH @SULKAN:STRENGTH@\n";
        let updated = apply_option_markers(source, [(&quality, &high), (&strength, &strong), (&file, &high)]);
        assert_eq!(updated, "#define QUALITY 4\n#define STRENGTH 2.0\n");
    }
}
