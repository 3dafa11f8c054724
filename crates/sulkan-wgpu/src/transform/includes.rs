//! `#include` expansion
//!
//! Include references are resolved relative to the including file first,
//! then under `shaders/include/`, `shaders/` and the pack root, each with the
//! usual compatibility variants. Every candidate is looked up in the pack and
//! then among the host's bundled shaders. `#pragma once` files expand at most
//! once per top-level source.

use super::compat::add_with_compat_candidates;
use super::{SHADERS_PREFIX, ShaderSources, normalize_path};
use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;
use sulkan_pack::pipelines::segment::HOST_ASSET_PREFIX;

/// Nesting depth beyond which expansion stops
pub const MAX_INCLUDE_DEPTH: usize = 16;

static INCLUDE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?m)^[ \t]*#include[ \t]+(["<])([^">\n]+)[">][ \t]*(?://.*)?$"#).expect("valid regex"));

static PRAGMA_ONCE_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^[ \t]*#pragma[ \t]+once[ \t]*(?://.*)?$").expect("valid regex"));

struct Expansion<'a> {
    sources: &'a dyn ShaderSources,
    stack: Vec<String>,
    once: HashSet<String>,
}

/// Inlines every include directive of `source`
///
/// Missing includes and cycles are logged and replaced by nothing.
///
/// # Arguments
/// * `source` - Text to expand
/// * `source_path` - Pack-relative path of `source`, the base for relative references
/// * `sources` - Pack and bundled text lookups
pub fn expand_includes(source: &str, source_path: &str, sources: &dyn ShaderSources) -> String {
    if !source.contains("#include") {
        return source.to_string();
    }
    let root = normalize_path(source_path);
    let mut expansion = Expansion {
        sources,
        stack: vec![root.clone()],
        once: HashSet::new(),
    };
    expansion.expand(source, &root, 0)
}

impl Expansion<'_> {
    fn expand(&mut self, source: &str, path: &str, depth: usize) -> String {
        if depth > MAX_INCLUDE_DEPTH {
            tracing::warn!("Shader include depth exceeded while processing '{path}'.");
            return source.to_string();
        }
        if self.once.contains(path) {
            return String::new();
        }
        let body = if PRAGMA_ONCE_PATTERN.is_match(source) {
            self.once.insert(path.to_string());
            PRAGMA_ONCE_PATTERN.replace_all(source, "").into_owned()
        } else {
            source.to_string()
        };

        let mut output = String::with_capacity(body.len());
        let mut last = 0;
        for caps in INCLUDE_PATTERN.captures_iter(&body) {
            let Some(directive) = caps.get(0) else {
                continue;
            };
            output.push_str(&body[last..directive.start()]);
            last = directive.end();

            let reference = &caps[2];
            let Some((include_path, text)) = self.load(path, reference) else {
                tracing::warn!("Shader include '{reference}' not found while processing '{path}'.");
                continue;
            };
            if self.stack.contains(&include_path) {
                tracing::warn!("Shader include cycle detected for '{include_path}'.");
                continue;
            }
            self.stack.push(include_path.clone());
            let expanded = self.expand(&text, &include_path, depth + 1);
            self.stack.pop();
            output.push_str(&expanded);
        }
        output.push_str(&body[last..]);
        output
    }

    fn load(&self, source_path: &str, reference: &str) -> Option<(String, String)> {
        include_candidates(source_path, reference).into_iter().find_map(|candidate| {
            let text = self.sources.pack_text(&candidate).or_else(|| self.sources.bundled_text(&candidate))?;
            Some((candidate, text))
        })
    }
}

/// Ordered lookup paths for an include reference found in `source_path`
pub fn include_candidates(source_path: &str, reference: &str) -> Vec<String> {
    let mut candidates = Vec::new();
    let trimmed = reference.trim();
    if trimmed.is_empty() {
        return candidates;
    }
    let raw = trimmed.replace('\\', "/");
    let rooted = raw.starts_with('/');
    let mut raw = raw.trim_start_matches('/');
    if let Some(index) = raw.find(':').filter(|index| index + 1 < raw.len()) {
        raw = &raw[index + 1..];
    }
    let raw = raw.strip_prefix(HOST_ASSET_PREFIX).unwrap_or(raw);
    let normalized = normalize_path(raw);

    if normalized.starts_with(SHADERS_PREFIX) {
        add_with_compat_candidates(&mut candidates, &normalized);
        return candidates;
    }
    let directory = parent_directory(source_path);
    if !rooted && !directory.is_empty() && !raw.trim().is_empty() {
        add_with_compat_candidates(&mut candidates, &normalize_path(&format!("{directory}/{raw}")));
    }
    if !normalized.is_empty() {
        add_with_compat_candidates(&mut candidates, &format!("{SHADERS_PREFIX}include/{normalized}"));
        add_with_compat_candidates(&mut candidates, &format!("{SHADERS_PREFIX}{normalized}"));
        add_with_compat_candidates(&mut candidates, &normalized);
    }
    candidates
}

fn parent_directory(path: &str) -> String {
    let normalized = normalize_path(path);
    match normalized.rfind('/') {
        Some(slash) if slash > 0 => normalized[..slash].to_string(),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[derive(Default)]
    struct MemorySources {
        pack: HashMap<String, String>,
        bundled: HashMap<String, String>,
    }

    impl MemorySources {
        fn pack(mut self, path: &str, text: &str) -> Self {
            self.pack.insert(path.to_string(), text.to_string());
            self
        }
    }

    impl ShaderSources for MemorySources {
        fn pack_text(&self, path: &str) -> Option<String> {
            self.pack.get(path).cloned()
        }

        fn bundled_text(&self, path: &str) -> Option<String> {
            self.bundled.get(path).cloned()
        }
    }

    #[test]
    fn test_include_candidate_order() {
        let candidates = include_candidates("shaders/post/blur.fsh", "lib/noise.glsl");
        assert_eq!(
            &candidates[..3],
            &["shaders/post/lib/noise.glsl", "shaders/post/lib/noise.sulkan.glsl", "shaders/post/lib/noise.vulkan.glsl"]
        );
        let include_root = candidates.iter().position(|c| c == "shaders/include/lib/noise.glsl").unwrap();
        let shaders_root = candidates.iter().position(|c| c == "shaders/lib/noise.glsl").unwrap();
        let pack_root = candidates.iter().position(|c| c == "lib/noise.glsl").unwrap();
        assert!(include_root < shaders_root && shaders_root < pack_root);

        let rooted = include_candidates("shaders/post/blur.fsh", "/lib/noise.glsl");
        assert_eq!(rooted[0], "shaders/include/lib/noise.glsl");

        let namespaced = include_candidates("shaders/post/blur.fsh", "minecraft:assets/vulkanmod/shaders/lib/noise.glsl");
        assert_eq!(namespaced[0], "shaders/lib/noise.glsl");
        assert!(namespaced.iter().all(|c| c.starts_with("shaders/")));
        assert!(include_candidates("shaders/a.fsh", "  ").is_empty());
    }

    #[test]
    fn test_expands_nested_and_bundled_includes() {
        let mut sources = MemorySources::default()
            .pack("shaders/include/lib/a.glsl", "// a\n#include \"b.glsl\"\n")
            .pack("shaders/include/lib/b.glsl", "float b() { return 1.0; }");
        sources.bundled.insert("shaders/include/light.glsl".to_string(), "float light() { return 0.5; }".to_string());
        let source = "#version 450\n#include \"lib/a.glsl\"\n#include <light.glsl> // host\nvoid main() {}\n";

        let expanded = expand_includes(source, "shaders/gbuffer/terrain.fsh", &sources);
        assert_eq!(expanded, "#version 450\n// a\nfloat b() { return 1.0; }\n\nfloat light() { return 0.5; }\nvoid main() {}\n");
    }

    #[test]
    fn test_pragma_once_and_missing() {
        let sources = MemorySources::default().pack("shaders/include/common.glsl", "#pragma once\nconst float PI = 3.14159;\n");
        let source = "#include \"common.glsl\"\n#include \"common.glsl\"\n#include \"missing.glsl\"\nvoid main() {}\n";
        let expanded = expand_includes(source, "shaders/final.fsh", &sources);
        assert_eq!(expanded.matches("const float PI").count(), 1);
        assert!(!expanded.contains("#include"));
        assert!(!expanded.contains("#pragma once"));
        assert!(expanded.ends_with("void main() {}\n"));
    }

    #[test]
    fn test_blank_lines_around_directives_are_kept() {
        let sources = MemorySources::default().pack("shaders/include/common.glsl", "#pragma once\n\nconst float PI = 3.0;");
        let source = "#version 450\n\n#include \"common.glsl\"\n\n\t#include \"common.glsl\"  \n\nvoid main() {}\n";
        let expanded = expand_includes(source, "shaders/final.fsh", &sources);
        assert_eq!(expanded, "#version 450\n\n\n\nconst float PI = 3.0;\n\n\n\nvoid main() {}\n");
        assert_eq!(expanded.lines().count(), source.lines().count() + 2);
    }

    #[test]
    fn test_cycles_and_depth_are_bounded() {
        let sources = MemorySources::default()
            .pack("shaders/include/a.glsl", "A\n#include \"b.glsl\"\n")
            .pack("shaders/include/b.glsl", "B\n#include \"a.glsl\"\n");
        let expanded = expand_includes("#include \"a.glsl\"\n", "shaders/final.fsh", &sources);
        assert_eq!(expanded.matches('A').count(), 1);
        assert_eq!(expanded.matches('B').count(), 1);

        let mut chain = MemorySources::default();
        for i in 0..20 {
            chain = chain.pack(&format!("shaders/include/n{i}.glsl"), &format!("L{i}\n#include \"n{}.glsl\"\n", i + 1));
        }
        let expanded = expand_includes("#include \"n0.glsl\"\n", "shaders/final.fsh", &chain);
        assert!(expanded.contains("L16"));
        assert!(!expanded.contains("L17"));
        assert!(expanded.contains("#include \"n17.glsl\""));
    }
}
