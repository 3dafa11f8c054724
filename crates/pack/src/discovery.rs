//! Shaderpack discovery in the shaderpacks directory

use crate::manifest::{LoadResult, load_shaderpack};
use crate::storage::is_archive_path;
use std::fs;
use std::path::{Path, PathBuf};

/// A directory or archive found in the shaderpacks directory
#[derive(Debug, Clone, PartialEq)]
pub struct ShaderpackCandidate {
    /// File name, used as the selection id
    pub id: String,
    pub path: PathBuf,
    pub result: LoadResult,
}

impl ShaderpackCandidate {
    /// `"<name> v<version>"` for valid packs, otherwise the file name
    pub fn display_name(&self) -> String {
        match &self.result.manifest {
            Some(manifest) if self.result.errors.is_empty() => manifest.display_name(),
            _ => self.id.clone(),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.result.is_valid()
    }
}

/// Loads every shaderpack in `dir`, sorted case-insensitively by file name
///
/// The directory is created if missing. Listing failures are logged and
/// yield an empty list.
pub fn discover_shaderpacks(dir: &Path, locale: &str) -> Vec<ShaderpackCandidate> {
    if let Err(e) = fs::create_dir_all(dir) {
        tracing::error!("Failed to create shaderpacks directory {}: {e}", dir.display());
        return Vec::new();
    }
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::error!("Failed to list shaderpacks directory {}: {e}", dir.display());
            return Vec::new();
        }
    };
    let mut paths: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_dir() || (path.is_file() && is_archive_path(path)))
        .collect();
    paths.sort_by_key(|path| file_name(path).to_lowercase());

    paths
        .into_iter()
        .map(|path| ShaderpackCandidate {
            id: file_name(&path),
            result: load_shaderpack(&path, locale),
            path,
        })
        .collect()
}

/// Finds the candidate whose id equals `selected`, case-insensitively
pub fn find_candidate<'a>(candidates: &'a [ShaderpackCandidate], selected: &str) -> Option<&'a ShaderpackCandidate> {
    let selected = selected.trim();
    candidates.iter().find(|candidate| candidate.id.eq_ignore_ascii_case(selected))
}

fn file_name(path: &Path) -> String {
    path.file_name().map(|name| name.to_string_lossy().into_owned()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discovery_order_and_names() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("beta")).unwrap();
        fs::create_dir(dir.path().join("Alpha")).unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
        fs::write(dir.path().join("gamma.zip"), "not a zip").unwrap();

        let candidates = discover_shaderpacks(dir.path(), "en_us");
        let ids: Vec<&str> = candidates.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["Alpha", "beta", "gamma.zip"]);
        assert!(candidates.iter().all(|c| !c.is_valid()));
        assert_eq!(candidates[0].display_name(), "Alpha");
        assert_eq!(candidates[0].result.errors, vec!["Missing shaderpack.toml in Alpha"]);
        assert_eq!(candidates[2].result.errors, vec!["Failed to read shaderpack.toml from gamma.zip"]);
        assert_eq!(find_candidate(&candidates, "BETA").map(|c| c.id.as_str()), Some("beta"));
    }
}
