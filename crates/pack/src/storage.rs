//! Shaderpack storage backends
//!
//! A shaderpack is either a directory or a `.zip` archive. Everything above
//! this module addresses files by '/'-separated paths relative to the pack
//! root and never branches on the storage kind.

use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

/// Name of the root manifest file
pub const MANIFEST_FILE: &str = "shaderpack.toml";

/// Upper bound on the read buffer preallocated from an archive entry's declared size
const MAX_READ_PREALLOCATION: u64 = 1 << 20;

/// Errors raised while reading shaderpack files
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("File not found: {0}")]
    NotFound(String),
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to read archive {path}: {source}")]
    Archive {
        path: String,
        #[source]
        source: zip::result::ZipError,
    },
    #[error("File is not valid UTF-8: {0}")]
    InvalidUtf8(String),
    #[error("Unsupported shaderpack source: {0}")]
    Unsupported(String),
}

/// An entry of a storage directory listing
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct DirEntry {
    pub name: String,
    pub is_dir: bool,
}

/// Read-only access to the files of one shaderpack
pub trait ShaderpackStorage: Send + Sync + fmt::Debug {
    /// Path of the directory or archive backing this storage
    fn source_path(&self) -> &Path;

    /// Returns true if `path` names a file
    fn exists(&self, path: &str) -> bool;

    /// Reads the file at `path`
    fn read_bytes(&self, path: &str) -> Result<Vec<u8>, StorageError>;

    /// Lists the immediate children of directory `path`, sorted by name
    fn list_dir(&self, path: &str) -> Vec<DirEntry>;

    /// Lists every file below directory `path`, as full relative paths
    fn list_files(&self, path: &str) -> Vec<String>;

    /// Reads the file at `path` as UTF-8 text
    fn read_string(&self, path: &str) -> Result<String, StorageError> {
        String::from_utf8(self.read_bytes(path)?).map_err(|_| StorageError::InvalidUtf8(path.to_string()))
    }
}

/// Opens `path` as a directory or `.zip` shaderpack
pub fn open_storage(path: &Path) -> Result<Box<dyn ShaderpackStorage>, StorageError> {
    if path.is_dir() {
        return Ok(Box::new(DirectoryStorage::new(path)));
    }
    if is_archive_path(path) && path.is_file() {
        return Ok(Box::new(ArchiveStorage::open(path)?));
    }
    Err(StorageError::Unsupported(path.display().to_string()))
}

/// Returns true if `path` has a `.zip` extension
pub fn is_archive_path(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("zip"))
}

/// Splits a relative path into clean components, rejecting parent references
fn clean_components(path: &str) -> Option<Vec<&str>> {
    let mut components = Vec::new();
    for part in path.split(['/', '\\']) {
        match part {
            "" | "." => {}
            ".." => return None,
            part => components.push(part),
        }
    }
    Some(components)
}

fn clean_path(path: &str) -> Option<String> {
    clean_components(path).map(|components| components.join("/"))
}

/// Storage backed by a filesystem directory
#[derive(Debug, Clone)]
pub struct DirectoryStorage {
    root: PathBuf,
}

impl DirectoryStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> Option<PathBuf> {
        let mut resolved = self.root.clone();
        for component in clean_components(path)? {
            resolved.push(component);
        }
        Some(resolved)
    }

    fn walk(&self, dir: &Path, prefix: &str, output: &mut Vec<String>) {
        let Ok(entries) = std::fs::read_dir(dir) else {
            return;
        };
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            let relative = if prefix.is_empty() { name } else { format!("{prefix}/{name}") };
            let path = entry.path();
            if path.is_dir() {
                self.walk(&path, &relative, output);
            } else if path.is_file() {
                output.push(relative);
            }
        }
    }
}

impl ShaderpackStorage for DirectoryStorage {
    fn source_path(&self) -> &Path {
        &self.root
    }

    fn exists(&self, path: &str) -> bool {
        self.resolve(path).is_some_and(|p| p.is_file())
    }

    fn read_bytes(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        let resolved = self.resolve(path).filter(|p| p.is_file()).ok_or_else(|| StorageError::NotFound(path.to_string()))?;
        std::fs::read(&resolved).map_err(|source| StorageError::Io {
            path: path.to_string(),
            source,
        })
    }

    fn list_dir(&self, path: &str) -> Vec<DirEntry> {
        let Some(dir) = self.resolve(path) else {
            return Vec::new();
        };
        let Ok(entries) = std::fs::read_dir(dir) else {
            return Vec::new();
        };
        let mut listing: Vec<DirEntry> = entries
            .flatten()
            .map(|entry| DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                is_dir: entry.path().is_dir(),
            })
            .collect();
        listing.sort();
        listing
    }

    fn list_files(&self, path: &str) -> Vec<String> {
        let (Some(dir), Some(prefix)) = (self.resolve(path), clean_path(path)) else {
            return Vec::new();
        };
        let mut files = Vec::new();
        self.walk(&dir, &prefix, &mut files);
        files.sort();
        files
    }
}

/// Storage backed by a `.zip` archive
///
/// Entry names are indexed once at open time. If every entry sits below one
/// top-level directory containing the manifest, that directory becomes the
/// pack root.
pub struct ArchiveStorage {
    path: PathBuf,
    archive: Mutex<zip::ZipArchive<BufReader<File>>>,
    /// Maps root-relative file paths to archive entry names
    files: std::collections::BTreeMap<String, String>,
}

impl fmt::Debug for ArchiveStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArchiveStorage").field("path", &self.path).field("files", &self.files.len()).finish()
    }
}

impl ArchiveStorage {
    /// Opens and indexes the archive at `path`
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        let display = path.display().to_string();
        let file = File::open(path).map_err(|source| StorageError::Io { path: display.clone(), source })?;
        let archive = zip::ZipArchive::new(BufReader::new(file)).map_err(|source| StorageError::Archive { path: display.clone(), source })?;

        let names: Vec<(String, String)> = archive
            .file_names()
            .filter(|name| !name.ends_with('/'))
            .filter_map(|name| clean_path(name).map(|clean| (clean, name.to_string())))
            .collect();
        let prefix = common_root(names.iter().map(|(clean, _)| clean.as_str()));
        let files = names
            .into_iter()
            .filter_map(|(clean, entry)| match &prefix {
                Some(prefix) => clean.strip_prefix(prefix.as_str()).map(|rest| (rest.to_string(), entry)),
                None => Some((clean, entry)),
            })
            .collect();

        Ok(Self {
            path: path.to_path_buf(),
            archive: Mutex::new(archive),
            files,
        })
    }
}

/// Initial buffer size for an entry declaring `declared` uncompressed bytes
fn read_capacity(declared: u64) -> usize {
    usize::try_from(declared.min(MAX_READ_PREALLOCATION)).unwrap_or(0)
}

/// Finds a single wrapping directory (with trailing '/') that holds the manifest
fn common_root<'a>(mut names: impl Iterator<Item = &'a str> + Clone) -> Option<String> {
    if names.clone().any(|name| name == MANIFEST_FILE) {
        return None;
    }
    let first = names.next()?;
    let (top, _) = first.split_once('/')?;
    let prefix = format!("{top}/");
    let mut all = std::iter::once(first).chain(names);
    let manifest = format!("{prefix}{MANIFEST_FILE}");
    let mut has_manifest = false;
    let all_under = all.all(|name| {
        has_manifest |= name == manifest;
        name.starts_with(&prefix)
    });
    (all_under && has_manifest).then_some(prefix)
}

impl ShaderpackStorage for ArchiveStorage {
    fn source_path(&self) -> &Path {
        &self.path
    }

    fn exists(&self, path: &str) -> bool {
        clean_path(path).is_some_and(|p| self.files.contains_key(&p))
    }

    fn read_bytes(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        let entry_name = clean_path(path).and_then(|p| self.files.get(&p)).ok_or_else(|| StorageError::NotFound(path.to_string()))?;
        let mut archive = self.archive.lock();
        let mut entry = archive.by_name(entry_name).map_err(|source| StorageError::Archive {
            path: path.to_string(),
            source,
        })?;
        let mut bytes = Vec::with_capacity(read_capacity(entry.size()));
        entry.read_to_end(&mut bytes).map_err(|source| StorageError::Io {
            path: path.to_string(),
            source,
        })?;
        Ok(bytes)
    }

    fn list_dir(&self, path: &str) -> Vec<DirEntry> {
        let Some(dir) = clean_path(path) else {
            return Vec::new();
        };
        let prefix = if dir.is_empty() { String::new() } else { format!("{dir}/") };
        let listing: BTreeSet<DirEntry> = self
            .files
            .keys()
            .filter_map(|file| file.strip_prefix(prefix.as_str()))
            .map(|rest| match rest.split_once('/') {
                Some((name, _)) => DirEntry { name: name.to_string(), is_dir: true },
                None => DirEntry { name: rest.to_string(), is_dir: false },
            })
            .collect();
        listing.into_iter().collect()
    }

    fn list_files(&self, path: &str) -> Vec<String> {
        let Some(dir) = clean_path(path) else {
            return Vec::new();
        };
        let prefix = if dir.is_empty() { String::new() } else { format!("{dir}/") };
        self.files.keys().filter(|file| file.starts_with(&prefix)).cloned().collect()
    }
}
