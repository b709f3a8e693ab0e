//! Shared path manipulation utilities: absolutizing roots and mapping between
//! filesystem paths and manifest keys.

use std::env;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

/// How file paths are stored as manifest keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PathMode {
    /// Keys are relative to the source root, `/`-separated.
    #[default]
    Relative,
    /// Keys are absolute filesystem paths.
    Absolute,
}

/// Resolve a path to an absolute, normalized path.
///
/// If `fs::canonicalize` succeeds (path exists), it is used to resolve symlinks
/// and normalize components.
///
/// If it fails (e.g. path does not exist), the path is made absolute relative
/// to CWD and `..`/`.` components are resolved syntactically.
pub fn resolve_absolute_path(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        env::current_dir().map_or_else(|_| path.to_path_buf(), |cwd| cwd.join(path))
    };

    if let Ok(canonical) = std::fs::canonicalize(&absolute) {
        return canonical;
    }

    normalize_syntactic(&absolute)
}

fn normalize_syntactic(path: &Path) -> PathBuf {
    let mut components = Vec::new();
    for component in path.components() {
        match component {
            Component::Prefix(..) | Component::RootDir | Component::Normal(_) => {
                components.push(component);
            }
            Component::CurDir => {}
            Component::ParentDir => {
                if let Some(Component::Normal(_)) = components.last() {
                    components.pop();
                }
            }
        }
    }
    components.into_iter().collect()
}

/// Manifest key for `file` found under `root`.
///
/// Returns `None` in relative mode when `file` is not below `root`.
pub fn manifest_key(root: &Path, file: &Path, mode: PathMode) -> Option<String> {
    match mode {
        PathMode::Absolute => Some(file.to_string_lossy().into_owned()),
        PathMode::Relative => {
            let rel = file.strip_prefix(root).ok()?;
            if rel.as_os_str().is_empty() {
                // The root is itself a file: key it by its own name.
                return file.file_name().map(|n| n.to_string_lossy().into_owned());
            }
            Some(join_components(rel))
        }
    }
}

/// Path of the source file a manifest key refers to.
pub fn source_path(root: &Path, key: &str, mode: PathMode) -> PathBuf {
    match mode {
        PathMode::Absolute => PathBuf::from(key),
        PathMode::Relative if root.is_file() => root.to_path_buf(),
        PathMode::Relative => root.join(key),
    }
}

/// Key relative to the source root, suitable for joining onto a mirror.
///
/// Rejects anything that could land outside the mirror: absolute components,
/// `..`, or absolute keys outside `root`.
pub fn mirror_relative(root: &Path, key: &str, mode: PathMode) -> Option<PathBuf> {
    let rel = match mode {
        PathMode::Relative => PathBuf::from(key),
        PathMode::Absolute => {
            let stripped = Path::new(key).strip_prefix(root).ok()?;
            if stripped.as_os_str().is_empty() {
                PathBuf::from(Path::new(key).file_name()?)
            } else {
                stripped.to_path_buf()
            }
        }
    };
    let contained = rel
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    (contained && !rel.as_os_str().is_empty()).then_some(rel)
}

fn join_components(rel: &Path) -> String {
    rel.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Last path component of `path`, ignoring trailing separators.
pub fn base_name(path: &Path) -> String {
    path.components()
        .rev()
        .find_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .unwrap_or_else(|| "root".to_string())
}
