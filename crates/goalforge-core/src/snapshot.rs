//! Known-path bookkeeping for one project's file tree.

use crate::edits::normalize_repo_path;
use std::collections::BTreeSet;

/// How an edit path maps onto the known file set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathResolution {
    /// The path is known verbatim.
    Exact(String),
    /// The path matched the tail of exactly one known path.
    Suffix(String),
    /// The path matched the tail of several known paths.
    Ambiguous(Vec<String>),
    /// Nothing known matches; the path is used as written.
    Unknown(String),
    /// The path was blank or escaped the repository.
    Empty,
}

impl PathResolution {
    /// The concrete target path, if the resolution produced one.
    pub fn target(&self) -> Option<&str> {
        match self {
            PathResolution::Exact(path)
            | PathResolution::Suffix(path)
            | PathResolution::Unknown(path) => Some(path),
            PathResolution::Ambiguous(_) | PathResolution::Empty => None,
        }
    }
}

/// Flattened view of a project's file tree, updated as edits land.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectSnapshot {
    paths: BTreeSet<String>,
    dirs: BTreeSet<String>,
}

impl ProjectSnapshot {
    pub fn from_paths<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut snapshot = Self::default();
        for path in paths {
            snapshot.record_write(path.as_ref());
        }
        snapshot
    }

    pub fn with_dirs<I, S>(mut self, dirs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for dir in dirs {
            let dir = normalize_repo_path(dir.as_ref());
            if !dir.is_empty() {
                self.dirs.insert(dir);
            }
        }
        self
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.paths.iter().map(String::as_str)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.paths.contains(path)
    }

    pub fn contains_dir(&self, dir: &str) -> bool {
        self.dirs.contains(dir)
    }

    /// Record a created or updated file along with its ancestor directories.
    pub fn record_write(&mut self, path: &str) {
        let path = normalize_repo_path(path);
        if path.is_empty() {
            return;
        }
        let mut end = 0usize;
        while let Some(rel) = path[end..].find('/') {
            end += rel;
            self.dirs.insert(path[..end].to_string());
            end += 1;
        }
        self.paths.insert(path);
    }

    /// Forget a deleted file, or everything below a deleted directory.
    pub fn record_delete(&mut self, path: &str) {
        let path = normalize_repo_path(path);
        if path.is_empty() {
            return;
        }
        let prefix = format!("{}/", path);
        self.paths
            .retain(|known| known != &path && !known.starts_with(&prefix));
        self.dirs
            .retain(|known| known != &path && !known.starts_with(&prefix));
    }

    pub fn resolve(&self, raw: &str) -> PathResolution {
        let path = normalize_repo_path(raw);
        if path.is_empty() {
            return PathResolution::Empty;
        }
        if self.paths.contains(&path) {
            return PathResolution::Exact(path);
        }
        let tail = format!("/{}", path);
        let mut matches: Vec<String> = self
            .paths
            .iter()
            .filter(|known| known.ends_with(&tail))
            .cloned()
            .collect();
        match matches.len() {
            0 => PathResolution::Unknown(path),
            1 => PathResolution::Suffix(matches.remove(0)),
            _ => PathResolution::Ambiguous(matches),
        }
    }

    /// Known paths that look like what the caller meant: same file name first, then same stem.
    pub fn suggest(&self, raw: &str, limit: usize) -> Vec<String> {
        let path = normalize_repo_path(raw);
        let file_name = path.rsplit('/').next().unwrap_or_default();
        if file_name.is_empty() || limit == 0 {
            return Vec::new();
        }
        let stem = file_stem(file_name).to_ascii_lowercase();

        let mut suggestions: Vec<String> = self
            .paths
            .iter()
            .filter(|known| known.rsplit('/').next() == Some(file_name))
            .take(limit)
            .cloned()
            .collect();
        if suggestions.len() < limit && stem.len() >= 3 {
            for known in &self.paths {
                if suggestions.len() >= limit {
                    break;
                }
                let known_name = known.rsplit('/').next().unwrap_or_default();
                let same_stem = file_stem(known_name).to_ascii_lowercase() == stem;
                if same_stem && !suggestions.contains(known) {
                    suggestions.push(known.clone());
                }
            }
        }
        suggestions
    }
}

fn file_stem(name: &str) -> &str {
    name.split('.').next().unwrap_or(name)
}
