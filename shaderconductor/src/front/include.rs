//! Resolution of `#include` directives

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Source text returned by an include handler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncludedSource {
    /// Name used in diagnostics and `#line` markers
    pub name: String,
    pub source: String,
}

/// Loads the text of included files.
///
/// `includer` is the name of the file containing the directive, so handlers
/// can resolve relative paths.
pub trait IncludeHandler: Send + Sync {
    fn load(&self, name: &str, includer: &str) -> Option<IncludedSource>;
}

/// Reads includes from disk, first relative to the including file, then
/// from each search directory in order.
#[derive(Debug, Clone, Default)]
pub struct FileSystemInclude {
    search_dirs: Vec<PathBuf>,
}

impl FileSystemInclude {
    pub fn new() -> Self {
        FileSystemInclude::default()
    }

    pub fn with_search_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.search_dirs.push(dir.into());
        self
    }

    fn candidates(&self, name: &str, includer: &str) -> Vec<PathBuf> {
        let mut paths = Vec::new();
        let requested = Path::new(name);
        if requested.is_absolute() {
            paths.push(requested.to_path_buf());
            return paths;
        }
        match Path::new(includer).parent() {
            Some(dir) => paths.push(dir.join(requested)),
            None => paths.push(requested.to_path_buf()),
        }
        paths.extend(self.search_dirs.iter().map(|dir| dir.join(requested)));
        paths
    }
}

impl IncludeHandler for FileSystemInclude {
    fn load(&self, name: &str, includer: &str) -> Option<IncludedSource> {
        self.candidates(name, includer).into_iter().find_map(|path| {
            let source = std::fs::read_to_string(&path).ok()?;
            debug_log!("include {} resolved to {}", name, path.display());
            Some(IncludedSource {
                name: path.to_string_lossy().into_owned(),
                source,
            })
        })
    }
}

/// Serves includes from an in-memory map keyed by the name in the directive.
#[derive(Clone, Default)]
pub struct MemoryInclude {
    files: HashMap<String, String>,
}

impl MemoryInclude {
    pub fn new() -> Self {
        MemoryInclude::default()
    }

    pub fn with_file(mut self, name: &str, source: &str) -> Self {
        self.insert(name, source);
        self
    }

    pub fn insert(&mut self, name: &str, source: &str) {
        self.files.insert(name.to_string(), source.to_string());
    }
}

impl fmt::Debug for MemoryInclude {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.files.keys().collect();
        names.sort();
        f.debug_struct("MemoryInclude").field("files", &names).finish()
    }
}

impl IncludeHandler for MemoryInclude {
    fn load(&self, name: &str, _includer: &str) -> Option<IncludedSource> {
        self.files.get(name).map(|source| IncludedSource {
            name: name.to_string(),
            source: source.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_include_lookup() {
        let handler = MemoryInclude::new().with_file("common.hlsli", "#define X 1");
        let loaded = handler.load("common.hlsli", "shader.hlsl").unwrap();
        assert_eq!(loaded.source, "#define X 1");
        assert!(handler.load("missing.hlsli", "shader.hlsl").is_none());
    }

    #[test]
    fn test_file_system_candidates_start_next_to_includer() {
        let handler = FileSystemInclude::new().with_search_dir("/opt/include");
        let paths = handler.candidates("a.hlsli", "shaders/main.hlsl");
        assert_eq!(
            paths,
            vec![
                PathBuf::from("shaders/a.hlsli"),
                PathBuf::from("/opt/include/a.hlsli")
            ]
        );
    }
}
