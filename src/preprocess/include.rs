//! Pluggable `#include` resolution.
//!
//! Local includes are resolved against an ordered stack of directories:
//! externally registered search paths (most-recently-added checked first)
//! plus, for each active include, the directory of the file containing the
//! directive. The stack is truncated by inclusion depth on every lookup, so
//! leaving an include automatically restores the enclosing search scope.
//!
//! System includes (`#include <name>`) resolve through a separate mechanism
//! that is empty by default: the domain has no standard system headers, so
//! the default answer is "not found", not an error.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// A successfully resolved include.
#[derive(Debug, Clone)]
pub struct ResolvedInclude {
    /// Resolved name of the header (the full path for file-backed resolvers).
    pub name: String,
    /// File bytes exactly as stored, untranscoded.
    pub contents: Vec<u8>,
}

/// Why an include could not be resolved.
#[derive(Debug, thiserror::Error)]
pub enum IncludeError {
    /// The header exists in no searched location. Non-fatal for system
    /// includes until all fallbacks are exhausted.
    #[error("header not found")]
    NotFound,
    /// The header was located but could not be read.
    #[error("error reading include: {0}")]
    Io(#[from] std::io::Error),
}

/// Capability for resolving `#include` directives.
///
/// `depth` is the inclusion depth of the directive: 1 for includes written
/// in the top-level source, 2 for includes inside those headers, and so on.
pub trait IncludeResolver {
    /// Resolve `#include "header"`.
    fn resolve_local(
        &mut self,
        header: &str,
        includer: &str,
        depth: usize,
    ) -> Result<ResolvedInclude, IncludeError>;

    /// Resolve `#include <header>`. No system headers exist by default.
    fn resolve_system(&mut self, _header: &str) -> Result<ResolvedInclude, IncludeError> {
        Err(IncludeError::NotFound)
    }

    /// Discard any per-compile search state, keeping externally registered
    /// directories. Called at the start of every compile.
    fn reset(&mut self) {}
}

/// Directory-stack bookkeeping shared by the concrete resolvers.
///
/// Reproduces the parse-time stack discipline of the reference includer:
/// truncate to `depth + external_count` entries on each lookup, seed the
/// depth-1 slot with the top-level includer's directory, and push the found
/// header's directory for the benefit of nested includes.
#[derive(Debug, Default)]
struct DirectoryStack {
    stack: Vec<PathBuf>,
    external_count: usize,
}

impl DirectoryStack {
    fn push_external(&mut self, dir: PathBuf) {
        self.stack.push(dir);
        self.external_count = self.stack.len();
    }

    fn reset(&mut self) {
        self.stack.truncate(self.external_count);
    }

    /// Truncate to the scope of `depth` and return candidate directories,
    /// most recent first.
    fn prepare(&mut self, includer: &str, depth: usize) -> Vec<PathBuf> {
        self.stack.resize(depth + self.external_count, PathBuf::new());
        if depth == 1 {
            if let Some(slot) = self.stack.last_mut() {
                *slot = directory_of(includer);
            }
        }
        self.stack.iter().rev().cloned().collect()
    }

    /// Record the directory of a found header so its own includes search
    /// there first.
    fn entered(&mut self, resolved: &Path) {
        self.stack.push(directory_of(&resolved.to_string_lossy()));
    }
}

/// Directory portion of a path, or `.` when there is none.
fn directory_of(path: &str) -> PathBuf {
    let p = Path::new(path);
    match p.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Filesystem-backed include resolver.
#[derive(Debug, Default)]
pub struct FileIncludeResolver {
    dirs: DirectoryStack,
}

impl FileIncludeResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an external search directory. Most-recently-added
    /// directories are checked first.
    pub fn push_external_directory(&mut self, dir: impl Into<PathBuf>) {
        self.dirs.push_external(dir.into());
    }
}

impl IncludeResolver for FileIncludeResolver {
    fn resolve_local(
        &mut self,
        header: &str,
        includer: &str,
        depth: usize,
    ) -> Result<ResolvedInclude, IncludeError> {
        for dir in self.dirs.prepare(includer, depth) {
            let candidate = dir.join(header);
            match std::fs::read(&candidate) {
                Ok(contents) => {
                    self.dirs.entered(&candidate);
                    return Ok(ResolvedInclude {
                        name: candidate.to_string_lossy().into_owned(),
                        contents,
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                // A directory with the header's name is not a match.
                Err(_) if candidate.is_dir() => continue,
                Err(e) => return Err(IncludeError::Io(e)),
            }
        }
        Err(IncludeError::NotFound)
    }

    fn reset(&mut self) {
        self.dirs.reset();
    }
}

/// In-memory include resolver, mainly for tests and embedded shader sets.
///
/// Uses the same directory-stack discipline as the filesystem resolver, so
/// nested include scoping behaves identically.
#[derive(Debug, Default)]
pub struct MemoryIncludeResolver {
    files: HashMap<PathBuf, Vec<u8>>,
    system: HashMap<String, Vec<u8>>,
    dirs: DirectoryStack,
}

impl MemoryIncludeResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a virtual file under `path`.
    pub fn add_file(&mut self, path: impl Into<PathBuf>, contents: impl Into<Vec<u8>>) {
        self.files.insert(path.into(), contents.into());
    }

    /// Register a virtual system header, resolvable via `#include <name>`.
    pub fn add_system_header(&mut self, name: impl Into<String>, contents: impl Into<Vec<u8>>) {
        self.system.insert(name.into(), contents.into());
    }

    /// Register a virtual search directory.
    pub fn push_external_directory(&mut self, dir: impl Into<PathBuf>) {
        self.dirs.push_external(dir.into());
    }
}

impl IncludeResolver for MemoryIncludeResolver {
    fn resolve_local(
        &mut self,
        header: &str,
        includer: &str,
        depth: usize,
    ) -> Result<ResolvedInclude, IncludeError> {
        for dir in self.dirs.prepare(includer, depth) {
            let candidate = dir.join(header);
            if let Some(contents) = self.files.get(&candidate) {
                let contents = contents.clone();
                self.dirs.entered(&candidate);
                return Ok(ResolvedInclude {
                    name: candidate.to_string_lossy().into_owned(),
                    contents,
                });
            }
        }
        Err(IncludeError::NotFound)
    }

    fn resolve_system(&mut self, header: &str) -> Result<ResolvedInclude, IncludeError> {
        match self.system.get(header) {
            Some(contents) => Ok(ResolvedInclude {
                name: format!("<{}>", header),
                contents: contents.clone(),
            }),
            None => Err(IncludeError::NotFound),
        }
    }

    fn reset(&mut self) {
        self.dirs.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directory_of() {
        assert_eq!(directory_of("inc/a.glsl"), PathBuf::from("inc"));
        assert_eq!(directory_of("a.glsl"), PathBuf::from("."));
        assert_eq!(directory_of(""), PathBuf::from("."));
    }

    #[test]
    fn test_memory_resolver_external_order() {
        let mut r = MemoryIncludeResolver::new();
        r.add_file("first/common.glsl", b"// first".to_vec());
        r.add_file("second/common.glsl", b"// second".to_vec());
        r.push_external_directory("first");
        r.push_external_directory("second");

        // Most recently added wins.
        let hit = r.resolve_local("common.glsl", "<shader>", 1).unwrap();
        assert_eq!(hit.contents, b"// second");
    }

    #[test]
    fn test_memory_resolver_includer_directory_first() {
        let mut r = MemoryIncludeResolver::new();
        r.add_file("lib/helper.glsl", b"lib".to_vec());
        r.add_file("shaders/helper.glsl", b"local".to_vec());
        r.push_external_directory("lib");

        let hit = r.resolve_local("helper.glsl", "shaders/main.frag", 1).unwrap();
        assert_eq!(hit.contents, b"local");
    }

    #[test]
    fn test_scope_restored_after_nested_include() {
        // a.glsl lives in `deep/`, includes b.glsl from its own directory.
        // After returning to depth 1, `deep/` must no longer be searched.
        let mut r = MemoryIncludeResolver::new();
        r.add_file("deep/a.glsl", b"a".to_vec());
        r.add_file("deep/b.glsl", b"deep-b".to_vec());
        r.add_file("top/b.glsl", b"top-b".to_vec());
        r.push_external_directory("deep");
        r.push_external_directory("top");

        let a = r.resolve_local("a.glsl", "top/main.frag", 1).unwrap();
        assert_eq!(a.contents, b"a");

        // Nested include inside a.glsl sees deep/ first.
        let nested = r.resolve_local("b.glsl", &a.name, 2).unwrap();
        assert_eq!(nested.contents, b"deep-b");

        // Back at depth 1, the same header resolves in top-level scope.
        let top = r.resolve_local("b.glsl", "top/main.frag", 1).unwrap();
        assert_eq!(top.contents, b"top-b");
    }

    #[test]
    fn test_system_header_default_not_found() {
        let mut r = MemoryIncludeResolver::new();
        assert!(matches!(
            r.resolve_system("missing.h"),
            Err(IncludeError::NotFound)
        ));

        r.add_system_header("limits.glsl", b"#define LIMIT 4".to_vec());
        let hit = r.resolve_system("limits.glsl").unwrap();
        assert_eq!(hit.name, "<limits.glsl>");
    }

    #[test]
    fn test_binary_safe_contents() {
        let mut r = MemoryIncludeResolver::new();
        let bytes = vec![0u8, 159, 146, 150, b'\n'];
        r.add_file("bin/raw.glsl", bytes.clone());
        r.push_external_directory("bin");

        let hit = r.resolve_local("raw.glsl", "<shader>", 1).unwrap();
        assert_eq!(hit.contents, bytes);
        assert_eq!(hit.contents.len(), 5);
    }
}
