//! Source file management for diagnostics.
//!
//! The [`SourceMap`] holds every piece of text the compiler has seen: the
//! primary shader source, each resolved include, and the preprocessed text
//! that the parser actually consumes. Spans reference sources by id so
//! diagnostics can be rendered with file/line/column context.

use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;

/// Unique identifier for a source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SourceId(pub u32);

impl std::fmt::Display for SourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "source#{}", self.0)
    }
}

/// A source file with its content and metadata.
#[derive(Debug, Clone)]
pub struct Source {
    /// Unique ID for this source.
    pub id: SourceId,
    /// Optional file path (None for inline or derived sources).
    pub path: Option<PathBuf>,
    /// Display label for derived sources, e.g. `<preprocessed>`.
    pub label: Option<String>,
    /// The source text.
    pub content: String,
}

impl Source {
    /// Get a display name for this source.
    pub fn name(&self) -> String {
        if let Some(ref path) = self.path {
            return path.display().to_string();
        }
        if let Some(ref label) = self.label {
            return label.clone();
        }
        format!("<source#{}>", self.id.0)
    }

    /// Get line and column (1-based) for a byte offset.
    pub fn line_col(&self, offset: usize) -> (usize, usize) {
        let mut line = 1;
        let mut col = 1;
        for (i, ch) in self.content.char_indices() {
            if i >= offset {
                break;
            }
            if ch == '\n' {
                line += 1;
                col = 1;
            } else {
                col += 1;
            }
        }
        (line, col)
    }

    /// Get a snippet of source code around a line.
    pub fn snippet(&self, line: usize, context: usize) -> String {
        let lines: Vec<&str> = self.content.lines().collect();
        let start = line.saturating_sub(context + 1);
        let end = (line + context).min(lines.len());

        lines[start..end]
            .iter()
            .enumerate()
            .map(|(i, l)| format!("{:4} | {}", start + i + 1, l))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Manages a collection of source files.
#[derive(Debug, Default, Clone)]
pub struct SourceMap {
    sources: HashMap<SourceId, Source>,
    path_to_id: HashMap<PathBuf, SourceId>,
    next_id: u32,
}

impl SourceMap {
    /// Create a new empty source map.
    pub fn new() -> Self {
        Self::default()
    }

    fn fresh_id(&mut self) -> SourceId {
        let id = SourceId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Add a source file with a path.
    pub fn add_file(&mut self, path: impl Into<PathBuf>, content: impl Into<String>) -> SourceId {
        let path = path.into();
        if let Some(&id) = self.path_to_id.get(&path) {
            return id;
        }

        let id = self.fresh_id();
        self.path_to_id.insert(path.clone(), id);
        self.sources.insert(
            id,
            Source {
                id,
                path: Some(path),
                label: None,
                content: content.into(),
            },
        );
        id
    }

    /// Add an inline source (no path).
    pub fn add_inline(&mut self, content: impl Into<String>) -> SourceId {
        let id = self.fresh_id();
        self.sources.insert(
            id,
            Source {
                id,
                path: None,
                label: None,
                content: content.into(),
            },
        );
        id
    }

    /// Add a derived source such as preprocessed output, with a display label.
    pub fn add_derived(&mut self, label: impl Into<String>, content: impl Into<String>) -> SourceId {
        let id = self.fresh_id();
        self.sources.insert(
            id,
            Source {
                id,
                path: None,
                label: Some(label.into()),
                content: content.into(),
            },
        );
        id
    }

    /// Get a source by ID.
    pub fn get(&self, id: SourceId) -> Option<&Source> {
        self.sources.get(&id)
    }
}

/// A location in source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Span {
    /// Source file ID.
    pub source: SourceId,
    /// Start byte offset.
    pub start: usize,
    /// End byte offset.
    pub end: usize,
}

impl Span {
    /// Create a new span.
    pub fn new(source: SourceId, start: usize, end: usize) -> Self {
        Self { source, start, end }
    }

    /// Create a zero-length span at a position.
    pub fn point(source: SourceId, offset: usize) -> Self {
        Self::new(source, offset, offset)
    }

    /// Merge two spans (smallest start to largest end).
    pub fn merge(self, other: Self) -> Self {
        debug_assert_eq!(self.source, other.source);
        Self {
            source: self.source,
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

impl Default for Span {
    fn default() -> Self {
        Self {
            source: SourceId(0),
            start: 0,
            end: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_col() {
        let mut map = SourceMap::new();
        let id = map.add_inline("void main()\n{\n}\n");
        let src = map.get(id).unwrap();
        assert_eq!(src.line_col(0), (1, 1));
        assert_eq!(src.line_col(12), (2, 1));
        assert_eq!(src.line_col(14), (3, 1));
    }

    #[test]
    fn test_add_file_dedup() {
        let mut map = SourceMap::new();
        let a = map.add_file("/tmp/a.vert", "void main(){}");
        let b = map.add_file("/tmp/a.vert", "void main(){}");
        assert_eq!(a, b);
    }

    #[test]
    fn test_derived_name() {
        let mut map = SourceMap::new();
        let id = map.add_derived("<preprocessed>", "void main(){}");
        assert_eq!(map.get(id).unwrap().name(), "<preprocessed>");
    }
}
