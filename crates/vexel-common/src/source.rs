//! Source file registry with on-demand line/column lookup.

use std::path::{Path, PathBuf};

use rustc_hash::FxHashMap;

use crate::span::{FileId, Span};

/// A registered source file: its normalized path, text, and line index.
#[derive(Debug)]
pub struct SourceFile {
    pub id: FileId,
    pub path: PathBuf,
    pub text: String,
    /// Byte offset of the start of each line. The first entry is always 0.
    line_starts: Vec<u32>,
}

impl SourceFile {
    fn new(id: FileId, path: PathBuf, text: String) -> Self {
        let mut line_starts = vec![0u32];
        for (i, byte) in text.bytes().enumerate() {
            if byte == b'\n' {
                line_starts.push((i + 1) as u32);
            }
        }
        Self { id, path, text, line_starts }
    }

    /// Convert a byte offset to a 1-based (line, column) pair.
    ///
    /// Column is measured in bytes from the start of the line (1-based);
    /// source files are ASCII-7 so bytes and characters coincide.
    pub fn line_col(&self, offset: u32) -> (u32, u32) {
        let line_idx = self.line_starts.partition_point(|&start| start <= offset);
        let line_idx = line_idx.saturating_sub(1);
        let line = (line_idx as u32) + 1;
        let col = offset - self.line_starts[line_idx] + 1;
        (line, col)
    }
}

/// A human-readable source location: file path, 1-based line and column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLoc {
    pub path: PathBuf,
    pub line: u32,
    pub col: u32,
}

impl std::fmt::Display for SourceLoc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.path.display(), self.line, self.col)
    }
}

/// Registry of all source files seen by a compilation.
///
/// Files are registered once by normalized path; registering the same path
/// again returns the existing [`FileId`]. The map owns the text for the
/// lifetime of the compilation so spans stay resolvable through every pass.
#[derive(Debug, Default)]
pub struct SourceMap {
    files: Vec<SourceFile>,
    path_to_id: FxHashMap<PathBuf, FileId>,
}

impl SourceMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a file's text under its normalized path.
    pub fn add(&mut self, path: PathBuf, text: String) -> FileId {
        if let Some(id) = self.path_to_id.get(&path) {
            return *id;
        }
        let id = FileId(self.files.len() as u32);
        self.path_to_id.insert(path.clone(), id);
        self.files.push(SourceFile::new(id, path, text));
        id
    }

    /// Look up a file by normalized path.
    pub fn lookup(&self, path: &Path) -> Option<FileId> {
        self.path_to_id.get(path).copied()
    }

    pub fn get(&self, id: FileId) -> &SourceFile {
        &self.files[id.0 as usize]
    }

    pub fn files(&self) -> impl Iterator<Item = &SourceFile> {
        self.files.iter()
    }

    /// Resolve a span's start offset to a path/line/column location.
    pub fn locate(&self, span: Span) -> SourceLoc {
        let file = self.get(span.file);
        let (line, col) = file.line_col(span.start);
        SourceLoc { path: file.path.clone(), line, col }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_col_lookup() {
        let mut map = SourceMap::new();
        let id = map.add("a.vx".into(), "ab\ncd\n\nef".into());
        let file = map.get(id);
        assert_eq!(file.line_col(0), (1, 1));
        assert_eq!(file.line_col(1), (1, 2));
        assert_eq!(file.line_col(3), (2, 1));
        assert_eq!(file.line_col(6), (3, 1));
        assert_eq!(file.line_col(7), (4, 1));
    }

    #[test]
    fn duplicate_registration_is_idempotent() {
        let mut map = SourceMap::new();
        let a = map.add("x.vx".into(), "1".into());
        let b = map.add("x.vx".into(), "ignored".into());
        assert_eq!(a, b);
        assert_eq!(map.get(a).text, "1");
    }

    #[test]
    fn locate_reports_path() {
        let mut map = SourceMap::new();
        let id = map.add("dir/m.vx".into(), "x\ny".into());
        let loc = map.locate(Span::new(id, 2, 3));
        assert_eq!(loc.line, 2);
        assert_eq!(loc.col, 1);
        assert_eq!(loc.to_string(), "dir/m.vx:2:1");
    }
}
