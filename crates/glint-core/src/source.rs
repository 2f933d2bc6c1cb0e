//! Source file registry and compact source locations.
//!
//! Files are interned by absolute path; adding the same file twice returns
//! the existing entry. A [`Location`] is a compact range inside one file
//! and is decoded to line/column information only on demand.

use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Unique identifier for a registered source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct FileId(pub u16);

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "file#{}", self.0)
    }
}

/// A source range in a file.
///
/// `len == 0` marks an invalid location; diagnostics anchored to one are
/// printed without source context but keep their message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Location {
    pub pos: u32,
    pub len: u16,
    pub file_id: u16,
}

/// A decoded source location.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocInfo {
    pub line: usize,
    pub col: usize,
    /// Byte offset of the start of the line containing `pos`.
    pub line_start: usize,
    /// Byte offset one past the last character of that line.
    pub line_end: usize,
}

impl Location {
    pub fn new(pos: u32, len: u16, file_id: u16) -> Self {
        Self { pos, len, file_id }
    }

    /// Create a new location that spans two locations.
    ///
    /// Invalid if the operands are in different files or themselves invalid.
    pub fn spanning(a: Location, b: Location) -> Self {
        if a.file_id != b.file_id || !a.is_valid() || !b.is_valid() {
            return Location::default();
        }
        let pos = a.pos.min(b.pos);
        let end = (a.pos + u32::from(a.len)).max(b.pos + u32::from(b.len));
        Self {
            pos,
            len: (end - pos) as u16,
            file_id: a.file_id,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.len != 0
    }

    /// Whether this location can be decoded against the registry.
    pub fn seekable(&self, files: &Files) -> bool {
        if !self.is_valid() {
            return false;
        }
        match files.get(FileId(self.file_id)) {
            Some(file) => (self.pos as usize + self.len as usize) <= file.contents.len(),
            None => false,
        }
    }

    /// Decode to line/column plus the enclosing line's bounds.
    ///
    /// Scans backward to the previous newline for the line start and
    /// forward to the next for the line end.
    pub fn seek(&self, files: &Files) -> Option<LocInfo> {
        if !self.seekable(files) {
            return None;
        }
        let file = files.get(FileId(self.file_id))?;
        let bytes = file.contents.as_bytes();
        let pos = self.pos as usize;

        let line_start = bytes[..pos]
            .iter()
            .rposition(|&b| b == b'\n')
            .map(|i| i + 1)
            .unwrap_or(0);
        let line_end = bytes[pos..]
            .iter()
            .position(|&b| b == b'\n')
            .map(|i| pos + i)
            .unwrap_or(bytes.len());

        let line = bytes[..pos].iter().filter(|&&b| b == b'\n').count() + 1;
        let col = pos - line_start + 1;

        Some(LocInfo {
            line,
            col,
            line_start,
            line_end,
        })
    }

    /// Decode only the line and column.
    pub fn seek_line_column(&self, files: &Files) -> Option<(usize, usize)> {
        self.seek(files).map(|info| (info.line, info.col))
    }
}

/// A registered source file: an immutable byte buffer and its path.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub id: FileId,
    pub path: PathBuf,
    pub contents: String,
}

impl SourceFile {
    /// Short display name (the file name component, if any).
    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

/// The file registry owned by a [`Context`](crate::context::Context).
#[derive(Debug, Default)]
pub struct Files {
    files: Vec<SourceFile>,
    by_path: HashMap<PathBuf, FileId>,
}

impl Files {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a file, de-duplicating by absolute path.
    ///
    /// Adding a path twice returns the existing entry's id.
    pub fn add(&mut self, path: impl AsRef<Path>, contents: impl Into<String>) -> FileId {
        let path = path.as_ref();
        let abs = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        if let Some(&id) = self.by_path.get(&abs) {
            return id;
        }
        let id = FileId(self.files.len() as u16);
        self.by_path.insert(abs.clone(), id);
        self.files.push(SourceFile {
            id,
            path: abs,
            contents: contents.into(),
        });
        id
    }

    pub fn get(&self, id: FileId) -> Option<&SourceFile> {
        self.files.get(id.0 as usize)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SourceFile> {
        self.files.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_files_dedupe_by_path() {
        let mut files = Files::new();
        let a = files.add("/nonexistent/foo.g", "abc");
        let b = files.add("/nonexistent/foo.g", "ignored");
        assert_eq!(a, b);
        assert_eq!(files.len(), 1);
        assert_eq!(files.get(a).unwrap().contents, "abc");
    }

    #[test]
    fn test_location_seek() {
        let mut files = Files::new();
        let id = files.add("/nonexistent/x.g", "one\ntwo three\nfour\n");

        // "three" starts at offset 8.
        let loc = Location::new(8, 5, id.0);
        let info = loc.seek(&files).unwrap();
        assert_eq!(info.line, 2);
        assert_eq!(info.col, 5);
        assert_eq!(info.line_start, 4);
        assert_eq!(info.line_end, 13);
    }

    #[test]
    fn test_invalid_location() {
        let files = Files::new();
        let loc = Location::default();
        assert!(!loc.is_valid());
        assert!(!loc.seekable(&files));
        assert_eq!(loc.seek(&files), None);
    }

    #[test]
    fn test_spanning() {
        let a = Location::new(4, 3, 0);
        let b = Location::new(10, 2, 0);
        let s = Location::spanning(a, b);
        assert_eq!(s.pos, 4);
        assert_eq!(s.len, 8);

        let cross_file = Location::spanning(a, Location::new(0, 1, 1));
        assert!(!cross_file.is_valid());
    }
}
