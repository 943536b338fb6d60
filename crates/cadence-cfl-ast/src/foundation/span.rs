//! Source location tracking for error reporting and diagnostics.
//!
//! # Design
//!
//! - `Span` — compact source location (12 bytes)
//! - `SourceMap` — owns all formula sources and resolves spans to text
//! - `DebugInfo` — host-supplied origin record (content file + line/column)
//!
//! Formula text usually comes out of content files, so a `Span` alone only
//! locates a position *within* one formula. The optional [`DebugInfo`]
//! attached at construction points back to the content file the formula
//! was authored in.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Compact source location reference.
///
/// Points to a byte range in a registered source with a cached line number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    /// Index into `SourceMap` sources
    pub source_id: u16,
    /// Byte offset of start position
    pub start: u32,
    /// Byte offset of end position (exclusive)
    pub end: u32,
    /// Cached 1-based line number of the start position
    pub start_line: u16,
}

impl Span {
    /// Create a new span.
    pub fn new(source_id: u16, start: u32, end: u32, start_line: u16) -> Self {
        Self {
            source_id,
            start,
            end,
            start_line,
        }
    }

    /// Zero-length span at the start of a source.
    pub fn zero(source_id: u16) -> Self {
        Self::new(source_id, 0, 0, 1)
    }

    /// Span covering both inputs.
    ///
    /// # Panics
    ///
    /// Panics if the spans come from different sources.
    pub fn merge(&self, other: &Span) -> Span {
        assert_eq!(
            self.source_id, other.source_id,
            "cannot merge spans from different sources"
        );
        Span {
            source_id: self.source_id,
            start: self.start.min(other.start),
            end: self.end.max(other.end),
            start_line: self.start_line.min(other.start_line),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Host-supplied origin of a formula: which content file it was authored
/// in and where. Used only for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebugInfo {
    pub file: String,
    pub line: u32,
    pub column: u32,
}

impl fmt::Display for DebugInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// A single registered formula source with line indexing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceEntry {
    /// Original formula text
    pub text: String,
    /// Byte offsets of each line start; `line_starts[0]` is always 0
    line_starts: Vec<u32>,
}

impl SourceEntry {
    fn new(text: String) -> Self {
        let mut line_starts = vec![0u32];
        for (i, b) in text.bytes().enumerate() {
            if b == b'\n' {
                line_starts.push(i as u32 + 1);
            }
        }
        Self { text, line_starts }
    }

    /// 1-based (line, column) of a byte offset.
    pub fn line_col(&self, offset: u32) -> (u32, u32) {
        let line = match self.line_starts.binary_search(&offset) {
            Ok(idx) => idx,
            Err(idx) => idx - 1,
        };
        (line as u32 + 1, offset - self.line_starts[line] + 1)
    }
}

/// Collection of formula sources registered during a compilation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceMap {
    sources: Vec<SourceEntry>,
}

impl SourceMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a source, returning its id for spans.
    pub fn add_source(&mut self, text: impl Into<String>) -> u16 {
        let id = self.sources.len() as u16;
        self.sources.push(SourceEntry::new(text.into()));
        id
    }

    pub fn entry(&self, id: u16) -> Option<&SourceEntry> {
        self.sources.get(id as usize)
    }

    /// The source text a span points into, if registered.
    pub fn snippet(&self, span: &Span) -> &str {
        match self.sources.get(span.source_id as usize) {
            Some(entry) => entry
                .text
                .get(span.start as usize..span.end as usize)
                .unwrap_or(""),
            None => "",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_spans() {
        let a = Span::new(0, 4, 9, 1);
        let b = Span::new(0, 12, 20, 2);
        let merged = a.merge(&b);
        assert_eq!(merged.start, 4);
        assert_eq!(merged.end, 20);
        assert_eq!(merged.start_line, 1);
    }

    #[test]
    fn snippet_lookup() {
        let mut map = SourceMap::new();
        let id = map.add_source("where x = 1\nx + 2");
        let span = Span::new(id, 12, 17, 2);
        assert_eq!(map.snippet(&span), "x + 2");
    }

    #[test]
    fn line_col_lookup() {
        let entry = SourceEntry::new("abc\ndef\nghi".to_string());
        assert_eq!(entry.line_col(0), (1, 1));
        assert_eq!(entry.line_col(5), (2, 2));
        assert_eq!(entry.line_col(8), (3, 1));
    }
}
