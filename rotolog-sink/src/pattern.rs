//! Archive filename patterns.
//!
//! A pattern is an ordinary path string with at most one `%d` (date) token
//! and at most one `%i` (index) token; `%%` escapes a literal percent sign.
//! `%d` is substituted with a timestamp rendered through a chrono format
//! string, `%i` with a numeric archive rank.
//!
//! Compiled once, rendered many times — the rotation path never re-parses.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};

use crate::error::SinkError;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Date,
    Index,
}

/// A compiled archive-name pattern.
#[derive(Debug, Clone)]
pub struct FilePattern {
    raw: String,
    date_format: String,
    segments: Vec<Segment>,
}

impl FilePattern {
    /// Compile `pattern`, using `date_format` (chrono strftime syntax) for
    /// the `%d` token.
    ///
    /// # Errors
    /// [`SinkError::InvalidPattern`] if a token repeats or an unknown
    /// `%`-token appears.
    pub fn compile(pattern: &str, date_format: &str) -> Result<Self, SinkError> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = pattern.chars();

        while let Some(c) = chars.next() {
            if c != '%' {
                literal.push(c);
                continue;
            }
            match chars.next() {
                Some('%') => literal.push('%'),
                Some('d') => {
                    if segments.contains(&Segment::Date) {
                        return Err(invalid(pattern, "more than one %d token"));
                    }
                    flush(&mut segments, &mut literal);
                    segments.push(Segment::Date);
                }
                Some('i') => {
                    if segments.contains(&Segment::Index) {
                        return Err(invalid(pattern, "more than one %i token"));
                    }
                    flush(&mut segments, &mut literal);
                    segments.push(Segment::Index);
                }
                Some(other) => {
                    return Err(invalid(pattern, &format!("unknown token %{other}")));
                }
                None => return Err(invalid(pattern, "trailing bare %")),
            }
        }
        flush(&mut segments, &mut literal);

        Ok(Self {
            raw: pattern.to_string(),
            date_format: date_format.to_string(),
            segments,
        })
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn date_format(&self) -> &str {
        &self.date_format
    }

    pub fn has_date(&self) -> bool {
        self.segments.contains(&Segment::Date)
    }

    pub fn has_index(&self) -> bool {
        self.segments.contains(&Segment::Index)
    }

    /// Substitute the date token with `timestamp` rendered via the pattern's
    /// date format.
    ///
    /// # Errors
    /// [`SinkError::InvalidPattern`] if the pattern has no `%d` token.
    pub fn render(&self, timestamp: &DateTime<Local>) -> Result<PathBuf, SinkError> {
        if !self.has_date() {
            return Err(invalid(&self.raw, "pattern has no %d token"));
        }
        let stamp = timestamp.format(&self.date_format).to_string();
        Ok(self.render_segments(&stamp, ""))
    }

    /// Substitute the index token with `rank`.
    ///
    /// # Errors
    /// [`SinkError::InvalidPattern`] if the pattern has no `%i` token.
    pub fn render_indexed(&self, rank: usize) -> Result<PathBuf, SinkError> {
        if !self.has_index() {
            return Err(invalid(&self.raw, "pattern has no %i token"));
        }
        Ok(self.render_segments("", &rank.to_string()))
    }

    fn render_segments(&self, stamp: &str, rank: &str) -> PathBuf {
        let mut out = String::with_capacity(self.raw.len() + stamp.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Date => out.push_str(stamp),
                Segment::Index => out.push_str(rank),
            }
        }
        PathBuf::from(out)
    }

    /// Directory the rendered archives land in.
    pub fn directory(&self) -> PathBuf {
        Path::new(&self.raw)
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// If `file_name` matches this pattern's final path component, return the
    /// text that sits in the `%d` position.
    ///
    /// Matching is purely literal-prefix/suffix around the date token; a name
    /// whose embedded text later fails timestamp parsing is the pruner's
    /// problem, not ours.
    pub fn extract_date_token<'a>(&self, file_name: &'a str) -> Option<&'a str> {
        let (prefix, suffix) = self.file_name_affixes()?;
        let rest = file_name.strip_prefix(prefix.as_str())?;
        let stamp = rest.strip_suffix(suffix.as_str())?;
        if stamp.is_empty() {
            return None;
        }
        Some(stamp)
    }

    /// Literal text before and after `%d` within the pattern's file name
    /// component. `None` if the pattern has no date token or the token sits
    /// outside the final component.
    fn file_name_affixes(&self) -> Option<(String, String)> {
        if !self.has_date() {
            return None;
        }
        let mut prefix = String::new();
        let mut suffix = String::new();
        let mut seen_date = false;
        for segment in &self.segments {
            match segment {
                Segment::Date => seen_date = true,
                Segment::Index => return None,
                Segment::Literal(text) => {
                    if seen_date {
                        suffix.push_str(text);
                    } else {
                        prefix.push_str(text);
                    }
                }
            }
        }
        // Only the file-name component participates in matching.
        if let Some(idx) = prefix.rfind('/') {
            prefix = prefix[idx + 1..].to_string();
        }
        if suffix.contains('/') {
            return None;
        }
        Some((prefix, suffix))
    }
}

fn flush(segments: &mut Vec<Segment>, literal: &mut String) {
    if !literal.is_empty() {
        segments.push(Segment::Literal(std::mem::take(literal)));
    }
}

fn invalid(pattern: &str, reason: &str) -> SinkError {
    SinkError::InvalidPattern {
        pattern: pattern.to_string(),
        reason: reason.to_string(),
    }
}
