//! Parses a concatenated, boundary-delimited content dump into a
//! path → (start_line, end_line) table, persists it as a plain-text
//! sidecar file, and resolves file content back out of the dump in O(1)
//! lookup + O(file size) I/O.

use std::fs;
use std::path::Path;

use crate::error::{IndexError, Result};

/// The repeating section boundary is exactly 48 `=` characters.
pub const BOUNDARY_LEN: usize = 48;

fn is_boundary(line: &str) -> bool {
    line.len() == BOUNDARY_LEN && line.bytes().all(|b| b == b'=')
}

fn parse_file_header(line: &str) -> Option<&str> {
    line.strip_prefix("FILE: ")
}

/// One entry in the content index: 1-based, inclusive line range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineRange {
    pub start_line: usize,
    pub end_line: usize,
}

/// The parsed table of `path -> LineRange`, in first-seen order for
/// persistence but looked up by path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentIndex {
    entries: Vec<(String, LineRange)>,
}

impl ContentIndex {
    /// Scan `content` line-by-line and build the index. The last file's
    /// range extends to EOF.
    pub fn build(content: &str) -> Self {
        let mut raw_lines: Vec<&str> = content.split('\n').collect();
        // A trailing newline produces a final empty element that is not
        // really a line in the document.
        if content.ends_with('\n') {
            raw_lines.pop();
        }
        let total_lines = raw_lines.len();

        let mut entries = Vec::new();
        let mut current: Option<(String, usize)> = None;

        for (i, line) in raw_lines.iter().enumerate() {
            let line_no = i + 1;
            if let Some(path) = parse_file_header(line) {
                let header_line = line_no;
                if let Some((prev_path, prev_start)) = current.take() {
                    let end_line = header_line.saturating_sub(2);
                    entries.push((prev_path, LineRange { start_line: prev_start, end_line }));
                }
                current = Some((path.to_string(), header_line + 2));
            }
        }

        if let Some((path, start_line)) = current {
            entries.push((path, LineRange { start_line, end_line: total_lines }));
        }

        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(p, _)| p.as_str())
    }

    fn get_exact(&self, path: &str) -> Option<LineRange> {
        self.entries.iter().find(|(p, _)| p == path).map(|(_, r)| *r)
    }

    /// Case-sensitive, POSIX-separator path resolution with fallbacks:
    /// strip a leading `./`, then try the exact path, a `/`-prefixed
    /// variant, a `/`-stripped variant, and finally a trailing-basename
    /// match.
    pub fn resolve(&self, path: &str) -> Option<(&str, LineRange)> {
        let normalized = path.strip_prefix("./").unwrap_or(path);

        if let Some(range) = self.get_exact(normalized) {
            return self.entries.iter().find(|(p, _)| p == normalized).map(|(p, _)| (p.as_str(), range));
        }

        let prefixed = format!("/{normalized}");
        if let Some((p, _)) = self.entries.iter().find(|(p, _)| p == &prefixed) {
            return Some((p.as_str(), self.get_exact(p).unwrap()));
        }

        if let Some(stripped) = normalized.strip_prefix('/') {
            if let Some((p, _)) = self.entries.iter().find(|(p, _)| p == stripped) {
                return Some((p.as_str(), self.get_exact(p).unwrap()));
            }
        }

        let basename = normalized.rsplit('/').next().unwrap_or(normalized);
        self.entries
            .iter()
            .find(|(p, _)| p.rsplit('/').next() == Some(basename))
            .map(|(p, r)| (p.as_str(), *r))
    }

    /// Persist as a UTF-8 text table: a comment header followed by
    /// `path:start_line:end_line` rows.
    pub fn to_text(&self) -> String {
        let mut out = String::from("# repocache content index\n");
        for (path, range) in &self.entries {
            out.push_str(&format!("{path}:{}:{}\n", range.start_line, range.end_line));
        }
        out
    }

    /// Parse the persisted text format. Paths may contain `:`, so each
    /// line is split on its **last** two colons.
    pub fn from_text(text: &str) -> Result<Self> {
        let mut entries = Vec::new();
        for (i, line) in text.lines().enumerate() {
            if line.starts_with('#') || line.trim().is_empty() {
                continue;
            }
            let last_colon = line.rfind(':').ok_or_else(|| IndexError::MalformedLine {
                line_no: i + 1,
                line: line.to_string(),
            })?;
            let (rest, end_str) = line.split_at(last_colon);
            let end_str = &end_str[1..];
            let second_colon = rest.rfind(':').ok_or_else(|| IndexError::MalformedLine {
                line_no: i + 1,
                line: line.to_string(),
            })?;
            let (path, start_str) = rest.split_at(second_colon);
            let start_str = &start_str[1..];

            let start_line: usize = start_str.parse().map_err(|_| IndexError::MalformedLine {
                line_no: i + 1,
                line: line.to_string(),
            })?;
            let end_line: usize = end_str.parse().map_err(|_| IndexError::MalformedLine {
                line_no: i + 1,
                line: line.to_string(),
            })?;

            entries.push((path.to_string(), LineRange { start_line, end_line }));
        }
        Ok(Self { entries })
    }

    pub fn write_to(&self, index_path: &Path) -> Result<()> {
        fs::write(index_path, self.to_text()).map_err(|source| IndexError::Io {
            path: index_path.to_path_buf(),
            source,
        })
    }

    pub fn read_from(index_path: &Path) -> Result<Self> {
        let text = fs::read_to_string(index_path).map_err(|source| IndexError::Io {
            path: index_path.to_path_buf(),
            source,
        })?;
        Self::from_text(&text)
    }
}

/// True iff `index_path` exists, is at least as new as `content_path`, and
/// parses successfully. A stale or corrupt index should be rebuilt, not
/// patched.
pub fn is_valid(index_path: &Path, content_path: &Path) -> bool {
    let index_mtime = fs::metadata(index_path).and_then(|m| m.modified());
    let content_mtime = fs::metadata(content_path).and_then(|m| m.modified());
    let (Ok(index_mtime), Ok(content_mtime)) = (index_mtime, content_mtime) else {
        return false;
    };
    if index_mtime < content_mtime {
        return false;
    }
    ContentIndex::read_from(index_path).is_ok()
}

fn strip_boundary_and_header_lines(mut lines: Vec<&str>) -> Vec<&str> {
    loop {
        let trimmed_front = match lines.first() {
            Some(l) if is_boundary(l) || parse_file_header(l).is_some() => true,
            _ => false,
        };
        let trimmed_back = match lines.last() {
            Some(l) if is_boundary(l) || parse_file_header(l).is_some() => true,
            _ => false,
        };
        if trimmed_front {
            lines.remove(0);
        }
        if trimmed_back && !lines.is_empty() {
            lines.pop();
        }
        if !trimmed_front && !trimmed_back {
            break;
        }
    }
    lines
}

/// Extract `path`'s content out of `content` using the index: skip
/// `start_line - 1` lines, read through `end_line`, defensively re-strip
/// any stray boundary/header lines, and normalize the trailing newline.
pub fn get_content(content: &str, index: &ContentIndex, path: &str) -> Result<String> {
    let (_, range) = index.resolve(path).ok_or_else(|| IndexError::PathNotFound(path.to_string()))?;

    let lines: Vec<&str> = content.split('\n').collect();
    let start_idx = range.start_line.saturating_sub(1);
    let end_idx = range.end_line.min(lines.len());
    if start_idx >= end_idx {
        return Ok(String::new());
    }

    let slice = strip_boundary_and_header_lines(lines[start_idx..end_idx].to_vec());
    let mut extracted = slice.join("\n");
    if !extracted.ends_with('\n') {
        extracted.push('\n');
    }
    Ok(extracted)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_dump() -> String {
        let boundary = "=".repeat(BOUNDARY_LEN);
        format!(
            "{b}\nFILE: src/main.rs\n{b}\nfn main() {{}}\n{b}\nFILE: README.md\n{b}\n# hello\nworld\n",
            b = boundary
        )
    }

    #[test]
    fn build_produces_expected_ranges() {
        let dump = sample_dump();
        let index = ContentIndex::build(&dump);
        assert_eq!(index.len(), 2);

        let (path, range) = index.resolve("src/main.rs").unwrap();
        assert_eq!(path, "src/main.rs");
        assert_eq!(range.start_line, 4);
        assert_eq!(range.end_line, 4);

        let (path, range) = index.resolve("README.md").unwrap();
        assert_eq!(path, "README.md");
        assert_eq!(range.start_line, 8);
        // last file extends to EOF (9 non-empty lines, trailing \n stripped)
        assert_eq!(range.end_line, 9);
    }

    #[test]
    fn get_content_extracts_file_body() {
        let dump = sample_dump();
        let index = ContentIndex::build(&dump);
        let body = get_content(&dump, &index, "src/main.rs").unwrap();
        assert_eq!(body, "fn main() {}\n");
    }

    #[test]
    fn text_round_trips() {
        let dump = sample_dump();
        let index = ContentIndex::build(&dump);
        let text = index.to_text();
        let parsed = ContentIndex::from_text(&text).unwrap();
        assert_eq!(parsed, index);
    }

    #[test]
    fn path_with_colon_round_trips() {
        let text = "# repocache content index\nsrc/weird:name.rs:3:5\n";
        let index = ContentIndex::from_text(text).unwrap();
        let (path, range) = index.resolve("src/weird:name.rs").unwrap();
        assert_eq!(path, "src/weird:name.rs");
        assert_eq!(range, LineRange { start_line: 3, end_line: 5 });
    }

    #[test]
    fn resolve_falls_back_to_basename() {
        let dump = sample_dump();
        let index = ContentIndex::build(&dump);
        let (path, _) = index.resolve("./nested/main.rs").unwrap();
        assert_eq!(path, "src/main.rs");
    }

    #[test]
    fn resolve_strips_dot_slash_prefix() {
        let dump = sample_dump();
        let index = ContentIndex::build(&dump);
        assert!(index.resolve("./src/main.rs").is_some());
    }

    #[test]
    fn is_valid_detects_stale_index() {
        let dir = tempfile::tempdir().unwrap();
        let content_path = dir.path().join("content.txt");
        let index_path = dir.path().join("content.idx");

        fs::write(&content_path, sample_dump()).unwrap();
        let index = ContentIndex::build(&sample_dump());
        index.write_to(&index_path).unwrap();

        assert!(is_valid(&index_path, &content_path));

        // Touch content after the index to make it look stale.
        std::thread::sleep(std::time::Duration::from_millis(10));
        fs::write(&content_path, sample_dump() + "\n# more\n").unwrap();

        assert!(!is_valid(&index_path, &content_path));
    }
}
