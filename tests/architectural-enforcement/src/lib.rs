//! Architectural Enforcement
//!
//! Source scanners shared by the enforcement tests in `tests/`:
//! - no blocking sleeps, and async sleeps only for retry backoff
//! - no ambient global mutable state in the gateway crates
//!
//! Scans are line based. Everything from the first `#[cfg(test)]` line of a
//! file onward counts as test code and is skipped.

use std::fs;
use std::path::{Path, PathBuf};

/// Production source directories, relative to the workspace root
pub const PRODUCTION_DIRS: &[&str] = &["gateway/core/src", "gateway/cli/src"];

/// Workspace root (two levels above this crate)
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .ancestors()
        .nth(2)
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Production lines of one source file
#[derive(Debug)]
pub struct SourceFile {
    /// File path
    pub path: PathBuf,
    /// (1-based line number, line) up to the test module
    pub lines: Vec<(usize, String)>,
}

impl SourceFile {
    /// Parse file contents, dropping test code
    pub fn parse(path: PathBuf, content: &str) -> Self {
        let lines = content
            .lines()
            .enumerate()
            .take_while(|(_, line)| line.trim() != "#[cfg(test)]")
            .map(|(idx, line)| (idx + 1, line.to_string()))
            .collect();
        Self { path, lines }
    }

    /// `path:line - text` for a violation report
    pub fn violation(&self, line_number: usize, line: &str) -> String {
        format!("{}:{} - {}", self.path.display(), line_number, line.trim())
    }
}

/// Code part of a line, without a trailing `//` comment
pub fn code_part(line: &str) -> &str {
    line.split("//").next().unwrap_or(line)
}

/// Every `.rs` file under the production directories
pub fn production_sources() -> Vec<SourceFile> {
    let root = workspace_root();
    let mut files = Vec::new();
    for dir in PRODUCTION_DIRS {
        let path = root.join(dir);
        assert!(path.exists(), "missing source directory {}", path.display());
        for entry in walkdir::WalkDir::new(&path)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if entry.path().extension().and_then(|s| s.to_str()) != Some("rs") {
                continue;
            }
            // test-only helper modules
            if entry.file_name() == "test_utils.rs" {
                continue;
            }
            if let Ok(content) = fs::read_to_string(entry.path()) {
                files.push(SourceFile::parse(entry.path().to_path_buf(), &content));
            }
        }
    }
    files
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_stops_at_test_module() {
        let file = SourceFile::parse(
            PathBuf::from("x.rs"),
            "fn a() {}\n\n#[cfg(test)]\nmod tests {\n    fn b() {}\n}\n",
        );
        assert_eq!(file.lines.len(), 2);
        assert_eq!(file.lines[0], (1, "fn a() {}".to_string()));
    }

    #[test]
    fn test_code_part_drops_comments() {
        assert_eq!(code_part("let x = 1; // sleep(1)"), "let x = 1; ");
    }

    #[test]
    fn test_workspace_root_has_gateway() {
        assert!(workspace_root().join("gateway").exists());
    }
}
