//! Architectural Enforcement Integration Tests
//!
//! Source-level checks over the production code of the workspace:
//! - No blocking sleeps; the runtime must never be parked
//! - Timer-driven waits only where a delay is part of the protocol
//! - No panicking shortcuts outside test modules
//!
//! Only the part of each file before its `#[cfg(test)]` module is scanned.

use std::fs;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

/// Crates whose `src/` trees are production code
pub const PRODUCTION_ROOTS: &[&str] = &["relay/core/src", "relay/cli/src"];

/// A rule hit in a production file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// Path relative to the workspace root
    pub file: PathBuf,
    /// 1-based line number
    pub line: usize,
    /// The offending line, trimmed
    pub text: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}: {}", self.file.display(), self.line, self.text)
    }
}

/// Workspace root, two levels above this crate
#[must_use]
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../..")
        .canonicalize()
        .unwrap_or_else(|_| PathBuf::from(concat!(env!("CARGO_MANIFEST_DIR"), "/../..")))
}

/// Every `.rs` file under the production roots, relative to `root`
#[must_use]
pub fn production_files(root: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = PRODUCTION_ROOTS
        .iter()
        .flat_map(|dir| WalkDir::new(root.join(dir)).into_iter().filter_map(Result::ok))
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "rs"))
        .filter_map(|entry| entry.path().strip_prefix(root).ok().map(Path::to_path_buf))
        .collect();
    files.sort();
    files
}

/// Source before the first `#[cfg(test)]`, line by line
#[must_use]
pub fn production_lines(source: &str) -> Vec<(usize, &str)> {
    source
        .lines()
        .enumerate()
        .take_while(|(_, line)| line.trim() != "#[cfg(test)]")
        .map(|(i, line)| (i + 1, line))
        .filter(|(_, line)| {
            let trimmed = line.trim_start();
            !trimmed.starts_with("//")
        })
        .collect()
}

/// Lines in production files that contain any of `needles`, skipping
/// files in `allowed`
#[must_use]
pub fn find_violations(root: &Path, needles: &[&str], allowed: &[&str]) -> Vec<Violation> {
    let mut violations = Vec::new();

    for file in production_files(root) {
        let relative = file.to_string_lossy().replace('\\', "/");
        if allowed.iter().any(|a| relative == *a) {
            continue;
        }
        let Ok(source) = fs::read_to_string(root.join(&file)) else {
            continue;
        };
        for (line, text) in production_lines(&source) {
            if needles.iter().any(|needle| text.contains(needle)) {
                violations.push(Violation {
                    file: file.clone(),
                    line,
                    text: text.trim().to_string(),
                });
            }
        }
    }

    violations
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_clean(violations: &[Violation], rule: &str) {
        let listing: Vec<String> = violations.iter().map(ToString::to_string).collect();
        assert!(
            violations.is_empty(),
            "{rule}:\n{}",
            listing.join("\n")
        );
    }

    #[test]
    fn test_production_sources_are_found() {
        let files = production_files(&workspace_root());
        assert!(files
            .iter()
            .any(|f| f.ends_with("relay/core/src/lib.rs")));
        assert!(files.iter().any(|f| f.ends_with("relay/cli/src/main.rs")));
    }

    #[test]
    fn test_no_blocking_sleep() {
        let violations = find_violations(&workspace_root(), &["thread::sleep"], &[]);
        assert_clean(&violations, "blocking sleep in async code");
    }

    #[test]
    fn test_timer_waits_only_where_protocol_needs_them() {
        // Reconnect backoff and the post-join settle delay
        let allowed = [
            "relay/core/src/connection/mod.rs",
            "relay/core/src/client.rs",
        ];
        let violations = find_violations(&workspace_root(), &["time::sleep("], &allowed);
        assert_clean(&violations, "unexpected sleep; use deadlines or notifications");
    }

    #[test]
    fn test_library_does_not_panic_on_errors() {
        let violations = find_violations(
            &workspace_root(),
            &[".unwrap()", ".expect("],
            &["relay/cli/src/main.rs"],
        );
        assert_clean(&violations, "unwrap/expect in library code");
    }

    #[test]
    fn test_production_lines_stop_at_test_module() {
        let source = "fn a() {}\n// x.unwrap()\n#[cfg(test)]\nmod tests { fn b() { x.unwrap(); } }\n";
        let lines = production_lines(source);
        assert_eq!(lines, vec![(1, "fn a() {}")]);
    }
}
