//! Address import
//!
//! Pulls email addresses out of arbitrary text files (exported contact lists,
//! CSV dumps) and appends them to the queue as `PENDING` records.

use crate::{BulkMailError, Result};
use lazy_static::lazy_static;
use queuefile::{ImportSummary, Queue};
use regex::Regex;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

lazy_static! {
    static ref EMAIL_PATTERN: Regex =
        Regex::new(r"[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}").expect("valid regex");
}

/// File patterns offered when no import file is given
const CANDIDATE_PATTERNS: &[&str] = &["*.txt", "*.csv"];

/// All addresses in `text`, first occurrence order, without duplicates
pub fn extract_addresses(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    EMAIL_PATTERN
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .filter(|address| seen.insert(address.clone()))
        .collect()
}

/// Import every address found in `source` into `queue`
pub fn import_file(queue: &Queue, source: &Path) -> Result<ImportSummary> {
    if same_file(source, queue.path()) {
        return Err(BulkMailError::Config(format!(
            "Refusing to import the queue file into itself: {}",
            source.display()
        )));
    }

    let text = fs::read_to_string(source).map_err(|e| {
        BulkMailError::Config(format!("Cannot read {}: {}", source.display(), e))
    })?;
    let addresses = extract_addresses(&text);
    tracing::debug!(
        source = %source.display(),
        count = addresses.len(),
        "Extracted addresses"
    );

    Ok(queue.import_addresses(&addresses)?)
}

/// `*.txt` and `*.csv` files in `dir`, excluding the queue file itself
pub fn candidate_files(dir: &Path, queue_path: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    for pattern in CANDIDATE_PATTERNS {
        let pattern = dir.join(pattern);
        let pattern = pattern.to_string_lossy();
        let entries = glob::glob(&pattern)
            .map_err(|e| BulkMailError::Other(format!("Invalid glob pattern: {}", e)))?;

        for path in entries.flatten() {
            if path.is_file() && !same_file(&path, queue_path) {
                files.push(path);
            }
        }
    }

    files.sort();
    Ok(files)
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_extract_addresses() {
        let text = "name,email\nAda,ada@example.com\nBob, <bob.smith+news@mail.example.org>;\n\
                    dup ada@example.com, broken@nowhere, x@y.c";
        assert_eq!(
            extract_addresses(text),
            vec!["ada@example.com", "bob.smith+news@mail.example.org"]
        );
    }

    #[test]
    fn test_extract_addresses_empty() {
        assert!(extract_addresses("no addresses here").is_empty());
    }

    #[test]
    fn test_import_file_skips_known() {
        let dir = TempDir::new().unwrap();
        let queue_path = dir.path().join("data.txt");
        fs::write(&queue_path, "2024-05-01T09:00:00Z ; DONE ; ada@example.com\n").unwrap();
        let source = dir.path().join("contacts.csv");
        fs::write(&source, "ada@example.com\nbob@example.com\ncarol@example.com\n").unwrap();

        let queue = Queue::new(&queue_path);
        let summary = import_file(&queue, &source).unwrap();

        assert_eq!(summary.found, 3);
        assert_eq!(summary.added, 2);
        assert_eq!(summary.skipped, 1);
        assert_eq!(queue.stats().unwrap().pending, 2);
    }

    #[test]
    fn test_import_file_rejects_queue_file() {
        let dir = TempDir::new().unwrap();
        let queue_path = dir.path().join("data.txt");
        fs::write(&queue_path, "").unwrap();

        let queue = Queue::new(&queue_path);
        assert!(import_file(&queue, &queue_path).is_err());
    }

    #[test]
    fn test_import_missing_file() {
        let dir = TempDir::new().unwrap();
        let queue = Queue::new(dir.path().join("data.txt"));
        assert!(import_file(&queue, &dir.path().join("missing.csv")).is_err());
    }

    #[test]
    fn test_candidate_files_excludes_queue() {
        let dir = TempDir::new().unwrap();
        for name in ["data.txt", "list.txt", "export.csv", "notes.md"] {
            fs::write(dir.path().join(name), "").unwrap();
        }

        let files = candidate_files(dir.path(), &dir.path().join("data.txt")).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();

        assert_eq!(names, vec!["export.csv", "list.txt"]);
    }
}
