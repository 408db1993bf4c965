//! Whole-file read/rewrite primitives
//!
//! Every edit reads all lines, changes some in memory and rewrites the file.
//! Only import goes through the append path. There is no locking: a single
//! process is expected to own the queue file.

use crate::{Record, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use tempfile::NamedTempFile;

/// Read every raw line of the queue file, in order
///
/// The file must already exist.
pub fn read_all(path: impl AsRef<Path>) -> Result<Vec<String>> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);

    let mut lines = Vec::new();
    for line in reader.lines() {
        lines.push(line?);
    }
    Ok(lines)
}

/// Replace the file content with `lines`
///
/// Writes to a temporary file next to the target and renames it into place,
/// so readers see either the old or the new content. Permissions of an
/// existing file are carried over.
pub fn write_all(path: impl AsRef<Path>, lines: &[String]) -> Result<()> {
    let path = path.as_ref();
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut tmp = NamedTempFile::new_in(dir)?;
    {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        for line in lines {
            writeln!(writer, "{}", line)?;
        }
        writer.flush()?;
    }

    if let Ok(metadata) = fs::metadata(path) {
        tmp.as_file().set_permissions(metadata.permissions())?;
    }

    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Append lines to the end of the file, creating it if needed
pub fn append_lines(path: impl AsRef<Path>, lines: &[String]) -> Result<()> {
    let path = path.as_ref();

    // Keep the new lines off an unterminated last line
    let needs_newline = match fs::read(path) {
        Ok(content) => content.last().is_some_and(|b| *b != b'\n'),
        Err(_) => false,
    };

    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let mut writer = BufWriter::new(file);
    if needs_newline {
        writeln!(writer)?;
    }
    for line in lines {
        writeln!(writer, "{}", line)?;
    }
    writer.flush()?;
    Ok(())
}

/// Visit every parseable record with its line index
///
/// Malformed lines are skipped silently.
pub fn for_each<F>(path: impl AsRef<Path>, mut visit: F) -> Result<()>
where
    F: FnMut(&Record, usize),
{
    let lines = read_all(path)?;
    for (index, line) in lines.iter().enumerate() {
        if let Ok(record) = Record::parse_line(line) {
            visit(&record, index);
        }
    }
    Ok(())
}

/// Mutate the first record matching `predicate` and rewrite the file
///
/// The file is rewritten even when nothing matched. Returns the mutated
/// record, if any.
pub fn update_matching<P, M>(
    path: impl AsRef<Path>,
    mut predicate: P,
    mutate: M,
) -> Result<Option<Record>>
where
    P: FnMut(&Record) -> bool,
    M: FnOnce(&mut Record),
{
    let path = path.as_ref();
    let mut lines = read_all(path)?;

    let mut updated = None;
    for line in lines.iter_mut() {
        let Ok(mut record) = Record::parse_line(line) else {
            continue;
        };

        if predicate(&record) {
            mutate(&mut record);
            *line = record.format();
            updated = Some(record);
            break;
        }
    }

    write_all(path, &lines)?;
    Ok(updated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Status;
    use tempfile::TempDir;

    fn queue_file(dir: &TempDir, content: &str) -> std::path::PathBuf {
        let path = dir.path().join("data.txt");
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_read_missing_file_fails() {
        let dir = TempDir::new().unwrap();
        assert!(read_all(dir.path().join("nope.txt")).is_err());
    }

    #[test]
    fn test_write_all_replaces_content() {
        let dir = TempDir::new().unwrap();
        let path = queue_file(&dir, "old line\n");

        write_all(&path, &["a".to_string(), "".to_string(), "b".to_string()]).unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "a\n\nb\n");
        assert_eq!(read_all(&path).unwrap(), vec!["a", "", "b"]);
    }

    #[test]
    fn test_write_all_leaves_no_temp_files() {
        let dir = TempDir::new().unwrap();
        let path = queue_file(&dir, "");
        write_all(&path, &["x".to_string()]).unwrap();

        let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_append_terminates_last_line() {
        let dir = TempDir::new().unwrap();
        let path = queue_file(&dir, "0000-00-00T00:00:00Z ; PENDING ; a@b.com");

        append_lines(&path, &["0000-00-00T00:00:00Z ; PENDING ; c@d.com".to_string()]).unwrap();

        let lines = read_all(&path).unwrap();
        assert_eq!(lines.len(), 2);
        assert!(lines[1].ends_with("c@d.com"));
    }

    #[test]
    fn test_for_each_skips_noise() {
        let dir = TempDir::new().unwrap();
        let path = queue_file(
            &dir,
            "garbage\n\n0000-00-00T00:00:00Z ; PENDING ; a@b.com\nx ; y\n",
        );

        let mut seen = Vec::new();
        for_each(&path, |record, index| seen.push((record.email.clone(), index))).unwrap();

        assert_eq!(seen, vec![("a@b.com".to_string(), 2)]);
    }

    #[test]
    fn test_update_matching_first_only() {
        let dir = TempDir::new().unwrap();
        let path = queue_file(
            &dir,
            "0000-00-00T00:00:00Z ; PENDING ; a@b.com\nnoise\n0000-00-00T00:00:00Z ; PENDING ; a@b.com\n",
        );

        let updated = update_matching(
            &path,
            |r| r.email == "a@b.com",
            |r| r.status = Status::Done,
        )
        .unwrap();

        assert_eq!(updated.map(|r| r.status), Some(Status::Done));
        let lines = read_all(&path).unwrap();
        assert_eq!(lines[0], "0000-00-00T00:00:00Z ; DONE ; a@b.com");
        assert_eq!(lines[1], "noise");
        assert_eq!(lines[2], "0000-00-00T00:00:00Z ; PENDING ; a@b.com");
    }

    #[test]
    fn test_update_matching_no_match_still_rewrites() {
        let dir = TempDir::new().unwrap();
        let path = queue_file(&dir, "0000-00-00T00:00:00Z ; PENDING ; a@b.com");

        let updated = update_matching(&path, |_| false, |_| {}).unwrap();

        assert!(updated.is_none());
        // Rewrite adds the trailing newline
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "0000-00-00T00:00:00Z ; PENDING ; a@b.com\n"
        );
    }
}
