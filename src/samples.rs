//! Sample file scaffolding for `bulkmail init`
//!
//! Writes a starter `config.yaml`, HTML template and queue file. Files that
//! already exist are left untouched.

use crate::config::BulkMailConfig;
use crate::Result;
use queuefile::Record;
use std::fs;
use std::path::{Path, PathBuf};

/// Starter template
pub const SAMPLE_TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
<head>
<meta charset="UTF-8">
<title>Sample Email</title>
</head>
<body>
<h1>Sample Email</h1>
<p>Hello {{email}},</p>
<p>This is a sample email template.</p>
<p>Customize this template as needed.</p>
</body>
</html>
"#;

/// Address queued by the sample queue file
pub const SAMPLE_RECIPIENT: &str = "sample@example.com";

/// Outcome of a scaffolding run
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SampleReport {
    pub created: Vec<PathBuf>,
    pub skipped: Vec<PathBuf>,
}

/// Files `run` needs: the config itself, and the template and queue file
/// it names (or the sample defaults when the config does not exist yet)
pub fn required_files(config_path: &Path) -> Vec<PathBuf> {
    let config = BulkMailConfig::load(config_path).unwrap_or_else(|_| BulkMailConfig::sample());
    vec![
        config_path.to_path_buf(),
        config.mail.template,
        config.database.path,
    ]
}

/// Required files that do not exist
pub fn missing_files(config_path: &Path) -> Vec<PathBuf> {
    required_files(config_path)
        .into_iter()
        .filter(|path| !path.exists())
        .collect()
}

/// Write the sample config, template and queue file
///
/// Relative paths in the sample config are resolved against `base_dir`.
pub fn create_samples(base_dir: &Path, config_file: &Path) -> Result<SampleReport> {
    let config = BulkMailConfig::sample();
    let mut report = SampleReport::default();

    let config_path = base_dir.join(config_file);
    if config_path.exists() {
        report.skipped.push(config_path);
    } else {
        config.save(&config_path)?;
        report.created.push(config_path);
    }

    let template_path = base_dir.join(&config.mail.template);
    write_new(&template_path, SAMPLE_TEMPLATE, &mut report)?;

    let queue_path = base_dir.join(config.queue_path());
    let queue = format!("{}\n", Record::pending(SAMPLE_RECIPIENT).format());
    write_new(&queue_path, &queue, &mut report)?;

    tracing::info!(
        created = report.created.len(),
        skipped = report.skipped.len(),
        "Sample files scaffolded"
    );
    Ok(report)
}

fn write_new(path: &Path, content: &str, report: &mut SampleReport) -> Result<()> {
    if path.exists() {
        tracing::debug!(path = %path.display(), "Sample file exists, skipping");
        report.skipped.push(path.to_path_buf());
        return Ok(());
    }

    fs::write(path, content)?;
    report.created.push(path.to_path_buf());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use queuefile::{Queue, Status};
    use tempfile::TempDir;

    #[test]
    fn test_create_samples() {
        let dir = TempDir::new().unwrap();

        let report = create_samples(dir.path(), Path::new("config.yaml")).unwrap();
        assert_eq!(report.created.len(), 3);
        assert!(report.skipped.is_empty());

        let config = BulkMailConfig::load(dir.path().join("config.yaml")).unwrap();
        assert_eq!(config.mail.delay_seconds, 30);

        let template = fs::read_to_string(dir.path().join("mail.html")).unwrap();
        assert!(template.contains("{{email}}"));

        let queue = Queue::new(dir.path().join("data.txt"));
        let pending = queue.pending_emails().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].email, SAMPLE_RECIPIENT);
        assert_eq!(
            Record::parse_line(&queue.lines().unwrap()[0]).unwrap().status,
            Status::Pending
        );
    }

    #[test]
    fn test_create_samples_never_overwrites() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("data.txt"), "keep@me.com\n").unwrap();

        let report = create_samples(dir.path(), Path::new("config.yaml")).unwrap();

        assert_eq!(report.created.len(), 2);
        assert_eq!(report.skipped, vec![dir.path().join("data.txt")]);
        assert_eq!(
            fs::read_to_string(dir.path().join("data.txt")).unwrap(),
            "keep@me.com\n"
        );
    }

    #[test]
    fn test_missing_files() {
        let dir = TempDir::new().unwrap();
        let config_path = dir.path().join("config.yaml");

        let missing = missing_files(&config_path);
        assert!(missing.contains(&config_path));
        assert_eq!(missing.len(), 3);
    }
}
