//! Queue file change notifications
//!
//! Bridges `notify`'s callback into a Tokio channel of [`WatchEvent`]s. The
//! parent directory is watched rather than the file itself: queue rewrites
//! rename a temporary file over the target, which would orphan a watch held
//! on the old inode.

use notify::event::{CreateKind, ModifyKind};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;

/// What the dispatcher hears about the queue file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    Changed(PathBuf),
    Created(PathBuf),
    Error(String),
}

/// Receiving end handed to the dispatcher
pub type WatchReceiver = mpsc::UnboundedReceiver<WatchEvent>;

/// Keeps the OS watch alive; dropping it closes the event channel
pub struct QueueWatcher {
    _watcher: RecommendedWatcher,
    path: PathBuf,
}

impl QueueWatcher {
    /// Start watching `path`
    pub fn watch(path: impl AsRef<Path>) -> crate::Result<(Self, WatchReceiver)> {
        let path = path.as_ref().to_path_buf();
        let file_name = path.file_name().map(OsString::from).ok_or_else(|| {
            crate::BulkMailError::Config(format!("Not a file path: {}", path.display()))
        })?;
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            if let Some(event) = classify(res, &file_name) {
                let _ = tx.send(event);
            }
        })?;
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;

        tracing::debug!(path = %path.display(), dir = %dir.display(), "Watching queue file");

        Ok((
            Self {
                _watcher: watcher,
                path,
            },
            rx,
        ))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Map a raw notify event to a queue file event, dropping everything that
/// does not touch the queue file or is not a write/create
fn classify(res: notify::Result<Event>, file_name: &OsString) -> Option<WatchEvent> {
    let event = match res {
        Ok(event) => event,
        Err(e) => return Some(WatchEvent::Error(e.to_string())),
    };

    let path = event
        .paths
        .iter()
        .find(|p| p.file_name() == Some(file_name.as_os_str()))?
        .clone();

    match event.kind {
        EventKind::Create(CreateKind::File | CreateKind::Any) => Some(WatchEvent::Created(path)),
        EventKind::Modify(ModifyKind::Data(_) | ModifyKind::Name(_) | ModifyKind::Any) => {
            Some(WatchEvent::Changed(path))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{DataChange, RenameMode};
    use std::time::Duration;
    use tempfile::TempDir;

    fn event(kind: EventKind, path: &str) -> notify::Result<Event> {
        Ok(Event::new(kind).add_path(PathBuf::from(path)))
    }

    #[test]
    fn test_classify_filters_by_file_name() {
        let name = OsString::from("data.txt");

        assert_eq!(
            classify(
                event(EventKind::Modify(ModifyKind::Data(DataChange::Content)), "/q/data.txt"),
                &name
            ),
            Some(WatchEvent::Changed(PathBuf::from("/q/data.txt")))
        );
        assert_eq!(
            classify(event(EventKind::Create(CreateKind::File), "/q/data.txt"), &name),
            Some(WatchEvent::Created(PathBuf::from("/q/data.txt")))
        );
        assert_eq!(
            classify(
                event(EventKind::Modify(ModifyKind::Name(RenameMode::To)), "/q/data.txt"),
                &name
            ),
            Some(WatchEvent::Changed(PathBuf::from("/q/data.txt")))
        );
        assert_eq!(
            classify(
                event(EventKind::Modify(ModifyKind::Data(DataChange::Any)), "/q/other.txt"),
                &name
            ),
            None
        );
        assert_eq!(
            classify(event(EventKind::Remove(notify::event::RemoveKind::File), "/q/data.txt"), &name),
            None
        );
    }

    #[test]
    fn test_classify_error() {
        let name = OsString::from("data.txt");
        let res = Err(notify::Error::generic("boom"));
        assert!(matches!(classify(res, &name), Some(WatchEvent::Error(_))));
    }

    #[test]
    fn test_watch_requires_file_name() {
        assert!(QueueWatcher::watch("/").is_err());
    }

    #[tokio::test]
    async fn test_watch_reports_appends() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.txt");
        std::fs::write(&path, "").unwrap();

        let (watcher, mut rx) = QueueWatcher::watch(&path).unwrap();
        assert_eq!(watcher.path(), path.as_path());

        std::fs::write(&path, "foo@bar.com\n").unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no watch event")
            .expect("channel closed");
        assert!(matches!(event, WatchEvent::Changed(_) | WatchEvent::Created(_)));
    }
}
