//! Watched map state and the task unit handed to the queue.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

/// One watched map file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedFile {
    /// File name being watched, e.g. `fy_test.bsp`
    pub name: String,
    /// Time of the last accepted change event
    pub last_active_at: Option<Instant>,
    /// Last version assigned; 0 until the first successful rename
    pub last_version: u32,
}

impl TrackedFile {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            last_active_at: None,
            last_version: 0,
        }
    }
}

/// The set of watched maps, keyed by file name.
///
/// Owned by the dispatcher. The pipeline gets a [`VersionHandle`], which can
/// only write `last_version`.
#[derive(Debug, Clone, Default)]
pub struct TrackedSet {
    inner: Arc<Mutex<HashMap<String, TrackedFile>>>,
}

impl TrackedSet {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let files = names
            .into_iter()
            .map(|n| {
                let file = TrackedFile::new(n);
                (file.name.clone(), file)
            })
            .collect();
        Self {
            inner: Arc::new(Mutex::new(files)),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lock().contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<TrackedFile> {
        self.lock().get(name).cloned()
    }

    /// Tracked names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Mark `name` active at `now` unless it was already active less than
    /// `window` ago. Returns whether the event was accepted.
    pub fn try_activate(&self, name: &str, now: Instant, window: Duration) -> bool {
        let mut files = self.lock();
        let Some(file) = files.get_mut(name) else {
            return false;
        };
        if let Some(last) = file.last_active_at
            && now.saturating_duration_since(last) < window
        {
            return false;
        }
        file.last_active_at = Some(now);
        true
    }

    /// Handle the pipeline uses to record assigned versions
    pub fn version_handle(&self) -> VersionHandle {
        VersionHandle {
            inner: Arc::clone(&self.inner),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, TrackedFile>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Write access to `last_version` only
#[derive(Debug, Clone)]
pub struct VersionHandle {
    inner: Arc<Mutex<HashMap<String, TrackedFile>>>,
}

impl VersionHandle {
    /// Record that `name` was versioned as `version`
    pub fn record(&self, name: &str, version: u32) {
        let mut files = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        match files.get_mut(name) {
            Some(file) => file.last_version = version,
            None => log::warn!("Recorded version {} for untracked map '{}'", version, name),
        }
    }

    pub fn last_version(&self, name: &str) -> Option<u32> {
        let files = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        files.get(name).map(|f| f.last_version)
    }
}

/// One unit of work: version and deploy a changed map
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    /// Tracked file name
    pub file_name: String,
    /// Where the change happened
    pub source_path: PathBuf,
    pub enqueued_at: DateTime<Utc>,
}

impl Task {
    pub fn new(file_name: impl Into<String>, source_path: impl Into<PathBuf>) -> Self {
        Self {
            file_name: file_name.into(),
            source_path: source_path.into(),
            enqueued_at: Utc::now(),
        }
    }

    /// File name without the extension
    pub fn base_name(&self) -> String {
        std::path::Path::new(&self.file_name)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.file_name.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_millis(100);

    #[test]
    fn test_tracked_set_new() {
        let set = TrackedSet::new(["fy_test.bsp", "aim_box.bsp"]);
        assert_eq!(set.len(), 2);
        assert!(set.contains("fy_test.bsp"));
        assert!(!set.contains("fy_test"));
        assert_eq!(set.names(), vec!["aim_box.bsp", "fy_test.bsp"]);

        let file = set.get("fy_test.bsp").unwrap();
        assert!(file.last_active_at.is_none());
        assert_eq!(file.last_version, 0);
    }

    #[test]
    fn test_try_activate_first_event() {
        let set = TrackedSet::new(["fy_test.bsp"]);
        let now = Instant::now();
        assert!(set.try_activate("fy_test.bsp", now, WINDOW));
        assert_eq!(set.get("fy_test.bsp").unwrap().last_active_at, Some(now));
    }

    #[test]
    fn test_try_activate_debounces() {
        let set = TrackedSet::new(["fy_test.bsp"]);
        let t0 = Instant::now();
        assert!(set.try_activate("fy_test.bsp", t0, WINDOW));
        assert!(!set.try_activate("fy_test.bsp", t0 + Duration::from_millis(40), WINDOW));
        // rejected events do not move the window
        assert_eq!(set.get("fy_test.bsp").unwrap().last_active_at, Some(t0));
        assert!(set.try_activate("fy_test.bsp", t0 + Duration::from_millis(100), WINDOW));
    }

    #[test]
    fn test_try_activate_untracked() {
        let set = TrackedSet::new(["fy_test.bsp"]);
        assert!(!set.try_activate("other.bsp", Instant::now(), WINDOW));
    }

    #[test]
    fn test_version_handle_records() {
        let set = TrackedSet::new(["fy_test.bsp"]);
        let handle = set.version_handle();
        handle.record("fy_test.bsp", 4);
        assert_eq!(set.get("fy_test.bsp").unwrap().last_version, 4);
        assert_eq!(handle.last_version("fy_test.bsp"), Some(4));
        assert_eq!(handle.last_version("other.bsp"), None);
    }

    #[test]
    fn test_task_base_name() {
        let task = Task::new("fy_test.bsp", "/maps/fy_test.bsp");
        assert_eq!(task.base_name(), "fy_test");
        assert_eq!(task.source_path, PathBuf::from("/maps/fy_test.bsp"));
    }
}
