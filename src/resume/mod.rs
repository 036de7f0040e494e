//! Per-file resume positions.
//!
//! Positions are kept in memory and written through to a JSON document on
//! every change:
//!
//! ```json
//! {
//!   "/music/live-set.flac": {
//!     "position_ms": 512000,
//!     "duration_ms": 3600000,
//!     "last_seen": "2026-10-19T21:04:11+02:00"
//!   }
//! }
//! ```
//!
//! The store never reports failures to its callers. A missing or corrupt file
//! starts an empty store; a failed write is logged and the in-memory state is
//! kept.

mod path;

pub use path::{normalize_path, normalize_path_with};

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result, ResultExt};

/// Positions this close to the end are not resumed.
pub const NEAR_END_MS: i64 = 2000;

/// File name of the store inside the config directory.
pub const STATE_FILE_NAME: &str = "playback_state.json";

/// One persisted position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionEntry {
    pub position_ms: i64,
    pub duration_ms: i64,
    /// ISO-8601 time of the last write (informational)
    #[serde(default)]
    pub last_seen: String,
}

impl PositionEntry {
    /// Whether playback should resume from this entry.
    pub fn is_resumable(&self) -> bool {
        self.duration_ms > 0
            && self.position_ms >= 0
            && self.position_ms <= self.duration_ms
            && self.position_ms < self.duration_ms - NEAR_END_MS
    }
}

/// Thread-safe resume position store.
#[derive(Debug)]
pub struct PositionStore {
    /// Backing file (`None` keeps everything in memory)
    file: Option<PathBuf>,
    entries: Mutex<BTreeMap<String, PositionEntry>>,
}

impl PositionStore {
    /// Open a store backed by `file`, loading whatever it currently holds.
    pub fn open(file: impl Into<PathBuf>) -> Self {
        let file = file.into();
        let entries = load_entries(&file);
        tracing::debug!("Loaded {} resume positions from {:?}", entries.len(), file);
        Self {
            file: Some(file),
            entries: Mutex::new(entries),
        }
    }

    /// A store that never touches the disk.
    pub fn in_memory() -> Self {
        Self {
            file: None,
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    /// Backing file, if any.
    pub fn file(&self) -> Option<&Path> {
        self.file.as_deref()
    }

    /// Resumable position for `path` in milliseconds.
    pub fn get_position(&self, path: &Path) -> Option<u64> {
        let key = normalize_path(path)?;
        let entries = self.entries.lock();
        entries
            .get(&key)
            .filter(|entry| entry.is_resumable())
            .map(|entry| entry.position_ms as u64)
    }

    /// Raw entry for `path`, resumable or not.
    pub fn entry(&self, path: &Path) -> Option<PositionEntry> {
        let key = normalize_path(path)?;
        self.entries.lock().get(&key).cloned()
    }

    /// Record the position of `path`. Out-of-range values are ignored.
    pub fn save_position(&self, path: &Path, position_ms: i64, duration_ms: i64) {
        if duration_ms <= 0 || position_ms < 0 || position_ms > duration_ms {
            return;
        }
        let Some(key) = normalize_path(path) else {
            return;
        };

        let entry = PositionEntry {
            position_ms,
            duration_ms,
            last_seen: chrono::Local::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, false),
        };

        let mut entries = self.entries.lock();
        entries.insert(key, entry);
        self.persist(&entries);
    }

    /// Forget the position of `path`.
    pub fn clear(&self, path: &Path) {
        let Some(key) = normalize_path(path) else {
            return;
        };

        let mut entries = self.entries.lock();
        if entries.remove(&key).is_some() {
            self.persist(&entries);
        }
    }

    /// Forget every position.
    pub fn clear_all(&self) {
        let mut entries = self.entries.lock();
        entries.clear();
        self.persist(&entries);
    }

    /// Copy of all entries, ordered by key.
    pub fn entries(&self) -> Vec<(String, PositionEntry)> {
        self.entries
            .lock()
            .iter()
            .map(|(key, entry)| (key.clone(), entry.clone()))
            .collect()
    }

    /// Write `entries` to the backing file. Called with the lock held.
    fn persist(&self, entries: &BTreeMap<String, PositionEntry>) {
        let Some(ref file) = self.file else {
            return;
        };
        if let Err(e) = write_entries(file, entries) {
            tracing::warn!("Resume positions not saved: {}", e);
        }
    }
}

fn load_entries(file: &Path) -> BTreeMap<String, PositionEntry> {
    let contents = match std::fs::read_to_string(file) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return BTreeMap::new(),
        Err(e) => {
            tracing::warn!("Failed to read resume positions {:?}: {}", file, e);
            return BTreeMap::new();
        }
    };

    let raw: BTreeMap<String, serde_json::Value> = match serde_json::from_str(&contents) {
        Ok(raw) => raw,
        Err(e) => {
            tracing::warn!("Ignoring corrupt resume positions {:?}: {}", file, e);
            return BTreeMap::new();
        }
    };

    raw.into_iter()
        .filter_map(|(key, value)| match serde_json::from_value(value) {
            Ok(entry) => Some((key, entry)),
            Err(e) => {
                tracing::debug!("Skipping malformed resume entry {}: {}", key, e);
                None
            }
        })
        .collect()
}

fn write_entries(file: &Path, entries: &BTreeMap<String, PositionEntry>) -> Result<()> {
    if let Some(dir) = file.parent() {
        std::fs::create_dir_all(dir).with_context(format!("creating {}", dir.display()))?;
    }

    let contents = serde_json::to_string_pretty(entries).map_err(Error::from)?;

    // Write atomically (write to temp, then rename)
    let temp_path = file.with_extension("json.tmp");
    std::fs::write(&temp_path, contents)
        .with_context(format!("writing {}", temp_path.display()))?;
    std::fs::rename(&temp_path, file).with_context(format!("replacing {}", file.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::temp_store;

    #[test]
    fn test_round_trip() {
        let (store, dir) = temp_store();
        let media = dir.path().join("talk.mp4");

        store.save_position(&media, 5000, 20000);
        assert_eq!(store.get_position(&media), Some(5000));
    }

    #[test]
    fn test_near_end_is_not_resumable() {
        let (store, dir) = temp_store();
        let media = dir.path().join("talk.mp4");

        store.save_position(&media, 19500, 20000);
        assert_eq!(store.get_position(&media), None);
        // Still stored, just not offered for resuming
        assert!(store.entry(&media).is_some());
    }

    #[test]
    fn test_exact_near_end_boundary() {
        let (store, dir) = temp_store();
        let media = dir.path().join("clip.mkv");

        store.save_position(&media, 17_999, 20_000);
        assert_eq!(store.get_position(&media), Some(17_999));

        store.save_position(&media, 18_000, 20_000);
        assert_eq!(store.get_position(&media), None);
    }

    #[test]
    fn test_invalid_writes_are_ignored() {
        let (store, dir) = temp_store();
        let media = dir.path().join("talk.mp4");
        store.save_position(&media, 5000, 20000);

        store.save_position(&media, -1, 20000);
        store.save_position(&media, 30000, 20000);
        store.save_position(&media, 0, 0);
        store.save_position(Path::new(""), 1000, 20000);

        assert_eq!(store.get_position(&media), Some(5000));
        assert_eq!(store.entries().len(), 1);
    }

    #[test]
    fn test_positions_survive_reopen() {
        let (store, dir) = temp_store();
        let media = dir.path().join("album").join("04.flac");
        store.save_position(&media, 90_000, 240_000);

        let reopened = PositionStore::open(store.file().unwrap());
        assert_eq!(reopened.get_position(&media), Some(90_000));
        let entry = reopened.entry(&media).unwrap();
        assert!(!entry.last_seen.is_empty());
    }

    #[test]
    fn test_clear_and_clear_all() {
        let (store, dir) = temp_store();
        let a = dir.path().join("a.mp3");
        let b = dir.path().join("b.mp3");
        store.save_position(&a, 1000, 60_000);
        store.save_position(&b, 2000, 60_000);

        store.clear(&a);
        assert_eq!(store.get_position(&a), None);
        assert_eq!(store.get_position(&b), Some(2000));

        store.clear_all();
        assert!(store.entries().is_empty());

        let reopened = PositionStore::open(store.file().unwrap());
        assert!(reopened.entries().is_empty());
    }

    #[test]
    fn test_corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join(STATE_FILE_NAME);
        std::fs::write(&file, "{ not json").unwrap();

        let store = PositionStore::open(&file);
        assert!(store.entries().is_empty());

        // Still writable afterwards
        let media = dir.path().join("x.ogg");
        store.save_position(&media, 100, 10_000);
        assert_eq!(PositionStore::open(&file).get_position(&media), Some(100));
    }

    #[test]
    fn test_hand_edited_file_keeps_good_entries() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.mp3");
        let key = normalize_path(&good).unwrap();
        let file = dir.path().join(STATE_FILE_NAME);
        let doc = format!(
            r#"{{
                {}: {{ "position_ms": 4000, "duration_ms": 60000 }},
                "/elsewhere/bad.mp3": {{ "position_ms": "soon" }}
            }}"#,
            serde_json::to_string(&key).unwrap()
        );
        std::fs::write(&file, doc).unwrap();

        let store = PositionStore::open(&file);
        assert_eq!(store.entries().len(), 1);
        assert_eq!(store.get_position(&good), Some(4000));
    }

    #[test]
    fn test_missing_directory_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("nested").join("config").join(STATE_FILE_NAME);
        let store = PositionStore::open(&file);

        store.save_position(&dir.path().join("y.wav"), 10, 100_000);
        assert!(file.exists());
    }

    #[test]
    fn test_in_memory_store() {
        let store = PositionStore::in_memory();
        let media = Path::new("/media/show.mkv");
        store.save_position(media, 7000, 100_000);
        assert_eq!(store.get_position(media), Some(7000));
        assert!(store.file().is_none());
    }

    #[test]
    fn test_concurrent_writers() {
        let (store, dir) = temp_store();
        let store = std::sync::Arc::new(store);
        let media = dir.path().join("shared.mp4");

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let store = std::sync::Arc::clone(&store);
                let media = media.clone();
                std::thread::spawn(move || {
                    for step in 0..10 {
                        store.save_position(&media, (i * 10 + step) * 100, 100_000);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let reopened = PositionStore::open(store.file().unwrap());
        assert_eq!(reopened.get_position(&media), store.get_position(&media));
    }
}
