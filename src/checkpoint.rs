//! Append-only record of completed batch items.
//!
//! The on-disk format is one key per line, human-readable and safe to edit
//! between runs. Keys are item basenames, so two sources with the same file
//! name in different folders share a key.

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use tracing::debug;

use crate::error::{Error, Result};

/// Default checkpoint file name.
pub const DEFAULT_CHECKPOINT_FILE: &str = "checkpoint.txt";

struct State {
    done: HashSet<String>,
    log: Option<File>,
}

/// Durable set of completed item keys.
///
/// [`CheckpointStore::mark_done`] holds a single lock across the file append
/// and the in-memory insert, so concurrent callers never interleave lines or
/// observe a key that is not yet on disk.
pub struct CheckpointStore {
    path: PathBuf,
    state: Mutex<State>,
}

impl CheckpointStore {
    /// Load an existing checkpoint, or start empty if `path` does not exist.
    ///
    /// Blank lines and surrounding whitespace are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Checkpoint`] if the file exists but cannot be read.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let done = read_keys(&path)?;
        debug!(path = %path.display(), keys = done.len(), "checkpoint loaded");
        Ok(Self {
            path,
            state: Mutex::new(State { done, log: None }),
        })
    }

    /// Path of the checkpoint file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether `key` has been recorded as done.
    #[must_use]
    pub fn is_done(&self, key: &str) -> bool {
        self.lock().done.contains(key)
    }

    /// Snapshot of all completed keys.
    #[must_use]
    pub fn keys(&self) -> HashSet<String> {
        self.lock().done.clone()
    }

    /// Number of completed keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().done.len()
    }

    /// True when nothing has completed yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append `key` to the log and record it in memory.
    ///
    /// The key is only added to the in-memory set once the append succeeded.
    /// Keys already present are not written again.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Checkpoint`] if the log cannot be opened or written.
    pub fn mark_done(&self, key: &str) -> Result<()> {
        let mut state = self.lock();
        if state.done.contains(key) {
            return Ok(());
        }
        let wrap = |source| Error::Checkpoint {
            path: self.path.clone(),
            source,
        };
        if state.log.is_none() {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .map_err(wrap)?;
            state.log = Some(file);
        }
        if let Some(log) = state.log.as_mut() {
            writeln!(log, "{key}").map_err(wrap)?;
            log.flush().map_err(wrap)?;
        }
        state.done.insert(key.to_string());
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // Every mutation completes before the guard drops, so a poisoned
        // state is still consistent.
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl std::fmt::Debug for CheckpointStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckpointStore")
            .field("path", &self.path)
            .field("keys", &self.len())
            .finish()
    }
}

fn read_keys(path: &Path) -> Result<HashSet<String>> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashSet::new()),
        Err(source) => {
            return Err(Error::Checkpoint {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    let mut keys = HashSet::new();
    for line in BufReader::new(file).lines() {
        let line = line.map_err(|source| Error::Checkpoint {
            path: path.to_path_buf(),
            source,
        })?;
        let key = line.trim();
        if !key.is_empty() {
            keys.insert(key.to_string());
        }
    }
    Ok(keys)
}

/// Checkpoint key for a source path: its file name.
///
/// # Errors
///
/// Returns [`Error::InvalidItem`] if the path has no file name.
pub fn item_key(path: &Path) -> Result<String> {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| Error::InvalidItem(path.to_path_buf()))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::load(dir.path().join("none.txt")).unwrap();
        assert!(store.is_empty());
        assert!(!store.is_done("a.png"));
    }

    #[test]
    fn marks_survive_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ckpt.txt");
        {
            let store = CheckpointStore::load(&path).unwrap();
            store.mark_done("a.png").unwrap();
            store.mark_done("b.jpg").unwrap();
            store.mark_done("a.png").unwrap();
            assert!(store.is_done("a.png"));
        }
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "a.png\nb.jpg\n");

        let reloaded = CheckpointStore::load(&path).unwrap();
        assert_eq!(reloaded.len(), 2);
        assert!(reloaded.is_done("b.jpg"));
    }

    #[test]
    fn hand_edited_file_is_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ckpt.txt");
        std::fs::write(&path, "  one.png \n\n two.png\n").unwrap();
        let store = CheckpointStore::load(&path).unwrap();
        let expected: HashSet<String> = ["one.png", "two.png"]
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(store.keys(), expected);
    }

    #[test]
    fn concurrent_marks_write_every_key_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ckpt.txt");
        let store = Arc::new(CheckpointStore::load(&path).unwrap());

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for i in 0..50 {
                        store.mark_done(&format!("img-{t}-{i}.png")).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 400);
        for line in &lines {
            assert!(line.starts_with("img-") && line.ends_with(".png"));
        }
        assert_eq!(CheckpointStore::load(&path).unwrap().len(), 400);
    }

    #[test]
    fn unwritable_log_leaves_key_unmarked() {
        let dir = tempfile::tempdir().unwrap();
        // A directory cannot be read as a checkpoint.
        assert!(CheckpointStore::load(dir.path()).is_err());

        let path = dir.path().join("missing").join("ckpt.txt");
        let store = CheckpointStore::load(&path).unwrap();
        assert!(matches!(store.mark_done("a.png"), Err(Error::Checkpoint { .. })));
        assert!(!store.is_done("a.png"));
    }

    #[test]
    fn item_key_is_basename() {
        assert_eq!(item_key(Path::new("/in/a/photo.jpg")).unwrap(), "photo.jpg");
        assert!(item_key(Path::new("/")).is_err());
    }
}
