//! JSON file backend.
//!
//! The whole document is a single JSON object held in an in-memory snapshot. The
//! snapshot is refreshed when the file's fingerprint (modification time, length and
//! inode) changes, so a write made by another process (the CLI, for instance) is
//! picked up by a running gateway. Writes go to a sibling temp file that is renamed
//! into place, which also gives every write a new inode.
//!
//! Without a watcher each read checks the fingerprint first. Once [`FileBackend::watch`]
//! runs, a tokio task polls the file and reads never touch the filesystem.

use super::{Backend, SettingsError};
use serde_json::{Map, Value};
use std::fs::{self, Metadata};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, warn};

/// Poll period used by the gateway for the settings file.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq)]
struct Fingerprint {
    modified: Option<SystemTime>,
    len: u64,
    inode: u64,
}

impl Fingerprint {
    fn of(metadata: &Metadata) -> Self {
        Self {
            modified: metadata.modified().ok(),
            len: metadata.len(),
            inode: inode(metadata),
        }
    }
}

#[cfg(unix)]
fn inode(metadata: &Metadata) -> u64 {
    std::os::unix::fs::MetadataExt::ino(metadata)
}

#[cfg(not(unix))]
fn inode(_metadata: &Metadata) -> u64 {
    0
}

/// Snapshot fingerprint as last observed; `None` when nothing is loaded yet.
type Observed = Option<Option<Fingerprint>>;

#[derive(Debug)]
struct Snapshot {
    fingerprint: Option<Fingerprint>,
    values: Map<String, Value>,
}

#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    snapshot: RwLock<Option<Snapshot>>,
    writer: Mutex<()>,
    watched: AtomicBool,
}

impl FileBackend {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            snapshot: RwLock::new(None),
            writer: Mutex::new(()),
            watched: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reload the snapshot if the file changed. Returns whether it was reloaded.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub async fn refresh(&self) -> Result<bool, SettingsError> {
        let fingerprint = self.fingerprint_from(tokio::fs::metadata(&self.path).await)?;
        let Some(seen) = self.stale(fingerprint.as_ref()) else {
            return Ok(false);
        };

        let values = self.parse(tokio::fs::read_to_string(&self.path).await)?;
        Ok(self.replace(seen, fingerprint, values))
    }

    /// Load the snapshot, then keep it fresh from a background task polling every
    /// `period`. From then on reads are served from memory.
    ///
    /// # Errors
    /// Returns an error if the initial load fails.
    pub async fn watch(self: Arc<Self>, period: Duration) -> Result<JoinHandle<()>, SettingsError> {
        self.refresh().await?;
        self.watched.store(true, Ordering::Release);
        debug!("watching settings file {}", self.path.display());

        Ok(tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match self.refresh().await {
                    Ok(true) => debug!("settings reloaded from {}", self.path.display()),
                    Ok(false) => {}
                    Err(err) => warn!("Failed to reload settings, keeping last snapshot: {err}"),
                }
            }
        }))
    }

    fn fingerprint_from(
        &self,
        metadata: io::Result<Metadata>,
    ) -> Result<Option<Fingerprint>, SettingsError> {
        match metadata {
            Ok(metadata) => Ok(Some(Fingerprint::of(&metadata))),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(source) => Err(SettingsError::Read {
                path: self.path.clone(),
                source,
            }),
        }
    }

    /// `None` when the snapshot matches `current`, otherwise the fingerprint the
    /// snapshot had, so a reload can tell whether someone else replaced it meanwhile.
    fn stale(&self, current: Option<&Fingerprint>) -> Option<Observed> {
        let guard = self.snapshot.read().unwrap_or_else(PoisonError::into_inner);
        match guard.as_ref() {
            Some(snapshot) if snapshot.fingerprint.as_ref() == current => None,
            Some(snapshot) => Some(Some(snapshot.fingerprint.clone())),
            None => Some(None),
        }
    }

    fn replace(
        &self,
        seen: Observed,
        fingerprint: Option<Fingerprint>,
        values: Map<String, Value>,
    ) -> bool {
        let mut guard = self.snapshot.write().unwrap_or_else(PoisonError::into_inner);
        let unchanged = guard.as_ref().map(|snapshot| snapshot.fingerprint.clone()) == seen;
        if unchanged {
            *guard = Some(Snapshot {
                fingerprint,
                values,
            });
        }
        unchanged
    }

    fn refresh_blocking(&self) -> Result<(), SettingsError> {
        let fingerprint = self.fingerprint_from(fs::metadata(&self.path))?;
        if let Some(seen) = self.stale(fingerprint.as_ref()) {
            let values = self.parse(fs::read_to_string(&self.path))?;
            self.replace(seen, fingerprint, values);
        }
        Ok(())
    }

    fn parse(&self, raw: io::Result<String>) -> Result<Map<String, Value>, SettingsError> {
        let raw = match raw {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Map::new()),
            Err(source) => {
                return Err(SettingsError::Read {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        if raw.trim().is_empty() {
            return Ok(Map::new());
        }

        serde_json::from_str(&raw).map_err(|source| SettingsError::Format {
            path: self.path.clone(),
            source,
        })
    }

    fn write_document(&self, values: &Map<String, Value>) -> Result<(), SettingsError> {
        let write_err = |source| SettingsError::Write {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(write_err)?;
        }

        let body = serde_json::to_vec_pretty(values).map_err(|source| SettingsError::Format {
            path: self.path.clone(),
            source,
        })?;

        let mut tmp_name = self.path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);

        fs::write(&tmp_path, body).map_err(write_err)?;
        fs::rename(&tmp_path, &self.path).map_err(write_err)?;

        debug!("settings written to {}", self.path.display());
        Ok(())
    }
}

impl Backend for FileBackend {
    fn load(&self, key: &str) -> Result<Option<Value>, SettingsError> {
        if !self.watched.load(Ordering::Acquire) {
            self.refresh_blocking()?;
        }

        Ok(self
            .snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .and_then(|snapshot| snapshot.values.get(key).cloned()))
    }

    fn store(&self, key: &str, value: Value) -> Result<(), SettingsError> {
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);

        // Always merge into the on-disk document; another process may have written since.
        let mut values = self.parse(fs::read_to_string(&self.path))?;
        values.insert(key.to_string(), value);
        self.write_document(&values)?;

        let fingerprint = self.fingerprint_from(fs::metadata(&self.path))?;
        *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = Some(Snapshot {
            fingerprint,
            values,
        });
        Ok(())
    }
}
