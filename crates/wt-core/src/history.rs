//! Terminal scrollback persistence
//!
//! Scrollback may contain anything the user saw in a session, including
//! sensitive output, so it gets the same care as config data: files live
//! under the platform config directory, are keyed by profile id (a
//! reconnection restores the same history), and are size-capped in both
//! raw and compressed form. Deleting a profile must also clear its history.

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use crate::error::{WtError, WtResult};

const HISTORY_DIR: &str = "history";
const HISTORY_SUFFIX: &str = ".history.gz";

/// Cap on a compressed history file
const MAX_COMPRESSED_SIZE: u64 = 5 * 1024 * 1024;
/// Cap on raw scrollback; older output is dropped first
const MAX_RAW_SIZE: usize = 50 * 1024 * 1024;

/// Per-profile scrollback store backed by gzip files
pub struct HistoryStore {
    dir: PathBuf,
}

impl HistoryStore {
    pub fn new(config_dir: &Path) -> Self {
        Self {
            dir: config_dir.join(HISTORY_DIR),
        }
    }

    fn path_for(&self, profile_id: &str) -> WtResult<PathBuf> {
        // Profile ids become filenames; anything outside [A-Za-z0-9_-]
        // is rejected before touching the filesystem
        if profile_id.is_empty() || profile_id.len() > 64 {
            return Err(WtError::Validation(
                "profile id must be 1-64 characters".to_string(),
            ));
        }
        if !profile_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(WtError::Validation(
                "profile id may only contain [A-Za-z0-9_-]".to_string(),
            ));
        }
        Ok(self.dir.join(format!("{}{}", profile_id, HISTORY_SUFFIX)))
    }

    /// Persist scrollback for a profile, keeping only the newest
    /// `MAX_RAW_SIZE` bytes
    pub fn save(&self, profile_id: &str, data: &[u8]) -> WtResult<()> {
        let path = self.path_for(profile_id)?;
        let data = if data.len() > MAX_RAW_SIZE {
            tracing::warn!(profile = profile_id, len = data.len(), "scrollback truncated");
            &data[data.len() - MAX_RAW_SIZE..]
        } else {
            data
        };

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data)?;
        let compressed = encoder.finish()?;
        if compressed.len() as u64 > MAX_COMPRESSED_SIZE {
            return Err(WtError::Validation(
                "compressed scrollback exceeds the size cap".to_string(),
            ));
        }

        fs::create_dir_all(&self.dir)?;
        // Write-then-rename so a crash never leaves a half-written file
        let temp = path.with_extension("tmp");
        fs::write(&temp, &compressed)?;
        fs::rename(&temp, &path)?;

        tracing::debug!(profile = profile_id, bytes = compressed.len(), "scrollback saved");
        Ok(())
    }

    /// Load scrollback for a profile; `Ok(None)` when there is none
    pub fn load(&self, profile_id: &str) -> WtResult<Option<Vec<u8>>> {
        let path = self.path_for(profile_id)?;
        if !path.exists() {
            return Ok(None);
        }
        if fs::metadata(&path)?.len() > MAX_COMPRESSED_SIZE {
            tracing::warn!(profile = profile_id, "oversized scrollback file skipped");
            return Ok(None);
        }

        let compressed = fs::read(&path)?;
        let mut data = Vec::new();
        // Bound decompression so a crafted file cannot balloon in memory
        GzDecoder::new(&compressed[..])
            .take(MAX_RAW_SIZE as u64)
            .read_to_end(&mut data)
            .map_err(|e| WtError::Validation(format!("corrupt scrollback file: {}", e)))?;
        Ok(Some(data))
    }

    /// Drop a profile's scrollback. Returns whether a file existed.
    pub fn clear(&self, profile_id: &str) -> WtResult<bool> {
        let path = self.path_for(profile_id)?;
        if path.exists() {
            fs::remove_file(&path)?;
            tracing::info!(profile = profile_id, "scrollback cleared");
            return Ok(true);
        }
        Ok(false)
    }

    /// Drop all saved scrollback
    pub fn clear_all(&self) -> WtResult<()> {
        if self.dir.exists() {
            for entry in fs::read_dir(&self.dir)? {
                let path = entry?.path();
                if path.extension().map_or(false, |ext| ext == "gz") {
                    let _ = fs::remove_file(&path);
                }
            }
            tracing::info!("all scrollback cleared");
        }
        Ok(())
    }

    /// Profile ids with saved scrollback
    pub fn profiles(&self) -> WtResult<Vec<String>> {
        let mut ids = Vec::new();
        if self.dir.exists() {
            for entry in fs::read_dir(&self.dir)? {
                let name = entry?.file_name();
                let name = name.to_string_lossy();
                if let Some(id) = name.strip_suffix(HISTORY_SUFFIX) {
                    ids.push(id.to_string());
                }
            }
        }
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::new(dir.path());

        store.save("profile-1", b"$ uptime\n 17:02:11 up 3 days\n").unwrap();
        let loaded = store.load("profile-1").unwrap().unwrap();
        assert_eq!(loaded, b"$ uptime\n 17:02:11 up 3 days\n");
    }

    #[test]
    fn test_load_absent_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::new(dir.path());
        assert!(store.load("never-saved").unwrap().is_none());
    }

    #[test]
    fn test_clear_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::new(dir.path());

        store.save("profile-1", b"output").unwrap();
        assert!(store.clear("profile-1").unwrap());
        assert!(!store.clear("profile-1").unwrap());
        assert!(store.load("profile-1").unwrap().is_none());
    }

    #[test]
    fn test_profile_id_validated_before_filesystem() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::new(dir.path());

        assert!(store.save("../../../etc/passwd", b"x").is_err());
        assert!(store.save("", b"x").is_err());
        assert!(store.load("a/b").is_err());
    }

    #[test]
    fn test_clear_all_and_listing() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::new(dir.path());

        store.save("p1", b"one").unwrap();
        store.save("p2", b"two").unwrap();
        let mut ids = store.profiles().unwrap();
        ids.sort();
        assert_eq!(ids, vec!["p1".to_string(), "p2".to_string()]);

        store.clear_all().unwrap();
        assert!(store.profiles().unwrap().is_empty());
    }
}
