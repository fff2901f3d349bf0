//! Whole-file JSON persistence with a serialized writer task.
//!
//! Mutators enqueue a snapshot and return; the writer coalesces queued
//! snapshots and writes the newest via temp-file + rename. A corrupt file on
//! load is a warning, not an error: accounts are re-addable via the operator
//! CLI, and a half-written file must never wedge startup.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::account::Account;

/// The persisted document: the account list plus the rotation cursor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolFile {
    #[serde(default)]
    pub accounts: Vec<Account>,
    #[serde(default)]
    pub active_index: usize,
}

impl PoolFile {
    /// Read the document, treating missing or corrupt files as empty.
    #[must_use]
    pub fn load(path: &Path) -> Self {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Self::default(),
            Err(e) => {
                tracing::warn!(path = %path.display(), "Cannot read pool state ({e}); starting empty");
                return Self::default();
            }
        };
        match serde_json::from_str(&raw) {
            Ok(file) => file,
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    "Corrupt pool state ({e}); starting empty"
                );
                Self::default()
            }
        }
    }

    /// Synchronous write-through; used by the writer task and by tests.
    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_vec_pretty(self).expect("pool file serializes");
        crossbar_utils::atomic_write(path, &json)
    }
}

/// Handle to the owned writer task. Dropping it stops the task once queued
/// writes drain.
#[derive(Debug, Clone)]
pub struct StoreWriter {
    tx: mpsc::UnboundedSender<PoolFile>,
}

impl StoreWriter {
    /// Spawn the writer for one pool file.
    #[must_use]
    pub fn spawn(path: PathBuf) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<PoolFile>();
        tokio::spawn(async move {
            while let Some(mut snapshot) = rx.recv().await {
                // Coalesce: only the newest queued snapshot matters.
                while let Ok(newer) = rx.try_recv() {
                    snapshot = newer;
                }
                let path = path.clone();
                let result =
                    tokio::task::spawn_blocking(move || snapshot.save(&path)).await;
                match result {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => tracing::warn!("Pool state write failed: {e}"),
                    Err(e) => tracing::warn!("Pool state writer panicked: {e}"),
                }
            }
        });
        Self { tx }
    }

    /// Queue a snapshot for writing. Never blocks; failures only log.
    pub fn enqueue(&self, snapshot: PoolFile) {
        if self.tx.send(snapshot).is_err() {
            tracing::warn!("Pool state writer is gone; dropping snapshot");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::Credentials;
    use chrono::Utc;

    fn sample_file() -> PoolFile {
        PoolFile {
            accounts: vec![Account::new(
                "a@example.com",
                Some("a@example.com".to_string()),
                Credentials::OAuth {
                    refresh_token: "rt".to_string(),
                    access_token: None,
                    expires_at: None,
                },
                Utc::now(),
            )],
            active_index: 0,
        }
    }

    #[test]
    fn save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cloud-code.json");

        sample_file().save(&path).unwrap();
        let loaded = PoolFile::load(&path);

        assert_eq!(loaded.accounts.len(), 1);
        assert_eq!(loaded.accounts[0].id, "a@example.com");
        assert!(matches!(
            loaded.accounts[0].credentials,
            Credentials::OAuth { .. }
        ));
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let file = PoolFile::load(&dir.path().join("absent.json"));
        assert!(file.accounts.is_empty());
        assert_eq!(file.active_index, 0);
    }

    #[test]
    fn corrupt_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{\"accounts\": [tru").unwrap();

        let file = PoolFile::load(&path);
        assert!(file.accounts.is_empty());
    }

    #[tokio::test]
    async fn writer_lands_the_newest_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pool.json");
        let writer = StoreWriter::spawn(path.clone());

        writer.enqueue(PoolFile::default());
        let mut latest = sample_file();
        latest.active_index = 7;
        writer.enqueue(latest);

        // Poll until the write lands.
        for _ in 0..100 {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            let current = PoolFile::load(&path);
            if current.active_index == 7 {
                return;
            }
        }
        panic!("writer never landed the newest snapshot");
    }
}
