//! Checkpoint Store
//!
//! Durable JSON snapshots of a run: cursor, counters, start time, and the
//! full table. Files are named `checkpoint_<millis>.json` so "latest" is the
//! greatest modification time with the file name as tie break. Saves always
//! write the new file before pruning old ones.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::table::TicketTable;

use super::state::ProcessingState;

const CHECKPOINT_PREFIX: &str = "checkpoint_";
const CHECKPOINT_EXT: &str = "json";

pub const DEFAULT_KEEP_LAST: usize = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub last_index: i64,
    pub processed_count: u64,
    pub error_count: u64,
    pub start_time: DateTime<Utc>,
    pub table: TicketTable,
    pub created_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn capture(state: &ProcessingState, table: &TicketTable) -> Self {
        Self {
            last_index: state.last_processed_index,
            processed_count: state.processed_count,
            error_count: state.error_count,
            start_time: state.start_time,
            table: table.clone(),
            created_at: Utc::now(),
        }
    }
}

pub struct CheckpointStore {
    dir: PathBuf,
    keep_last: usize,
}

impl CheckpointStore {
    pub fn new(dir: PathBuf, keep_last: usize) -> Self {
        Self { dir, keep_last }
    }

    /// Write a new checkpoint, then prune all but the `keep_last` most
    /// recent. A prune failure is logged but does not fail the save.
    pub fn save(&self, checkpoint: &Checkpoint) -> AppResult<PathBuf> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("could not create {}", self.dir.display()))?;

        let path = self.next_checkpoint_path();
        let file = fs::File::create(&path)
            .map_err(|e| AppError::Checkpoint(format!("could not create {}: {e}", path.display())))?;
        serde_json::to_writer(std::io::BufWriter::new(file), checkpoint)
            .map_err(|e| AppError::Checkpoint(format!("could not write {}: {e}", path.display())))?;

        tracing::info!("Checkpoint saved: {}", path.display());

        if let Err(e) = self.cleanup_old() {
            tracing::warn!("Failed to cleanup old checkpoints: {}", e);
        }

        Ok(path)
    }

    /// Load the most recent checkpoint, or `None` if the store is empty or
    /// absent. A corrupt latest checkpoint is a hard error rather than a
    /// silent fallback to an older file.
    pub fn load_latest(&self) -> AppResult<Option<Checkpoint>> {
        let Some((path, _)) = self.checkpoint_files()?.into_iter().last() else {
            return Ok(None);
        };

        let file = fs::File::open(&path)
            .map_err(|e| AppError::Checkpoint(format!("could not open {}: {e}", path.display())))?;
        let checkpoint: Checkpoint = serde_json::from_reader(std::io::BufReader::new(file))
            .map_err(|e| AppError::Checkpoint(format!("corrupt checkpoint {}: {e}", path.display())))?;

        tracing::info!("Loaded checkpoint from: {}", path.display());
        Ok(Some(checkpoint))
    }

    /// Remove old checkpoints, keeping only the most recent ones.
    pub fn cleanup_old(&self) -> AppResult<usize> {
        let files = self.checkpoint_files()?;
        let excess = files.len().saturating_sub(self.keep_last);
        for (path, _) in files.into_iter().take(excess) {
            fs::remove_file(&path)
                .with_context(|| format!("could not remove {}", path.display()))?;
            tracing::debug!("Removed old checkpoint: {}", path.display());
        }
        Ok(excess)
    }

    /// Delete every checkpoint in the store. Returns how many were removed.
    pub fn purge(&self) -> AppResult<usize> {
        let files = self.checkpoint_files()?;
        let count = files.len();
        for (path, _) in files {
            fs::remove_file(&path)
                .with_context(|| format!("could not remove {}", path.display()))?;
        }
        Ok(count)
    }

    pub fn count(&self) -> AppResult<usize> {
        Ok(self.checkpoint_files()?.len())
    }

    /// Checkpoint files sorted oldest first by (mtime, name).
    fn checkpoint_files(&self) -> AppResult<Vec<(PathBuf, SystemTime)>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut files = Vec::new();
        for entry in fs::read_dir(&self.dir)
            .with_context(|| format!("could not read {}", self.dir.display()))?
        {
            let entry = entry.context("could not read checkpoint dir entry")?;
            let path = entry.path();
            if !is_checkpoint_file(&path) {
                continue;
            }
            let mtime = entry
                .metadata()
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            files.push((path, mtime));
        }

        files.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        Ok(files)
    }

    fn next_checkpoint_path(&self) -> PathBuf {
        let mut millis = Utc::now().timestamp_millis();
        loop {
            let path = self
                .dir
                .join(format!("{CHECKPOINT_PREFIX}{millis}.{CHECKPOINT_EXT}"));
            if !path.exists() {
                return path;
            }
            // Two saves landed in the same millisecond.
            millis += 1;
        }
    }
}

fn is_checkpoint_file(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    name.starts_with(CHECKPOINT_PREFIX) && path.extension().is_some_and(|e| e == CHECKPOINT_EXT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::TicketTable;

    fn sample_table() -> TicketTable {
        let csv = "TicketID,Ticket_Title,Ticket_Summary\nT-1,VPN down,Cannot connect\n";
        let mut table = TicketTable::from_csv_reader(csv.as_bytes()).unwrap();
        table.ensure_output_columns();
        table
    }

    fn sample_checkpoint(last_index: i64) -> Checkpoint {
        let mut state = ProcessingState::new();
        for i in 0..=last_index {
            state.record_success(i as usize);
        }
        Checkpoint::capture(&state, &sample_table())
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().to_path_buf(), DEFAULT_KEEP_LAST);

        store.save(&sample_checkpoint(4)).unwrap();
        let loaded = store.load_latest().unwrap().unwrap();

        assert_eq!(loaded.last_index, 4);
        assert_eq!(loaded.processed_count, 5);
        assert_eq!(loaded.error_count, 0);
        assert_eq!(loaded.table.len(), 1);
    }

    #[test]
    fn test_load_latest_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("missing"), DEFAULT_KEEP_LAST);
        assert!(store.load_latest().unwrap().is_none());
    }

    #[test]
    fn test_retention_keeps_newest_five() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().to_path_buf(), DEFAULT_KEEP_LAST);

        let mut paths = Vec::new();
        for i in 0..7 {
            paths.push(store.save(&sample_checkpoint(i)).unwrap());
        }

        assert_eq!(store.count().unwrap(), 5);
        // The two oldest saves were pruned, the newest five remain.
        assert!(!paths[0].exists());
        assert!(!paths[1].exists());
        for path in &paths[2..] {
            assert!(path.exists());
        }

        let latest = store.load_latest().unwrap().unwrap();
        assert_eq!(latest.last_index, 6);
    }

    #[test]
    fn test_corrupt_checkpoint_is_a_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().to_path_buf(), DEFAULT_KEEP_LAST);

        store.save(&sample_checkpoint(1)).unwrap();
        std::fs::write(dir.path().join("checkpoint_99999999999999.json"), "not json").unwrap();

        let result = store.load_latest();
        assert!(matches!(result, Err(AppError::Checkpoint(_))));
    }

    #[test]
    fn test_purge_removes_everything() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().to_path_buf(), DEFAULT_KEEP_LAST);

        store.save(&sample_checkpoint(0)).unwrap();
        store.save(&sample_checkpoint(1)).unwrap();

        assert_eq!(store.purge().unwrap(), 2);
        assert_eq!(store.count().unwrap(), 0);
        assert!(store.load_latest().unwrap().is_none());
    }
}
