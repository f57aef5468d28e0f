//! Durable campaign snapshots for crash recovery and resume.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use fs2::FileExt;
use serde::{Deserialize, Serialize};

use crate::campaign::Campaign;
use crate::config::CampaignConfig;
use crate::error::{Error, Result};
use crate::optimizer::OptimizerState;

/// Schema version written into every checkpoint.
///
/// Bumped whenever the on-disk layout changes incompatibly; a checkpoint
/// carrying another version is rejected with [`Error::SchemaMismatch`].
pub const CHECKPOINT_SCHEMA: u32 = 1;

const CHECKPOINT_FILE: &str = "checkpoint.json";
const LOCK_FILE: &str = ".lock";

/// Everything needed to continue a campaign.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Always [`CHECKPOINT_SCHEMA`] for checkpoints written by this crate.
    pub schema: u32,
    pub saved_at: SystemTime,
    pub campaign: Campaign,
    pub optimizer: OptimizerState,
}

impl Checkpoint {
    #[must_use]
    pub fn new(campaign: Campaign, optimizer: OptimizerState) -> Self {
        Self {
            schema: CHECKPOINT_SCHEMA,
            saved_at: SystemTime::now(),
            campaign,
            optimizer,
        }
    }
}

/// Reads and writes `checkpoint.json` in a campaign directory.
///
/// Saves are atomic: the snapshot goes to a temporary file in the same
/// directory, is synced, then renamed over the previous checkpoint. A crash
/// mid-save leaves the previous checkpoint intact.
///
/// # Examples
///
/// ```no_run
/// use sledo::checkpoint::CheckpointManager;
///
/// # fn main() -> sledo::Result<()> {
/// let manager = CheckpointManager::new("campaigns/monoblock");
/// let _lock = manager.lock()?;
/// if manager.exists() {
///     let checkpoint = manager.load()?;
///     println!("{} trials so far", checkpoint.campaign.n_trials());
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct CheckpointManager {
    dir: PathBuf,
}

/// Exclusive claim on a campaign directory, released on drop.
#[derive(Debug)]
pub struct CheckpointLock {
    file: File,
}

impl Drop for CheckpointLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

impl CheckpointManager {
    /// Manages checkpoints in `dir`, which is created on first save.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the checkpoint file.
    #[must_use]
    pub fn path(&self) -> PathBuf {
        self.dir.join(CHECKPOINT_FILE)
    }

    #[must_use]
    pub fn exists(&self) -> bool {
        self.path().is_file()
    }

    /// Claims the directory for one controller.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CheckpointLocked`] if another process or controller
    /// holds the lock, or an I/O error if the lock file cannot be opened.
    pub fn lock(&self) -> Result<CheckpointLock> {
        std::fs::create_dir_all(&self.dir)?;
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(self.dir.join(LOCK_FILE))?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(CheckpointLock { file }),
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => {
                Err(Error::CheckpointLocked(self.dir.clone()))
            }
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Atomically replaces the checkpoint.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the directory or file cannot be written, or
    /// [`Error::Storage`] if serialization fails.
    pub fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path();
        let tmp_path = self.dir.join(format!(".{CHECKPOINT_FILE}.tmp"));

        let file = File::create(&tmp_path)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, checkpoint)
            .map_err(|e| Error::Storage(e.to_string()))?;
        writer.flush()?;
        writer
            .into_inner()
            .map_err(|e| Error::Io(e.into_error()))?
            .sync_all()?;
        std::fs::rename(&tmp_path, &path)?;

        trace_debug!(
            path = %path.display(),
            trials = checkpoint.campaign.n_trials(),
            "checkpoint saved"
        );
        Ok(())
    }

    /// Loads the managed checkpoint.
    ///
    /// # Errors
    ///
    /// See [`load_from`](Self::load_from).
    pub fn load(&self) -> Result<Checkpoint> {
        Self::load_from(self.path())
    }

    /// Loads and validates a checkpoint file.
    ///
    /// # Errors
    ///
    /// - I/O errors reading the file.
    /// - [`Error::SchemaMismatch`] if the file was written with another
    ///   [`CHECKPOINT_SCHEMA`].
    /// - [`Error::CorruptCheckpoint`] if the file is not valid JSON, does not
    ///   have the checkpoint structure, or breaks a campaign invariant.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Checkpoint> {
        let path = path.as_ref();
        let corrupt = |reason: String| Error::CorruptCheckpoint {
            path: path.to_path_buf(),
            reason,
        };

        let text = std::fs::read_to_string(path)?;
        let value: serde_json::Value =
            serde_json::from_str(&text).map_err(|e| corrupt(e.to_string()))?;
        let schema = value
            .get("schema")
            .and_then(serde_json::Value::as_u64)
            .ok_or_else(|| corrupt("missing schema version".to_string()))?;
        if schema != u64::from(CHECKPOINT_SCHEMA) {
            return Err(Error::SchemaMismatch(format!(
                "checkpoint schema {schema}, expected {CHECKPOINT_SCHEMA}"
            )));
        }

        let checkpoint: Checkpoint =
            serde_json::from_value(value).map_err(|e| corrupt(e.to_string()))?;
        checkpoint.campaign.validate().map_err(corrupt)?;
        Ok(checkpoint)
    }

    /// Checks that a checkpoint can be resumed under `config`.
    ///
    /// Budgets and other stopping thresholds may change between sessions;
    /// the search space and direction may not.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SchemaMismatch`] describing the first difference.
    pub fn check_compatible(checkpoint: &Checkpoint, config: &CampaignConfig) -> Result<()> {
        let campaign = &checkpoint.campaign;
        if campaign.space() != &config.space {
            return Err(Error::SchemaMismatch(
                "search space differs from the checkpoint".to_string(),
            ));
        }
        if campaign.direction() != config.direction {
            return Err(Error::SchemaMismatch(format!(
                "direction {:?} differs from the checkpoint's {:?}",
                config.direction,
                campaign.direction()
            )));
        }
        Ok(())
    }
}
