//! Append-only JSONL log of finalized trials.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::trial::Trial;

fn storage(e: impl ToString) -> Error {
    Error::Storage(e.to_string())
}

/// Human-readable history of a campaign, one finalized trial per line.
///
/// The checkpoint is the source of truth for resuming; the journal is an
/// audit trail that external tools can tail while a campaign runs. It is
/// append-only: a trial that finished after the last checkpoint runs again
/// on resume and gets a second line, and [`latest`](Self::latest) keeps the
/// newest record per id. Writes
/// take an exclusive file lock, reads a shared one, so several processes
/// may safely share the file.
///
/// # Examples
///
/// ```no_run
/// use sledo::journal::TrialJournal;
///
/// # fn main() -> sledo::Result<()> {
/// let journal = TrialJournal::new("campaigns/monoblock/trials.jsonl");
/// for trial in journal.read_all()? {
///     println!("{} {:?} {:?}", trial.id, trial.status, trial.objective);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct TrialJournal {
    path: PathBuf,
    /// Serialise in-process writes so we only hold the file lock briefly.
    write_lock: Mutex<()>,
}

impl TrialJournal {
    /// Journals to `path`; the file is created on the first append.
    #[must_use]
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one trial record.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the file cannot be opened, locked or
    /// written.
    pub fn append(&self, trial: &Trial) -> Result<()> {
        let _guard = self.write_lock.lock();

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(storage)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(storage)?;
        FileExt::lock_exclusive(&file).map_err(storage)?;

        let line = serde_json::to_string(trial).map_err(storage)?;
        writeln!(file, "{line}").map_err(storage)?;
        file.flush().map_err(storage)?;

        FileExt::unlock(&file).map_err(storage)?;
        Ok(())
    }

    /// Reads every record. A missing file is an empty journal.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the file exists but cannot be read or a
    /// line does not parse.
    pub fn read_all(&self) -> Result<Vec<Trial>> {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(storage(e)),
        };
        FileExt::lock_shared(&file).map_err(storage)?;

        let mut trials = Vec::new();
        for (number, line) in BufReader::new(&file).lines().enumerate() {
            let line = line.map_err(storage)?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let trial: Trial = serde_json::from_str(line)
                .map_err(|e| Error::Storage(format!("line {}: {e}", number + 1)))?;
            trials.push(trial);
        }

        FileExt::unlock(&file).map_err(storage)?;
        Ok(trials)
    }

    /// The newest record of every trial, in id order.
    ///
    /// # Errors
    ///
    /// See [`read_all`](Self::read_all).
    pub fn latest(&self) -> Result<Vec<Trial>> {
        let mut by_id = BTreeMap::new();
        for trial in self.read_all()? {
            by_id.insert(trial.id, trial);
        }
        Ok(by_id.into_values().collect())
    }
}
