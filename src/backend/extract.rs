//! Reading the objective back out of solver output.

use core::future::Future;
use std::path::{Path, PathBuf};

use crate::error::{EvaluationFailure, FailureKind};

/// Reads a scalar objective from the files a solver run left behind.
pub trait Extractor: Send + Sync + 'static {
    /// Extracts the objective for the run named `name` in `work_dir`.
    ///
    /// I/O problems should be reported as transient, malformed output as a
    /// permanent [`FailureKind::Extraction`].
    fn extract(
        &self,
        work_dir: &Path,
        name: &str,
    ) -> impl Future<Output = Result<f64, EvaluationFailure>> + Send;
}

/// Reads one value from the last row of a CSV postprocessor file.
///
/// `file` is relative to the trial work directory and may contain `{name}`,
/// replaced by the run name (`trial_<id>`). Without a column name the last
/// column is used. The default matches MOOSE's CSV output convention,
/// `<input stem>_out.csv`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CsvColumn {
    file: String,
    column: Option<String>,
}

impl Default for CsvColumn {
    fn default() -> Self {
        Self {
            file: "{name}_out.csv".to_string(),
            column: None,
        }
    }
}

impl CsvColumn {
    #[must_use]
    pub fn new(file: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            column: None,
        }
    }

    /// Reads the named column instead of the last one.
    #[must_use]
    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.column = Some(column.into());
        self
    }

    fn path(&self, work_dir: &Path, name: &str) -> PathBuf {
        work_dir.join(self.file.replace("{name}", name))
    }

    /// Picks the value out of CSV text.
    fn parse(&self, text: &str) -> Result<f64, EvaluationFailure> {
        let extraction = |message: String| EvaluationFailure::new(FailureKind::Extraction, message);

        let mut rows = text.lines().map(str::trim).filter(|l| !l.is_empty());
        let header: Vec<&str> = rows
            .next()
            .ok_or_else(|| extraction("csv output is empty".to_string()))?
            .split(',')
            .map(str::trim)
            .collect();
        let last = rows
            .next_back()
            .ok_or_else(|| extraction("csv output has no data rows".to_string()))?;
        let fields: Vec<&str> = last.split(',').map(str::trim).collect();

        let index = match &self.column {
            Some(column) => header
                .iter()
                .position(|h| h == column)
                .ok_or_else(|| extraction(format!("csv output has no column '{column}'")))?,
            None => fields.len() - 1,
        };
        let raw = fields
            .get(index)
            .ok_or_else(|| extraction(format!("last csv row has no field {index}")))?;
        raw.parse::<f64>()
            .map_err(|e| extraction(format!("cannot parse '{raw}' as a number: {e}")))
    }
}

impl Extractor for CsvColumn {
    async fn extract(&self, work_dir: &Path, name: &str) -> Result<f64, EvaluationFailure> {
        let path = self.path(work_dir, name);
        let text = tokio::fs::read_to_string(&path).await.map_err(|e| {
            EvaluationFailure::transient_io(format!("cannot read {}: {e}", path.display()))
        })?;
        self.parse(&text)
    }
}
