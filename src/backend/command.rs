//! External solver processes.

use core::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use super::{Backend, CsvColumn, EvaluationRequest, Extractor, InputTemplate};
use crate::error::EvaluationFailure;

/// Runs an external solver once per attempt.
///
/// Each attempt of trial `<id>` works in `work_root/trial_<id>/`:
///
/// 1. the [`InputTemplate`] is rendered with the trial parameters into
///    `trial_<id>.i`;
/// 2. `program` is started in that directory with `args`, where `{input}`,
///    `{work_dir}`, `{name}`, `{trial}` and `{attempt}` are substituted
///    (default: `-i {input}`, the MOOSE convention). `{input}` and
///    `{work_dir}` are absolute even when `work_root` is relative. Output
///    goes to `trial_<id>.log`;
/// 3. on a zero exit status the [`Extractor`] reads the objective.
///
/// A process that cannot be spawned is a transient I/O failure. A non-zero
/// exit is a transient crash, unless its code was registered with
/// [`invalid_parameter_exit_codes`](Self::invalid_parameter_exit_codes), in
/// which case the design itself is rejected and the trial is not retried.
///
/// The child is killed when the attempt is dropped, so dispatcher timeouts
/// and shutdowns never leave solver processes behind.
///
/// # Examples
///
/// ```no_run
/// use sledo::backend::{CommandBackend, CsvColumn, InputTemplate};
///
/// # fn main() -> sledo::Result<()> {
/// let backend = CommandBackend::new(
///     "proteus-opt",
///     InputTemplate::from_file("monoblock.i")?,
///     "runs/monoblock",
/// )
/// .args(["-i", "{input}", "--n-threads=4"])
/// .extractor(CsvColumn::default().column("max_temp"))
/// .invalid_parameter_exit_codes([3]);
/// # let _ = backend;
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct CommandBackend<E = CsvColumn> {
    program: PathBuf,
    args: Vec<String>,
    template: InputTemplate,
    work_root: PathBuf,
    extractor: E,
    invalid_parameter_exit_codes: Vec<i32>,
    env: Vec<(String, String)>,
}

impl CommandBackend<CsvColumn> {
    /// Creates a backend reading the last column of `trial_<id>_out.csv`.
    #[must_use]
    pub fn new(
        program: impl Into<PathBuf>,
        template: InputTemplate,
        work_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            program: program.into(),
            args: vec!["-i".to_string(), "{input}".to_string()],
            template,
            work_root: work_root.into(),
            extractor: CsvColumn::default(),
            invalid_parameter_exit_codes: Vec::new(),
            env: Vec::new(),
        }
    }
}

impl<E: Extractor> CommandBackend<E> {
    /// Replaces the argument list.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Sets an environment variable for every run.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Exit codes meaning "these parameters are structurally invalid".
    #[must_use]
    pub fn invalid_parameter_exit_codes(mut self, codes: impl IntoIterator<Item = i32>) -> Self {
        self.invalid_parameter_exit_codes = codes.into_iter().collect();
        self
    }

    /// Replaces the objective extractor.
    #[must_use]
    pub fn extractor<X: Extractor>(self, extractor: X) -> CommandBackend<X> {
        CommandBackend {
            program: self.program,
            args: self.args,
            template: self.template,
            work_root: self.work_root,
            extractor,
            invalid_parameter_exit_codes: self.invalid_parameter_exit_codes,
            env: self.env,
        }
    }

    /// Directory the attempts of `trial_id` run in.
    #[must_use]
    pub fn work_dir(&self, trial_id: u64) -> PathBuf {
        self.work_root.join(run_name(trial_id))
    }

    fn render_args(
        &self,
        input: &Path,
        work_dir: &Path,
        request: &EvaluationRequest,
    ) -> Vec<String> {
        let name = run_name(request.trial_id);
        let input = input.display().to_string();
        let work_dir = work_dir.display().to_string();
        let trial = request.trial_id.to_string();
        let attempt = request.attempt.to_string();
        self.args
            .iter()
            .map(|arg| {
                arg.replace("{input}", &input)
                    .replace("{work_dir}", &work_dir)
                    .replace("{name}", &name)
                    .replace("{trial}", &trial)
                    .replace("{attempt}", &attempt)
            })
            .collect()
    }

    async fn run(&self, request: EvaluationRequest) -> Result<f64, EvaluationFailure> {
        let name = run_name(request.trial_id);
        // The solver runs inside the work dir, so every path it sees is absolute.
        let work_dir = self.work_dir(request.trial_id);
        let work_dir = std::path::absolute(&work_dir)
            .map_err(|e| io_failure("resolve", &work_dir, &e))?;
        tokio::fs::create_dir_all(&work_dir)
            .await
            .map_err(|e| io_failure("create", &work_dir, &e))?;
        let deck = self.template.render(&request.parameters)?;
        let input = work_dir.join(format!("{name}.i"));
        tokio::fs::write(&input, deck)
            .await
            .map_err(|e| io_failure("write", &input, &e))?;

        let log_path = work_dir.join(format!("{name}.log"));
        let log = std::fs::File::create(&log_path).map_err(|e| io_failure("create", &log_path, &e))?;
        let log_err = log.try_clone().map_err(|e| io_failure("open", &log_path, &e))?;

        let args = self.render_args(&input, &work_dir, &request);
        trace_debug!(
            trial_id = request.trial_id,
            attempt = request.attempt,
            program = %self.program.display(),
            ?args,
            "spawning solver"
        );

        let status = tokio::process::Command::new(&self.program)
            .args(&args)
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .current_dir(&work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err))
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|e| io_failure("spawn", &self.program, &e))?;

        if !status.success() {
            let code = status.code();
            if code.is_some_and(|c| self.invalid_parameter_exit_codes.contains(&c)) {
                return Err(EvaluationFailure::invalid_parameters(format!(
                    "{} rejected the design ({status})",
                    self.program.display()
                )));
            }
            return Err(EvaluationFailure::crash(format!(
                "{} failed ({status}), see {}",
                self.program.display(),
                log_path.display()
            )));
        }

        self.extractor.extract(&work_dir, &name).await
    }
}

impl<E: Extractor> Backend for CommandBackend<E> {
    fn evaluate(
        &self,
        request: EvaluationRequest,
    ) -> impl Future<Output = Result<f64, EvaluationFailure>> + Send {
        self.run(request)
    }
}

fn io_failure(what: &str, path: &Path, e: &std::io::Error) -> EvaluationFailure {
    EvaluationFailure::transient_io(format!("cannot {what} {}: {e}", path.display()))
}

fn run_name(trial_id: u64) -> String {
    format!("trial_{trial_id}")
}
