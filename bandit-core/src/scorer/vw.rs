//! Vowpal Wabbit scorer driven over stdin/stdout
//!
//! VwScorer keeps one long-running `vw` process per instance. Every call writes
//! exactly one newline-terminated example and reads exactly one line back, so
//! the pipes never carry more than one outstanding request.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tracing::{debug, info, warn};

use super::traits::{Scorer, ScorerFactory, ScorerState};
use crate::artifact::ModelArtifact;
use crate::error::ScorerError;

/// How long `close()` waits for the process to flush its diagnostics.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration for VwScorer
#[derive(Debug, Clone)]
pub struct VwConfig {
    /// Path to the vw binary (defaults to "vw")
    pub binary: String,
    /// Pass `--quiet` to suppress progress output on stderr
    pub quiet: bool,
    /// Pass `--testonly` and validate the process with a dummy prediction
    pub test_only: bool,
    /// Upper bound for the validation call issued by `start()`
    pub validation_timeout: Duration,
}

impl Default for VwConfig {
    fn default() -> Self {
        Self {
            binary: "vw".to_string(),
            quiet: true,
            test_only: true,
            validation_timeout: Duration::from_secs(5),
        }
    }
}

impl VwConfig {
    #[must_use]
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    #[must_use]
    pub fn with_test_only(mut self, test_only: bool) -> Self {
        self.test_only = test_only;
        self
    }

    #[must_use]
    pub fn with_validation_timeout(mut self, timeout: Duration) -> Self {
        self.validation_timeout = timeout;
        self
    }
}

/// Pipes of a running vw process
struct VwProcess {
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: BufReader<ChildStdout>,
    stderr: Option<ChildStderr>,
    /// Answers vw still owes to calls that were dropped before reading them
    unread: usize,
    /// A dropped call may have left a partial line on stdin
    torn_write: bool,
}

/// Scorer backed by a `vw` subprocess
pub struct VwScorer {
    config: VwConfig,
    /// Serialized model configuration, split into vw arguments
    cli_args: String,
    /// Location of the model weights
    weights_path: Option<PathBuf>,
    state: ScorerState,
    process: Option<VwProcess>,
}

impl VwScorer {
    /// Create a scorer for the given metadata string and weights
    pub fn new(config: VwConfig, cli_args: impl Into<String>, weights_path: Option<PathBuf>) -> Self {
        Self {
            config,
            cli_args: cli_args.into(),
            weights_path,
            state: ScorerState::Uninitialized,
            process: None,
        }
    }

    /// Create a scorer for a located model artifact
    pub fn for_artifact(config: VwConfig, artifact: &ModelArtifact) -> Self {
        Self::new(
            config,
            artifact.metadata.clone(),
            Some(artifact.weights_path.clone()),
        )
    }

    /// Build the command for spawning vw
    ///
    /// Predictions are redirected to stdout so each example yields one line
    /// we can read back.
    pub fn build_command(&self) -> Command {
        let mut cmd = Command::new(&self.config.binary);

        cmd.args(self.cli_args.split_whitespace());
        cmd.arg("-p").arg("/dev/stdout");

        if self.config.quiet {
            cmd.arg("--quiet");
        }

        if self.config.test_only {
            cmd.arg("--testonly");
        }

        if let Some(ref weights) = self.weights_path {
            cmd.arg("-i").arg(weights);
        }

        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        cmd
    }

    /// Render a context vector as a vw feature line, e.g. `| 1:0.1 2:0.2`
    pub fn parse_example(context: &[f64]) -> String {
        let features: Vec<String> = context
            .iter()
            .enumerate()
            .map(|(i, value)| format!("{}:{}", i + 1, value))
            .collect();
        format!("| {}", features.join(" "))
    }

    /// Write one line and read one line back
    ///
    /// Cancel-safe between calls: answers owed to a dropped call are read and
    /// discarded before the next line goes out, so a response is never handed
    /// to the wrong caller. A write dropped mid-line can't be repaired and
    /// leaves the process unusable.
    async fn exchange(&mut self, line: &str) -> Result<String, ScorerError> {
        if self.state != ScorerState::Running {
            return Err(ScorerError::NotReady { state: self.state });
        }

        let process = self
            .process
            .as_mut()
            .ok_or(ScorerError::NotReady { state: self.state })?;

        if let Some(status) = process.child.try_wait()? {
            return Err(ScorerError::ProcessDown {
                code: status.code(),
            });
        }

        if process.torn_write {
            warn!("vw input holds a partial line, stopping process");
            if let Err(e) = process.child.start_kill() {
                warn!(error = %e, "Failed to terminate vw process");
            }
            return Err(ScorerError::ProcessDown { code: None });
        }

        while process.unread > 0 {
            let mut stale = String::new();
            if process.stdout.read_line(&mut stale).await? == 0 {
                let code = process.child.try_wait()?.and_then(|s| s.code());
                return Err(ScorerError::ProcessDown { code });
            }
            process.unread -= 1;
            debug!(remaining = process.unread, "Discarded response to a dropped call");
        }

        let stdin = process
            .stdin
            .as_mut()
            .ok_or_else(|| ScorerError::Protocol("stdin already closed".to_string()))?;

        process.torn_write = true;
        if let Err(e) = write_line(stdin, line).await {
            if e.kind() == std::io::ErrorKind::BrokenPipe {
                let code = process.child.try_wait()?.and_then(|s| s.code());
                return Err(ScorerError::ProcessDown { code });
            }
            return Err(e.into());
        }
        process.torn_write = false;
        process.unread += 1;

        let mut response = String::new();
        let read = process.stdout.read_line(&mut response).await?;
        if read == 0 {
            let code = process.child.try_wait()?.and_then(|s| s.code());
            return Err(ScorerError::ProcessDown { code });
        }
        process.unread -= 1;

        Ok(response)
    }
}

async fn write_line(stdin: &mut ChildStdin, line: &str) -> std::io::Result<()> {
    stdin.write_all(line.as_bytes()).await?;
    stdin.write_all(b"\n").await?;
    stdin.flush().await
}

/// Parse a whitespace-separated score line and normalize it to sum to 1.0
pub fn normalize_scores(line: &str) -> Result<Vec<f64>, ScorerError> {
    let scores = line
        .split_whitespace()
        .map(|token| {
            token
                .parse::<f64>()
                .map_err(|_| ScorerError::Protocol(format!("unparseable score '{token}'")))
        })
        .collect::<Result<Vec<f64>, _>>()?;

    let total: f64 = scores.iter().sum();
    if scores.is_empty() || total == 0.0 || !total.is_finite() {
        return Err(ScorerError::Exhausted);
    }

    Ok(scores.into_iter().map(|s| s / total).collect())
}

#[async_trait]
impl Scorer for VwScorer {
    async fn start(&mut self) -> Result<(), ScorerError> {
        match self.state {
            ScorerState::Running => {
                debug!("vw process already running, skipping start");
                return Ok(());
            }
            ScorerState::Closed => return Err(ScorerError::NotReady { state: self.state }),
            ScorerState::Uninitialized => {}
        }

        if self.cli_args.trim().is_empty() {
            return Err(ScorerError::Validation(
                "no arguments specified to load the model".to_string(),
            ));
        }

        let mut cmd = self.build_command();
        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ScorerError::BinaryNotFound(self.config.binary.clone())
            } else {
                ScorerError::SpawnFailed(e)
            }
        })?;

        let stdin = child.stdin.take();
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ScorerError::Protocol("failed to capture stdout".to_string()))?;
        let stderr = child.stderr.take();

        info!(pid = ?child.id(), binary = %self.config.binary, "Started vw process");

        self.process = Some(VwProcess {
            child,
            stdin,
            stdout: BufReader::new(stdout),
            stderr,
            unread: 0,
            torn_write: false,
        });
        self.state = ScorerState::Running;

        if self.config.test_only {
            let timeout = self.config.validation_timeout;
            let validation = match tokio::time::timeout(timeout, self.predict(&[])).await {
                Ok(result) => result.map(|_| ()),
                Err(_) => Err(ScorerError::Validation(format!(
                    "no response within {timeout:?}"
                ))),
            };

            if let Err(e) = validation {
                warn!(error = %e, "Unable to load vw model, check the model arguments");
                let diagnostics = self.close().await.unwrap_or_default();
                let detail = diagnostics.trim();
                return Err(ScorerError::Validation(if detail.is_empty() {
                    e.to_string()
                } else {
                    format!("{e}: {detail}")
                }));
            }
        }

        Ok(())
    }

    async fn predict(&mut self, context: &[f64]) -> Result<Vec<f64>, ScorerError> {
        let line = Self::parse_example(context);
        let response = self.exchange(&line).await?;
        normalize_scores(&response)
    }

    async fn learn(
        &mut self,
        context: &[f64],
        action: usize,
        cost: f64,
        probability: f64,
    ) -> Result<(), ScorerError> {
        let line = format!(
            "{action}:{cost}:{probability} {}",
            Self::parse_example(context)
        );
        // vw answers training examples with a prediction line we don't need.
        self.exchange(&line).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<String, ScorerError> {
        self.state = ScorerState::Closed;

        let Some(mut process) = self.process.take() else {
            return Ok(String::new());
        };

        // EOF on stdin lets vw finish and write its summary.
        drop(process.stdin.take());

        let mut diagnostics = String::new();
        if let Some(mut stderr) = process.stderr.take() {
            match tokio::time::timeout(DRAIN_TIMEOUT, stderr.read_to_string(&mut diagnostics)).await
            {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => warn!(error = %e, "Failed to read vw diagnostics"),
                Err(_) => warn!("Timed out draining vw diagnostics"),
            }
        }

        if process.child.try_wait()?.is_none() {
            if let Err(e) = process.child.start_kill() {
                warn!(error = %e, "Failed to terminate vw process");
            }
        }
        let status = process.child.wait().await?;
        debug!(code = ?status.code(), "vw process exited");

        Ok(diagnostics)
    }

    fn state(&self) -> ScorerState {
        self.state
    }
}

/// Factory for creating VwScorer instances
pub struct VwScorerFactory {
    config: VwConfig,
}

impl VwScorerFactory {
    pub fn new(config: VwConfig) -> Self {
        Self { config }
    }
}

impl ScorerFactory for VwScorerFactory {
    fn create(&self, artifact: &ModelArtifact) -> Box<dyn Scorer> {
        Box::new(VwScorer::for_artifact(self.config.clone(), artifact))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scorer(args: &str) -> VwScorer {
        VwScorer::new(
            VwConfig::default(),
            args,
            Some(PathBuf::from("/models/vw.model")),
        )
    }

    // ==================== Command Building Tests ====================

    #[test]
    fn build_command_splits_metadata_into_arguments() {
        let cmd = scorer("--cb_explore 2 --epsilon 0.1").build_command();
        let args: Vec<_> = cmd.as_std().get_args().collect();
        assert_eq!(args[0], "--cb_explore");
        assert_eq!(args[1], "2");
        assert_eq!(args[2], "--epsilon");
        assert_eq!(args[3], "0.1");
    }

    #[test]
    fn build_command_redirects_predictions_to_stdout() {
        let cmd = scorer("--cb_explore 2").build_command();
        let args: Vec<_> = cmd.as_std().get_args().collect();
        let p = args.iter().position(|a| *a == "-p").unwrap();
        assert_eq!(args[p + 1], "/dev/stdout");
    }

    #[test]
    fn build_command_ends_with_weights() {
        let cmd = scorer("--cb_explore 2").build_command();
        let args: Vec<_> = cmd.as_std().get_args().collect();
        assert_eq!(args[args.len() - 2], "-i");
        assert_eq!(args[args.len() - 1], "/models/vw.model");
    }

    #[test]
    fn build_command_respects_flags() {
        let config = VwConfig {
            quiet: false,
            test_only: false,
            ..Default::default()
        };
        let cmd = VwScorer::new(config, "--cb_explore 2", None).build_command();
        let args: Vec<_> = cmd.as_std().get_args().collect();
        assert!(!args.contains(&std::ffi::OsStr::new("--quiet")));
        assert!(!args.contains(&std::ffi::OsStr::new("--testonly")));
        assert!(!args.contains(&std::ffi::OsStr::new("-i")));
    }

    #[test]
    fn build_command_uses_custom_binary() {
        let config = VwConfig::default().with_binary("/opt/vw/bin/vw");
        let cmd = VwScorer::new(config, "--cb 2", None).build_command();
        assert_eq!(cmd.as_std().get_program(), "/opt/vw/bin/vw");
    }

    // ==================== Example Encoding Tests ====================

    #[test]
    fn parse_example_uses_one_based_indices() {
        assert_eq!(VwScorer::parse_example(&[0.1, 0.2]), "| 1:0.1 2:0.2");
    }

    #[test]
    fn parse_example_formats_whole_numbers_compactly() {
        assert_eq!(VwScorer::parse_example(&[1.0, 3.0]), "| 1:1 2:3");
    }

    #[test]
    fn parse_example_empty_context() {
        assert_eq!(VwScorer::parse_example(&[]), "| ");
    }

    // ==================== Normalization Tests ====================

    #[test]
    fn normalize_scores_sums_to_one() {
        let probs = normalize_scores("2 6\n").unwrap();
        assert_eq!(probs.len(), 2);
        assert!((probs[0] - 0.25).abs() < 1e-12);
        assert!((probs.iter().sum::<f64>() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn normalize_scores_zero_sum_is_exhausted() {
        assert!(matches!(
            normalize_scores("0 0\n"),
            Err(ScorerError::Exhausted)
        ));
    }

    #[test]
    fn normalize_scores_empty_line_is_exhausted() {
        assert!(matches!(normalize_scores("\n"), Err(ScorerError::Exhausted)));
    }

    #[test]
    fn normalize_scores_rejects_garbage() {
        assert!(matches!(
            normalize_scores("0.5 abc"),
            Err(ScorerError::Protocol(_))
        ));
    }

    // ==================== State Tests ====================

    #[tokio::test]
    async fn predict_before_start_is_not_ready() {
        let mut vw = scorer("--cb_explore 2");
        let result = vw.predict(&[1.0]).await;
        assert!(matches!(
            result,
            Err(ScorerError::NotReady {
                state: ScorerState::Uninitialized
            })
        ));
    }

    #[tokio::test]
    async fn start_with_empty_arguments_fails_validation() {
        let mut vw = scorer("  ");
        assert!(matches!(
            vw.start().await,
            Err(ScorerError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn start_with_missing_binary_reports_not_found() {
        let config = VwConfig::default().with_binary("/nonexistent/vw-binary");
        let mut vw = VwScorer::new(config, "--cb 2", None);
        assert!(matches!(
            vw.start().await,
            Err(ScorerError::BinaryNotFound(_))
        ));
    }

    #[tokio::test]
    async fn close_without_start_is_closed() {
        let mut vw = scorer("--cb_explore 2");
        let diagnostics = vw.close().await.unwrap();
        assert!(diagnostics.is_empty());
        assert_eq!(vw.state(), ScorerState::Closed);
        assert!(matches!(
            vw.start().await,
            Err(ScorerError::NotReady {
                state: ScorerState::Closed
            })
        ));
    }
}
