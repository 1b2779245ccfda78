//! # External — Subprocess Collaborators
//!
//! The quality facts provider, the recognition evaluator and the
//! enhancement operators are model-backed programs outside this crate. This
//! module runs them as subprocesses with a timeout.
//!
//! ## Invocation Contract
//!
//! | Collaborator | Arguments appended | stdout |
//! |--------------|-------------------|--------|
//! | facts | `<image>` | `RawAssessment` JSON |
//! | evaluator | `<image>` | `RecognitionReport` JSON |
//! | operator | `--input <in> --output <out> --action <kind> --strength <s> --params <json>` | optional output path (last line) |
//!
//! An operator that prints nothing is assumed to have written `--output`.
//! Either way the file must exist afterwards, otherwise the step fails.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::facts::{QualityFactsProvider, RawAssessment};
use crate::guard::{RecognitionEvaluator, RecognitionReport};
use crate::orchestrator::{Operator, OperatorRegistry};
use crate::policy::{Action, ActionKind};

/// Unique suffix for operator outputs within one process.
static OUTPUT_COUNTER: AtomicU64 = AtomicU64::new(0);

// ── Configuration ───────────────────────────────────────────────

/// One operator entry under `[tools.operators]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperatorSpec {
    pub command: Vec<String>,
    #[serde(default)]
    pub model: Option<String>,
}

/// The `[tools]` section. Empty commands mean "not configured".
///
/// Operator keys are action names and accept the same aliases as plans.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub facts_command: Vec<String>,
    pub evaluator_command: Vec<String>,
    pub operators: BTreeMap<String, OperatorSpec>,
    pub timeout_secs: u64,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        ToolsConfig {
            facts_command: Vec::new(),
            evaluator_command: Vec::new(),
            operators: BTreeMap::new(),
            timeout_secs: 300,
        }
    }
}

impl ToolsConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Build the operator registry, writing outputs under `work_dir`.
    pub fn operator_registry(&self, work_dir: &Path) -> OperatorRegistry {
        let mut registry = OperatorRegistry::new();
        for (key, spec) in &self.operators {
            let kind = match key.parse::<ActionKind>() {
                Ok(kind) => kind,
                Err(e) => {
                    warn!(key = %key, error = %e, "ignoring operator entry");
                    continue;
                }
            };
            if spec.command.is_empty() {
                warn!(action = %kind, "operator command is empty, action will be skipped");
                continue;
            }
            registry.register(
                kind,
                std::sync::Arc::new(CommandOperator {
                    command: spec.command.clone(),
                    model: spec
                        .model
                        .clone()
                        .unwrap_or_else(|| kind.default_model().to_string()),
                    work_dir: work_dir.to_path_buf(),
                    timeout: self.timeout(),
                }),
            );
        }
        registry
    }
}

// ── Subprocess Runner ───────────────────────────────────────────

/// Run `command` plus `extra` args, returning stdout. Non-zero exit and
/// timeout are errors.
pub fn run_command(command: &[String], extra: &[String], timeout: Duration) -> Result<String> {
    let Some((program, args)) = command.split_first() else {
        bail!("empty command");
    };
    let mut cmd = Command::new(program);
    cmd.args(args)
        .args(extra)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = cmd
        .spawn()
        .with_context(|| format!("spawning {program}"))?;

    // Drain both pipes off-thread so a chatty child never blocks on a full pipe.
    let stdout_handle = child.stdout.take();
    let stdout_thread = std::thread::spawn(move || {
        let mut buf = String::new();
        if let Some(mut out) = stdout_handle {
            let _ = out.read_to_string(&mut buf);
        }
        buf
    });
    let stderr_handle = child.stderr.take();
    let stderr_thread = std::thread::spawn(move || {
        let mut buf = String::new();
        if let Some(mut err) = stderr_handle {
            let _ = err.read_to_string(&mut buf);
        }
        buf
    });

    let start = Instant::now();
    loop {
        match child.try_wait()? {
            Some(status) => {
                let stdout = stdout_thread.join().unwrap_or_default();
                let stderr = stderr_thread.join().unwrap_or_default();
                if !stderr.trim().is_empty() {
                    debug!(program = %program, stderr = %stderr.trim(), "tool stderr");
                }
                if !status.success() {
                    bail!(
                        "{program} exited with {status}: {}",
                        stderr.lines().last().unwrap_or("").trim()
                    );
                }
                return Ok(stdout);
            }
            None => {
                if start.elapsed() > timeout {
                    let _ = child.kill();
                    let _ = child.wait();
                    // Grandchildren may still hold the pipes; leave the readers detached.
                    drop(stdout_thread);
                    drop(stderr_thread);
                    bail!("{program} timed out after {}s", timeout.as_secs());
                }
                std::thread::sleep(Duration::from_millis(50));
            }
        }
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

// ── Collaborators ───────────────────────────────────────────────

pub struct CommandFactsProvider {
    pub command: Vec<String>,
    pub timeout: Duration,
}

impl QualityFactsProvider for CommandFactsProvider {
    fn assess(&self, image: &Path) -> Result<RawAssessment> {
        let out = run_command(&self.command, &[path_arg(image)], self.timeout)?;
        serde_json::from_str(out.trim()).context("parsing quality facts JSON")
    }
}

pub struct CommandEvaluator {
    pub command: Vec<String>,
    pub timeout: Duration,
}

impl RecognitionEvaluator for CommandEvaluator {
    fn evaluate(&self, image: &Path, silent: bool) -> Result<RecognitionReport> {
        let out = run_command(&self.command, &[path_arg(image)], self.timeout)?;
        let report: RecognitionReport =
            serde_json::from_str(out.trim()).context("parsing recognition JSON")?;
        if !silent {
            debug!(image = %image.display(), faces = report.faces.len(), "recognition evaluated");
        }
        Ok(report.normalized())
    }
}

pub struct CommandOperator {
    pub command: Vec<String>,
    pub model: String,
    pub work_dir: PathBuf,
    pub timeout: Duration,
}

impl CommandOperator {
    fn output_path(&self, input: &Path, action: &Action) -> PathBuf {
        let stem = input
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("image");
        let ext = input.extension().and_then(|e| e.to_str()).unwrap_or("png");
        let n = OUTPUT_COUNTER.fetch_add(1, Ordering::Relaxed);
        let strength = action.strength_label().unwrap_or_else(|| "default".into());
        self.work_dir
            .join(format!("{stem}_{}_{strength}_{n}.{ext}", action.kind()))
    }
}

impl Operator for CommandOperator {
    fn name(&self) -> &str {
        &self.model
    }

    fn apply(&self, input: &Path, action: &Action) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.work_dir)
            .with_context(|| format!("creating work dir {}", self.work_dir.display()))?;
        let planned = self.output_path(input, action);
        let extra = vec![
            "--input".to_string(),
            path_arg(input),
            "--output".to_string(),
            path_arg(&planned),
            "--action".to_string(),
            action.kind().as_str().to_string(),
            "--strength".to_string(),
            action.strength_label().unwrap_or_else(|| "default".into()),
            "--params".to_string(),
            serde_json::Value::Object(action.params()).to_string(),
        ];
        let stdout = run_command(&self.command, &extra, self.timeout)?;
        let output = stdout
            .lines()
            .map(str::trim)
            .rfind(|l| !l.is_empty())
            .map(PathBuf::from)
            .unwrap_or(planned);
        if !output.is_file() {
            bail!("operator {} produced no file at {}", self.model, output.display());
        }
        Ok(output)
    }
}
