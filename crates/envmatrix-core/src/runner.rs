//! Plan execution: isolated workspaces, bounded concurrency, aggregation.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::artifact::ArtifactCache;
use crate::config::MatrixConfig;
use crate::error::{MatrixError, MatrixResult};
use crate::exec::{CommandExecutor, CommandRequest};
use crate::plan::ExecutionPlan;
use crate::spec::{EnvSpec, Matrix};

/// Terminal state of one environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvOutcome {
    Succeeded,
    Failed { detail: String },
    Skipped { reason: String },
}

impl EnvOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, EnvOutcome::Failed { .. })
    }

    pub fn is_skip(&self) -> bool {
        matches!(self, EnvOutcome::Skipped { .. })
    }
}

/// One executed command within an environment.
#[derive(Debug, Clone)]
pub struct StepReport {
    pub argv: Vec<String>,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

/// Per-environment result, in plan order.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub env: String,
    pub outcome: EnvOutcome,
    pub steps: Vec<StepReport>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

/// Executes an [`ExecutionPlan`] group by group.
///
/// Within a group environments run concurrently up to the configured worker
/// count; groups are strictly sequential, so every environment starts only
/// after all of its dependencies have reached a terminal state. A
/// dependency's failure does not prevent its dependents from running; only
/// `fail_fast` and cancellation stop environments from starting.
pub struct MatrixRunner {
    matrix: Matrix,
    config: MatrixConfig,
    project_root: PathBuf,
    executor: Arc<dyn CommandExecutor>,
    artifacts: Arc<ArtifactCache>,
    /// Arguments appended to every main command (never to `commands_pre`).
    passthrough: Vec<String>,
    cancel: watch::Receiver<bool>,
}

impl MatrixRunner {
    pub fn new(
        matrix: Matrix,
        config: MatrixConfig,
        project_root: PathBuf,
        executor: Arc<dyn CommandExecutor>,
        passthrough: Vec<String>,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        let artifacts = Arc::new(ArtifactCache::new(
            project_root.clone(),
            config.options.command_timeout_secs,
        ));
        Self {
            matrix,
            config,
            project_root,
            executor,
            artifacts,
            passthrough,
            cancel,
        }
    }

    /// Run the plan to completion and return one result per environment,
    /// in plan order. Infrastructure errors (workspace creation) abort the
    /// whole run; per-environment failures are recorded and execution
    /// continues.
    pub async fn run(&self, plan: &ExecutionPlan) -> MatrixResult<Vec<RunResult>> {
        let run_id = Uuid::new_v4();
        let workers = self.config.options.workers.max(1);
        info!(%run_id, envs = plan.env_count(), workers, "starting run");
        let semaphore = Arc::new(Semaphore::new(workers));
        let (fail_tx, fail_rx) = watch::channel(false);
        let fail_tx = Arc::new(fail_tx);

        let mut results: HashMap<String, RunResult> = HashMap::new();

        for group in &plan.groups {
            let mut tasks: JoinSet<RunResult> = JoinSet::new();

            for name in &group.envs {
                let spec = match self.matrix.get(name) {
                    Some(spec) => spec.clone(),
                    None => {
                        return Err(MatrixError::EnvNotFound {
                            env: name.clone(),
                            referenced_by: "plan".to_string(),
                        })
                    }
                };
                let ctx = EnvContext {
                    spec,
                    options_fail_fast: self.config.options.fail_fast,
                    skip_missing: self.config.options.skip_missing_interpreters,
                    timeout_secs: self.config.options.command_timeout_secs,
                    workspace_root: self.project_root.join(&self.config.options.workspace_root),
                    project_root: self.project_root.clone(),
                    artifact_config: self.artifact_config_for(name),
                    passthrough: self.passthrough.clone(),
                };
                let executor = Arc::clone(&self.executor);
                let artifacts = Arc::clone(&self.artifacts);
                let semaphore = Arc::clone(&semaphore);
                let fail_tx = Arc::clone(&fail_tx);
                let fail_rx = fail_rx.clone();
                let cancel = self.cancel.clone();

                tasks.spawn(async move {
                    // Holding a permit bounds in-flight environments.
                    let _permit = match semaphore.acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => return RunResult::skipped(&ctx.spec.name, "interrupted"),
                    };

                    if *cancel.borrow() {
                        return RunResult::skipped(&ctx.spec.name, "interrupted");
                    }
                    if ctx.options_fail_fast && *fail_rx.borrow() {
                        return RunResult::skipped(&ctx.spec.name, "fail-fast");
                    }

                    let result =
                        run_env(&ctx, executor.as_ref(), artifacts.as_ref(), &cancel).await;
                    if result.outcome.is_failure() {
                        let _ = fail_tx.send(true);
                    }
                    result
                });
            }

            while let Some(joined) = tasks.join_next().await {
                let result = joined.map_err(|e| {
                    MatrixError::Config(format!("environment task panicked: {e}"))
                })?;
                results.insert(result.env.clone(), result);
            }
        }

        // Plan order, not completion order.
        let mut ordered = Vec::with_capacity(plan.env_count());
        for name in plan.env_names() {
            if let Some(result) = results.remove(name) {
                ordered.push(result);
            }
        }
        info!(
            %run_id,
            failed = ordered.iter().filter(|r| r.outcome.is_failure()).count(),
            "run complete"
        );
        Ok(ordered)
    }

    fn artifact_config_for(&self, env: &str) -> Option<(String, crate::config::ArtifactConfig)> {
        let spec = self.matrix.get(env)?;
        let key = spec.artifact.as_ref()?;
        let config = self.config.artifacts.get(key)?;
        Some((key.clone(), config.clone()))
    }
}

struct EnvContext {
    spec: EnvSpec,
    options_fail_fast: bool,
    skip_missing: bool,
    timeout_secs: u64,
    workspace_root: PathBuf,
    project_root: PathBuf,
    artifact_config: Option<(String, crate::config::ArtifactConfig)>,
    passthrough: Vec<String>,
}

impl RunResult {
    fn skipped(env: &str, reason: &str) -> Self {
        Self {
            env: env.to_string(),
            outcome: EnvOutcome::Skipped {
                reason: reason.to_string(),
            },
            steps: Vec::new(),
            started_at: Utc::now(),
            duration_ms: 0,
        }
    }
}

/// Run one environment end to end: interpreter probe, workspace, artifact,
/// setup commands, main commands. Never returns Err; every failure mode is
/// folded into the outcome so aggregation sees all environments.
async fn run_env(
    ctx: &EnvContext,
    executor: &dyn CommandExecutor,
    artifacts: &ArtifactCache,
    cancel: &watch::Receiver<bool>,
) -> RunResult {
    let name = ctx.spec.name.clone();
    let started_at = Utc::now();
    let start = Instant::now();
    let mut steps = Vec::new();

    info!(env = %name, "starting environment");

    if let Some(interpreter) = &ctx.spec.interpreter {
        if !executor.probe(interpreter).await {
            let detail = MatrixError::MissingInterpreter {
                env: name.clone(),
                interpreter: interpreter.clone(),
            }
            .to_string();
            return if ctx.skip_missing {
                warn!(env = %name, interpreter = %interpreter, "interpreter missing, skipping");
                RunResult::skipped(&name, &detail)
            } else {
                error!(env = %name, interpreter = %interpreter, "interpreter missing");
                RunResult {
                    env: name,
                    outcome: EnvOutcome::Failed { detail },
                    steps,
                    started_at,
                    duration_ms: start.elapsed().as_millis() as u64,
                }
            };
        }
    }

    let env_dir = ctx.workspace_root.join(&name);
    if let Err(e) = tokio::fs::create_dir_all(&env_dir).await {
        return RunResult {
            env: name,
            outcome: EnvOutcome::Failed {
                detail: format!("failed to create workspace: {e}"),
            },
            steps,
            started_at,
            duration_ms: start.elapsed().as_millis() as u64,
        };
    }

    let mut artifact_dir = None;
    if let Some((key, artifact_config)) = &ctx.artifact_config {
        match artifacts.get_or_build(key, artifact_config, executor).await {
            Ok(outcome) => artifact_dir = Some(outcome.workdir),
            Err(e) => {
                return RunResult {
                    env: name,
                    outcome: EnvOutcome::Failed {
                        detail: e.to_string(),
                    },
                    steps,
                    started_at,
                    duration_ms: start.elapsed().as_millis() as u64,
                };
            }
        }
    }

    let cwd = match &ctx.spec.workdir {
        Some(dir) => ctx.project_root.join(dir),
        None => ctx.project_root.clone(),
    };

    let mut env_vars = ctx.spec.env_vars.clone();
    env_vars.insert("ENVMATRIX_ENV".to_string(), name.clone());
    env_vars.insert(
        "ENVMATRIX_ENV_DIR".to_string(),
        env_dir.to_string_lossy().to_string(),
    );
    env_vars.insert(
        "ENVMATRIX_DEPS".to_string(),
        ctx.spec.resolved_deps().join(" "),
    );
    if let Some(dir) = &artifact_dir {
        env_vars.insert(
            "ENVMATRIX_ARTIFACT_DIR".to_string(),
            dir.to_string_lossy().to_string(),
        );
    }

    // Setup first, then main commands with pass-through args appended.
    let mut batches: Vec<Vec<String>> = ctx.spec.commands_pre.clone();
    for command in &ctx.spec.commands {
        let mut argv = command.clone();
        argv.extend(ctx.passthrough.iter().cloned());
        batches.push(argv);
    }

    for argv in batches {
        if *cancel.borrow() {
            return RunResult {
                env: name,
                outcome: EnvOutcome::Skipped {
                    reason: "interrupted".to_string(),
                },
                steps,
                started_at,
                duration_ms: start.elapsed().as_millis() as u64,
            };
        }

        debug!(env = %name, command = ?argv, "running command");
        let request = CommandRequest {
            argv: argv.clone(),
            cwd: cwd.clone(),
            env_vars: env_vars.clone(),
            timeout_secs: ctx.timeout_secs,
        };

        match executor.run(&request).await {
            Ok(output) => {
                let failed = !output.success();
                let exit_code = output.exit_code;
                steps.push(StepReport {
                    argv: argv.clone(),
                    exit_code: output.exit_code,
                    stdout: output.stdout,
                    stderr: output.stderr,
                    duration_ms: output.duration_ms,
                });
                if failed {
                    error!(env = %name, command = ?argv, exit_code, "command failed");
                    let detail = MatrixError::CommandFailure {
                        env: name.clone(),
                        command: argv.join(" "),
                        exit_code,
                    }
                    .to_string();
                    return RunResult {
                        env: name,
                        outcome: EnvOutcome::Failed { detail },
                        steps,
                        started_at,
                        duration_ms: start.elapsed().as_millis() as u64,
                    };
                }
            }
            Err(e) => {
                error!(env = %name, command = ?argv, error = %e, "command could not run");
                return RunResult {
                    env: name,
                    outcome: EnvOutcome::Failed {
                        detail: format!("command '{}' failed to run: {e}", argv.join(" ")),
                    },
                    steps,
                    started_at,
                    duration_ms: start.elapsed().as_millis() as u64,
                };
            }
        }
    }

    info!(env = %name, duration_ms = start.elapsed().as_millis() as u64, "environment succeeded");
    RunResult {
        env: name,
        outcome: EnvOutcome::Succeeded,
        steps,
        started_at,
        duration_ms: start.elapsed().as_millis() as u64,
    }
}
