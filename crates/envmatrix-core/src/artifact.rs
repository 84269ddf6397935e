//! Shared build artifacts, produced at most once per invocation.
//!
//! Several environments may consume the same artifact (a wheel, a compiled
//! fixture). The first environment to ask triggers the build; everyone else
//! awaits the same cell and observes the identical outcome, including a
//! build failure.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info};

use crate::config::ArtifactConfig;
use crate::error::{MatrixError, MatrixResult};
use crate::exec::{CommandExecutor, CommandRequest};

/// Outcome of one artifact build, shared by every consumer.
#[derive(Debug, Clone)]
pub struct ArtifactOutcome {
    /// Artifact key.
    pub key: String,

    /// Directory the build command ran in; consumers resolve artifact
    /// files relative to this.
    pub workdir: PathBuf,

    /// Build duration in milliseconds.
    pub duration_ms: u64,
}

type Cell = Arc<OnceCell<Result<ArtifactOutcome, String>>>;

/// Per-invocation artifact cache.
pub struct ArtifactCache {
    project_root: PathBuf,
    timeout_secs: u64,
    cells: Mutex<HashMap<String, Cell>>,
}

impl ArtifactCache {
    pub fn new(project_root: PathBuf, timeout_secs: u64) -> Self {
        Self {
            project_root,
            timeout_secs,
            cells: Mutex::new(HashMap::new()),
        }
    }

    /// Build `key` if no one has yet, otherwise await the existing build.
    ///
    /// Exactly one build command runs per key per invocation regardless of
    /// how many environments consume it or how concurrently they arrive.
    /// When the build fails, every consumer gets
    /// [`MatrixError::ArtifactBuildFailure`] with the same reason.
    pub async fn get_or_build(
        &self,
        key: &str,
        config: &ArtifactConfig,
        executor: &dyn CommandExecutor,
    ) -> MatrixResult<ArtifactOutcome> {
        let cell = {
            let mut cells = self.cells.lock().await;
            Arc::clone(cells.entry(key.to_string()).or_default())
        };

        // get_or_init publishes Err outcomes too; a failed build must not
        // be retried by later consumers within the same invocation.
        let outcome = cell
            .get_or_init(|| self.build(key, config, executor))
            .await;

        match outcome {
            Ok(outcome) => Ok(outcome.clone()),
            Err(reason) => Err(MatrixError::ArtifactBuildFailure {
                artifact: key.to_string(),
                reason: reason.clone(),
            }),
        }
    }

    async fn build(
        &self,
        key: &str,
        config: &ArtifactConfig,
        executor: &dyn CommandExecutor,
    ) -> Result<ArtifactOutcome, String> {
        let workdir = match &config.workdir {
            Some(dir) => self.project_root.join(dir),
            None => self.project_root.clone(),
        };

        info!(artifact = %key, command = ?config.command, "building shared artifact");

        let request = CommandRequest {
            argv: config.command.clone(),
            cwd: workdir.clone(),
            env_vars: Default::default(),
            timeout_secs: self.timeout_secs,
        };

        let output = executor
            .run(&request)
            .await
            .map_err(|e| e.to_string())?;

        if !output.success() {
            let reason = format!(
                "build command exited with code {}: {}",
                output.exit_code,
                output.stderr.trim()
            );
            return Err(reason);
        }

        debug!(artifact = %key, duration_ms = output.duration_ms, "artifact ready");

        Ok(ArtifactOutcome {
            key: key.to_string(),
            workdir,
            duration_ms: output.duration_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::CommandOutput;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingExecutor {
        calls: AtomicUsize,
        exit_code: i32,
    }

    impl CountingExecutor {
        fn new(exit_code: i32) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                exit_code,
            }
        }
    }

    #[async_trait]
    impl CommandExecutor for CountingExecutor {
        async fn run(&self, _request: &CommandRequest) -> MatrixResult<CommandOutput> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(CommandOutput {
                exit_code: self.exit_code,
                stdout: String::new(),
                stderr: "boom".to_string(),
                duration_ms: 1,
            })
        }

        async fn probe(&self, _program: &str) -> bool {
            true
        }
    }

    fn wheel_config() -> ArtifactConfig {
        ArtifactConfig {
            command: vec!["make".to_string(), "wheel".to_string()],
            workdir: None,
        }
    }

    #[tokio::test]
    async fn test_artifact_builds_once_for_many_consumers() {
        let cache = Arc::new(ArtifactCache::new(PathBuf::from("/tmp"), 0));
        let executor = Arc::new(CountingExecutor::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            let executor = Arc::clone(&executor);
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_build("wheel", &wheel_config(), executor.as_ref())
                    .await
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }
        assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_build_propagates_to_all_consumers_without_retry() {
        let cache = ArtifactCache::new(PathBuf::from("/tmp"), 0);
        let executor = CountingExecutor::new(2);

        for _ in 0..3 {
            let err = cache
                .get_or_build("wheel", &wheel_config(), &executor)
                .await
                .unwrap_err();
            assert!(matches!(err, MatrixError::ArtifactBuildFailure { .. }));
            assert!(err.to_string().contains("boom"));
        }
        assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_distinct_keys_build_independently() {
        let cache = ArtifactCache::new(PathBuf::from("/tmp"), 0);
        let executor = CountingExecutor::new(0);

        cache
            .get_or_build("wheel", &wheel_config(), &executor)
            .await
            .unwrap();
        cache
            .get_or_build("sdist", &wheel_config(), &executor)
            .await
            .unwrap();
        assert_eq!(executor.calls.load(Ordering::SeqCst), 2);
    }
}
