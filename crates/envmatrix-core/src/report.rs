//! Aggregated run reporting and process exit codes.

use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::runner::{EnvOutcome, RunResult};

/// Process exit code for a run with at least one failed environment.
pub const EXIT_FAILURE: i32 = 1;

/// Process exit code for a run where every environment was skipped. A run
/// that executed nothing is distinguishable from one that passed.
pub const EXIT_ALL_SKIPPED: i32 = 3;

/// Overall verdict of one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Passed,
    Failed,
    AllSkipped,
}

/// Aggregated view over per-environment results, in plan order.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub results: Vec<RunResult>,
}

/// Serializable summary line for one environment.
#[derive(Debug, Serialize)]
pub struct EnvSummary<'a> {
    pub env: &'a str,
    pub status: &'static str,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<&'a str>,
}

/// Serializable whole-run summary, emitted by `--json`.
#[derive(Debug, Serialize)]
pub struct RunSummary<'a> {
    pub generated_at: DateTime<Utc>,
    pub verdict: Verdict,
    pub exit_code: i32,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub envs: Vec<EnvSummary<'a>>,
}

impl RunReport {
    pub fn new(results: Vec<RunResult>) -> Self {
        Self { results }
    }

    pub fn succeeded(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.outcome == EnvOutcome::Succeeded)
            .count()
    }

    pub fn failed(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.outcome.is_failure())
            .count()
    }

    pub fn skipped(&self) -> usize {
        self.results.iter().filter(|r| r.outcome.is_skip()).count()
    }

    /// Failure wins over everything; all-skipped only applies when nothing
    /// ran at all. An empty result set counts as all-skipped.
    pub fn verdict(&self) -> Verdict {
        if self.failed() > 0 {
            Verdict::Failed
        } else if self.succeeded() == 0 {
            Verdict::AllSkipped
        } else {
            Verdict::Passed
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self.verdict() {
            Verdict::Passed => 0,
            Verdict::Failed => EXIT_FAILURE,
            Verdict::AllSkipped => EXIT_ALL_SKIPPED,
        }
    }

    /// Structured summary for machine consumption.
    pub fn summary(&self) -> RunSummary<'_> {
        RunSummary {
            generated_at: Utc::now(),
            verdict: self.verdict(),
            exit_code: self.exit_code(),
            succeeded: self.succeeded(),
            failed: self.failed(),
            skipped: self.skipped(),
            envs: self
                .results
                .iter()
                .map(|r| EnvSummary {
                    env: &r.env,
                    status: status_label(&r.outcome),
                    duration_ms: r.duration_ms,
                    detail: outcome_detail(&r.outcome),
                })
                .collect(),
        }
    }

    /// Human-readable report. With `verbose`, failed environments include
    /// the captured output of their failing command.
    pub fn render(&self, verbose: bool) -> String {
        let mut out = String::new();
        for result in &self.results {
            let label = status_label(&result.outcome);
            match outcome_detail(&result.outcome) {
                Some(detail) => {
                    let _ = writeln!(
                        out,
                        "{label:>7}  {}  ({} ms)  {detail}",
                        result.env, result.duration_ms
                    );
                }
                None => {
                    let _ = writeln!(
                        out,
                        "{label:>7}  {}  ({} ms)",
                        result.env, result.duration_ms
                    );
                }
            }

            if verbose && result.outcome.is_failure() {
                if let Some(step) = result.steps.last() {
                    if !step.stdout.is_empty() {
                        let _ = writeln!(out, "  stdout:\n{}", indent(&step.stdout));
                    }
                    if !step.stderr.is_empty() {
                        let _ = writeln!(out, "  stderr:\n{}", indent(&step.stderr));
                    }
                }
            }
        }

        let _ = writeln!(
            out,
            "\n{} succeeded, {} failed, {} skipped",
            self.succeeded(),
            self.failed(),
            self.skipped()
        );
        out
    }
}

fn status_label(outcome: &EnvOutcome) -> &'static str {
    match outcome {
        EnvOutcome::Succeeded => "ok",
        EnvOutcome::Failed { .. } => "FAILED",
        EnvOutcome::Skipped { .. } => "skipped",
    }
}

fn outcome_detail(outcome: &EnvOutcome) -> Option<&str> {
    match outcome {
        EnvOutcome::Succeeded => None,
        EnvOutcome::Failed { detail } => Some(detail),
        EnvOutcome::Skipped { reason } => Some(reason),
    }
}

fn indent(text: &str) -> String {
    text.lines()
        .map(|line| format!("    {line}"))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(env: &str, outcome: EnvOutcome) -> RunResult {
        RunResult {
            env: env.to_string(),
            outcome,
            steps: Vec::new(),
            started_at: Utc::now(),
            duration_ms: 10,
        }
    }

    #[test]
    fn test_all_success_exits_zero() {
        let report = RunReport::new(vec![
            result("a", EnvOutcome::Succeeded),
            result("b", EnvOutcome::Succeeded),
        ]);
        assert_eq!(report.verdict(), Verdict::Passed);
        assert_eq!(report.exit_code(), 0);
    }

    #[test]
    fn test_any_failure_exits_one() {
        let report = RunReport::new(vec![
            result("a", EnvOutcome::Succeeded),
            result(
                "b",
                EnvOutcome::Failed {
                    detail: "command 'pytest' exited with code 1".to_string(),
                },
            ),
            result(
                "c",
                EnvOutcome::Skipped {
                    reason: "interpreter 'python9.9' not found".to_string(),
                },
            ),
        ]);
        assert_eq!(report.verdict(), Verdict::Failed);
        assert_eq!(report.exit_code(), EXIT_FAILURE);
    }

    #[test]
    fn test_all_skipped_exits_distinctly() {
        let report = RunReport::new(vec![
            result(
                "a",
                EnvOutcome::Skipped {
                    reason: "interpreter 'python9.9' not found".to_string(),
                },
            ),
            result(
                "b",
                EnvOutcome::Skipped {
                    reason: "interpreter 'python8.8' not found".to_string(),
                },
            ),
        ]);
        assert_eq!(report.verdict(), Verdict::AllSkipped);
        assert_eq!(report.exit_code(), EXIT_ALL_SKIPPED);
    }

    #[test]
    fn test_mixed_success_and_skip_passes() {
        let report = RunReport::new(vec![
            result("a", EnvOutcome::Succeeded),
            result(
                "b",
                EnvOutcome::Skipped {
                    reason: "interpreter 'python9.9' not found".to_string(),
                },
            ),
        ]);
        assert_eq!(report.exit_code(), 0);
    }

    #[test]
    fn test_render_mentions_every_env_and_counts() {
        let report = RunReport::new(vec![
            result("unit", EnvOutcome::Succeeded),
            result(
                "lint",
                EnvOutcome::Failed {
                    detail: "command 'flake8' exited with code 1".to_string(),
                },
            ),
        ]);
        let text = report.render(false);
        assert!(text.contains("unit"));
        assert!(text.contains("lint"));
        assert!(text.contains("1 succeeded, 1 failed, 0 skipped"));
    }

    #[test]
    fn test_summary_serializes_with_details() {
        let report = RunReport::new(vec![result(
            "unit",
            EnvOutcome::Skipped {
                reason: "fail-fast".to_string(),
            },
        )]);
        let json = serde_json::to_string(&report.summary()).unwrap();
        assert!(json.contains("\"all_skipped\""));
        assert!(json.contains("\"fail-fast\""));
        assert!(json.contains("\"exit_code\":3"));
    }
}
