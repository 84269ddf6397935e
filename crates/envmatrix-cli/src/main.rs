//! envmatrix - environment matrix runner CLI
//!
//! ## Commands
//!
//! - `run`: Execute selected environments in dependency order
//! - `list`: Show every environment the configuration expands to
//! - `plan`: Show the execution plan for a selection without running it

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{debug, warn};

use envmatrix_core::exec::ProcessExecutor;
use envmatrix_core::telemetry::init_tracing;
use envmatrix_core::{
    plan, Matrix, MatrixConfig, MatrixRunner, PlanOptions, RunReport, DEFAULT_CONFIG_FILE,
};

#[derive(Parser)]
#[command(name = "envmatrix")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Run commands across a matrix of isolated environments", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON output (and JSON-formatted log lines)
    #[arg(long, global = true)]
    json: bool,

    /// Path to the configuration file
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute environments in dependency order
    Run {
        /// Environments to run (factor syntax allowed; may repeat or be
        /// comma-separated). Defaults to the configured envlist.
        #[arg(short, long = "env")]
        envs: Vec<String>,

        /// Concurrent environments within one dependency level
        #[arg(long)]
        workers: Option<usize>,

        /// Stop launching new environments after the first failure
        #[arg(long)]
        fail_fast: bool,

        /// Record environments with a missing interpreter as skipped
        #[arg(long)]
        skip_missing_interpreters: bool,

        /// Arguments appended to every main command (after `--`)
        #[arg(last = true)]
        passthrough: Vec<String>,
    },

    /// List every environment the configuration expands to
    List,

    /// Show the execution plan for a selection without running anything
    Plan {
        /// Environments to plan (factor syntax allowed; may repeat or be
        /// comma-separated). Defaults to the configured envlist.
        #[arg(short, long = "env")]
        envs: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json, cli.verbose);

    let config = MatrixConfig::load(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    let matrix = Matrix::from_config(&config).context("failed to expand environment matrix")?;
    debug!(envs = matrix.len(), digest = %matrix.digest(), "matrix expanded");

    match cli.command {
        Commands::Run {
            envs,
            workers,
            fail_fast,
            skip_missing_interpreters,
            passthrough,
        } => {
            let mut config = config;
            if let Some(workers) = workers {
                config.options.workers = workers;
            }
            config.options.fail_fast |= fail_fast;
            config.options.skip_missing_interpreters |= skip_missing_interpreters;
            cmd_run(config, matrix, envs, passthrough, cli.json, cli.verbose).await
        }
        Commands::List => cmd_list(&config, &matrix, cli.json),
        Commands::Plan { envs } => cmd_plan(&config, &matrix, envs, cli.json),
    }
}

/// Split each `-e` value on commas outside brace groups, so
/// `-e py{311,312},lint` keeps the factor expression intact.
fn normalize_selection(envs: &[String]) -> Vec<String> {
    envs.iter()
        .flat_map(|value| envmatrix_core::split_selection(value))
        .collect()
}

fn selection_or_envlist(config: &MatrixConfig, matrix: &Matrix, envs: Vec<String>) -> Vec<String> {
    let envs = normalize_selection(&envs);
    if !envs.is_empty() {
        envs
    } else if !config.options.envlist.is_empty() {
        config.options.envlist.clone()
    } else {
        matrix.envs().iter().map(|e| e.name.clone()).collect()
    }
}

async fn cmd_run(
    config: MatrixConfig,
    matrix: Matrix,
    envs: Vec<String>,
    passthrough: Vec<String>,
    json: bool,
    verbose: bool,
) -> Result<()> {
    let selection = selection_or_envlist(&config, &matrix, envs);
    let plan_options = PlanOptions {
        skip_unlisted_deps: config.options.skip_unlisted_deps,
    };
    let plan = plan(&matrix, &selection, plan_options).context("failed to build execution plan")?;

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; letting in-flight commands finish");
            let _ = cancel_tx.send(true);
        }
    });

    let project_root = std::env::current_dir().context("failed to resolve current directory")?;
    let runner = MatrixRunner::new(
        matrix,
        config,
        project_root,
        Arc::new(ProcessExecutor),
        passthrough,
        cancel_rx,
    );

    let results = runner.run(&plan).await.context("run failed")?;
    let report = RunReport::new(results);

    if json {
        println!("{}", serde_json::to_string_pretty(&report.summary())?);
    } else {
        print!("{}", report.render(verbose));
    }

    std::process::exit(report.exit_code());
}

fn cmd_list(config: &MatrixConfig, matrix: &Matrix, json: bool) -> Result<()> {
    let default_selection =
        envmatrix_core::expand_all(&config.options.envlist).unwrap_or_default();

    if json {
        let names: Vec<&str> = matrix.envs().iter().map(|e| e.name.as_str()).collect();
        println!("{}", serde_json::to_string_pretty(&names)?);
        return Ok(());
    }
    for env in matrix.envs() {
        // Envs in the default envlist are marked with a star.
        let marker = if default_selection.contains(&env.name) {
            "*"
        } else {
            " "
        };
        match &env.description {
            Some(description) => println!("{marker} {}  - {}", env.name, description),
            None => println!("{marker} {}", env.name),
        }
    }
    Ok(())
}

fn cmd_plan(config: &MatrixConfig, matrix: &Matrix, envs: Vec<String>, json: bool) -> Result<()> {
    let selection = selection_or_envlist(config, matrix, envs);
    let plan_options = PlanOptions {
        skip_unlisted_deps: config.options.skip_unlisted_deps,
    };
    let plan = plan(matrix, &selection, plan_options).context("failed to build execution plan")?;

    if json {
        let groups: Vec<&Vec<String>> = plan.groups.iter().map(|g| &g.envs).collect();
        println!("{}", serde_json::to_string_pretty(&groups)?);
        return Ok(());
    }

    for (i, group) in plan.groups.iter().enumerate() {
        println!("group {}: {}", i + 1, group.envs.join(", "));
    }
    if !plan.implicit.is_empty() {
        println!("pulled in by depends: {}", plan.implicit.join(", "));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_parses_selection_and_passthrough() {
        let cli = Cli::parse_from([
            "envmatrix", "run", "-e", "py{311,312}", "-e", "lint", "--", "-k", "smoke",
        ]);
        match cli.command {
            Commands::Run {
                envs, passthrough, ..
            } => {
                assert_eq!(envs, vec!["py{311,312}", "lint"]);
                assert_eq!(passthrough, vec!["-k", "smoke"]);
            }
            _ => panic!("expected run subcommand"),
        }
    }

    #[test]
    fn test_comma_selection_keeps_brace_groups_intact() {
        let cli = Cli::parse_from(["envmatrix", "run", "-e", "py{311,312},lint"]);
        match cli.command {
            Commands::Run { envs, .. } => {
                // clap must not split the value; the comma inside the brace
                // group is factor syntax.
                assert_eq!(envs, vec!["py{311,312},lint"]);
                assert_eq!(
                    normalize_selection(&envs),
                    vec!["py{311,312}", "lint"]
                );
            }
            _ => panic!("expected run subcommand"),
        }
    }

    #[test]
    fn test_config_flag_is_global() {
        let cli = Cli::parse_from(["envmatrix", "list", "--config", "other.toml"]);
        assert_eq!(cli.config, PathBuf::from("other.toml"));
    }
}
