//! `dun` command-line entry point.
//!
//! Every command runs against the current directory. Configuration lives in
//! `.dun/config.toml`; discovered harnesses are cached in `.dun/harnesses.json`.

use std::env;
use std::path::Path;
use std::process;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use dun::core::harness::{AutomationMode, Harness, PREFERENCE_ORDER};
use dun::core::quorum::{DispatchMode, QuorumConfig, Strategy};
use dun::core::task::{StaleTaskError, TaskRefError};
use dun::core::types::{CheckResult, actionable};
use dun::exit_codes;
use dun::io::checks::{CheckEngine, CommandCheckEngine, EngineError};
use dun::io::config::{ConfigError, DunConfig, config_path, load_config};
use dun::io::harness::CommandHarnessCaller;
use dun::io::harness_cache::{load_or_discover, refresh, select_harnesses};
use dun::logging;
use dun::looping::{Dispatch, LoopConfig, run_loop};
use dun::tasks::{TaskNotFoundError, list_tasks, resolve_task};

#[derive(Parser)]
#[command(
    name = "dun",
    version,
    about = "Drive a repository toward passing checks with coding-agent harnesses"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Evaluate the configured checks once and print the results.
    Check,
    /// Ask harnesses to fix failing checks until they pass or a limit is hit.
    Loop(LoopArgs),
    /// List tasks for every failing check, bound to the current repository state.
    Tasks,
    /// Show one task by id.
    Task {
        /// Task id as printed by `dun tasks` (e.g. `lint#2@3f9a0c1b2d4e`).
        id: String,
        /// Print the full agent prompt for the task.
        #[arg(long)]
        prompt: bool,
    },
    /// Show which harness CLIs are installed.
    Harnesses {
        /// Probe `PATH` again and rewrite the cache.
        #[arg(long)]
        refresh: bool,
    },
}

#[derive(Args, Debug)]
struct LoopArgs {
    /// Stop after this many harness rounds.
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    max_iterations: Option<u32>,
    /// Print the first prompt without calling any harness.
    #[arg(long)]
    dry_run: bool,
    /// manual, plan, auto, or yolo.
    #[arg(long)]
    automation: Option<AutomationMode>,
    /// Single harness to ask.
    #[arg(long, conflicts_with = "quorum")]
    harness: Option<String>,
    /// Comma-separated harnesses to ask as a quorum.
    #[arg(long, value_delimiter = ',')]
    quorum: Vec<String>,
    /// majority, threshold, or any.
    #[arg(long)]
    strategy: Option<Strategy>,
    /// Successes required by the threshold strategy.
    #[arg(long)]
    threshold: Option<usize>,
    /// Harness whose answer wins a conflict.
    #[arg(long)]
    prefer: Option<String>,
    /// Stop the round for human review when harnesses disagree.
    #[arg(long)]
    escalate: bool,
    /// Call quorum harnesses concurrently.
    #[arg(long)]
    parallel: bool,
}

fn main() {
    logging::init();
    let cli = Cli::parse();
    let code = match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            exit_code_for(&err)
        }
    };
    process::exit(code);
}

fn run(cli: Cli) -> Result<i32> {
    let root = env::current_dir().context("resolve current directory")?;
    match cli.command {
        Command::Check => cmd_check(&root),
        Command::Loop(args) => cmd_loop(&root, args),
        Command::Tasks => cmd_tasks(&root),
        Command::Task { id, prompt } => cmd_task(&root, &id, prompt),
        Command::Harnesses { refresh } => cmd_harnesses(&root, refresh),
    }
}

/// Map classified errors to stable exit codes; anything else is a plain failure.
fn exit_code_for(err: &anyhow::Error) -> i32 {
    if err.downcast_ref::<TaskRefError>().is_some()
        || err.downcast_ref::<StaleTaskError>().is_some()
        || err.downcast_ref::<TaskNotFoundError>().is_some()
    {
        return exit_codes::USAGE;
    }
    if err.downcast_ref::<ConfigError>().is_some() {
        return exit_codes::CONFIG;
    }
    if err.downcast_ref::<EngineError>().is_some() {
        return exit_codes::ENGINE_FAILED;
    }
    exit_codes::CHECKS_FAILED
}

fn load(root: &Path) -> Result<DunConfig> {
    load_config(&config_path(root)).map_err(|err| ConfigError(err).into())
}

fn engine(config: &DunConfig) -> CommandCheckEngine {
    CommandCheckEngine::new(config.checks.clone())
}

fn cmd_check(root: &Path) -> Result<i32> {
    let config = load(root)?;
    let results = engine(&config).evaluate(root).context(EngineError)?;
    for check in &results {
        print_check(check);
    }
    if actionable(&results).is_empty() {
        Ok(exit_codes::OK)
    } else {
        Ok(exit_codes::CHECKS_FAILED)
    }
}

fn print_check(check: &CheckResult) {
    println!(
        "{:<6} {:<6} {}: {}",
        check.status.as_str(),
        check.priority().as_str(),
        check.id,
        check.signal
    );
    for issue in &check.issues {
        println!("         - {}", issue.summary);
    }
}

fn cmd_loop(root: &Path, args: LoopArgs) -> Result<i32> {
    let config = load(root)?;
    let cfg = loop_config(root, &config, args)?;
    let caller = CommandHarnessCaller::new(
        root,
        config.harness_timeout(),
        config.harness_output_limit_bytes,
    )
    .with_models(config.models.clone());

    let outcome = run_loop(root, &engine(&config), &caller, &cfg, |event| {
        eprintln!("{event}");
    })?;
    if let Some(prompt) = &outcome.prompt {
        println!("{prompt}");
    }
    println!(
        "stopped: {} after {} iteration(s)",
        outcome.stop, outcome.iterations
    );
    Ok(exit_codes::OK)
}

/// Merge CLI flags over the loaded config.
fn loop_config(root: &Path, config: &DunConfig, args: LoopArgs) -> Result<LoopConfig> {
    let explicit: Vec<String> = if args.quorum.is_empty() {
        args.harness.into_iter().collect()
    } else {
        args.quorum.clone()
    };
    let harnesses = select_harnesses(&explicit, config, || load_or_discover(root))?;

    let mut settings = config.quorum.clone();
    if args.strategy.is_some() {
        settings.strategy = args.strategy;
    }
    if let Some(threshold) = args.threshold {
        settings.threshold = threshold;
    }
    if args.prefer.is_some() {
        settings.prefer = args.prefer;
    }
    settings.escalate |= args.escalate;
    if args.parallel {
        settings.mode = DispatchMode::Parallel;
    }

    let dispatch = match harnesses.as_slice() {
        [] if args.dry_run => Dispatch::Quorum(QuorumConfig::default()),
        [] => {
            return Err(ConfigError::msg(format!(
                "no harness available; install one of {} or set `harnesses` in .dun/config.toml",
                Harness::known_names()
            ))
            .into());
        }
        [single] if args.quorum.is_empty() => Dispatch::Single(single.clone()),
        _ => Dispatch::Quorum(settings.to_quorum_config(harnesses.clone())),
    };

    Ok(LoopConfig {
        max_iterations: args.max_iterations.unwrap_or(config.max_iterations),
        dry_run: args.dry_run,
        automation: args.automation.unwrap_or(config.automation),
        dispatch,
    })
}

fn cmd_tasks(root: &Path) -> Result<i32> {
    let config = load(root)?;
    let listing = list_tasks(root, &engine(&config))?;
    if listing.groups.is_empty() {
        println!("no tasks: all checks pass");
        return Ok(exit_codes::OK);
    }
    for group in &listing.groups {
        println!(
            "[{}] {} ({}): {}",
            group.priority, group.check_id, group.status, group.signal
        );
        for task in &group.tasks {
            match &task.path {
                Some(path) => println!("  {}  {} ({path})", task.id, task.summary),
                None => println!("  {}  {}", task.id, task.summary),
            }
        }
        if group.omitted > 0 {
            println!("  ... {} more", group.omitted);
        }
    }
    Ok(exit_codes::OK)
}

fn cmd_task(root: &Path, id: &str, with_prompt: bool) -> Result<i32> {
    let config = load(root)?;
    let resolved = resolve_task(root, &engine(&config), id)?;
    if with_prompt {
        println!("{}", resolved.prompt()?);
        return Ok(exit_codes::OK);
    }
    println!("{}", resolved.task.id);
    println!(
        "check: {} ({}, {})",
        resolved.check.id,
        resolved.check.status,
        resolved.check.priority()
    );
    println!("summary: {}", resolved.task.summary);
    if let Some(path) = &resolved.task.path {
        println!("path: {path}");
    }
    if let Some(reason) = &resolved.task.reason {
        println!("reason: {reason}");
    }
    Ok(exit_codes::OK)
}

fn cmd_harnesses(root: &Path, force_refresh: bool) -> Result<i32> {
    let cache = if force_refresh {
        refresh(root)?
    } else {
        load_or_discover(root)?
    };
    for harness in PREFERENCE_ORDER {
        let state = if cache.available.contains(&harness) {
            "available"
        } else {
            "missing"
        };
        println!("{:<9} {:<13} {state}", harness.name(), harness.binary());
    }
    match cache.preferred() {
        Some(harness) => println!("default: {harness}"),
        None => println!("default: none"),
    }
    Ok(exit_codes::OK)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loop_args(argv: &[&str]) -> LoopArgs {
        let mut full = vec!["dun", "loop"];
        full.extend_from_slice(argv);
        match Cli::parse_from(full).command {
            Command::Loop(args) => args,
            _ => panic!("expected loop command"),
        }
    }

    #[test]
    fn parse_loop_flags() {
        let args = loop_args(&[
            "--max-iterations",
            "3",
            "--quorum",
            "codex,claude,gemini",
            "--strategy",
            "majority",
            "--parallel",
        ]);
        assert_eq!(args.max_iterations, Some(3));
        assert_eq!(args.quorum, vec!["codex", "claude", "gemini"]);
        assert_eq!(args.strategy, Some(Strategy::Majority));
        assert!(args.parallel);
    }

    #[test]
    fn parser_rejects_zero_iterations_and_conflicting_dispatch() {
        assert!(Cli::try_parse_from(["dun", "loop", "--max-iterations", "0"]).is_err());
        let conflicting = ["dun", "loop", "--harness", "codex", "--quorum", "a,b"];
        assert!(Cli::try_parse_from(conflicting).is_err());
    }

    #[test]
    fn parse_task_with_prompt() {
        let cli = Cli::parse_from(["dun", "task", "lint#1@abc", "--prompt"]);
        assert!(matches!(cli.command, Command::Task { prompt: true, .. }));
    }

    #[test]
    fn loop_config_merges_flags_over_config() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = DunConfig {
            harnesses: vec!["codex".to_string()],
            ..DunConfig::default()
        };
        let cfg = loop_config(temp.path(), &config, loop_args(&["--automation", "plan"]))
            .expect("config");
        assert_eq!(cfg.dispatch, Dispatch::Single("codex".to_string()));
        assert_eq!(cfg.automation, AutomationMode::Plan);
        assert_eq!(cfg.max_iterations, 10);

        let cfg = loop_config(
            temp.path(),
            &config,
            loop_args(&["--quorum", "codex,claude", "--prefer", "claude", "--escalate"]),
        )
        .expect("config");
        let Dispatch::Quorum(quorum) = cfg.dispatch else {
            panic!("expected quorum dispatch");
        };
        assert_eq!(quorum.harnesses, vec!["codex", "claude"]);
        assert_eq!(quorum.prefer.as_deref(), Some("claude"));
        assert!(quorum.escalate);
    }

    #[test]
    fn exit_codes_follow_error_class() {
        let err: anyhow::Error = ConfigError::msg("bad").into();
        assert_eq!(exit_code_for(&err), exit_codes::CONFIG);
        let err = anyhow::Error::from(ConfigError::msg("no checks")).context(EngineError);
        assert_eq!(exit_code_for(&err), exit_codes::CONFIG);
        let err = anyhow::anyhow!("boom").context(EngineError);
        assert_eq!(exit_code_for(&err), exit_codes::ENGINE_FAILED);
        let err: anyhow::Error = "x".parse::<dun::core::task::TaskRef>().unwrap_err().into();
        assert_eq!(exit_code_for(&err), exit_codes::USAGE);
    }
}
