//! Loop-level tests driving `run_loop` with scripted engines and harnesses.
//!
//! Nothing here spawns a harness; the scripted caller records every call so
//! the tests can assert exactly how often each harness was asked.

use dun::core::harness::AutomationMode;
use dun::core::quorum::{DispatchMode, QuorumConfig, QuorumNotice, Strategy};
use dun::looping::{Dispatch, LoopConfig, LoopEvent, LoopStop, run_loop};
use dun::test_support::{
    ScriptedCheckEngine, ScriptedHarness, TestRepo, failing, passing, reply,
};

fn single(max_iterations: u32) -> LoopConfig {
    LoopConfig {
        max_iterations,
        dry_run: false,
        automation: AutomationMode::Auto,
        dispatch: Dispatch::Single("claude".to_string()),
    }
}

fn quorum(harnesses: &[&str], mode: DispatchMode) -> QuorumConfig {
    QuorumConfig {
        mode,
        strategy: Some(Strategy::Majority),
        ..QuorumConfig::new(harnesses.iter().copied())
    }
}

#[test]
fn all_passing_checks_never_call_a_harness() {
    let repo = TestRepo::new().expect("repo");
    let engine = ScriptedCheckEngine::new(vec![vec![passing("fmt"), passing("lint")]]);
    let caller = ScriptedHarness::new().respond("claude", reply("unused", true));

    let outcome = run_loop(repo.path(), &engine, &caller, &single(5), |_| {}).expect("loop");

    assert_eq!(outcome.stop, LoopStop::AllChecksPass);
    assert_eq!(outcome.stop.to_string(), "all checks pass");
    assert_eq!(outcome.iterations, 0);
    assert!(caller.calls().is_empty());
}

#[test]
fn exit_signal_stops_after_exactly_one_call() {
    let repo = TestRepo::new().expect("repo");
    let engine = ScriptedCheckEngine::new(vec![vec![failing("lint", &["unused import"])]]);
    let caller = ScriptedHarness::new().respond("claude", reply("fixed the import", true));

    let outcome = run_loop(repo.path(), &engine, &caller, &single(5), |_| {}).expect("loop");

    assert_eq!(outcome.stop, LoopStop::ExitSignal);
    assert_eq!(outcome.stop.to_string(), "exit signal received");
    assert_eq!(caller.calls().len(), 1);
    let call = &caller.calls()[0];
    assert_eq!(call.harness, "claude");
    assert!(call.prompt.contains("unused import"));
    assert!(call.prompt.contains(&repo.fingerprint()));
}

#[test]
fn max_iterations_bounds_a_harness_that_never_signals() {
    let repo = TestRepo::new().expect("repo");
    let engine = ScriptedCheckEngine::new(vec![vec![failing("tests", &["2 failing"])]]);
    let caller = ScriptedHarness::new().respond("claude", reply("still working", false));

    let outcome = run_loop(repo.path(), &engine, &caller, &single(2), |_| {}).expect("loop");

    assert_eq!(outcome.stop, LoopStop::MaxIterations(2));
    assert_eq!(outcome.stop.to_string(), "max iterations (2) reached");
    assert_eq!(caller.calls().len(), 2);
    assert_eq!(engine.runs(), 2);
}

#[test]
fn dry_run_evaluates_once_and_calls_nobody() {
    let repo = TestRepo::new().expect("repo");
    let engine = ScriptedCheckEngine::new(vec![vec![failing("lint", &["bad name"])]]);
    let caller = ScriptedHarness::new();
    let cfg = LoopConfig {
        dry_run: true,
        ..single(5)
    };

    let outcome = run_loop(repo.path(), &engine, &caller, &cfg, |_| {}).expect("loop");

    assert_eq!(outcome.stop, LoopStop::DryRun);
    assert_eq!(engine.runs(), 1);
    assert!(caller.calls().is_empty());
    let prompt = outcome.prompt.expect("dry run prompt");
    assert!(prompt.contains("bad name"));
    assert!(prompt.contains("---DUN_STATUS---"));
}

#[test]
fn quorum_round_that_agrees_on_done_stops_the_loop() {
    let repo = TestRepo::new().expect("repo");
    let engine = ScriptedCheckEngine::new(vec![vec![failing("lint", &["bad"])]]);
    let caller = ScriptedHarness::new()
        .respond("codex", reply("done", true))
        .fail("claude", "exit status 1")
        .respond("gemini", reply("done too", true));
    let cfg = LoopConfig {
        dispatch: Dispatch::Quorum(quorum(
            &["codex", "claude", "gemini"],
            DispatchMode::Sequential,
        )),
        ..single(5)
    };
    let mut events = Vec::new();

    let outcome = run_loop(repo.path(), &engine, &caller, &cfg, |event| {
        events.push(event.clone());
    })
    .expect("loop");

    assert_eq!(outcome.stop, LoopStop::ExitSignal);
    assert_eq!(caller.call_names(), vec!["codex", "claude", "gemini"]);
    assert!(events.iter().any(|event| matches!(
        event,
        LoopEvent::Quorum(QuorumNotice::HarnessFailed { harness, .. }) if harness == "claude"
    )));
    assert!(events.iter().any(|event| matches!(
        event,
        LoopEvent::Responded { harness, exit_signal: true, .. } if harness == "codex"
    )));
}

#[test]
fn unresolved_conflict_is_not_fatal_and_loop_continues() {
    let repo = TestRepo::new().expect("repo");
    let engine = ScriptedCheckEngine::new(vec![vec![failing("lint", &["bad"])]]);
    let caller = ScriptedHarness::new()
        .respond("codex", reply("done", true))
        .respond("claude", reply("not yet", false));
    let cfg = LoopConfig {
        dispatch: Dispatch::Quorum(QuorumConfig {
            strategy: Some(Strategy::Any),
            ..quorum(&["codex", "claude"], DispatchMode::Parallel)
        }),
        ..single(3)
    };
    let mut messages = Vec::new();

    let outcome = run_loop(repo.path(), &engine, &caller, &cfg, |event| {
        messages.push(event.to_string());
    })
    .expect("loop");

    assert_eq!(outcome.stop, LoopStop::MaxIterations(3));
    assert_eq!(caller.calls().len(), 6);
    let conflicts = messages
        .iter()
        .filter(|message| message.starts_with("Conflict detected: codex=true, claude=false"))
        .count();
    assert_eq!(conflicts, 3);
    assert!(messages.iter().any(|message| message.contains("no usable answer")));
}

#[test]
fn escalated_conflict_is_reported_for_review() {
    let repo = TestRepo::new().expect("repo");
    let engine = ScriptedCheckEngine::new(vec![vec![failing("lint", &["bad"])]]);
    let caller = ScriptedHarness::new()
        .respond("codex", reply("done", true))
        .respond("claude", reply("not yet", false));
    let cfg = LoopConfig {
        dispatch: Dispatch::Quorum(QuorumConfig {
            strategy: Some(Strategy::Any),
            escalate: true,
            ..quorum(&["codex", "claude"], DispatchMode::Sequential)
        }),
        ..single(1)
    };
    let mut messages = Vec::new();

    run_loop(repo.path(), &engine, &caller, &cfg, |event| {
        messages.push(event.to_string());
    })
    .expect("loop");

    assert!(
        messages
            .iter()
            .any(|m| m.starts_with("Escalating conflict for human review"))
    );
    assert!(!messages.iter().any(|m| m.starts_with("Conflict detected")));
}

#[test]
fn preferred_harness_settles_a_parallel_conflict() {
    let repo = TestRepo::new().expect("repo");
    let engine = ScriptedCheckEngine::new(vec![vec![failing("lint", &["bad"])]]);
    let caller = ScriptedHarness::new()
        .respond_after("codex", reply("not yet", false), 100)
        .respond("claude", reply("done", true));
    let cfg = LoopConfig {
        dispatch: Dispatch::Quorum(QuorumConfig {
            strategy: Some(Strategy::Any),
            prefer: Some("claude".to_string()),
            ..quorum(&["codex", "claude"], DispatchMode::Parallel)
        }),
        ..single(5)
    };

    let outcome = run_loop(repo.path(), &engine, &caller, &cfg, |_| {}).expect("loop");

    assert_eq!(outcome.stop, LoopStop::ExitSignal);
    assert_eq!(outcome.iterations, 1);
}
