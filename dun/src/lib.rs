//! Drive a repository toward passing checks with external coding agents.
//!
//! dun evaluates a repository's checks, renders a prompt for what is still
//! failing, and asks one or more harness CLIs (codex, claude, gemini, ...) to
//! fix it, reconciling their answers through a quorum when several are asked.
//!
//! - **[`core`]**: Pure, deterministic logic (status protocol, quorum
//!   arithmetic, task identity). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting adapters (git, subprocesses, config files,
//!   prompt rendering). Traits at the seams so tests never spawn harnesses.
//!
//! Orchestration modules ([`quorum`], [`looping`], [`tasks`]) coordinate
//! core logic with I/O to implement CLI commands.

pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod looping;
pub mod quorum;
pub mod tasks;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
