//! I/O adapters for dun commands: subprocesses, git, and files under `.dun/`.

pub mod checks;
pub mod config;
pub mod git;
pub mod harness;
pub mod harness_cache;
pub mod process;
pub mod prompt;
