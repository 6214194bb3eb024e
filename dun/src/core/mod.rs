//! Deterministic, pure logic shared by the dun core.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data (check results, harness responses, task ids) and return deterministic
//! outputs suitable for tests.

pub mod harness;
pub mod quorum;
pub mod status;
pub mod task;
pub mod types;
