//! Adapter implementations of the task ports.
//!
//! - [`memory`]: in-memory store and gateway fakes.
//! - [`file`]: durable file-backed store.
//! - [`process`]: gateways over `git`, `gh` and `docker`.

pub mod file;
pub mod memory;
pub mod process;
