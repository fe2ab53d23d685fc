//! Taskwright: a task lifecycle orchestrator for agent-driven code changes.
//!
//! A task is a natural-language goal bound to one Git branch and at most one
//! pull request. The orchestrator creates the branch, runs the coding agent
//! in an isolated environment, commits and pushes the result, and opens the
//! pull request, persisting every step so tasks survive restarts and can be
//! continued with feedback.
//!
//! # Architecture
//!
//! Taskwright follows hexagonal architecture principles:
//!
//! - **Domain**: the task aggregate and its state machine, free of I/O
//! - **Ports**: traits for the task store and the three external gateways
//! - **Adapters**: in-memory fakes, a file-backed store, and gateways that
//!   shell out to `git`, `gh` and `docker`
//!
//! # Modules
//!
//! - [`task`]: lifecycle orchestration
//! - [`daemon`]: JSON-lines socket protocol
//! - [`config`]: environment configuration
//! - [`telemetry`]: tracing setup

pub mod config;
pub mod daemon;
pub mod task;
pub mod telemetry;
