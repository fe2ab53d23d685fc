//! Task lifecycle orchestration.
//!
//! Tasks move `submitted → branch_created → (pr_created) → running →
//! committing → completed`, with `failed` reachable from every non-terminal
//! state. Finished tasks accept feedback and run again on the same branch.
//! The module follows hexagonal architecture:
//!
//! - Domain types in [`domain`]
//! - Port contracts in [`ports`]
//! - Adapter implementations in [`adapters`]
//! - Orchestration services in [`services`]

pub mod adapters;
pub mod domain;
pub mod ports;
pub mod services;

#[cfg(test)]
mod tests;
