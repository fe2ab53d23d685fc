//! Production adapters that drive external command-line tools.

mod command;
mod container;
mod git;
mod github;

pub use command::{WorkspaceLayout, shell_escape};
pub use container::{ContainerSettings, DockerRunner};
pub use git::GitCli;
pub use github::GhCli;
