//! Error type for the kernel-side agents.

use thiserror::Error;

/// Errors from kernel-side reconciliation.
#[derive(Debug, Error)]
pub enum CfgAgentError {
    /// The command could not be spawned at all.
    #[error("failed to spawn `{command}`: {source}")]
    ShellSpawn {
        command: String,
        source: std::io::Error,
    },

    /// The command ran and exited non-zero.
    #[error("`{command}` exited {exit_code}: {output}")]
    ShellFailed {
        command: String,
        exit_code: i32,
        output: String,
    },

    #[error("bus error: {0}")]
    Bus(String),

    #[error("invalid entry: {0}")]
    InvalidEntry(String),
}

pub type CfgAgentResult<T> = Result<T, CfgAgentError>;
