//! Shell execution seam.
//!
//! The agent runs against [`SystemShell`] in production and
//! [`RecordingShell`] in tests, which captures command lines instead of
//! touching the kernel.

use std::sync::Mutex;

use async_trait::async_trait;
use swsync_cfgagent_common::shell::{self, ExecResult};
use swsync_cfgagent_common::CfgAgentResult;

#[async_trait]
pub trait ShellExecutor: Send + Sync {
    async fn exec(&self, cmd: &str) -> CfgAgentResult<ExecResult>;
}

/// Runs commands for real.
pub struct SystemShell;

#[async_trait]
impl ShellExecutor for SystemShell {
    async fn exec(&self, cmd: &str) -> CfgAgentResult<ExecResult> {
        shell::exec(cmd).await
    }
}

/// Captures command lines and reports success.
#[derive(Default)]
pub struct RecordingShell {
    commands: Mutex<Vec<String>>,
}

impl RecordingShell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    pub fn command_count(&self) -> usize {
        self.commands.lock().unwrap().len()
    }

    pub fn clear(&self) {
        self.commands.lock().unwrap().clear();
    }
}

#[async_trait]
impl ShellExecutor for RecordingShell {
    async fn exec(&self, cmd: &str) -> CfgAgentResult<ExecResult> {
        self.commands.lock().unwrap().push(cmd.to_string());
        Ok(ExecResult {
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
        })
    }
}
