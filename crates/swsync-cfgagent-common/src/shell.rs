//! Shell command execution with safe quoting.
//!
//! Kernel-side intent is applied through `ip`/`bridge` invocations. Every
//! operand interpolated into a command line goes through [`shellquote`] so a
//! hostile alias on the bus cannot break out of the command.

use once_cell::sync::Lazy;
use regex::Regex;
use std::process::Stdio;
use tokio::process::Command;

use crate::error::{CfgAgentError, CfgAgentResult};

/// Path to the `ip` command.
pub const IP_CMD: &str = "/sbin/ip";

/// Path to the `bridge` command.
pub const BRIDGE_CMD: &str = "/sbin/bridge";

/// Path to the `bash` shell for chained sequences.
pub const BASH_CMD: &str = "/bin/bash";

/// Path to the `echo` command (sysfs writes).
pub const ECHO_CMD: &str = "/bin/echo";

/// sysfs root for per-bridge-port flood control toggles.
pub const BRPORT_SYSFS: &str = "/sys/class/net";

/// Characters needing escapes inside shell double-quotes.
static SHELL_ESCAPE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"([$`"\\\n])"#).expect("escape regex"));

/// Wraps a string in double quotes, escaping `$`, `` ` ``, `"`, `\` and
/// newline.
pub fn shellquote(s: &str) -> String {
    let escaped = SHELL_ESCAPE_RE.replace_all(s, r"\$1");
    format!("\"{}\"", escaped)
}

/// Outcome of a shell invocation.
#[derive(Debug, Clone)]
pub struct ExecResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn combined_output(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (true, _) => self.stderr.clone(),
            (_, true) => self.stdout.clone(),
            _ => format!("{}\n{}", self.stdout, self.stderr),
        }
    }
}

/// Runs a command through `/bin/sh -c`, capturing output.
pub async fn exec(cmd: &str) -> CfgAgentResult<ExecResult> {
    tracing::debug!(command = %cmd, "exec");

    let output = Command::new("/bin/sh")
        .arg("-c")
        .arg(cmd)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| CfgAgentError::ShellSpawn {
            command: cmd.to_string(),
            source: e,
        })?;

    let result = ExecResult {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    };

    if !result.success() {
        tracing::warn!(command = %cmd, exit_code = result.exit_code, stderr = %result.stderr, "command failed");
    }
    Ok(result)
}

/// Runs a command and converts non-zero exit into an error.
pub async fn exec_checked(cmd: &str) -> CfgAgentResult<String> {
    let result = exec(cmd).await?;
    if result.success() {
        Ok(result.stdout)
    } else {
        Err(CfgAgentError::ShellFailed {
            command: cmd.to_string(),
            exit_code: result.exit_code,
            output: result.combined_output(),
        })
    }
}
