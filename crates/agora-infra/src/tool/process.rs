//! Process-spawning tool executor.
//!
//! Implements [`ToolExecutor`] by running tools as host executables out of a
//! configured tools directory. The call's JSON arguments are piped to the
//! tool on stdin and stdout becomes the outcome's output. A non-zero exit is
//! still an outcome, not an error: `Err` means the tool produced nothing
//! (unknown tool, spawn failure, timeout).

use std::path::PathBuf;
use std::time::Duration;

use agora_core::agent::ToolExecutor;
use agora_types::error::ToolExecutionError;
use agora_types::tool::{ToolCall, ToolOutcome};
use tokio::io::AsyncWriteExt;

/// Timeout for tool execution (60 seconds).
const EXECUTION_TIMEOUT_SECS: u64 = 60;

/// Tool executor that runs tools via process spawning.
#[derive(Debug, Clone)]
pub struct ProcessToolExecutor {
    tools_dir: PathBuf,
    timeout: Duration,
}

impl ProcessToolExecutor {
    /// Create an executor serving tools out of `tools_dir`.
    pub fn new(tools_dir: impl Into<PathBuf>) -> Self {
        Self {
            tools_dir: tools_dir.into(),
            timeout: Duration::from_secs(EXECUTION_TIMEOUT_SECS),
        }
    }

    /// Override the execution timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Resolve a tool name to its executable.
    ///
    /// Tool names are plain file names inside the tools directory; anything
    /// path-like is treated as unknown.
    fn resolve(&self, name: &str) -> Result<PathBuf, ToolExecutionError> {
        if name.is_empty() || name.contains(['/', '\\']) || name.contains("..") {
            return Err(ToolExecutionError::NotFound(name.to_string()));
        }
        let path = self.tools_dir.join(name);
        if !path.is_file() {
            return Err(ToolExecutionError::NotFound(name.to_string()));
        }
        Ok(path)
    }
}

impl ToolExecutor for ProcessToolExecutor {
    async fn execute(&self, call: &ToolCall) -> Result<ToolOutcome, ToolExecutionError> {
        let program = self.resolve(&call.name)?;
        let cwd = call
            .working_dir
            .clone()
            .unwrap_or_else(|| self.tools_dir.clone());

        let mut child = tokio::process::Command::new(&program)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .current_dir(&cwd)
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ToolExecutionError::Spawn(format!("{}: {e}", program.display())))?;

        // Write the arguments to stdin as one JSON document
        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(call.arguments.to_string().as_bytes())
                .await
                .ok();
            // Drop stdin to close the pipe and signal EOF
        }

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| ToolExecutionError::Timeout(self.timeout.as_secs()))?
            .map_err(|e| ToolExecutionError::Io(e.to_string()))?;

        let exit_code = output.status.code().unwrap_or(-1);
        let mut text = String::from_utf8(output.stdout)
            .map_err(|e| ToolExecutionError::Io(format!("tool output is not valid UTF-8: {e}")))?;

        // Failed runs carry stderr in the output text
        if exit_code != 0 {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stderr = stderr.trim();
            if !stderr.is_empty() {
                if !text.is_empty() {
                    text.push('\n');
                }
                text.push_str(stderr);
            }
        }

        Ok(ToolOutcome {
            exit_code,
            output: text,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::path::Path;

    fn write_tool(dir: &Path, name: &str, script: &str) {
        let path = dir.join(name);
        std::fs::write(&path, script).unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
    }

    fn call_for(name: &str) -> ToolCall {
        ToolCall {
            id: "t1".to_string(),
            name: name.to_string(),
            arguments: json!({"path": "."}),
            working_dir: None,
        }
    }

    #[tokio::test]
    async fn test_runs_tool_and_captures_stdout() {
        let dir = tempfile::tempdir().unwrap();
        write_tool(dir.path(), "echo_args", "#!/bin/bash\ncat\n");

        let executor = ProcessToolExecutor::new(dir.path());
        let outcome = executor.execute(&call_for("echo_args")).await.unwrap();

        assert_eq!(outcome.exit_code, 0);
        assert!(outcome.success());
        assert!(outcome.output.contains("\"path\""));
    }

    #[tokio::test]
    async fn test_unknown_tool_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let executor = ProcessToolExecutor::new(dir.path());

        let result = executor.execute(&call_for("missing")).await;
        assert!(matches!(result, Err(ToolExecutionError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_tool_name_cannot_leave_the_tools_dir() {
        let dir = tempfile::tempdir().unwrap();
        let executor = ProcessToolExecutor::new(dir.path());

        for name in ["../sh", "a/b", "..", ""] {
            let result = executor.execute(&call_for(name)).await;
            assert!(
                matches!(result, Err(ToolExecutionError::NotFound(_))),
                "name {name:?} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_still_an_outcome() {
        let dir = tempfile::tempdir().unwrap();
        write_tool(dir.path(), "broken", "#!/bin/bash\necho oops >&2\nexit 3\n");

        let executor = ProcessToolExecutor::new(dir.path());
        let outcome = executor.execute(&call_for("broken")).await.unwrap();

        assert_eq!(outcome.exit_code, 3);
        assert!(!outcome.success());
        assert!(outcome.output.contains("oops"));
    }

    #[tokio::test]
    async fn test_slow_tool_times_out() {
        let dir = tempfile::tempdir().unwrap();
        write_tool(dir.path(), "slow", "#!/bin/bash\nsleep 5\n");

        let executor =
            ProcessToolExecutor::new(dir.path()).with_timeout(Duration::from_millis(200));
        let result = executor.execute(&call_for("slow")).await;

        assert!(matches!(result, Err(ToolExecutionError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_working_dir_is_respected() {
        let tools = tempfile::tempdir().unwrap();
        let workspace = tempfile::tempdir().unwrap();
        write_tool(tools.path(), "where_am_i", "#!/bin/bash\npwd\n");

        let mut call = call_for("where_am_i");
        call.working_dir = Some(workspace.path().to_path_buf());

        let executor = ProcessToolExecutor::new(tools.path());
        let outcome = executor.execute(&call).await.unwrap();

        let reported = Path::new(outcome.output.trim());
        assert_eq!(
            reported.canonicalize().unwrap(),
            workspace.path().canonicalize().unwrap()
        );
    }
}
