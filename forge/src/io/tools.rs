//! Workspace operations offered to the reasoning backend as callable tools.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::core::budget::clamp_to_deadline;
use crate::io::workspace::Workspace;

/// Name and one-line description of every tool, in prompt order.
pub const TOOL_DESCRIPTIONS: &[(&str, &str)] = &[
    (
        "read_file",
        "read_file(path): return the file's content, or an empty string if it does not exist",
    ),
    (
        "write_file",
        "write_file(path, content): create or overwrite the file with the full content",
    ),
    (
        "list_files",
        "list_files(directory=\".\"): list every file under the directory, recursively",
    ),
    (
        "run_cmd",
        "run_cmd(cmd, cwd=null, timeout_secs=30): run a shell command, returns exit code, stdout and stderr",
    ),
    (
        "get_current_directory",
        "get_current_directory(): return the project root directory",
    ),
];

/// A single tool invocation requested by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "tool", rename_all = "snake_case")]
pub enum ToolCall {
    ReadFile {
        path: String,
    },
    WriteFile {
        path: String,
        content: String,
    },
    ListFiles {
        directory: Option<String>,
    },
    RunCmd {
        cmd: String,
        cwd: Option<String>,
        timeout_secs: Option<u64>,
    },
    GetCurrentDirectory,
}

impl ToolCall {
    pub fn name(&self) -> &'static str {
        match self {
            ToolCall::ReadFile { .. } => "read_file",
            ToolCall::WriteFile { .. } => "write_file",
            ToolCall::ListFiles { .. } => "list_files",
            ToolCall::RunCmd { .. } => "run_cmd",
            ToolCall::GetCurrentDirectory => "get_current_directory",
        }
    }

    /// Compact argument rendering for logs and transcripts. File content is
    /// summarized by size.
    pub fn describe_args(&self) -> String {
        match self {
            ToolCall::ReadFile { path } => format!("path={path:?}"),
            ToolCall::WriteFile { path, content } => {
                format!("path={path:?} content=<{} bytes>", content.len())
            }
            ToolCall::ListFiles { directory } => {
                format!("directory={:?}", directory.as_deref().unwrap_or("."))
            }
            ToolCall::RunCmd {
                cmd,
                cwd,
                timeout_secs,
            } => format!("cmd={cmd:?} cwd={cwd:?} timeout_secs={timeout_secs:?}"),
            ToolCall::GetCurrentDirectory => String::new(),
        }
    }
}

/// Outcome of a tool invocation as reported back to the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolResult {
    pub ok: bool,
    pub output: String,
}

impl ToolResult {
    fn ok(output: impl Into<String>) -> Self {
        Self {
            ok: true,
            output: output.into(),
        }
    }

    pub fn error(message: impl std::fmt::Display) -> Self {
        Self {
            ok: false,
            output: format!("ERROR: {message}"),
        }
    }
}

/// Something that can execute tool calls on behalf of the backend.
pub trait ToolHost {
    /// Execute `call`. Failures are returned as error results, never raised.
    fn invoke(&mut self, call: &ToolCall) -> ToolResult;
}

/// Tool host backed by a sandboxed [`Workspace`].
pub struct ToolSet<'a> {
    workspace: &'a Workspace,
    shell_timeout: Duration,
    deadline: Option<Instant>,
    invocations: usize,
    written: Vec<String>,
}

impl<'a> ToolSet<'a> {
    pub fn new(workspace: &'a Workspace, shell_timeout: Duration) -> Self {
        Self {
            workspace,
            shell_timeout,
            deadline: None,
            invocations: 0,
            written: Vec::new(),
        }
    }

    /// Clamp every shell command so it cannot outlive `deadline`.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn invocations(&self) -> usize {
        self.invocations
    }

    /// Paths successfully written through `write_file`, in call order.
    pub fn written(&self) -> &[String] {
        &self.written
    }

    fn dispatch(&mut self, call: &ToolCall) -> ToolResult {
        match call {
            ToolCall::ReadFile { path } => match self.workspace.read(path) {
                Ok(content) => ToolResult::ok(content),
                Err(err) => ToolResult::error(err),
            },
            ToolCall::WriteFile { path, content } => match self.workspace.write(path, content) {
                Ok(target) => {
                    self.written.push(path.clone());
                    ToolResult::ok(format!("WROTE:{}", target.display()))
                }
                Err(err) => ToolResult::error(err),
            },
            ToolCall::ListFiles { directory } => {
                match self.workspace.list(directory.as_deref().unwrap_or(".")) {
                    Ok(files) if files.is_empty() => ToolResult::ok("No files found."),
                    Ok(files) => ToolResult::ok(files.join("\n")),
                    Err(err) => ToolResult::error(err),
                }
            }
            ToolCall::RunCmd {
                cmd,
                cwd,
                timeout_secs,
            } => {
                let requested = timeout_secs.map_or(self.shell_timeout, Duration::from_secs);
                let timeout = clamp_to_deadline(requested, self.deadline);
                match self.workspace.run(cmd, cwd.as_deref(), timeout) {
                    Ok(result) => match serde_json::to_string(&result) {
                        Ok(rendered) => ToolResult {
                            ok: result.success(),
                            output: rendered,
                        },
                        Err(err) => ToolResult::error(err),
                    },
                    Err(err) => ToolResult::error(err),
                }
            }
            ToolCall::GetCurrentDirectory => ToolResult::ok(self.workspace.current_directory()),
        }
    }
}

impl ToolHost for ToolSet<'_> {
    fn invoke(&mut self, call: &ToolCall) -> ToolResult {
        self.invocations += 1;
        let result = self.dispatch(call);
        if result.ok {
            info!(
                tool = call.name(),
                args = %call.describe_args(),
                result = %preview(&result.output),
                "tool invoked"
            );
        } else {
            warn!(
                tool = call.name(),
                args = %call.describe_args(),
                result = %preview(&result.output),
                "tool invocation failed"
            );
        }
        result
    }
}

fn preview(output: &str) -> String {
    const LIMIT: usize = 200;
    if output.len() <= LIMIT {
        return output.to_string();
    }
    let mut end = LIMIT;
    while !output.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... ({} bytes)", &output[..end], output.len())
}
