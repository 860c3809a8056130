//! Reasoning backend abstraction.
//!
//! The [`Backend`] trait decouples the agents from the process that actually
//! produces plans and code (currently `codex exec`). Tests use scripted
//! backends that return predetermined responses without spawning processes.

use std::cell::Cell;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow, bail};
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

use crate::core::budget::remaining_budget;
use crate::io::config::{BackendConfig, ForgeConfig};
use crate::io::process::{CommandOutput, run_command_with_timeout};
use crate::io::prompt::{PromptEngine, TurnContext};
use crate::io::schema::{parse_response, schema_violations};
use crate::io::tools::{ToolCall, ToolHost, ToolResult};

const TOOL_TURN_SCHEMA: &str = include_str!("../../schemas/tool_turn.schema.json");

/// A request for a single schema-constrained JSON document.
#[derive(Debug, Clone)]
pub struct StructuredRequest {
    /// Record shape name, e.g. `Plan`.
    pub shape: &'static str,
    /// JSON Schema the response must satisfy.
    pub schema: &'static str,
    pub prompt: String,
    /// Short label used for per-call artifact directories and logs.
    pub label: String,
}

/// A request for a tool-using session that ends when the backend finishes or
/// the deadline passes.
#[derive(Debug, Clone)]
pub struct ToolRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    pub deadline: Instant,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptEntry {
    pub call: ToolCall,
    pub result: ToolResult,
}

/// Record of a tool-using session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transcript {
    pub entries: Vec<TranscriptEntry>,
    /// Closing message from the backend, if it finished on its own.
    pub final_message: Option<String>,
}

impl Transcript {
    pub fn tool_calls(&self) -> usize {
        self.entries.len()
    }
}

/// Abstraction over reasoning backends.
pub trait Backend {
    /// Produce one raw response for `request`. Validation is the caller's job.
    fn infer_structured(&self, request: &StructuredRequest) -> Result<String>;

    /// Run a tool-using session, dispatching every requested call to `tools`.
    fn infer_with_tools(&self, request: &ToolRequest, tools: &mut dyn ToolHost)
    -> Result<Transcript>;
}

/// Backend that spawns `codex exec` once per structured call and once per tool turn.
pub struct CodexBackend {
    config: BackendConfig,
    workdir: PathBuf,
    state_dir: PathBuf,
    inference_timeout: Duration,
    output_limit_bytes: usize,
    max_tool_turns: u32,
    prompts: PromptEngine,
    calls: Cell<u64>,
}

impl CodexBackend {
    /// `workdir` is where the backend process runs (the workspace root).
    pub fn new(config: &ForgeConfig, workdir: &Path) -> Result<Self> {
        let state_dir = if config.state_dir.is_absolute() {
            config.state_dir.clone()
        } else {
            std::env::current_dir()
                .context("resolve current directory")?
                .join(&config.state_dir)
        };
        fs::create_dir_all(&state_dir)
            .with_context(|| format!("create state dir {}", state_dir.display()))?;
        Ok(Self {
            config: config.backend.clone(),
            workdir: workdir.to_path_buf(),
            state_dir,
            inference_timeout: config.inference_timeout(),
            output_limit_bytes: config.output_limit_bytes,
            max_tool_turns: config.max_tool_turns,
            prompts: PromptEngine::new()?,
            calls: Cell::new(0),
        })
    }

    fn call_dir(&self, label: &str) -> PathBuf {
        let seq = self.calls.get() + 1;
        self.calls.set(seq);
        let label: String = label
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.state_dir.join("calls").join(format!("{seq:04}-{label}"))
    }

    #[instrument(skip_all, fields(label = %label, timeout_secs = timeout.as_secs()))]
    fn exec(&self, prompt: &str, schema: &str, label: &str, timeout: Duration) -> Result<String> {
        let dir = self.call_dir(label);
        fs::create_dir_all(&dir).with_context(|| format!("create call dir {}", dir.display()))?;
        let schema_path = dir.join("schema.json");
        let output_path = dir.join("output.json");
        fs::write(&schema_path, schema)
            .with_context(|| format!("write schema {}", schema_path.display()))?;

        let (program, prefix) = self
            .config
            .command
            .split_first()
            .ok_or_else(|| anyhow!("backend.command is empty"))?;
        let mut cmd = Command::new(program);
        cmd.args(prefix)
            .arg("--sandbox")
            .arg("read-only")
            .arg("--skip-git-repo-check");
        if let Some(model) = &self.config.model {
            cmd.arg("--model").arg(model);
        }
        cmd.args(&self.config.extra_args)
            .arg("--output-schema")
            .arg(&schema_path)
            .arg("--output-last-message")
            .arg(&output_path)
            .arg("-")
            .current_dir(&self.workdir);

        info!(dir = %dir.display(), "starting backend call");
        let output = run_command_with_timeout(
            cmd,
            Some(prompt.as_bytes()),
            timeout,
            self.output_limit_bytes,
        )
        .with_context(|| format!("run backend command {program}"))?;

        write_executor_log(&dir.join("executor.log"), &output, self.output_limit_bytes)?;

        if output.timed_out {
            warn!(timeout_secs = timeout.as_secs(), "backend call timed out");
            bail!("backend call timed out after {:?}", timeout);
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "backend call failed");
            bail!("backend call failed with status {:?}", output.status.code());
        }
        if !output_path.exists() {
            bail!("missing backend output {}", output_path.display());
        }
        let raw = fs::read_to_string(&output_path)
            .with_context(|| format!("read backend output {}", output_path.display()))?;
        debug!(bytes = raw.len(), "backend call completed");
        Ok(raw)
    }
}

impl Backend for CodexBackend {
    fn infer_structured(&self, request: &StructuredRequest) -> Result<String> {
        self.exec(
            &request.prompt,
            request.schema,
            &request.label,
            self.inference_timeout,
        )
    }

    #[instrument(skip_all, fields(label = %request.label))]
    fn infer_with_tools(
        &self,
        request: &ToolRequest,
        tools: &mut dyn ToolHost,
    ) -> Result<Transcript> {
        let mut transcript = Transcript::default();
        let mut turns: Vec<TurnContext> = Vec::new();

        for turn in 1..=self.max_tool_turns {
            let timeout = remaining_budget(request.deadline)?.min(self.inference_timeout);
            let prompt =
                self.prompts
                    .render_tool_turn(&request.system_prompt, &request.user_prompt, &turns)?;
            let raw = self.exec(
                &prompt,
                TOOL_TURN_SCHEMA,
                &format!("{}-turn{turn}", request.label),
                timeout,
            )?;
            let parsed = parse_tool_turn(&raw)?;

            if parsed.action == TurnAction::Finish {
                debug!(turn, "backend finished tool session");
                transcript.final_message = Some(parsed.message);
                return Ok(transcript);
            }

            let tool = parsed.tool.clone().unwrap_or_default();
            match parsed.into_call() {
                Ok(call) => {
                    let result = tools.invoke(&call);
                    turns.push(TurnContext::new(
                        call.name(),
                        call.describe_args(),
                        result.ok,
                        &result.output,
                    ));
                    transcript.entries.push(TranscriptEntry { call, result });
                }
                Err(message) => {
                    warn!(turn, tool = %tool, %message, "malformed tool call");
                    let result = ToolResult::error(&message);
                    turns.push(TurnContext::new(&tool, String::new(), false, &result.output));
                }
            }
        }

        bail!(
            "tool session did not finish within {} turns",
            self.max_tool_turns
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
enum TurnAction {
    Call,
    Finish,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct TurnArguments {
    path: Option<String>,
    content: Option<String>,
    directory: Option<String>,
    cmd: Option<String>,
    cwd: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
struct ToolTurn {
    action: TurnAction,
    tool: Option<String>,
    #[serde(default)]
    arguments: TurnArguments,
    #[serde(default)]
    message: String,
}

impl ToolTurn {
    fn into_call(self) -> Result<ToolCall, String> {
        let args = self.arguments;
        let tool = self.tool.ok_or("action \"call\" requires a tool name")?;
        let call = match tool.as_str() {
            "read_file" => ToolCall::ReadFile {
                path: args.path.ok_or("read_file requires path")?,
            },
            "write_file" => ToolCall::WriteFile {
                path: args.path.ok_or("write_file requires path")?,
                content: args.content.ok_or("write_file requires content")?,
            },
            "list_files" => ToolCall::ListFiles {
                directory: args.directory,
            },
            "run_cmd" => ToolCall::RunCmd {
                cmd: args.cmd.ok_or("run_cmd requires cmd")?,
                cwd: args.cwd,
                timeout_secs: args.timeout_secs,
            },
            "get_current_directory" => ToolCall::GetCurrentDirectory,
            other => return Err(format!("unknown tool {other:?}")),
        };
        Ok(call)
    }
}

fn parse_tool_turn(raw: &str) -> Result<ToolTurn> {
    let value = parse_response(raw).map_err(|err| anyhow!("tool turn: {err}"))?;
    let violations = schema_violations(TOOL_TURN_SCHEMA, &value)?;
    if !violations.is_empty() {
        bail!("tool turn violates schema: {}", violations.join("; "));
    }
    serde_json::from_value(value).context("decode tool turn")
}

fn write_executor_log(path: &Path, output: &CommandOutput, output_limit: usize) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create executor log dir {}", parent.display()))?;
    }
    let mut buf = String::new();
    buf.push_str("=== stdout ===\n");
    buf.push_str(&String::from_utf8_lossy(&output.stdout));
    buf.push_str(&output.stdout_truncated_notice("backend"));
    buf.push_str("\n=== stderr ===\n");
    buf.push_str(&String::from_utf8_lossy(&output.stderr));
    buf.push_str(&output.stderr_truncated_notice("backend"));
    if output.timed_out {
        buf.push_str("\n[backend timed out]\n");
    }

    if buf.len() > output_limit {
        let mut end = output_limit;
        while !buf.is_char_boundary(end) {
            end -= 1;
        }
        buf = format!("{}\n[truncated {} bytes]\n", &buf[..end], buf.len() - end);
    }

    fs::write(path, buf).with_context(|| format!("write executor log {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Plan, Record};

    struct RecordingHost {
        calls: Vec<ToolCall>,
    }

    impl ToolHost for RecordingHost {
        fn invoke(&mut self, call: &ToolCall) -> ToolResult {
            self.calls.push(call.clone());
            ToolResult {
                ok: true,
                output: "done".to_string(),
            }
        }
    }

    fn turn(json: &str) -> ToolTurn {
        parse_tool_turn(json).expect("parse turn")
    }

    #[test]
    fn call_turn_converts_to_tool_call() {
        let parsed = turn(
            r#"{"action": "call", "tool": "write_file",
                "arguments": {"path": "a.py", "content": "x = 1\n", "directory": null,
                              "cmd": null, "cwd": null, "timeout_secs": null},
                "message": "write a"}"#,
        );
        assert_eq!(
            parsed.into_call().expect("call"),
            ToolCall::WriteFile {
                path: "a.py".to_string(),
                content: "x = 1\n".to_string(),
            }
        );
    }

    #[test]
    fn call_without_required_argument_is_rejected() {
        let parsed = turn(
            r#"{"action": "call", "tool": "run_cmd",
                "arguments": {"path": null, "content": null, "directory": null,
                              "cmd": null, "cwd": null, "timeout_secs": null},
                "message": ""}"#,
        );
        assert_eq!(parsed.into_call().unwrap_err(), "run_cmd requires cmd");
    }

    #[test]
    fn off_schema_turn_is_an_error() {
        let err = parse_tool_turn(r#"{"action": "dance"}"#).unwrap_err();
        assert!(err.to_string().contains("violates schema"));
    }

    #[cfg(unix)]
    #[test]
    fn executor_log_truncates_on_char_boundary() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("logs/executor.log");
        let output = run_command_with_timeout(
            {
                let mut cmd = Command::new("sh");
                cmd.arg("-c").arg("printf 'ééééééééé'");
                cmd
            },
            None,
            Duration::from_secs(5),
            1000,
        )
        .expect("run");
        write_executor_log(&path, &output, 16).expect("write log");
        let contents = fs::read_to_string(&path).expect("read log");
        assert!(contents.contains("[truncated"));
    }

    #[cfg(unix)]
    fn scripted_config(temp: &Path, response: &str) -> ForgeConfig {
        let script = format!(
            "out=''; while [ $# -gt 0 ]; do \
             if [ \"$1\" = --output-last-message ]; then out=\"$2\"; fi; shift; done; \
             cat > /dev/null; printf '%s' '{response}' > \"$out\""
        );
        ForgeConfig {
            state_dir: temp.join("state"),
            backend: BackendConfig {
                command: vec![
                    "sh".to_string(),
                    "-c".to_string(),
                    script,
                    "codex".to_string(),
                ],
                model: Some("test-model".to_string()),
                extra_args: Vec::new(),
            },
            ..ForgeConfig::default()
        }
    }

    #[cfg(unix)]
    #[test]
    fn codex_backend_reads_last_message() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = scripted_config(temp.path(), r#"{"name": "snake"}"#);
        let backend = CodexBackend::new(&cfg, temp.path()).expect("backend");
        let raw = backend
            .infer_structured(&StructuredRequest {
                shape: Plan::SHAPE,
                schema: Plan::SCHEMA,
                prompt: "plan it".to_string(),
                label: "plan".to_string(),
            })
            .expect("infer");
        assert_eq!(raw, r#"{"name": "snake"}"#);
        let call_dir = temp.path().join("state/calls/0001-plan");
        assert!(call_dir.join("schema.json").exists());
        assert!(call_dir.join("executor.log").exists());
    }

    #[cfg(unix)]
    #[test]
    fn codex_backend_tool_session_finishes() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = scripted_config(
            temp.path(),
            r#"{"action": "finish", "tool": null, "arguments": {"path": null, "content": null, "directory": null, "cmd": null, "cwd": null, "timeout_secs": null}, "message": "all done"}"#,
        );
        let backend = CodexBackend::new(&cfg, temp.path()).expect("backend");
        let mut host = RecordingHost { calls: Vec::new() };
        let transcript = backend
            .infer_with_tools(
                &ToolRequest {
                    system_prompt: "system".to_string(),
                    user_prompt: "user".to_string(),
                    deadline: Instant::now() + Duration::from_secs(30),
                    label: "step 1".to_string(),
                },
                &mut host,
            )
            .expect("session");
        assert_eq!(transcript.final_message.as_deref(), Some("all done"));
        assert_eq!(transcript.tool_calls(), 0);
        assert!(host.calls.is_empty());
        assert!(temp.path().join("state/calls/0001-step_1-turn1").exists());
    }

    #[cfg(unix)]
    #[test]
    fn failing_backend_command_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = ForgeConfig {
            state_dir: temp.path().join("state"),
            backend: BackendConfig {
                command: vec!["sh".to_string(), "-c".to_string(), "exit 3".to_string()],
                model: None,
                extra_args: Vec::new(),
            },
            ..ForgeConfig::default()
        };
        let backend = CodexBackend::new(&cfg, temp.path()).expect("backend");
        let err = backend
            .infer_structured(&StructuredRequest {
                shape: Plan::SHAPE,
                schema: Plan::SCHEMA,
                prompt: String::new(),
                label: "plan".to_string(),
            })
            .unwrap_err();
        assert!(err.to_string().contains("failed with status Some(3)"));
    }

    #[test]
    fn expired_deadline_stops_tool_session() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = ForgeConfig {
            state_dir: temp.path().join("state"),
            ..ForgeConfig::default()
        };
        let backend = CodexBackend::new(&cfg, temp.path()).expect("backend");
        let mut host = RecordingHost { calls: Vec::new() };
        let err = backend
            .infer_with_tools(
                &ToolRequest {
                    system_prompt: String::new(),
                    user_prompt: String::new(),
                    deadline: Instant::now(),
                    label: "late".to_string(),
                },
                &mut host,
            )
            .unwrap_err();
        assert!(err.to_string().contains("step budget exhausted"));
    }
}
