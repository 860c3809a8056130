//! Orchestrator configuration stored in `forge.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_FILE: &str = "forge.toml";

/// Upper bound for every `*_secs` setting (one day).
pub const MAX_TIMEOUT_SECS: u64 = 24 * 60 * 60;

/// Orchestrator configuration (TOML).
///
/// Missing fields fall back to defaults so an empty or absent file is valid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ForgeConfig {
    /// Directory the generated project is written into. Every file operation is
    /// confined to it.
    pub workspace_root: PathBuf,

    /// Scratch directory for backend schemas, outputs and logs.
    pub state_dir: PathBuf,

    /// Wall-clock ceiling for a single coding step. Exceeding it ends the run.
    pub step_ceiling_secs: u64,

    /// Timeout for a single structured (planning/architecture/revision) call.
    pub inference_timeout_secs: u64,

    /// Default timeout for shell commands the coder issues through `run_cmd`.
    pub shell_timeout_secs: u64,

    /// Truncate captured stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,

    /// Upper bound on tool-call turns within one coding step.
    pub max_tool_turns: u32,

    pub backend: BackendConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BackendConfig {
    /// Backend command prefix (e.g. `["codex", "exec"]`).
    pub command: Vec<String>,
    /// Model override passed as `--model`.
    pub model: Option<String>,
    /// Extra arguments appended before the schema/output flags.
    pub extra_args: Vec<String>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            command: vec!["codex".to_string(), "exec".to_string()],
            model: None,
            extra_args: Vec::new(),
        }
    }
}

impl Default for ForgeConfig {
    fn default() -> Self {
        Self {
            workspace_root: PathBuf::from("generated_project"),
            state_dir: PathBuf::from(".forge"),
            step_ceiling_secs: 120,
            inference_timeout_secs: 10 * 60,
            shell_timeout_secs: 30,
            output_limit_bytes: 100_000,
            max_tool_turns: 40,
            backend: BackendConfig::default(),
        }
    }
}

impl ForgeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.workspace_root.as_os_str().is_empty() {
            return Err(anyhow!("workspace_root must not be empty"));
        }
        if self.state_dir.as_os_str().is_empty() {
            return Err(anyhow!("state_dir must not be empty"));
        }
        if self.step_ceiling_secs == 0 {
            return Err(anyhow!("step_ceiling_secs must be > 0"));
        }
        if self.inference_timeout_secs == 0 {
            return Err(anyhow!("inference_timeout_secs must be > 0"));
        }
        if self.shell_timeout_secs == 0 {
            return Err(anyhow!("shell_timeout_secs must be > 0"));
        }
        for (name, secs) in [
            ("step_ceiling_secs", self.step_ceiling_secs),
            ("inference_timeout_secs", self.inference_timeout_secs),
            ("shell_timeout_secs", self.shell_timeout_secs),
        ] {
            if secs > MAX_TIMEOUT_SECS {
                return Err(anyhow!("{name} must be <= {MAX_TIMEOUT_SECS}"));
            }
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        if self.max_tool_turns == 0 {
            return Err(anyhow!("max_tool_turns must be > 0"));
        }
        if self.backend.command.is_empty() || self.backend.command[0].trim().is_empty() {
            return Err(anyhow!("backend.command must be a non-empty array"));
        }
        Ok(())
    }

    pub fn step_ceiling(&self) -> Duration {
        Duration::from_secs(self.step_ceiling_secs)
    }

    pub fn inference_timeout(&self) -> Duration {
        Duration::from_secs(self.inference_timeout_secs)
    }

    pub fn shell_timeout(&self) -> Duration {
        Duration::from_secs(self.shell_timeout_secs)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `ForgeConfig::default()`.
pub fn load_config(path: &Path) -> Result<ForgeConfig> {
    if !path.exists() {
        let cfg = ForgeConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: ForgeConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}
