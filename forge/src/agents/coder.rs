//! Coder agent: executes one implementation step against the workspace.
//!
//! Each call processes exactly the step at the cursor and then advances it,
//! whatever the outcome. A failed step is reported, never raised, so the
//! remaining steps still run. The step's wall-clock time is compared against
//! the ceiling after the call; the same ceiling is handed to the backend as a
//! deadline so a runaway call is cut off rather than merely detected.

use std::time::{Duration, Instant};

use anyhow::Result;
use tracing::{info, instrument, warn};

use crate::core::budget::{deadline_after, exceeds_ceiling};
use crate::core::state::StepCursor;
use crate::core::types::ImplementationStep;
use crate::io::backend::{Backend, ToolRequest, Transcript};
use crate::io::prompt::PromptEngine;
use crate::io::tools::ToolSet;
use crate::io::workspace::Workspace;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Completed { summary: String },
    Failed { error: String },
}

/// What happened during one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepReport {
    /// Zero-based position of the step in the task plan.
    pub index: usize,
    pub filepath: String,
    pub elapsed: Duration,
    pub outcome: StepOutcome,
    pub tool_calls: usize,
    pub files_written: Vec<String>,
    /// The step ran longer than the ceiling; the run must stop.
    pub overran: bool,
}

impl StepReport {
    pub fn succeeded(&self) -> bool {
        matches!(self.outcome, StepOutcome::Completed { .. })
    }
}

#[derive(Debug, Clone)]
pub struct CoderAgent {
    prompts: PromptEngine,
    step_ceiling: Duration,
    shell_timeout: Duration,
}

impl CoderAgent {
    pub fn new(prompts: PromptEngine, step_ceiling: Duration, shell_timeout: Duration) -> Self {
        Self {
            prompts,
            step_ceiling,
            shell_timeout,
        }
    }

    /// Run the step at the cursor. Returns `None` when no steps remain.
    #[instrument(skip_all, fields(index = cursor.index(), total = cursor.total()))]
    pub fn run_step<B: Backend + ?Sized>(
        &self,
        backend: &B,
        workspace: &Workspace,
        cursor: &mut StepCursor,
    ) -> Option<StepReport> {
        let step = cursor.current()?.clone();
        let index = cursor.index();

        let started = Instant::now();
        let deadline = deadline_after(started, self.step_ceiling);
        let mut tools = ToolSet::new(workspace, self.shell_timeout);
        if let Ok(deadline) = deadline {
            tools = tools.with_deadline(deadline);
        }
        let result = deadline
            .and_then(|deadline| self.request(&step, workspace, deadline, index))
            .and_then(|request| backend.infer_with_tools(&request, &mut tools));
        let elapsed = started.elapsed();

        let outcome = match result {
            Ok(transcript) => StepOutcome::Completed {
                summary: summarize(&transcript, tools.written()),
            },
            Err(err) => {
                warn!(filepath = %step.filepath, error = %format!("{err:#}"), "step failed, continuing");
                StepOutcome::Failed {
                    error: format!("{err:#}"),
                }
            }
        };
        let overran = exceeds_ceiling(elapsed, self.step_ceiling);
        if overran {
            warn!(
                elapsed_ms = elapsed.as_millis() as u64,
                ceiling_ms = self.step_ceiling.as_millis() as u64,
                "step exceeded its time ceiling"
            );
        }

        cursor.advance();
        info!(
            filepath = %step.filepath,
            elapsed_ms = elapsed.as_millis() as u64,
            tool_calls = tools.invocations(),
            "step finished"
        );

        Some(StepReport {
            index,
            filepath: step.filepath,
            elapsed,
            outcome,
            tool_calls: tools.invocations(),
            files_written: tools.written().to_vec(),
            overran,
        })
    }

    fn request(
        &self,
        step: &ImplementationStep,
        workspace: &Workspace,
        deadline: Instant,
        index: usize,
    ) -> Result<ToolRequest> {
        let existing = workspace.read(&step.filepath)?;
        Ok(ToolRequest {
            system_prompt: self.prompts.render_coder_system()?,
            user_prompt: self.prompts.render_coder_user(step, &existing)?,
            deadline,
            label: format!("step{}", index + 1),
        })
    }
}

fn summarize(transcript: &Transcript, written: &[String]) -> String {
    if let Some(message) = transcript
        .final_message
        .as_deref()
        .filter(|m| !m.trim().is_empty())
    {
        return message.trim().to_string();
    }
    if written.is_empty() {
        "no files written".to_string()
    } else {
        format!("wrote {}", written.join(", "))
    }
}
