//! Drives one run through the stage graph.
//!
//! Every stage handler mutates the [`WorkflowState`]; the next stage is then
//! chosen by [`next_stage`] from the state's signals alone. Handlers never pick
//! their successor, so the transition table is the single source of control
//! flow.

use std::time::Duration;

use anyhow::{Result, anyhow};
use tracing::{info, instrument};

use crate::agents::architect::ArchitectAgent;
use crate::agents::coder::{CoderAgent, StepReport};
use crate::agents::planner::PlannerAgent;
use crate::core::machine::{Stage, next_stage};
use crate::core::state::{FinishReason, WorkflowState};
use crate::core::types::{Plan, ProjectIntent, Record, TaskPlan};
use crate::io::approval::{ApprovalChannel, Checkpoint};
use crate::io::backend::Backend;
use crate::io::config::ForgeConfig;
use crate::io::prompt::PromptEngine;
use crate::io::workspace::Workspace;
use crate::revision::Reviser;

/// Timing knobs for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorSettings {
    pub step_ceiling: Duration,
    pub shell_timeout: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from(&ForgeConfig::default())
    }
}

impl From<&ForgeConfig> for OrchestratorSettings {
    fn from(config: &ForgeConfig) -> Self {
        Self {
            step_ceiling: config.step_ceiling(),
            shell_timeout: config.shell_timeout(),
        }
    }
}

/// Progress notifications emitted while a run advances.
#[derive(Debug)]
pub enum RunEvent<'a> {
    StageEntered(Stage),
    PlanReady(&'a Plan),
    TaskPlanReady(&'a TaskPlan),
    Revising { shape: &'static str, edit: &'a str },
    StepFinished(&'a StepReport),
    Finished(FinishReason),
}

/// Summary of a finished run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub stage: Stage,
    pub finish: FinishReason,
    pub plan: Plan,
    pub task_plan: TaskPlan,
    /// Cursor position when the run ended.
    pub steps_completed: usize,
    pub steps_total: usize,
    pub reports: Vec<StepReport>,
    /// Every stage entered, in order.
    pub trace: Vec<Stage>,
}

/// Owns everything one pipeline needs. Independent orchestrators share nothing.
pub struct Orchestrator<B, A> {
    workspace: Workspace,
    backend: B,
    approval: A,
    planner: PlannerAgent,
    architect: ArchitectAgent,
    coder: CoderAgent,
    reviser: Reviser,
}

impl<B: Backend, A: ApprovalChannel> Orchestrator<B, A> {
    pub fn new(
        workspace: Workspace,
        backend: B,
        approval: A,
        settings: OrchestratorSettings,
    ) -> Result<Self> {
        let prompts = PromptEngine::new()?;
        Ok(Self {
            workspace,
            backend,
            approval,
            planner: PlannerAgent::new(prompts.clone()),
            architect: ArchitectAgent::new(prompts.clone()),
            coder: CoderAgent::new(prompts.clone(), settings.step_ceiling, settings.shell_timeout),
            reviser: Reviser::new(prompts),
        })
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn approval_mut(&mut self) -> &mut A {
        &mut self.approval
    }

    /// Run the full pipeline for `intent`.
    ///
    /// Errors from planning, architecture, revision or the approval channel
    /// abort the run. Coding failures are recorded in the step reports.
    #[instrument(skip_all, fields(intent = %intent))]
    pub fn run<F>(&mut self, intent: ProjectIntent, mut on_event: F) -> Result<RunOutcome>
    where
        F: FnMut(&RunEvent<'_>),
    {
        let mut state = WorkflowState::new(intent);
        let mut stage = Stage::INITIAL;
        let mut trace = vec![stage];
        let mut reports = Vec::new();
        on_event(&RunEvent::StageEntered(stage));

        while !stage.is_terminal() {
            match stage {
                Stage::Planning => self.planning(&mut state, &mut on_event)?,
                Stage::PlanApproval => self.plan_approval(&mut state)?,
                Stage::Architecture => self.architecture(&mut state, &mut on_event)?,
                Stage::TaskApproval => self.task_approval(&mut state)?,
                Stage::Coding => {
                    if let Some(report) = self.coding(&mut state)? {
                        on_event(&RunEvent::StepFinished(&report));
                        reports.push(report);
                    }
                }
                Stage::Done => {}
            }
            stage = next_stage(stage, &state.signals())?;
            info!(%stage, "entering stage");
            trace.push(stage);
            on_event(&RunEvent::StageEntered(stage));
        }

        let finish = state
            .finish_reason()
            .ok_or_else(|| anyhow!("run reached done without a finish reason"))?;
        on_event(&RunEvent::Finished(finish));
        let cursor = state
            .cursor()
            .ok_or_else(|| anyhow!("run reached done without a step cursor"))?;
        Ok(RunOutcome {
            stage,
            finish,
            steps_completed: cursor.index(),
            steps_total: cursor.total(),
            plan: state.approved_plan()?.clone(),
            task_plan: cursor.task_plan().clone(),
            reports,
            trace,
        })
    }

    fn planning<F: FnMut(&RunEvent<'_>)>(
        &self,
        state: &mut WorkflowState,
        on_event: &mut F,
    ) -> Result<()> {
        let plan = match state.pending_plan_revision() {
            Some((previous, edit)) => {
                on_event(&RunEvent::Revising {
                    shape: Plan::SHAPE,
                    edit,
                });
                self.reviser.revise(&self.backend, previous, edit, None)?
            }
            None => self.planner.run(&self.backend, state.intent())?,
        };
        state.accept_plan(plan);
        if let Some(plan) = state.plan() {
            on_event(&RunEvent::PlanReady(plan));
        }
        Ok(())
    }

    fn plan_approval(&mut self, state: &mut WorkflowState) -> Result<()> {
        let plan = state
            .plan()
            .ok_or_else(|| anyhow!("no plan to review"))?;
        let checkpoint = Checkpoint {
            stage: Stage::PlanApproval,
            title: format!("Plan: {}", plan.name),
            payload: serde_json::to_string_pretty(plan)?,
        };
        let decision = self.approval.prompt_choice(&checkpoint)?;
        let approval = state.record_plan_decision(decision)?;
        info!(?approval, "plan reviewed");
        Ok(())
    }

    fn architecture<F: FnMut(&RunEvent<'_>)>(
        &self,
        state: &mut WorkflowState,
        on_event: &mut F,
    ) -> Result<()> {
        let plan = state.approved_plan()?;
        let task_plan = match state.pending_task_revision() {
            Some((previous, edit)) => {
                on_event(&RunEvent::Revising {
                    shape: TaskPlan::SHAPE,
                    edit,
                });
                self.reviser
                    .revise(&self.backend, previous, edit, Some(plan))?
            }
            None => self.architect.run(&self.backend, plan)?,
        };
        state.accept_task_plan(task_plan)?;
        if let Some(task_plan) = state.task_plan() {
            on_event(&RunEvent::TaskPlanReady(task_plan));
        }
        Ok(())
    }

    fn task_approval(&mut self, state: &mut WorkflowState) -> Result<()> {
        let task_plan = state
            .task_plan()
            .ok_or_else(|| anyhow!("no task plan to review"))?;
        let checkpoint = Checkpoint {
            stage: Stage::TaskApproval,
            title: format!("Task plan: {} steps", task_plan.len()),
            payload: render_task_plan(task_plan),
        };
        let decision = self.approval.prompt_choice(&checkpoint)?;
        let approval = state.record_task_decision(decision)?;
        info!(?approval, "task plan reviewed");
        Ok(())
    }

    fn coding(&self, state: &mut WorkflowState) -> Result<Option<StepReport>> {
        let cursor = state.coding_cursor()?;
        let Some(report) = self.coder.run_step(&self.backend, &self.workspace, cursor) else {
            state.finish(FinishReason::Completed);
            return Ok(None);
        };
        let exhausted = cursor.is_exhausted();
        if report.overran {
            state.finish(FinishReason::Overrun {
                step_index: report.index,
                elapsed: report.elapsed,
            });
        } else if exhausted {
            state.finish(FinishReason::Completed);
        }
        Ok(Some(report))
    }
}

/// Numbered listing of every step, as shown at the task checkpoint.
pub fn render_task_plan(task_plan: &TaskPlan) -> String {
    let mut out = String::new();
    for (i, step) in task_plan.implementation_steps.iter().enumerate() {
        out.push_str(&format!("{}. {}\n", i + 1, step.filepath));
        for line in step.task_description.lines() {
            out.push_str(&format!("   {line}\n"));
        }
    }
    if out.is_empty() {
        out.push_str("(no steps)\n");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::SchemaViolationError;
    use crate::test_support::{ScriptedApproval, ScriptedBackend, sample_plan, sample_task_plan};

    fn orchestrator(
        backend: ScriptedBackend,
    ) -> (tempfile::TempDir, Orchestrator<ScriptedBackend, ScriptedApproval>) {
        let temp = tempfile::tempdir().expect("tempdir");
        let ws = Workspace::open(temp.path().join("project")).expect("workspace");
        let orch = Orchestrator::new(
            ws,
            backend,
            ScriptedApproval::approve_all(),
            OrchestratorSettings::default(),
        )
        .expect("orchestrator");
        (temp, orch)
    }

    #[test]
    fn empty_task_plan_finishes_without_steps() {
        let backend = ScriptedBackend::new();
        backend.push_record(&sample_plan(1));
        backend.push_record(&sample_task_plan(0));
        let (_temp, mut orch) = orchestrator(backend);

        let outcome = orch
            .run(ProjectIntent::new("nothing to do"), |_| {})
            .expect("run");

        assert_eq!(outcome.finish, FinishReason::Completed);
        assert_eq!(outcome.steps_completed, 0);
        assert_eq!(
            outcome.trace,
            vec![
                Stage::Planning,
                Stage::PlanApproval,
                Stage::Architecture,
                Stage::TaskApproval,
                Stage::Coding,
                Stage::Done,
            ]
        );
    }

    #[test]
    fn schema_violation_halts_the_run() {
        let backend = ScriptedBackend::new();
        backend.push_raw("here is your plan: snake game");
        let (_temp, mut orch) = orchestrator(backend);

        let err = orch
            .run(ProjectIntent::new("snake"), |_| {})
            .unwrap_err();

        let violation = err
            .downcast_ref::<SchemaViolationError>()
            .expect("schema violation");
        assert_eq!(violation.raw, "here is your plan: snake game");
        assert!(orch.backend().tool_requests().is_empty());
    }

    #[test]
    fn checkpoints_show_full_records() {
        let backend = ScriptedBackend::new();
        backend.push_record(&sample_plan(2));
        backend.push_record(&sample_task_plan(2));
        let (_temp, mut orch) = orchestrator(backend);

        orch.run(ProjectIntent::new("app"), |_| {}).expect("run");

        let checkpoints = orch.approval_mut().checkpoints().to_vec();
        assert_eq!(checkpoints.len(), 2);
        assert_eq!(checkpoints[0].stage, Stage::PlanApproval);
        assert!(checkpoints[0].payload.contains("\"src/file_2.py\""));
        assert_eq!(checkpoints[1].stage, Stage::TaskApproval);
        assert!(checkpoints[1].payload.contains("2. src/step_2.py"));
    }

    #[test]
    fn events_follow_stage_order() {
        let backend = ScriptedBackend::new();
        backend.push_record(&sample_plan(1));
        backend.push_record(&sample_task_plan(1));
        let (_temp, mut orch) = orchestrator(backend);
        let mut seen = Vec::new();

        orch.run(ProjectIntent::new("app"), |event| {
            seen.push(match event {
                RunEvent::StageEntered(stage) => stage.as_str().to_string(),
                RunEvent::PlanReady(_) => "plan".to_string(),
                RunEvent::TaskPlanReady(_) => "tasks".to_string(),
                RunEvent::Revising { .. } => "revising".to_string(),
                RunEvent::StepFinished(_) => "step".to_string(),
                RunEvent::Finished(_) => "finished".to_string(),
            });
        })
        .expect("run");

        assert_eq!(
            seen,
            vec![
                "planning",
                "plan",
                "plan_approval",
                "architecture",
                "tasks",
                "task_approval",
                "coding",
                "step",
                "done",
                "finished",
            ]
        );
    }

    #[test]
    fn render_task_plan_indents_descriptions() {
        let rendered = render_task_plan(&sample_task_plan(1));
        assert!(rendered.starts_with("1. src/step_1.py\n   "));
        assert_eq!(render_task_plan(&sample_task_plan(0)), "(no steps)\n");
    }
}
