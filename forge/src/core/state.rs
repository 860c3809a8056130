//! In-memory state for a single workflow run.
//!
//! All mutation goes through methods that keep the run's invariants:
//! a task plan only exists for an approved plan, the step cursor never moves
//! backwards or past the end, and an edit request is only ever held together
//! with the record it targets.

use std::time::Duration;

use anyhow::{Result, anyhow, bail};

use crate::core::machine::Signals;
use crate::core::types::{Approval, Decision, ImplementationStep, Plan, ProjectIntent, TaskPlan};

/// Position within an exclusively-owned task plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepCursor {
    task_plan: TaskPlan,
    index: usize,
}

impl StepCursor {
    pub fn new(task_plan: TaskPlan) -> Self {
        Self {
            task_plan,
            index: 0,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn total(&self) -> usize {
        self.task_plan.len()
    }

    pub fn task_plan(&self) -> &TaskPlan {
        &self.task_plan
    }

    /// Step at the cursor, or `None` once every step has been visited.
    pub fn current(&self) -> Option<&ImplementationStep> {
        self.task_plan.implementation_steps.get(self.index)
    }

    pub fn is_exhausted(&self) -> bool {
        self.index >= self.total()
    }

    /// Move to the next step. Saturates at the step count.
    pub fn advance(&mut self) -> usize {
        if self.index < self.total() {
            self.index += 1;
        }
        self.index
    }
}

/// An edit request paired with the accepted record it applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingRevision {
    Plan { previous: Plan, edit: String },
    TaskPlan { previous: TaskPlan, edit: String },
}

/// Why the coding phase stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    /// Every step was visited.
    Completed,
    /// A single step exceeded the per-step ceiling; remaining steps were skipped.
    Overrun { step_index: usize, elapsed: Duration },
}

/// Aggregate state threaded through every stage of a run.
#[derive(Debug, Clone)]
pub struct WorkflowState {
    intent: ProjectIntent,
    plan: Option<Plan>,
    task_plan: Option<TaskPlan>,
    cursor: Option<StepCursor>,
    pending: Option<PendingRevision>,
    plan_approval: Option<Approval>,
    task_approval: Option<Approval>,
    finish: Option<FinishReason>,
}

impl WorkflowState {
    pub fn new(intent: ProjectIntent) -> Self {
        Self {
            intent,
            plan: None,
            task_plan: None,
            cursor: None,
            pending: None,
            plan_approval: None,
            task_approval: None,
            finish: None,
        }
    }

    pub fn intent(&self) -> &ProjectIntent {
        &self.intent
    }

    pub fn plan(&self) -> Option<&Plan> {
        self.plan.as_ref()
    }

    pub fn task_plan(&self) -> Option<&TaskPlan> {
        self.task_plan.as_ref()
    }

    pub fn cursor(&self) -> Option<&StepCursor> {
        self.cursor.as_ref()
    }

    pub fn pending(&self) -> Option<&PendingRevision> {
        self.pending.as_ref()
    }

    pub fn finish_reason(&self) -> Option<FinishReason> {
        self.finish
    }

    pub fn signals(&self) -> Signals {
        Signals {
            plan_approval: self.plan_approval,
            task_approval: self.task_approval,
            coding_finished: self.finish.is_some(),
        }
    }

    /// Pending plan edit and the plan it targets, if one is queued.
    pub fn pending_plan_revision(&self) -> Option<(&Plan, &str)> {
        match &self.pending {
            Some(PendingRevision::Plan { previous, edit }) => Some((previous, edit.as_str())),
            _ => None,
        }
    }

    /// Pending task-plan edit and the task plan it targets, if one is queued.
    pub fn pending_task_revision(&self) -> Option<(&TaskPlan, &str)> {
        match &self.pending {
            Some(PendingRevision::TaskPlan { previous, edit }) => Some((previous, edit.as_str())),
            _ => None,
        }
    }

    /// Install a freshly produced or revised plan.
    ///
    /// Clears any pending revision and resets everything derived from the
    /// previous plan; the new plan still needs approval.
    pub fn accept_plan(&mut self, plan: Plan) {
        self.plan = Some(plan);
        self.pending = None;
        self.plan_approval = None;
        self.task_plan = None;
        self.task_approval = None;
        self.cursor = None;
        self.finish = None;
    }

    /// Record the human decision on the current plan.
    pub fn record_plan_decision(&mut self, decision: Decision) -> Result<Approval> {
        let plan = self
            .plan
            .as_ref()
            .ok_or_else(|| anyhow!("no plan to review"))?;
        let approval = match decision.normalized() {
            Decision::Approve => Approval::Approved,
            Decision::Edit(edit) => {
                self.pending = Some(PendingRevision::Plan {
                    previous: plan.clone(),
                    edit,
                });
                Approval::EditRequested
            }
        };
        self.plan_approval = Some(approval);
        Ok(approval)
    }

    /// The current plan, provided it has been approved.
    pub fn approved_plan(&self) -> Result<&Plan> {
        match (&self.plan, self.plan_approval) {
            (Some(plan), Some(Approval::Approved)) => Ok(plan),
            (None, _) => Err(anyhow!("no plan has been produced")),
            _ => Err(anyhow!("plan has not been approved")),
        }
    }

    /// Install a freshly produced or revised task plan.
    ///
    /// Refused unless the current plan is approved.
    pub fn accept_task_plan(&mut self, task_plan: TaskPlan) -> Result<()> {
        self.approved_plan()?;
        self.task_plan = Some(task_plan);
        self.pending = None;
        self.task_approval = None;
        self.cursor = None;
        self.finish = None;
        Ok(())
    }

    /// Record the human decision on the current task plan.
    pub fn record_task_decision(&mut self, decision: Decision) -> Result<Approval> {
        let task_plan = self
            .task_plan
            .as_ref()
            .ok_or_else(|| anyhow!("no task plan to review"))?;
        let approval = match decision.normalized() {
            Decision::Approve => Approval::Approved,
            Decision::Edit(edit) => {
                self.pending = Some(PendingRevision::TaskPlan {
                    previous: task_plan.clone(),
                    edit,
                });
                Approval::EditRequested
            }
        };
        self.task_approval = Some(approval);
        Ok(approval)
    }

    /// Cursor for the coding phase, created on first use from the approved
    /// task plan. An empty task plan finishes immediately.
    pub fn coding_cursor(&mut self) -> Result<&mut StepCursor> {
        if self.cursor.is_none() {
            if self.task_approval != Some(Approval::Approved) {
                bail!("task plan has not been approved");
            }
            let task_plan = self
                .task_plan
                .clone()
                .ok_or_else(|| anyhow!("no task plan to execute"))?;
            self.cursor = Some(StepCursor::new(task_plan));
        }
        self.cursor
            .as_mut()
            .ok_or_else(|| anyhow!("step cursor missing"))
    }

    /// Mark the coding phase finished. The first reason recorded wins.
    pub fn finish(&mut self, reason: FinishReason) {
        if self.finish.is_none() {
            self.finish = Some(reason);
        }
    }
}
