//! Stage graph for a workflow run.
//!
//! The graph is a fixed transition table of `(from, guard) -> to`. Rows are
//! evaluated in order and the first row whose guard holds wins, so the table
//! fully determines control flow.

use std::fmt;

use anyhow::{Result, anyhow};

use crate::core::types::Approval;

/// Pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Planning,
    PlanApproval,
    Architecture,
    TaskApproval,
    Coding,
    Done,
}

impl Stage {
    pub const INITIAL: Stage = Stage::Planning;

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Planning => "planning",
            Stage::PlanApproval => "plan_approval",
            Stage::Architecture => "architecture",
            Stage::TaskApproval => "task_approval",
            Stage::Coding => "coding",
            Stage::Done => "done",
        }
    }

    pub fn is_terminal(self) -> bool {
        self == Stage::Done
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of the workflow facts that guards are allowed to inspect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Signals {
    pub plan_approval: Option<Approval>,
    pub task_approval: Option<Approval>,
    /// Coding has nothing left to do: steps exhausted or the run overran.
    pub coding_finished: bool,
}

/// Predicate attached to a transition row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Guard {
    Always,
    PlanApproved,
    PlanEditRequested,
    TasksApproved,
    TasksEditRequested,
    StepsRemain,
    CodingFinished,
}

impl Guard {
    pub fn holds(self, signals: &Signals) -> bool {
        match self {
            Guard::Always => true,
            Guard::PlanApproved => signals.plan_approval == Some(Approval::Approved),
            Guard::PlanEditRequested => signals.plan_approval == Some(Approval::EditRequested),
            Guard::TasksApproved => signals.task_approval == Some(Approval::Approved),
            Guard::TasksEditRequested => signals.task_approval == Some(Approval::EditRequested),
            Guard::StepsRemain => !signals.coding_finished,
            Guard::CodingFinished => signals.coding_finished,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Guard::Always => "",
            Guard::PlanApproved | Guard::TasksApproved => "approved",
            Guard::PlanEditRequested | Guard::TasksEditRequested => "edit",
            Guard::StepsRemain => "steps remain",
            Guard::CodingFinished => "finished",
        }
    }
}

/// One row of the transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: Stage,
    pub guard: Guard,
    pub to: Stage,
}

const fn row(from: Stage, guard: Guard, to: Stage) -> Transition {
    Transition { from, guard, to }
}

pub const TRANSITIONS: &[Transition] = &[
    row(Stage::Planning, Guard::Always, Stage::PlanApproval),
    row(Stage::PlanApproval, Guard::PlanApproved, Stage::Architecture),
    row(Stage::PlanApproval, Guard::PlanEditRequested, Stage::Planning),
    row(Stage::Architecture, Guard::Always, Stage::TaskApproval),
    row(Stage::TaskApproval, Guard::TasksApproved, Stage::Coding),
    row(Stage::TaskApproval, Guard::TasksEditRequested, Stage::Architecture),
    row(Stage::Coding, Guard::CodingFinished, Stage::Done),
    row(Stage::Coding, Guard::StepsRemain, Stage::Coding),
];

/// Resolve the stage that follows `from` given the current signals.
///
/// Errors when no row matches, e.g. leaving an approval stage before a
/// decision was recorded, or asking for a successor of `Done`.
pub fn next_stage(from: Stage, signals: &Signals) -> Result<Stage> {
    TRANSITIONS
        .iter()
        .find(|t| t.from == from && t.guard.holds(signals))
        .map(|t| t.to)
        .ok_or_else(|| anyhow!("no transition from {from} for signals {signals:?}"))
}

/// Render the transition table as a Mermaid flowchart.
pub fn render_mermaid() -> String {
    let mut out = String::from("flowchart TD\n");
    out.push_str(&format!("    start([start]) --> {}\n", Stage::INITIAL));
    for t in TRANSITIONS {
        let label = t.guard.label();
        if label.is_empty() {
            out.push_str(&format!("    {} --> {}\n", t.from, t.to));
        } else {
            out.push_str(&format!("    {} -- {} --> {}\n", t.from, label, t.to));
        }
    }
    out
}
