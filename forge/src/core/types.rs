//! Structured records exchanged with the reasoning backend.
//!
//! Field names are part of the backend contract: they must match the JSON
//! Schemas under `schemas/` exactly.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Raw natural-language project request. Fixed for the lifetime of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectIntent(String);

impl ProjectIntent {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProjectIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A file the plan expects to exist once the project is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedFile {
    pub path: String,
    pub purpose: String,
}

/// Engineering plan produced by the planning stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub name: String,
    pub description: String,
    pub techstack: String,
    pub features: Vec<String>,
    pub files: Vec<PlannedFile>,
}

/// One unit of coding work against a single file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImplementationStep {
    pub filepath: String,
    pub task_description: String,
}

/// Ordered implementation steps derived from an approved [`Plan`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskPlan {
    pub implementation_steps: Vec<ImplementationStep>,
}

impl TaskPlan {
    pub fn len(&self) -> usize {
        self.implementation_steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.implementation_steps.is_empty()
    }
}

/// A record shape the backend can be asked to produce.
///
/// `SCHEMA` is the JSON Schema every response is validated against before it
/// is deserialized.
pub trait Record: Serialize + serde::de::DeserializeOwned + Clone {
    /// Human-readable shape name used in prompts, logs and errors.
    const SHAPE: &'static str;
    const SCHEMA: &'static str;
}

impl Record for Plan {
    const SHAPE: &'static str = "Plan";
    const SCHEMA: &'static str = include_str!("../../schemas/plan.schema.json");
}

impl Record for TaskPlan {
    const SHAPE: &'static str = "TaskPlan";
    const SCHEMA: &'static str = include_str!("../../schemas/task_plan.schema.json");
}

/// Human decision recorded at an approval checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Approval {
    Approved,
    EditRequested,
}

/// Answer collected from the approval channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Approve,
    Edit(String),
}

impl Decision {
    /// Collapse an edit with blank text into plain approval.
    pub fn normalized(self) -> Self {
        match self {
            Decision::Edit(text) if text.trim().is_empty() => Decision::Approve,
            Decision::Edit(text) => Decision::Edit(text.trim().to_string()),
            Decision::Approve => Decision::Approve,
        }
    }
}
