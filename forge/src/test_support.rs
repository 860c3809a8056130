//! Test-only fixtures and scripted collaborators.
//!
//! Compiled for unit tests and, through the `test-support` feature, for the
//! integration tests under `tests/`.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::thread;
use std::time::Duration;

use anyhow::{Result, anyhow};
use serde::Serialize;

use crate::core::types::{Decision, ImplementationStep, Plan, PlannedFile, TaskPlan};
use crate::io::approval::{ApprovalChannel, Checkpoint};
use crate::io::backend::{
    Backend, StructuredRequest, ToolRequest, Transcript, TranscriptEntry,
};
use crate::io::tools::{ToolCall, ToolHost};

/// Deterministic plan with `files` entries named `src/file_<n>.py`.
pub fn sample_plan(files: usize) -> Plan {
    Plan {
        name: "sample-app".to_string(),
        description: "A sample application".to_string(),
        techstack: "python".to_string(),
        features: vec!["list items".to_string(), "add items".to_string()],
        files: (1..=files)
            .map(|n| PlannedFile {
                path: format!("src/file_{n}.py"),
                purpose: format!("module {n}"),
            })
            .collect(),
    }
}

/// Deterministic task plan with `steps` steps targeting `src/step_<n>.py`.
pub fn sample_task_plan(steps: usize) -> TaskPlan {
    TaskPlan {
        implementation_steps: (1..=steps)
            .map(|n| ImplementationStep {
                filepath: format!("src/step_{n}.py"),
                task_description: format!("Implement step {n}"),
            })
            .collect(),
    }
}

/// Scripted behaviour for one tool-using session.
#[derive(Debug, Clone, Default)]
pub struct ToolScript {
    pub calls: Vec<ToolCall>,
    /// Sleep before returning, to simulate a slow backend.
    pub delay: Duration,
    pub failure: Option<String>,
    pub message: Option<String>,
}

impl ToolScript {
    pub fn writes(path: &str, content: &str) -> Self {
        Self {
            calls: vec![ToolCall::WriteFile {
                path: path.to_string(),
                content: content.to_string(),
            }],
            ..Self::default()
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            failure: Some(message.to_string()),
            ..Self::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// Backend that replays queued responses and records every request.
///
/// Structured calls pop from the response queue and fail when it is empty.
/// Tool sessions pop from the script queue; an empty queue finishes at once
/// without calling any tool.
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    responses: RefCell<VecDeque<Result<String, String>>>,
    scripts: RefCell<VecDeque<ToolScript>>,
    structured: RefCell<Vec<StructuredRequest>>,
    tool_requests: RefCell<Vec<ToolRequest>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_record<T: Serialize>(&self, record: &T) {
        let raw = serde_json::to_string_pretty(record).unwrap_or_default();
        self.push_raw(&raw);
    }

    pub fn push_raw(&self, raw: &str) {
        self.responses.borrow_mut().push_back(Ok(raw.to_string()));
    }

    pub fn push_failure(&self, message: &str) {
        self.responses
            .borrow_mut()
            .push_back(Err(message.to_string()));
    }

    pub fn push_tool_script(&self, script: ToolScript) {
        self.scripts.borrow_mut().push_back(script);
    }

    pub fn structured_requests(&self) -> Vec<StructuredRequest> {
        self.structured.borrow().clone()
    }

    pub fn structured_prompts(&self) -> Vec<String> {
        self.structured
            .borrow()
            .iter()
            .map(|r| r.prompt.clone())
            .collect()
    }

    pub fn tool_requests(&self) -> Vec<ToolRequest> {
        self.tool_requests.borrow().clone()
    }

    pub fn remaining_responses(&self) -> usize {
        self.responses.borrow().len()
    }
}

impl Backend for ScriptedBackend {
    fn infer_structured(&self, request: &StructuredRequest) -> Result<String> {
        self.structured.borrow_mut().push(request.clone());
        match self.responses.borrow_mut().pop_front() {
            Some(Ok(raw)) => Ok(raw),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Err(anyhow!(
                "scripted backend has no response queued for {}",
                request.shape
            )),
        }
    }

    fn infer_with_tools(
        &self,
        request: &ToolRequest,
        tools: &mut dyn ToolHost,
    ) -> Result<Transcript> {
        self.tool_requests.borrow_mut().push(request.clone());
        let script = self.scripts.borrow_mut().pop_front().unwrap_or_default();
        if !script.delay.is_zero() {
            thread::sleep(script.delay);
        }
        if let Some(message) = script.failure {
            return Err(anyhow!(message));
        }
        let entries = script
            .calls
            .into_iter()
            .map(|call| {
                let result = tools.invoke(&call);
                TranscriptEntry { call, result }
            })
            .collect();
        Ok(Transcript {
            entries,
            final_message: script.message,
        })
    }
}

/// Approval channel that replays queued decisions. Approves once the queue
/// is empty.
#[derive(Debug, Default)]
pub struct ScriptedApproval {
    decisions: VecDeque<Decision>,
    checkpoints: Vec<Checkpoint>,
}

impl ScriptedApproval {
    pub fn new(decisions: Vec<Decision>) -> Self {
        Self {
            decisions: decisions.into(),
            checkpoints: Vec::new(),
        }
    }

    pub fn approve_all() -> Self {
        Self::default()
    }

    /// Every checkpoint shown so far, in order.
    pub fn checkpoints(&self) -> &[Checkpoint] {
        &self.checkpoints
    }
}

impl ApprovalChannel for ScriptedApproval {
    fn prompt_choice(&mut self, checkpoint: &Checkpoint) -> Result<Decision> {
        self.checkpoints.push(checkpoint.clone());
        Ok(self.decisions.pop_front().unwrap_or(Decision::Approve))
    }
}
