//! Architect agent: approved [`Plan`] to ordered [`TaskPlan`].

use anyhow::Result;
use tracing::{info, instrument};

use crate::core::types::{Plan, TaskPlan};
use crate::io::backend::Backend;
use crate::io::prompt::PromptEngine;

use super::infer_record;

#[derive(Debug, Clone)]
pub struct ArchitectAgent {
    prompts: PromptEngine,
}

impl ArchitectAgent {
    pub fn new(prompts: PromptEngine) -> Self {
        Self { prompts }
    }

    #[instrument(skip_all, fields(plan = %plan.name))]
    pub fn run<B: Backend + ?Sized>(&self, backend: &B, plan: &Plan) -> Result<TaskPlan> {
        let prompt = self.prompts.render_architect(plan)?;
        let task_plan: TaskPlan = infer_record(backend, prompt, "task_plan")?;
        info!(steps = task_plan.len(), "task plan produced");
        Ok(task_plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScriptedBackend, sample_plan, sample_task_plan};

    #[test]
    fn architect_embeds_plan_in_prompt() {
        let backend = ScriptedBackend::new();
        backend.push_record(&sample_task_plan(4));
        let agent = ArchitectAgent::new(PromptEngine::new().expect("prompts"));

        let task_plan = agent.run(&backend, &sample_plan(2)).expect("task plan");

        assert_eq!(task_plan.len(), 4);
        let prompts = backend.structured_prompts();
        assert!(prompts[0].contains("src/file_2.py"));
    }

    #[test]
    fn architect_propagates_backend_failure() {
        let backend = ScriptedBackend::new();
        backend.push_failure("backend offline");
        let agent = ArchitectAgent::new(PromptEngine::new().expect("prompts"));

        let err = agent.run(&backend, &sample_plan(1)).unwrap_err();
        assert!(err.to_string().contains("backend offline"));
    }
}
