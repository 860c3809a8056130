//! Planner agent: project intent to [`Plan`].

use anyhow::Result;
use tracing::{info, instrument};

use crate::core::types::{Plan, ProjectIntent};
use crate::io::backend::Backend;
use crate::io::prompt::PromptEngine;

use super::infer_record;

#[derive(Debug, Clone)]
pub struct PlannerAgent {
    prompts: PromptEngine,
}

impl PlannerAgent {
    pub fn new(prompts: PromptEngine) -> Self {
        Self { prompts }
    }

    #[instrument(skip_all)]
    pub fn run<B: Backend + ?Sized>(&self, backend: &B, intent: &ProjectIntent) -> Result<Plan> {
        let prompt = self.prompts.render_planner(intent.as_str())?;
        let plan: Plan = infer_record(backend, prompt, "plan")?;
        info!(name = %plan.name, files = plan.files.len(), "plan produced");
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::SchemaViolationError;
    use crate::test_support::{ScriptedBackend, sample_plan};

    #[test]
    fn planner_sends_intent_and_returns_plan() {
        let backend = ScriptedBackend::new();
        backend.push_record(&sample_plan(3));
        let agent = PlannerAgent::new(PromptEngine::new().expect("prompts"));

        let plan = agent
            .run(&backend, &ProjectIntent::new("build a todo app"))
            .expect("plan");

        assert_eq!(plan, sample_plan(3));
        let prompts = backend.structured_prompts();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("build a todo app"));
    }

    #[test]
    fn planner_surfaces_schema_violation() {
        let backend = ScriptedBackend::new();
        backend.push_raw("{\"name\": \"half a plan\"}");
        let agent = PlannerAgent::new(PromptEngine::new().expect("prompts"));

        let err = agent
            .run(&backend, &ProjectIntent::new("anything"))
            .unwrap_err();
        assert!(err.downcast_ref::<SchemaViolationError>().is_some());
    }
}
