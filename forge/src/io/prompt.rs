//! Prompt rendering for every backend call.

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use serde::Serialize;

use crate::core::types::{ImplementationStep, Plan};
use crate::io::tools::TOOL_DESCRIPTIONS;

const PLANNER_TEMPLATE: &str = include_str!("prompts/planner.md");
const ARCHITECT_TEMPLATE: &str = include_str!("prompts/architect.md");
const REVISE_TEMPLATE: &str = include_str!("prompts/revise.md");
const CODER_SYSTEM_TEMPLATE: &str = include_str!("prompts/coder_system.md");
const CODER_USER_TEMPLATE: &str = include_str!("prompts/coder_user.md");
const TOOL_TURN_TEMPLATE: &str = include_str!("prompts/tool_turn.md");

/// Tool results longer than this are cut when replayed into later turns.
const TURN_OUTPUT_LIMIT_BYTES: usize = 8_000;

/// A previous tool turn, as replayed into the next prompt.
#[derive(Debug, Clone, Serialize)]
pub struct TurnContext {
    pub tool: String,
    pub args: String,
    pub ok: bool,
    pub output: String,
}

impl TurnContext {
    pub fn new(tool: &str, args: String, ok: bool, output: &str) -> Self {
        Self {
            tool: tool.to_string(),
            args,
            ok,
            output: truncate(output, TURN_OUTPUT_LIMIT_BYTES),
        }
    }
}

/// Template engine wrapper around minijinja.
#[derive(Debug, Clone)]
pub struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    pub fn new() -> Result<Self> {
        let mut env = Environment::new();
        for (name, source) in [
            ("planner", PLANNER_TEMPLATE),
            ("architect", ARCHITECT_TEMPLATE),
            ("revise", REVISE_TEMPLATE),
            ("coder_system", CODER_SYSTEM_TEMPLATE),
            ("coder_user", CODER_USER_TEMPLATE),
            ("tool_turn", TOOL_TURN_TEMPLATE),
        ] {
            env.add_template(name, source)
                .with_context(|| format!("load {name} template"))?;
        }
        Ok(Self { env })
    }

    pub fn render_planner(&self, intent: &str) -> Result<String> {
        let template = self.env.get_template("planner")?;
        Ok(template.render(context! { intent => intent.trim() })?)
    }

    pub fn render_architect(&self, plan: &Plan) -> Result<String> {
        let plan_json = serde_json::to_string_pretty(plan).context("serialize plan")?;
        let template = self.env.get_template("architect")?;
        Ok(template.render(context! { plan => plan_json })?)
    }

    /// Render a revision request. `previous` and `reference` are pre-serialized
    /// JSON documents.
    pub fn render_revision(
        &self,
        shape: &str,
        previous: &str,
        edit: &str,
        reference: Option<(&str, &str)>,
    ) -> Result<String> {
        let template = self.env.get_template("revise")?;
        Ok(template.render(context! {
            shape => shape,
            previous => previous,
            edit => edit.trim(),
            reference_label => reference.map(|(label, _)| label),
            reference => reference.map(|(_, body)| body),
        })?)
    }

    pub fn render_coder_system(&self) -> Result<String> {
        let template = self.env.get_template("coder_system")?;
        Ok(template.render(context! {})?)
    }

    pub fn render_coder_user(&self, step: &ImplementationStep, existing: &str) -> Result<String> {
        let template = self.env.get_template("coder_user")?;
        Ok(template.render(context! {
            task => step.task_description.trim(),
            filepath => step.filepath,
            existing => existing,
        })?)
    }

    pub fn render_tool_turn(
        &self,
        system: &str,
        user: &str,
        turns: &[TurnContext],
    ) -> Result<String> {
        let tools: Vec<&str> = TOOL_DESCRIPTIONS.iter().map(|(_, desc)| *desc).collect();
        let template = self.env.get_template("tool_turn")?;
        Ok(template.render(context! {
            system => system.trim(),
            user => user.trim(),
            tools => tools,
            turns => turns,
        })?)
    }
}

fn truncate(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_string();
    }
    let mut end = limit;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}\n[truncated {} bytes]", &text[..end], text.len() - end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::sample_plan;

    #[test]
    fn planner_prompt_embeds_intent() {
        let engine = PromptEngine::new().expect("engine");
        let prompt = engine.render_planner("  build a snake game \n").expect("render");
        assert!(prompt.contains("PLANNER"));
        assert!(prompt.contains("User request:\nbuild a snake game"));
    }

    #[test]
    fn architect_prompt_embeds_plan_json() {
        let engine = PromptEngine::new().expect("engine");
        let prompt = engine.render_architect(&sample_plan(2)).expect("render");
        assert!(prompt.contains("ARCHITECT"));
        assert!(prompt.contains("\"path\": \"src/file_1.py\""));
    }

    #[test]
    fn revision_prompt_includes_reference_only_when_given() {
        let engine = PromptEngine::new().expect("engine");
        let without = engine
            .render_revision("Plan", "{\"name\": \"x\"}", "add dark mode", None)
            .expect("render");
        assert!(without.contains("You previously created this Plan"));
        assert!(without.contains("add dark mode"));
        assert!(!without.contains("The approved"));

        let with = engine
            .render_revision(
                "TaskPlan",
                "{}",
                "split step 2",
                Some(("project plan", "{\"name\": \"x\"}")),
            )
            .expect("render");
        assert!(with.contains("The approved project plan is:"));
    }

    #[test]
    fn coder_prompt_marks_empty_content() {
        let engine = PromptEngine::new().expect("engine");
        let step = ImplementationStep {
            filepath: "main.py".to_string(),
            task_description: "write main".to_string(),
        };
        let fresh = engine.render_coder_user(&step, "").expect("render");
        assert!(fresh.contains("Existing content:\n(empty)"));
        assert!(!fresh.contains("does not exist"));
        let existing = engine.render_coder_user(&step, "import os\n").expect("render");
        assert!(existing.contains("import os"));
        assert!(existing.contains("File: main.py"));
    }

    #[test]
    fn tool_turn_prompt_lists_tools_and_replays_turns() {
        let engine = PromptEngine::new().expect("engine");
        let turns = vec![TurnContext::new(
            "read_file",
            "path=\"main.py\"".to_string(),
            true,
            &"x".repeat(TURN_OUTPUT_LIMIT_BYTES + 10),
        )];
        let prompt = engine
            .render_tool_turn("SYSTEM", "Task: do it", &turns)
            .expect("render");
        assert!(prompt.starts_with("SYSTEM"));
        assert!(prompt.contains("- write_file(path, content)"));
        assert!(prompt.contains("### 1. read_file(path=\"main.py\")"));
        assert!(prompt.contains("[truncated 10 bytes]"));
    }
}
