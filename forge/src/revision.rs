//! Applying a human edit request to a previously accepted record.
//!
//! Revision is a pure request/response exchange with the backend: the prior
//! record is only read, and the result is a fresh record of the same shape.
//! There is no diffing or merging; the backend is told to keep as much of the
//! original as it can.

use anyhow::{Context, Result};
use tracing::{info, instrument};

use crate::agents::infer_record;
use crate::core::types::{Plan, Record};
use crate::io::backend::Backend;
use crate::io::prompt::PromptEngine;

#[derive(Debug, Clone)]
pub struct Reviser {
    prompts: PromptEngine,
}

impl Reviser {
    pub fn new(prompts: PromptEngine) -> Self {
        Self { prompts }
    }

    /// Produce a revised copy of `previous` reflecting `edit`.
    ///
    /// `reference` is the approved plan, supplied when revising a task plan so
    /// the backend keeps the steps consistent with it.
    #[instrument(skip_all, fields(shape = R::SHAPE))]
    pub fn revise<R: Record, B: Backend + ?Sized>(
        &self,
        backend: &B,
        previous: &R,
        edit: &str,
        reference: Option<&Plan>,
    ) -> Result<R> {
        let previous_json = serde_json::to_string_pretty(previous)
            .with_context(|| format!("serialize previous {}", R::SHAPE))?;
        let reference_json = reference
            .map(serde_json::to_string_pretty)
            .transpose()
            .context("serialize reference plan")?;
        let prompt = self.prompts.render_revision(
            R::SHAPE,
            &previous_json,
            edit,
            reference_json.as_deref().map(|json| ("project plan", json)),
        )?;
        let label = format!("revise_{}", R::SHAPE.to_ascii_lowercase());
        let revised = infer_record(backend, prompt, &label)?;
        info!(edit_len = edit.len(), "revision produced");
        Ok(revised)
    }
}
