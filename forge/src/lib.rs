//! Staged software-generation pipeline.
//!
//! A natural-language request becomes a [`Plan`](core::types::Plan), the plan
//! becomes ordered implementation steps, and the steps are executed one at a
//! time against a sandboxed workspace, with human checkpoints after planning
//! and after task breakdown. The crate is split the usual way:
//!
//! - **[`core`]**: Pure, deterministic logic (records, stage graph, run state,
//!   time budgets). No I/O.
//! - **[`io`]**: Side effects (workspace, processes, backend, prompts, config,
//!   approval). Behind traits so tests can script them.
//!
//! [`agents`], [`revision`] and [`orchestrator`] combine the two into a run.

pub mod agents;
pub mod core;
pub mod io;
pub mod logging;
pub mod orchestrator;
pub mod revision;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
