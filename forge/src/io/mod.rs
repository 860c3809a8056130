//! Side-effecting adapters: filesystem, processes, backend, prompts, config.

pub mod approval;
pub mod backend;
pub mod config;
pub mod process;
pub mod prompt;
pub mod schema;
pub mod tools;
pub mod workspace;
