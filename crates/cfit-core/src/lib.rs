pub mod agent;
pub mod asana;
pub mod config;
pub mod context;
pub mod git;
pub mod guardrails;
pub mod poll;
pub mod prompt;
pub mod session;
pub mod types;
pub mod worktree;

pub use types::*;
