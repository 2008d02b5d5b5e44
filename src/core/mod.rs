// src/core/mod.rs — Core iteration engine

pub mod budget;
pub mod cost;
pub mod dispatcher;
pub mod extractor;
pub mod orchestrator;
pub mod system_prompt;
pub mod trace;
pub mod truncation;
pub mod types;

pub use dispatcher::SubCallDispatcher;
pub use orchestrator::Orchestrator;
pub use types::{Answer, AnswerSource, EngineConfig, Failure, FailureReason, RunOptions, RunOutcome};
