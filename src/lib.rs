// src/lib.rs — Library root for rlm
//
// A model answers a query over a large context by writing Rhai code that
// runs in a sandbox, reading the results, and delegating sub-questions to
// nested runs of itself.

pub mod cli;
pub mod core;
pub mod infra;
pub mod provider;
pub mod sandbox;
pub mod util;
