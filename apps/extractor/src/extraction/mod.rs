//! Extraction pipeline: prompt building, the provider retry/repair loop,
//! validation, and concurrent batch orchestration.

pub mod client;
pub mod handlers;
pub mod jobs;
pub mod orchestrator;
pub mod pipeline;
pub mod prompts;
pub mod retry;
pub mod validator;
