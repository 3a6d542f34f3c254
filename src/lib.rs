pub mod cli;
pub mod engine;
pub mod error;
pub mod orchestrator;
pub mod variables;
