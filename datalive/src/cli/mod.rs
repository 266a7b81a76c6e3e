//! LLM command-line completion backend

pub mod runner;

pub use runner::{CliCompletion, CliOutput, Model};
