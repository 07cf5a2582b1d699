#![forbid(unsafe_code)]

//! Interactive code-evaluation agent.
//!
//! Clients submit code cells to persistent evaluation contexts. Each context
//! evaluates its cells strictly one at a time, streams typed events for every
//! cell, and supports aborting the cell in flight.

pub mod codec;
pub mod compiler;
pub mod config;
pub mod engine;
pub mod errors;
pub mod evaluator;
pub mod models;
pub mod session;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
