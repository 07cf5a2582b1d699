//! Evaluator process stream handling.
//!
//! Each evaluation context backed by [`ProcessCompiler`](crate::compiler::process::ProcessCompiler)
//! owns one evaluator process and talks NDJSON with it over stdio.
//!
//! - `spawner`: process spawning with environment isolation and a ready handshake.
//! - `reader`: parses inbound lines into [`reader::InboundMessage`]s.
//! - `writer`: serializes outbound requests to the evaluator's stdin.

pub mod reader;
pub mod spawner;
pub mod writer;
