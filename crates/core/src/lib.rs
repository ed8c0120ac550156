//! Domain types for the vPrompt generation orchestrator.
//!
//! Holds the job model and its state machine, the in-memory job registry,
//! generation request validation, and the runner timing policy. Nothing in
//! this crate performs network I/O.

pub mod error;
pub mod generation;
pub mod job;
pub mod registry;
pub mod timing;
pub mod types;
