//! Request handlers.
//!
//! Each submodule provides async handler functions for a single resource and
//! maps errors via [`AppError`](crate::error::AppError).

pub mod generations;
