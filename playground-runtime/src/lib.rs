//! Compile, store and run DDP programs for the playground

#![deny(missing_docs)]
#![deny(clippy::all, clippy::unwrap_used)]

/// Driver for the DDP compiler `kddp`
pub mod compiler;
/// Playground configuration
pub mod config;
mod error;
/// Store of compiled executables
pub mod executables;
mod exit_status;
/// Health report of the playground
pub mod health;
/// Supervised execution of compiled programs
pub mod runner;

pub use error::Error;
pub use exit_status::{ExitCode, ExitStatus};
