//! Seccomp sandboxed launcher for DDP programs

#![deny(missing_docs)]
#![deny(clippy::all, clippy::unwrap_used)]

/// Start an external runtime behind the syscall allowlist.
pub mod launcher;

/// Support for seccomp syscall filtering.
pub mod seccomp;
