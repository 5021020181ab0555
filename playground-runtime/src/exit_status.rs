use nix::sys::signal::Signal;
use serde::{Deserialize, Serialize};
use std::{fmt, os::unix::process::ExitStatusExt, process};

/// Exit code of a process
pub type ExitCode = i32;

/// How a program ended
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitStatus {
    /// Process exited with exit code
    Exit(ExitCode),
    /// Process was terminated by a signal
    Signalled(u8),
}

impl From<Signal> for ExitStatus {
    fn from(signal: Signal) -> Self {
        ExitStatus::Signalled(signal as u8)
    }
}

impl From<process::ExitStatus> for ExitStatus {
    fn from(status: process::ExitStatus) -> Self {
        match (status.code(), status.signal()) {
            (Some(code), _) => ExitStatus::Exit(code),
            (None, Some(signal)) => ExitStatus::Signalled(signal as u8),
            // Stopped or continued processes are not waited for
            (None, None) => ExitStatus::Exit(-1),
        }
    }
}

impl ExitStatus {
    /// True for a zero exit code. A signal is never a success.
    pub fn success(&self) -> bool {
        *self == ExitStatus::Exit(0)
    }

    /// Exit code if the program exited on its own
    pub fn code(&self) -> Option<ExitCode> {
        match self {
            ExitStatus::Exit(code) => Some(*code),
            ExitStatus::Signalled(_) => None,
        }
    }

    /// Exit code a shell would report: the code itself or 128 + signal
    pub fn shell_code(&self) -> ExitCode {
        match self {
            ExitStatus::Exit(code) => *code,
            ExitStatus::Signalled(signal) => 128 + *signal as ExitCode,
        }
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitStatus::Exit(code) => write!(f, "exit code {code}"),
            ExitStatus::Signalled(signal) => match Signal::try_from(*signal as i32) {
                Ok(signal) => write!(f, "killed by {signal}"),
                Err(_) => write!(f, "killed by signal {signal}"),
            },
        }
    }
}
