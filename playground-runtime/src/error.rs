use std::{io, time::Duration};
use thiserror::Error;

/// Playground errors
#[derive(Error, Debug)]
pub enum Error {
    /// No process slot became free in time
    #[error("the server is busy, try again later")]
    Busy,
    /// The program ran longer than allowed and was killed
    #[error("program exceeded the run timeout of {0:?}")]
    Timeout(Duration),
    /// An io operation failed
    #[error("{0}: {1}")]
    Io(String, #[source] io::Error),
}
