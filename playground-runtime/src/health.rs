use log::{debug, error};
use serde::{Deserialize, Serialize};

use crate::{compiler::Compiler, ExitCode};

/// Health of the playground
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Health {
    /// True if every component is healthy
    pub healthy: bool,
    /// Health of the compiler
    #[serde(rename = "kddp-status")]
    pub kddp_status: KddpStatus,
}

/// Health of the compiler
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KddpStatus {
    /// True if `kddp version` succeeded
    pub healthy: bool,
    /// Failure reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Output of `kddp version`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Exit code of `kddp version`
    #[serde(rename = "exit-status", default, skip_serializing_if = "Option::is_none")]
    pub exit_status: Option<ExitCode>,
}

/// Check that kddp can be run
pub async fn check(compiler: &Compiler) -> Health {
    debug!("Starting health check");
    let result = compiler.version().await;
    let kddp_status = if result.success() {
        KddpStatus {
            healthy: true,
            error: None,
            version: Some(result.stdout),
            exit_status: Some(result.return_code),
        }
    } else {
        let reason = result.error.unwrap_or(result.stderr);
        error!("Failed to read the kddp version: {}", reason);
        KddpStatus {
            healthy: false,
            error: Some(reason),
            version: None,
            exit_status: Some(result.return_code),
        }
    };
    debug!("Health check done");

    Health {
        healthy: kddp_status.healthy,
        kddp_status,
    }
}
