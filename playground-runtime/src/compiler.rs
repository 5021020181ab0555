use std::{
    io,
    path::Path,
    process::Stdio,
};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::{fs, io::AsyncWriteExt, process::Command, task};

use crate::{
    config::{Config, Kddp},
    ExitCode,
};

/// Outcome of a kddp invocation
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompileResult {
    /// Exit code of kddp. -1 if it did not exit normally.
    #[serde(with = "as_string")]
    pub return_code: ExitCode,
    /// Captured standard output
    pub stdout: String,
    /// Captured standard error
    pub stderr: String,
    /// Reason of a failed invocation
    pub error: Option<String>,
}

impl CompileResult {
    /// True if kddp ran and exited with 0
    pub fn success(&self) -> bool {
        self.error.is_none() && self.return_code == 0
    }
}

/// Runs kddp
#[derive(Clone, Debug)]
pub struct Compiler {
    kddp: Kddp,
    max_source_code_log_length: usize,
}

impl Compiler {
    /// Compiler with the kddp settings of `config`
    pub fn new(config: &Config) -> Compiler {
        Compiler {
            kddp: config.kddp.clone(),
            max_source_code_log_length: config.max_source_code_log_length,
        }
    }

    /// Compile `src` into `exe`. A failed compilation removes `exe` again.
    pub async fn compile(&self, src: &[u8], exe: &Path) -> CompileResult {
        info!(
            "Compiling {}: {}",
            exe.display(),
            truncate(&String::from_utf8_lossy(src), self.max_source_code_log_length)
        );

        let mut command = Command::new(&self.kddp.path);
        command
            .arg("kompiliere")
            .arg("-o")
            .arg(exe)
            .arg("--main")
            .arg(&self.kddp.main_object)
            .arg(format!("--gcc_optionen={}", self.kddp.gcc_options));

        let result = self.invoke(command, src.to_vec()).await;
        if !result.success() {
            debug!("Compilation of {} failed: {:?}", exe.display(), result.error);
            remove_file(exe).await;
        }
        result
    }

    /// Query the kddp version
    pub async fn version(&self) -> CompileResult {
        let mut command = Command::new(&self.kddp.path);
        command.arg("version");
        self.invoke(command, Vec::new()).await
    }

    /// Path of the kddp binary
    pub fn path(&self) -> &Path {
        &self.kddp.path
    }

    async fn invoke(&self, mut command: Command, stdin: Vec<u8>) -> CompileResult {
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!("Failed to spawn {}: {}", self.kddp.path.display(), e);
                return CompileResult {
                    return_code: -1,
                    error: Some(e.to_string()),
                    ..Default::default()
                };
            }
        };

        // Feed the source while the output is collected
        let writer = child.stdin.take().map(|mut pipe| {
            task::spawn(async move {
                let result = pipe.write_all(&stdin).await;
                drop(pipe);
                result
            })
        });

        let output = child.wait_with_output().await;
        if let Some(writer) = writer {
            match writer.await {
                Ok(Err(e)) if e.kind() != io::ErrorKind::BrokenPipe => {
                    warn!("Failed to pass source to kddp: {}", e)
                }
                Err(e) => warn!("Source writer failed: {}", e),
                _ => (),
            }
        }

        match output {
            Ok(output) => {
                let return_code = output.status.code().unwrap_or(-1);
                CompileResult {
                    return_code,
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                    error: (!output.status.success()).then(|| match output.status.code() {
                        Some(code) => format!("exit status {code}"),
                        None => format!("terminated: {}", crate::ExitStatus::from(output.status)),
                    }),
                }
            }
            Err(e) => CompileResult {
                return_code: -1,
                error: Some(e.to_string()),
                ..Default::default()
            },
        }
    }
}

/// Remove `path` if it exists
async fn remove_file(path: &Path) {
    match fs::remove_file(path).await {
        Ok(()) => debug!("Removed {}", path.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => (),
        Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
    }
}

/// First `max` characters of `s`
fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

/// Serialize numbers as JSON strings
mod as_string {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};
    use std::{fmt::Display, str::FromStr};

    pub fn serialize<T, S>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
    where
        T: Display,
        S: Serializer,
    {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<T, D::Error>
    where
        T: FromStr,
        T::Err: Display,
        D: Deserializer<'de>,
    {
        String::deserialize(deserializer)?
            .parse()
            .map_err(D::Error::custom)
    }
}
