use std::{
    io,
    path::{Path, PathBuf},
    process::Stdio,
    sync::Arc,
    time::Duration,
};

use log::{debug, info, warn};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    process::Command,
    sync::Semaphore,
    task, time,
};

use crate::{config::Config, Error, ExitStatus};

/// Runs compiled programs with bounded concurrency and run time
#[derive(Clone, Debug)]
pub struct Runner {
    slots: Arc<Semaphore>,
    acquire_timeout: Duration,
    run_timeout: Duration,
    exec_wrapper: Option<PathBuf>,
}

impl Runner {
    /// Runner with the limits of `config`
    pub fn new(config: &Config) -> Runner {
        Runner {
            slots: Arc::new(Semaphore::new(config.max_concurrent_processes)),
            acquire_timeout: config.process_acquire_timeout,
            run_timeout: config.run_timeout,
            exec_wrapper: config.exec_wrapper.clone(),
        }
    }

    /// Number of programs that can start right now
    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }

    /// Run `exe` with `args`. `stdin` is passed to the program until it ends,
    /// its output is copied to `stdout` and `stderr`.
    pub async fn run<I, O, E>(
        &self,
        exe: &Path,
        args: &[String],
        mut stdin: I,
        mut stdout: O,
        mut stderr: E,
    ) -> Result<ExitStatus, Error>
    where
        I: AsyncRead + Unpin + Send + 'static,
        O: AsyncWrite + Unpin,
        E: AsyncWrite + Unpin,
    {
        let _permit = match time::timeout(self.acquire_timeout, self.slots.acquire()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) | Err(_) => {
                warn!("No free process slot for {}", exe.display());
                return Err(Error::Busy);
            }
        };

        let exe = absolute(exe)?;
        let mut command = match &self.exec_wrapper {
            Some(wrapper) => {
                let mut command = Command::new(wrapper);
                command.arg(&exe);
                command
            }
            None => Command::new(&exe),
        };
        command
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!("Starting {} {:?}", exe.display(), args);
        let mut child = command
            .spawn()
            .map_err(|e| Error::Io(format!("failed to start {}", exe.display()), e))?;

        let stdin_pipe = child.stdin.take();
        let mut stdout_pipe = child.stdout.take().ok_or_else(|| closed("stdout"))?;
        let mut stderr_pipe = child.stderr.take().ok_or_else(|| closed("stderr"))?;

        // Closing the pipe at the end of the input signals EOF to the program
        let input = stdin_pipe.map(|mut pipe| {
            task::spawn(async move {
                if let Err(e) = tokio::io::copy(&mut stdin, &mut pipe).await {
                    debug!("Stopped forwarding input: {}", e);
                }
            })
        });

        let output = async {
            let (out, err, status) = tokio::join!(
                tokio::io::copy(&mut stdout_pipe, &mut stdout),
                tokio::io::copy(&mut stderr_pipe, &mut stderr),
                child.wait()
            );
            out?;
            err?;
            status
        };

        let result = time::timeout(self.run_timeout, output).await;
        if let Some(input) = input {
            input.abort();
        }

        match result {
            Ok(Ok(status)) => {
                let status = ExitStatus::from(status);
                info!("{} exited with {}", exe.display(), status);
                Ok(status)
            }
            Ok(Err(e)) => Err(Error::Io(format!("failed to supervise {}", exe.display()), e)),
            Err(_) => {
                warn!("{} exceeded the run timeout", exe.display());
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill {}: {}", exe.display(), e);
                }
                Err(Error::Timeout(self.run_timeout))
            }
        }
    }
}

fn absolute(path: &Path) -> Result<PathBuf, Error> {
    if path.is_absolute() {
        Ok(path.to_owned())
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .map_err(|e| Error::Io("failed to get the current directory".into(), e))
    }
}

fn closed(stream: &str) -> Error {
    Error::Io(
        format!("failed to capture {stream}"),
        io::Error::from(io::ErrorKind::BrokenPipe),
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod test {
    use super::*;
    use nix::sys::signal::Signal;

    fn runner(max: usize, run_timeout: Duration) -> Runner {
        let config = Config {
            max_concurrent_processes: max,
            run_timeout,
            process_acquire_timeout: Duration::from_millis(50),
            ..Default::default()
        };
        Runner::new(&config)
    }

    fn sh(script: &str) -> Vec<String> {
        vec!["-c".into(), script.into()]
    }

    #[tokio::test]
    async fn output_and_exit_code() {
        let runner = runner(1, Duration::from_secs(10));
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let status = runner
            .run(
                Path::new("/bin/sh"),
                &sh("echo hello; echo fehler >&2; exit 3"),
                tokio::io::empty(),
                &mut stdout,
                &mut stderr,
            )
            .await
            .unwrap();
        assert_eq!(status, ExitStatus::Exit(3));
        assert_eq!(stdout, b"hello\n");
        assert_eq!(stderr, b"fehler\n");
        assert_eq!(runner.available(), 1);
    }

    #[tokio::test]
    async fn stdin() {
        let runner = runner(1, Duration::from_secs(10));
        let mut stdout = Vec::new();
        let status = runner
            .run(
                Path::new("/bin/cat"),
                &[],
                &b"Hallo Welt"[..],
                &mut stdout,
                tokio::io::sink(),
            )
            .await
            .unwrap();
        assert!(status.success());
        assert_eq!(stdout, b"Hallo Welt");
    }

    #[tokio::test]
    async fn timeout() {
        let runner = runner(1, Duration::from_millis(100));
        let result = runner
            .run(
                Path::new("/bin/sh"),
                &sh("sleep 10"),
                tokio::io::empty(),
                tokio::io::sink(),
                tokio::io::sink(),
            )
            .await;
        assert!(matches!(result, Err(Error::Timeout(_))));
        assert_eq!(runner.available(), 1);
    }

    #[tokio::test]
    async fn signalled() {
        let runner = runner(1, Duration::from_secs(10));
        let status = runner
            .run(
                Path::new("/bin/sh"),
                &sh("kill -9 $$"),
                tokio::io::empty(),
                tokio::io::sink(),
                tokio::io::sink(),
            )
            .await
            .unwrap();
        assert_eq!(status, ExitStatus::from(Signal::SIGKILL));
    }

    #[tokio::test]
    async fn busy() {
        let runner = runner(1, Duration::from_secs(1));
        let sleep_args = sh("sleep 10");
        let long = runner.run(
            Path::new("/bin/sh"),
            &sleep_args,
            tokio::io::empty(),
            tokio::io::sink(),
            tokio::io::sink(),
        );
        let rejected = async {
            time::sleep(Duration::from_millis(10)).await;
            runner
                .run(
                    Path::new("/bin/true"),
                    &[],
                    tokio::io::empty(),
                    tokio::io::sink(),
                    tokio::io::sink(),
                )
                .await
        };
        let (long, rejected) = tokio::join!(long, rejected);
        assert!(matches!(long, Err(Error::Timeout(_))));
        assert!(matches!(rejected, Err(Error::Busy)));
    }

    #[tokio::test]
    async fn exec_wrapper() {
        let dir = tempfile::TempDir::new().unwrap();
        let script = dir.path().join("program");
        std::fs::write(&script, "echo \"wrapped $0 $1\"\n").unwrap();

        let config = Config {
            exec_wrapper: Some(PathBuf::from("/bin/sh")),
            ..Default::default()
        };
        let runner = Runner::new(&config);
        let mut stdout = Vec::new();
        let status = runner
            .run(
                &script,
                &["arg".into()],
                tokio::io::empty(),
                &mut stdout,
                tokio::io::sink(),
            )
            .await
            .unwrap();
        assert!(status.success());
        assert_eq!(
            String::from_utf8(stdout).unwrap(),
            format!("wrapped {} arg\n", script.display())
        );
    }

    #[tokio::test]
    async fn missing_executable() {
        let runner = runner(1, Duration::from_secs(1));
        let result = runner
            .run(
                Path::new("/does/not/exist"),
                &[],
                tokio::io::empty(),
                tokio::io::sink(),
                tokio::io::sink(),
            )
            .await;
        assert!(matches!(result, Err(Error::Io(..))));
        assert_eq!(runner.available(), 1);
    }
}
