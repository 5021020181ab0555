use std::{
    path::{Path, PathBuf},
    time,
};

use anyhow::{bail, Context};
use log::LevelFilter;
use serde::Deserialize;

/// Playground configuration
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Directory for compiled executables. Recreated on start.
    #[serde(default = "default_exe_dir")]
    pub exe_dir: PathBuf,
    /// Time a compiled executable is kept before `Executables::expire`
    /// deletes it. Only long running users of the store read this. The
    /// `playground` CLI deletes an executable right after its run.
    #[serde(with = "humantime_serde", default = "default_exe_cache_duration")]
    pub exe_cache_duration: time::Duration,
    /// Maximum run time of a program
    #[serde(with = "humantime_serde", default = "default_run_timeout")]
    pub run_timeout: time::Duration,
    /// Maximum time to wait for a free process slot
    #[serde(with = "humantime_serde", default = "default_process_acquire_timeout")]
    pub process_acquire_timeout: time::Duration,
    /// Number of programs that run at the same time
    #[serde(default = "default_max_concurrent_processes")]
    pub max_concurrent_processes: usize,
    /// Number of source code characters that are logged
    #[serde(default = "default_max_source_code_log_length")]
    pub max_source_code_log_length: usize,
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: LevelFilter,
    /// Program that is started with the executable path and arguments
    /// instead of the executable itself, e.g. a sandbox launcher.
    #[serde(default)]
    pub exec_wrapper: Option<PathBuf>,
    /// Compiler settings
    #[serde(default)]
    pub kddp: Kddp,
}

/// Compiler settings
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Kddp {
    /// Path to the kddp binary
    #[serde(default = "default_kddp_path")]
    pub path: PathBuf,
    /// Object file with the program entry point that installs the sandbox
    #[serde(default = "default_main_object")]
    pub main_object: PathBuf,
    /// Options passed through to gcc
    #[serde(default = "default_gcc_options")]
    pub gcc_options: String,
}

impl Default for Kddp {
    fn default() -> Kddp {
        Kddp {
            path: default_kddp_path(),
            main_object: default_main_object(),
            gcc_options: default_gcc_options(),
        }
    }
}

impl Default for Config {
    fn default() -> Config {
        Config {
            exe_dir: default_exe_dir(),
            exe_cache_duration: default_exe_cache_duration(),
            run_timeout: default_run_timeout(),
            process_acquire_timeout: default_process_acquire_timeout(),
            max_concurrent_processes: default_max_concurrent_processes(),
            max_source_code_log_length: default_max_source_code_log_length(),
            log_level: default_log_level(),
            exec_wrapper: None,
            kddp: Kddp::default(),
        }
    }
}

impl Config {
    /// Read and validate the configuration at `path`
    pub fn load(path: &Path) -> anyhow::Result<Config> {
        let config = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config = toml::from_str::<Config>(&config)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        config.check()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn check(&self) -> anyhow::Result<()> {
        if self.max_concurrent_processes < 1 {
            bail!("max_concurrent_processes must be at least 1");
        }
        if self.run_timeout.is_zero() {
            bail!("run_timeout must not be zero");
        }
        if self.exe_dir.as_os_str().is_empty() {
            bail!("exe_dir must not be empty");
        }
        Ok(())
    }
}

fn default_exe_dir() -> PathBuf {
    PathBuf::from("playground_executables")
}

const fn default_exe_cache_duration() -> time::Duration {
    time::Duration::from_secs(60)
}

const fn default_run_timeout() -> time::Duration {
    time::Duration::from_secs(60)
}

const fn default_process_acquire_timeout() -> time::Duration {
    time::Duration::from_secs(3)
}

const fn default_max_concurrent_processes() -> usize {
    50
}

const fn default_max_source_code_log_length() -> usize {
    100
}

const fn default_log_level() -> LevelFilter {
    LevelFilter::Info
}

fn default_kddp_path() -> PathBuf {
    PathBuf::from("kddp")
}

fn default_main_object() -> PathBuf {
    PathBuf::from("seccomp_main.o")
}

fn default_gcc_options() -> String {
    "-lseccomp -static -no-pie".into()
}

#[test]
#[allow(clippy::unwrap_used)]
fn defaults() {
    let config = toml::from_str::<Config>("").unwrap();
    assert_eq!(config.exe_dir, PathBuf::from("playground_executables"));
    assert_eq!(config.run_timeout, time::Duration::from_secs(60));
    assert_eq!(config.process_acquire_timeout, time::Duration::from_secs(3));
    assert_eq!(config.max_concurrent_processes, 50);
    assert_eq!(config.log_level, LevelFilter::Info);
    assert_eq!(config.kddp.main_object, PathBuf::from("seccomp_main.o"));
    assert!(config.exec_wrapper.is_none());
    config.check().unwrap();
}

#[test]
#[allow(clippy::unwrap_used)]
fn parse() {
    let config = r#"
exe_dir = "/tmp/exes"
exe_cache_duration = "5min"
run_timeout = "10s"
process_acquire_timeout = "500ms"
max_concurrent_processes = 4
log_level = "debug"
exec_wrapper = "/usr/bin/ddp-main"

[kddp]
path = "/opt/ddp/bin/kddp"
gcc_options = "-static"
"#;
    let config = toml::from_str::<Config>(config).unwrap();
    assert_eq!(config.exe_cache_duration, time::Duration::from_secs(300));
    assert_eq!(config.process_acquire_timeout, time::Duration::from_millis(500));
    assert_eq!(config.max_concurrent_processes, 4);
    assert_eq!(config.log_level, LevelFilter::Debug);
    assert_eq!(config.kddp.path, PathBuf::from("/opt/ddp/bin/kddp"));
    assert_eq!(config.kddp.gcc_options, "-static");
    assert_eq!(config.kddp.main_object, PathBuf::from("seccomp_main.o"));
}

#[test]
fn unknown_fields() {
    assert!(toml::from_str::<Config>("port = 8080").is_err());
    assert!(toml::from_str::<Config>("[kddp]\nflags = \"-O2\"").is_err());
}

#[test]
#[allow(clippy::unwrap_used)]
fn zero_processes() {
    let config = toml::from_str::<Config>("max_concurrent_processes = 0").unwrap();
    assert!(config.check().is_err());
}
