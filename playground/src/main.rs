//! Command line front end of the DDP playground

#![deny(clippy::all)]
#![deny(missing_docs)]

use anyhow::{bail, Context, Error};
use clap::{Parser, Subcommand};
use log::{debug, info, warn};
use playground_runtime::{
    compiler::Compiler, config::Config, executables::Executables, health, runner::Runner,
    ExitStatus,
};
use std::{
    path::{Path, PathBuf},
    process::exit,
};
use tokio::{fs, io::AsyncReadExt, select, signal};

mod logger;

/// Exit code after SIGINT
const INTERRUPTED: i32 = 130;

#[derive(Debug, Parser)]
#[clap(name = "playground", about = "Compile and run DDP programs")]
struct Opt {
    /// File that contains the playground configuration. Defaults apply without.
    #[clap(short, long)]
    config: Option<PathBuf>,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Compile a DDP source file and print the result as JSON
    Compile {
        /// Source file. `-` reads from stdin.
        src: PathBuf,
        /// Output executable. Defaults to the source with the extension `out`.
        #[clap(short, long)]
        output: Option<PathBuf>,
    },
    /// Run a compiled program
    Run {
        /// Executable
        exe: PathBuf,
        /// Program arguments
        #[clap(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Compile and run a DDP source file
    Execute {
        /// Source file
        src: PathBuf,
        /// Program arguments
        #[clap(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Print the health of the playground as JSON
    Health,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let opt = Opt::parse();
    let config = match &opt.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    logger::init(config.log_level);
    debug!("Configuration: {:?}", config);

    let code = match opt.command {
        Command::Compile { src, output } => compile(&config, &src, output).await?,
        Command::Run { exe, args } => run(&config, &exe, &args).await?,
        Command::Execute { src, args } => execute(&config, &src, &args).await?,
        Command::Health => {
            let health = health::check(&Compiler::new(&config)).await;
            println!("{}", serde_json::to_string_pretty(&health)?);
            i32::from(!health.healthy)
        }
    };
    exit(code)
}

async fn compile(config: &Config, src: &Path, output: Option<PathBuf>) -> Result<i32, Error> {
    let source = read_source(src).await?;
    let exe = match output {
        Some(output) => output,
        None if src == Path::new("-") => PathBuf::from("a.out"),
        None => src.with_extension("out"),
    };
    // kddp writes the executable and a failed compile deletes it
    if src != Path::new("-") && is_same_file(src, &exe).await {
        bail!("Output {} would overwrite the source", exe.display());
    }

    let result = Compiler::new(config).compile(&source, &exe).await;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(if result.success() { 0 } else { 1 })
}

async fn run(config: &Config, exe: &Path, args: &[String]) -> Result<i32, Error> {
    let runner = Runner::new(config);
    let program = runner.run(
        exe,
        args,
        tokio::io::stdin(),
        tokio::io::stdout(),
        tokio::io::stderr(),
    );
    let status = select! {
        status = program => {
            status.with_context(|| format!("Failed to run {}", exe.display()))?
        }
        _ = signal::ctrl_c() => {
            info!("Received SIGINT. Stopping {}", exe.display());
            return Ok(INTERRUPTED);
        }
    };
    Ok(exit_code(status))
}

async fn execute(config: &Config, src: &Path, args: &[String]) -> Result<i32, Error> {
    let source = read_source(src).await?;
    let executables = Executables::new(config).await?;
    let (token, exe) = executables.reserve();

    let result = Compiler::new(config).compile(&source, &exe).await;
    if !result.success() {
        eprint!("{}", result.stderr);
        executables.delete(token);
        return Ok(1);
    }
    executables.set(token, exe.clone());

    let code = run(config, &exe, args).await;
    if !executables.remove(token).await {
        warn!("Executable {} vanished", token);
    }
    code
}

async fn read_source(src: &Path) -> Result<Vec<u8>, Error> {
    if src == Path::new("-") {
        let mut source = Vec::new();
        tokio::io::stdin()
            .read_to_end(&mut source)
            .await
            .context("Failed to read source from stdin")?;
        Ok(source)
    } else {
        fs::read(src)
            .await
            .with_context(|| format!("Failed to read {}", src.display()))
    }
}

/// True if both paths exist and resolve to the same file
async fn is_same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a).await, fs::canonicalize(b).await) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or_else(|| {
        warn!("Program terminated: {}", status);
        status.shell_code()
    })
}
