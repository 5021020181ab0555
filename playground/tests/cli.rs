use anyhow::Result;
use assert_cmd::Command;
use std::{fs, os::unix::fs::PermissionsExt, path::Path};
use tempfile::TempDir;

/// Write a configuration that points kddp to `kddp`
fn config(dir: &Path, kddp: &Path) -> Result<std::path::PathBuf> {
    let config = dir.join("playground.toml");
    fs::write(
        &config,
        format!(
            "exe_dir = \"{}\"\nlog_level = \"warn\"\n\n[kddp]\npath = \"{}\"\n",
            dir.join("exes").display(),
            kddp.display()
        ),
    )?;
    Ok(config)
}

/// kddp stand in that turns the source into a shell script
fn fake_kddp(dir: &Path) -> Result<std::path::PathBuf> {
    let kddp = dir.join("kddp");
    fs::write(
        &kddp,
        r#"#!/bin/sh
case "$1" in
    version) echo "kddp 1.0.0" ;;
    kompiliere) cat > "$3"; chmod +x "$3" ;;
    *) exit 2 ;;
esac
"#,
    )?;
    fs::set_permissions(&kddp, fs::Permissions::from_mode(0o755))?;
    Ok(kddp)
}

/// kddp stand in that rejects every source
fn failing_kddp(dir: &Path) -> Result<std::path::PathBuf> {
    let kddp = dir.join("kddp");
    fs::write(
        &kddp,
        "#!/bin/sh\necho \"Syntaxfehler\" >&2\nexit 1\n",
    )?;
    fs::set_permissions(&kddp, fs::Permissions::from_mode(0o755))?;
    Ok(kddp)
}

#[test]
fn failed_compile_keeps_source_without_extension() -> Result<()> {
    let dir = TempDir::new()?;
    let config = config(dir.path(), &failing_kddp(dir.path())?)?;
    let src = dir.path().join("hallo");
    fs::write(&src, "Schreibe \"Hallo\".")?;

    let output = Command::cargo_bin("playground")?
        .arg("--config")
        .arg(&config)
        .arg("compile")
        .arg(&src)
        .output()?;
    assert_eq!(output.status.code(), Some(1));
    let result: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(result["returnCode"], "1");
    assert_eq!(fs::read_to_string(&src)?, "Schreibe \"Hallo\".");
    assert!(!dir.path().join("hallo.out").exists());
    Ok(())
}

#[test]
fn compile_output_must_not_be_source() -> Result<()> {
    let dir = TempDir::new()?;
    let config = config(dir.path(), &fake_kddp(dir.path())?)?;
    let src = dir.path().join("hallo.ddp");
    fs::write(&src, "Schreibe \"Hallo\".")?;

    Command::cargo_bin("playground")?
        .arg("--config")
        .arg(&config)
        .arg("compile")
        .arg(&src)
        .arg("-o")
        .arg(dir.path().join(".").join("hallo.ddp"))
        .assert()
        .failure();
    assert_eq!(fs::read_to_string(&src)?, "Schreibe \"Hallo\".");
    Ok(())
}

#[test]
fn run_exit_code() -> Result<()> {
    Command::cargo_bin("playground")?
        .args(["run", "/bin/sh", "-c", "echo hello; exit 4"])
        .assert()
        .code(4)
        .stdout("hello\n");
    Ok(())
}

#[test]
fn health_without_kddp() -> Result<()> {
    let dir = TempDir::new()?;
    let config = config(dir.path(), &dir.path().join("missing"))?;
    let output = Command::cargo_bin("playground")?
        .arg("--config")
        .arg(&config)
        .arg("health")
        .output()?;
    assert_eq!(output.status.code(), Some(1));
    let health: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(health["healthy"], false);
    assert_eq!(health["kddp-status"]["healthy"], false);
    Ok(())
}

#[test]
fn health() -> Result<()> {
    let dir = TempDir::new()?;
    let config = config(dir.path(), &fake_kddp(dir.path())?)?;
    let output = Command::cargo_bin("playground")?
        .arg("--config")
        .arg(&config)
        .arg("health")
        .output()?;
    assert!(output.status.success());
    let health: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(health["kddp-status"]["version"], "kddp 1.0.0\n");
    Ok(())
}

#[test]
fn execute() -> Result<()> {
    let dir = TempDir::new()?;
    let config = config(dir.path(), &fake_kddp(dir.path())?)?;
    let src = dir.path().join("program.ddp");
    fs::write(&src, "#!/bin/sh\necho \"Hallo $1\"\nexit 3\n")?;

    Command::cargo_bin("playground")?
        .arg("--config")
        .arg(&config)
        .arg("execute")
        .arg(&src)
        .arg("Welt")
        .assert()
        .code(3)
        .stdout("Hallo Welt\n");

    // The executable is removed after the run
    assert_eq!(fs::read_dir(dir.path().join("exes"))?.count(), 0);
    Ok(())
}

#[test]
fn execute_keeps_other_executables() -> Result<()> {
    let dir = TempDir::new()?;
    let config = config(dir.path(), &fake_kddp(dir.path())?)?;
    let other = dir.path().join("exes").join("Spielplatz_42");
    fs::create_dir_all(dir.path().join("exes"))?;
    fs::write(&other, "")?;
    let src = dir.path().join("program.ddp");
    fs::write(&src, "#!/bin/sh\nexit 0\n")?;

    Command::cargo_bin("playground")?
        .arg("--config")
        .arg(&config)
        .arg("execute")
        .arg(&src)
        .assert()
        .success();
    assert!(other.exists());
    Ok(())
}

#[test]
fn invalid_config() -> Result<()> {
    let dir = TempDir::new()?;
    let config = dir.path().join("playground.toml");
    fs::write(&config, "max_concurrent_processes = 0\n")?;
    Command::cargo_bin("playground")?
        .arg("--config")
        .arg(&config)
        .arg("health")
        .assert()
        .failure();
    Ok(())
}
