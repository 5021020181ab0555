use std::{
    collections::HashMap,
    io,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use log::{debug, info, warn};
use rand::Rng;
use tempfile::TempDir;
use tokio::{fs, task, time};

use crate::{config::Config, Error};

/// Identifier of a compiled executable
pub type Token = i64;

/// Compiled executables by token. Clones share the same entries.
///
/// Every store owns a fresh directory below `exe_dir`. Other stores using the
/// same `exe_dir` are left alone. The directory and everything in it is
/// removed when the last clone is dropped.
#[derive(Clone, Debug)]
pub struct Executables {
    dir: Arc<TempDir>,
    cache_duration: Duration,
    entries: Arc<Mutex<HashMap<Token, PathBuf>>>,
}

impl Executables {
    /// Store below `config.exe_dir`
    pub async fn new(config: &Config) -> Result<Executables, Error> {
        let exe_dir = &config.exe_dir;
        fs::create_dir_all(exe_dir)
            .await
            .map_err(|e| Error::Io(format!("failed to create {}", exe_dir.display()), e))?;
        let dir = tempfile::Builder::new()
            .prefix("store-")
            .tempdir_in(exe_dir)
            .map_err(|e| {
                Error::Io(format!("failed to create a store in {}", exe_dir.display()), e)
            })?;
        debug!("Storing executables in {}", dir.path().display());

        Ok(Executables {
            dir: Arc::new(dir),
            cache_duration: config.exe_cache_duration,
            entries: Arc::default(),
        })
    }

    /// Directory of the executables
    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    /// Time after which `expire` removes an executable
    pub fn cache_duration(&self) -> Duration {
        self.cache_duration
    }

    /// Allocate a new token and the path its executable is compiled to
    pub fn reserve(&self) -> (Token, PathBuf) {
        let mut entries = self.lock();
        let mut rng = rand::thread_rng();
        loop {
            let token = rng.gen_range(0..Token::MAX);
            if !entries.contains_key(&token) {
                let path = self.dir().join(format!("Spielplatz_{token}"));
                entries.insert(token, path.clone());
                return (token, path);
            }
        }
    }

    /// Register `path` for `token`
    pub fn set(&self, token: Token, path: PathBuf) {
        self.lock().insert(token, path);
    }

    /// Path of the executable for `token`
    pub fn get(&self, token: Token) -> Option<PathBuf> {
        self.lock().get(&token).cloned()
    }

    /// Forget `token` without touching its file
    pub fn delete(&self, token: Token) -> Option<PathBuf> {
        self.lock().remove(&token)
    }

    /// Forget `token` and delete its executable. Returns false if the token
    /// is unknown, e.g. because it was removed already.
    pub async fn remove(&self, token: Token) -> bool {
        let Some(path) = self.delete(token) else {
            return false;
        };
        info!("Removing executable {}", path.display());
        match fs::remove_file(&path).await {
            Ok(()) => (),
            Err(e) if e.kind() == io::ErrorKind::NotFound => (),
            Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
        }
        true
    }

    /// Remove the executable of `token` after `duration` if it is still present
    pub fn expire_after(&self, token: Token, duration: Duration) -> task::JoinHandle<bool> {
        let executables = self.clone();
        task::spawn(async move {
            time::sleep(duration).await;
            let removed = executables.remove(token).await;
            if removed {
                debug!("Executable {} expired", token);
            }
            removed
        })
    }

    /// Remove the executable of `token` after the configured cache duration.
    /// For long running users that serve one executable to several runs.
    pub fn expire(&self, token: Token) -> task::JoinHandle<bool> {
        self.expire_after(token, self.cache_duration)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Token, PathBuf>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
