use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use nix::fcntl::{Flock, FlockArg};

use crate::config::Config;
use crate::error::{Error, IoResultExt, Result};
use crate::names::validate_name;

/// a tarvault storage root
///
/// layout:
///
/// ```text
/// <root>/config.toml
/// <root>/blobs/ab/cdef...   content, addressed by sha256
/// <root>/indexes/<name>     encoded archive index per stored name
/// <root>/locks/<name>.lock  per-name advisory locks
/// <root>/tmp/               scratch for in-flight writes
/// ```
#[derive(Debug)]
pub struct Store {
    path: PathBuf,
    config: Config,
}

impl Store {
    /// initialize a new store at the given path
    pub fn init(path: &Path) -> Result<Self> {
        Self::init_with_config(path, Config::default())
    }

    /// initialize a new store with an explicit configuration
    pub fn init_with_config(path: &Path, config: Config) -> Result<Self> {
        let config_path = path.join("config.toml");
        if config_path.exists() {
            return Err(Error::StoreExists(path.to_path_buf()));
        }

        for area in ["blobs", "indexes", "locks", "tmp"] {
            let dir = path.join(area);
            fs::create_dir_all(&dir).with_path(&dir)?;
        }
        config.save(&config_path)?;

        Ok(Self {
            path: path.to_path_buf(),
            config,
        })
    }

    /// open an existing store
    pub fn open(path: &Path) -> Result<Self> {
        let config_path = path.join("config.toml");
        if !config_path.exists() {
            return Err(Error::NoStore(path.to_path_buf()));
        }

        let config = Config::load(&config_path)?;

        Ok(Self {
            path: path.to_path_buf(),
            config,
        })
    }

    /// open the store at `path`, creating it first if needed
    pub fn open_or_init(path: &Path) -> Result<Self> {
        match Self::open(path) {
            Err(Error::NoStore(_)) => Self::init(path),
            other => other,
        }
    }

    /// store root path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// store configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// path to config.toml
    pub fn config_path(&self) -> PathBuf {
        self.path.join("config.toml")
    }

    /// path to the blob area
    pub fn blobs_path(&self) -> PathBuf {
        self.path.join("blobs")
    }

    /// path to the index area
    pub fn indexes_path(&self) -> PathBuf {
        self.path.join("indexes")
    }

    /// path to the per-name lock files
    pub fn locks_path(&self) -> PathBuf {
        self.path.join("locks")
    }

    /// path to tmp directory (for atomic writes)
    pub fn tmp_path(&self) -> PathBuf {
        self.path.join("tmp")
    }

    /// fresh, unique scratch path
    pub fn scratch_path(&self, prefix: &str) -> PathBuf {
        self.tmp_path()
            .join(format!("{}-{}", prefix, uuid::Uuid::new_v4()))
    }

    /// acquire the exclusive lock for `name`, blocking until it is free
    ///
    /// flock is held per open file description, so this serializes threads of
    /// this process as well as other processes sharing the store.
    pub fn lock_name(&self, name: &str) -> Result<NameLock> {
        let file = self.open_lock_file(name)?;

        let flock = Flock::lock(file, FlockArg::LockExclusive)
            .map_err(|_| Error::LockContention(name.to_string()))?;

        Ok(NameLock { flock })
    }

    /// try to acquire the lock for `name`, returning None if already held
    pub fn try_lock_name(&self, name: &str) -> Result<Option<NameLock>> {
        let file = self.open_lock_file(name)?;

        match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(flock) => Ok(Some(NameLock { flock })),
            Err((_, nix::errno::Errno::EWOULDBLOCK)) => Ok(None),
            Err(_) => Err(Error::LockContention(name.to_string())),
        }
    }

    fn open_lock_file(&self, name: &str) -> Result<File> {
        validate_name(name)?;

        let lock_path = self.locks_path().join(format!("{}.lock", name));
        if let Some(parent) = lock_path.parent() {
            fs::create_dir_all(parent).with_path(parent)?;
        }

        OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .with_path(&lock_path)
    }

    /// fsync a directory, if durability is enabled
    pub(crate) fn sync_dir(&self, path: &Path) -> Result<()> {
        if !self.config.storage.fsync {
            return Ok(());
        }
        let dir = File::open(path).with_path(path)?;
        dir.sync_all().with_path(path)?;
        Ok(())
    }

    /// fsync a file, if durability is enabled
    pub(crate) fn sync_file(&self, file: &File, path: &Path) -> Result<()> {
        if self.config.storage.fsync {
            file.sync_all().with_path(path)?;
        }
        Ok(())
    }
}

/// guard that holds a per-name lock until dropped
pub struct NameLock {
    #[allow(dead_code)]
    flock: Flock<File>,
}
// lock is released automatically when Flock is dropped
