use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;

use crate::error::{QtrixError, Result};
use crate::store::{Keyspace, Store, Txn};

/// Store persisted as a JSON snapshot on a filesystem every host can reach.
///
/// Each transaction holds an exclusive lock on `<path>.lock` for its whole
/// read-modify-write cycle, so transactions from different processes are
/// serialized. Writes go to a temporary file that is renamed over the
/// snapshot, so readers never observe a partially written file.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
    lock_path: PathBuf,
}

impl FileStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| io_error("create store directory", parent, e))?;
        }
        let lock_path = sibling(&path, "lock");
        Ok(Self { path, lock_path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<File> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&self.lock_path)
            .map_err(|e| io_error("open lock file", &self.lock_path, e))?;
        file.lock_exclusive()
            .map_err(|e| io_error("lock", &self.lock_path, e))?;
        Ok(file)
    }

    fn load(&self) -> Result<Keyspace> {
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Keyspace::new()),
            Err(e) => return Err(io_error("read", &self.path, e)),
        };
        if raw.is_empty() {
            return Ok(Keyspace::new());
        }
        serde_json::from_slice(&raw).map_err(|source| QtrixError::Corrupt {
            key: self.path.display().to_string(),
            source,
        })
    }

    fn persist(&self, keyspace: &Keyspace) -> Result<()> {
        let tmp_path = sibling(&self.path, "tmp");
        let encoded = serde_json::to_vec(keyspace).map_err(|source| QtrixError::Corrupt {
            key: self.path.display().to_string(),
            source,
        })?;

        let mut tmp = File::create(&tmp_path).map_err(|e| io_error("create", &tmp_path, e))?;
        tmp.write_all(&encoded)
            .and_then(|_| tmp.sync_all())
            .map_err(|e| io_error("write", &tmp_path, e))?;
        fs::rename(&tmp_path, &self.path).map_err(|e| io_error("rename", &self.path, e))
    }
}

impl Store for FileStore {
    fn transaction<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut dyn Txn) -> Result<R>,
    {
        let lock = self.lock()?;

        let outcome = self.load().and_then(|mut keyspace| {
            let result = f(&mut keyspace)?;
            if keyspace.is_dirty() {
                self.persist(&keyspace)?;
            }
            Ok(result)
        });

        if let Err(e) = FileExt::unlock(&lock) {
            tracing::warn!(path = %self.lock_path.display(), error = %e, "Failed to release store lock");
        }
        outcome
    }
}

fn sibling(path: &Path, ext: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(ext);
    PathBuf::from(name)
}

fn io_error(op: &str, path: &Path, e: io::Error) -> QtrixError {
    QtrixError::unavailable(format!("failed to {} {}: {}", op, path.display(), e))
}
