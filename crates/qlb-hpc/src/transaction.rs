//! Read-modify-write of shared files under advisory locks.
//!
//! Several executors may share one job-state or panic file. Every update runs
//! as one transaction: acquire an exclusive lock, read, rewrite, release.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use qlb_core::errors::QlbError;

/// Exclusive lock on a file plus its contents at acquisition time.
///
/// Dropping the transaction without [`commit`](Self::commit) releases the
/// lock and leaves the file unchanged.
#[derive(Debug)]
pub struct FileTransaction {
    file: File,
    path: PathBuf,
    contents: String,
}

impl FileTransaction {
    /// Opens (creating if needed) and exclusively locks `path`.
    pub fn begin(path: &Path) -> Result<Self, QlbError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .map_err(|err| QlbError::io("transaction.create_dir", parent, err))?;
            }
        }
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|err| QlbError::io("transaction.open", path, err))?;
        FileExt::lock_exclusive(&file).map_err(|err| QlbError::io("transaction.lock", path, err))?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|err| QlbError::io("transaction.read", path, err))?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
            contents,
        })
    }

    /// Contents read under the lock, `None` for an empty or new file.
    pub fn contents(&self) -> Option<&str> {
        if self.contents.trim().is_empty() {
            None
        } else {
            Some(&self.contents)
        }
    }

    /// Locked path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replaces the file contents and releases the lock.
    pub fn commit(mut self, bytes: &[u8]) -> Result<(), QlbError> {
        let path = self.path.clone();
        self.file
            .seek(SeekFrom::Start(0))
            .map_err(|err| QlbError::io("transaction.seek", &path, err))?;
        self.file
            .write_all(bytes)
            .map_err(|err| QlbError::io("transaction.write", &path, err))?;
        self.file
            .set_len(bytes.len() as u64)
            .map_err(|err| QlbError::io("transaction.truncate", &path, err))?;
        self.file
            .sync_all()
            .map_err(|err| QlbError::io("transaction.sync", &path, err))?;
        Ok(())
    }
}

impl Drop for FileTransaction {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

/// Reads `path` under a shared lock; `Ok(None)` when the file is missing or
/// empty.
pub fn read_shared(path: &Path) -> Result<Option<String>, QlbError> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(QlbError::io("transaction.open", path, err)),
    };
    FileExt::lock_shared(&file).map_err(|err| QlbError::io("transaction.lock", path, err))?;
    let mut contents = String::new();
    let read = file.read_to_string(&mut contents);
    let _ = FileExt::unlock(&file);
    read.map_err(|err| QlbError::io("transaction.read", path, err))?;
    if contents.trim().is_empty() {
        Ok(None)
    } else {
        Ok(Some(contents))
    }
}

/// Runs one read-modify-write transaction on `path`.
///
/// `update` receives the current contents and returns the bytes to write.
/// An error from `update` aborts without touching the file.
pub fn transact<F>(path: &Path, update: F) -> Result<(), QlbError>
where
    F: FnOnce(Option<&str>) -> Result<Vec<u8>, QlbError>,
{
    let transaction = FileTransaction::begin(path)?;
    let bytes = update(transaction.contents())?;
    transaction.commit(&bytes)
}
