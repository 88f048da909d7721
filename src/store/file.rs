//! File-backed store using plain seek + read/write I/O.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::store::BackingStore;
use crate::VAddr;

/// Backing store over a regular file.
///
/// `start` creates the file if needed and grows it to the pool capacity
/// (new bytes read as zero); `stop` syncs and closes the handle but leaves
/// the file on disk, so the same value can be restarted against the same
/// data. The file is removed when the store is dropped.
pub struct FileStore {
    path: PathBuf,
    capacity: u64,
    file: Option<File>,
}

impl FileStore {
    pub fn new(path: &Path, capacity: u64) -> Self {
        Self {
            path: path.to_path_buf(),
            capacity,
            file: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn file_mut(&mut self) -> io::Result<&mut File> {
        self.file
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "store not started"))
    }
}

impl BackingStore for FileStore {
    fn start(&mut self) -> io::Result<()> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)?;
        if file.metadata()?.len() < self.capacity {
            file.set_len(self.capacity)?;
        }
        info!(
            "file store ready: {} ({} bytes)",
            self.path.display(),
            self.capacity
        );
        self.file = Some(file);
        Ok(())
    }

    fn stop(&mut self) -> io::Result<()> {
        if let Some(file) = self.file.take() {
            file.sync_all()?;
        }
        Ok(())
    }

    fn read(&mut self, addr: VAddr, buf: &mut [u8]) -> io::Result<()> {
        let file = self.file_mut()?;
        file.seek(SeekFrom::Start(addr as u64))?;
        file.read_exact(buf)
    }

    fn write(&mut self, addr: VAddr, data: &[u8]) -> io::Result<()> {
        let file = self.file_mut()?;
        file.seek(SeekFrom::Start(addr as u64))?;
        file.write_all(data)
    }
}

impl Drop for FileStore {
    fn drop(&mut self) {
        self.file = None;
        if self.path.exists() {
            if let Err(e) = fs::remove_file(&self.path) {
                warn!("failed to remove pool file {}: {}", self.path.display(), e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::atomic::{AtomicU64, Ordering};

    static TEST_COUNTER: AtomicU64 = AtomicU64::new(0);

    fn temp_path(tag: &str) -> PathBuf {
        let id = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
        env::temp_dir().join(format!(
            "pagedmem_{tag}_{}_{id}.pool",
            std::process::id()
        ))
    }

    #[test]
    fn test_roundtrip_and_zero_fill() {
        let path = temp_path("file_rt");
        let mut store = FileStore::new(&path, 256);
        store.start().unwrap();

        let mut buf = [1u8; 16];
        store.read(100, &mut buf).unwrap();
        assert_eq!(buf, [0; 16]); // fresh bytes read as zero

        store.write(100, b"virtual").unwrap();
        let mut buf = [0u8; 7];
        store.read(100, &mut buf).unwrap();
        assert_eq!(&buf, b"virtual");
    }

    #[test]
    fn test_stop_start_preserves_contents() {
        let path = temp_path("file_persist");
        let mut store = FileStore::new(&path, 128);
        store.start().unwrap();
        store.write(32, &[42; 8]).unwrap();
        store.stop().unwrap();

        store.start().unwrap();
        let mut buf = [0u8; 8];
        store.read(32, &mut buf).unwrap();
        assert_eq!(buf, [42; 8]);
    }

    #[test]
    fn test_drop_removes_file() {
        let path = temp_path("file_drop");
        {
            let mut store = FileStore::new(&path, 64);
            store.start().unwrap();
            assert!(path.exists());
        }
        assert!(!path.exists());
    }

    #[test]
    fn test_read_before_start_fails() {
        let path = temp_path("file_nostart");
        let mut store = FileStore::new(&path, 64);
        let mut buf = [0u8; 4];
        assert!(store.read(0, &mut buf).is_err());
    }
}
