//! File-backed store accessed through a writable memory map.
//!
//! Trades the seek/read/write syscalls of [`FileStore`](crate::FileStore)
//! for plain byte copies against an `mmap`'d region; the OS page cache does
//! the buffering. Preferred on hosts with an MMU and a real filesystem.

use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use memmap2::MmapMut;
use tracing::{info, warn};

use crate::store::BackingStore;
use crate::VAddr;

/// Backing store over a file-backed `memmap2::MmapMut`.
pub struct MmapStore {
    path: PathBuf,
    capacity: u64,
    map: Option<MmapMut>,
}

impl MmapStore {
    pub fn new(path: &Path, capacity: u64) -> Self {
        Self {
            path: path.to_path_buf(),
            capacity,
            map: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn map_mut(&mut self) -> io::Result<&mut MmapMut> {
        self.map
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "store not started"))
    }
}

impl BackingStore for MmapStore {
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
        let map = unsafe { MmapMut::map_mut(&file)? };
        // Paged access is effectively random from the OS's point of view.
        #[cfg(unix)]
        map.advise(memmap2::Advice::Random)?;
        info!(
            "mmap store ready: {} ({} bytes)",
            self.path.display(),
            self.capacity
        );
        // The mapping outlives the handle, so the file is not kept open.
        self.map = Some(map);
        Ok(())
    }

    fn stop(&mut self) -> io::Result<()> {
        if let Some(map) = self.map.take() {
            map.flush()?;
        }
        Ok(())
    }

    fn read(&mut self, addr: VAddr, buf: &mut [u8]) -> io::Result<()> {
        let start = addr as usize;
        let len = buf.len();
        let map = self.map_mut()?;
        buf.copy_from_slice(&map[start..start + len]);
        Ok(())
    }

    fn write(&mut self, addr: VAddr, data: &[u8]) -> io::Result<()> {
        let start = addr as usize;
        let map = self.map_mut()?;
        map[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }
}

impl Drop for MmapStore {
    fn drop(&mut self) {
        self.map = None;
        if self.path.exists() {
            if let Err(e) = fs::remove_file(&self.path) {
                warn!("failed to remove pool file {}: {}", self.path.display(), e);
            }
        }
    }
}
