//! RAM-backed store, mainly for tests and tiny pools.

use std::io;

use crate::store::BackingStore;
use crate::VAddr;

/// Backing store over a plain `Vec<u8>`.
///
/// There is no faster medium to page *to*, so this driver is useful for
/// exercising the allocator rather than for saving memory.
pub struct MemStore {
    data: Vec<u8>,
}

impl MemStore {
    pub fn new(capacity: u32) -> Self {
        Self {
            data: vec![0; capacity as usize],
        }
    }

    /// Raw view of the stored bytes (diagnostics and tests).
    pub fn contents(&self) -> &[u8] {
        &self.data
    }
}

impl BackingStore for MemStore {
    fn start(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn stop(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn read(&mut self, addr: VAddr, buf: &mut [u8]) -> io::Result<()> {
        let start = addr as usize;
        buf.copy_from_slice(&self.data[start..start + buf.len()]);
        Ok(())
    }

    fn write(&mut self, addr: VAddr, data: &[u8]) -> io::Result<()> {
        let start = addr as usize;
        self.data[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let mut store = MemStore::new(64);
        store.start().unwrap();
        store.write(10, b"paged").unwrap();

        let mut buf = [0u8; 5];
        store.read(10, &mut buf).unwrap();
        assert_eq!(&buf, b"paged");
    }

    #[test]
    fn test_stop_preserves_contents() {
        let mut store = MemStore::new(16);
        store.start().unwrap();
        store.write(0, &[7; 16]).unwrap();
        store.stop().unwrap();
        store.start().unwrap();

        let mut buf = [0u8; 16];
        store.read(0, &mut buf).unwrap();
        assert_eq!(buf, [7; 16]);
    }
}
