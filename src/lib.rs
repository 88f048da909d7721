//! Virtual memory for memory-constrained hosts.
//!
//! `pagedmem` presents a flat virtual address space much larger than the
//! host's RAM, backed by a slower, larger store (a file, a memory-mapped
//! file, or plain RAM for testing). The space is carved into variably-sized
//! blocks by a first-fit free list whose bookkeeping lives *inside* the
//! virtual space itself, and every byte access is mediated by a bounded pool
//! of in-RAM page buffers with dirty tracking and write-back.
//!
//! Architecture:
//! ```text
//! VirtAlloc ──┬── free-list allocator  (headers stored in virtual memory)
//!             ├── page cache           (small / medium / big buffer classes)
//!             └── BackingStore         (MemStore | FileStore | MmapStore)
//! ```
//!
//! Ranges can be pinned into a buffer with [`VirtAlloc::make_data_lock`] /
//! [`VirtAlloc::make_fitting_lock`], which keeps the bytes addressable
//! through [`VirtAlloc::lock_slice`] across arbitrary allocator traffic
//! until released.
//!
//! The crate is strictly single-threaded: every operation runs to completion
//! on the caller's thread and the only blocking points are backing-store
//! reads and writes.

pub mod config;
pub mod freelist;
pub mod page;
pub mod store;

mod alloc;
mod lock;
mod pool;

pub use config::{parse_size, ClassConfig, PoolConfig};
pub use lock::LockedRange;
pub use pool::{PoolStats, VirtAlloc};
pub use store::{BackingStore, FileStore, MemStore, MmapStore};

/// Virtual address into the pool. `0` is the null sentinel and is never
/// returned by the allocator.
pub type VAddr = u32;

/// Size of a virtual memory range, in bytes (or in header units where
/// documented).
pub type VSize = u32;
