//! Reference [`crate::log::LogAccessor`] backends (§10.6): a memory-mapped
//! log for production use, built on `mmap-rs`.

mod mmap_log;

pub use mmap_log::MmapLog;
