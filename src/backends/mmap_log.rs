//! A memory-mapped, read-only log accessor.
//!
//! Wraps an [`mmap_rs::Mmap`] as a [`RandomAccessBytes`] source and reads
//! the one-byte type tag at a requested [`Address`] to build a
//! [`Loggable`], the same way the Patricia node view reads its own fields
//! out of whatever source a `Loggable` was built from.

use std::fs::File;
use std::sync::Arc;

use mmap_rs::{Mmap, MmapOptions};

use crate::cursor::RandomAccessBytes;
use crate::error::{Error, Result};
use crate::log::{Address, LogAccessor, Loggable, TypeTag};

#[repr(transparent)]
struct MmapBytes(Mmap);

impl RandomAccessBytes for MmapBytes {
    fn len(&self) -> usize {
        self.0.len()
    }

    fn byte_at(&self, offset: usize) -> u8 {
        self.0.as_slice()[offset]
    }

    fn as_slice(&self) -> &[u8] {
        self.0.as_slice()
    }
}

/// A single append-only log file, mapped once and shared by every
/// [`Loggable`] read out of it.
pub struct MmapLog {
    source: Arc<dyn RandomAccessBytes>,
}

impl MmapLog {
    /// Wraps an already-built memory map (e.g. a snapshot of the append
    /// log taken under the host's page-cache discipline).
    pub fn new(mmap: Mmap) -> Self {
        MmapLog { source: Arc::new(MmapBytes(mmap)) }
    }

    /// Maps `path` read-only in its entirety.
    pub fn open(path: &std::path::Path) -> std::io::Result<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len() as usize;
        let mmap = unsafe {
            MmapOptions::new(len)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?
                .with_file(&file, 0)
                .map()
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?
        };
        Ok(MmapLog::new(mmap))
    }

    pub fn len(&self) -> usize {
        self.source.len()
    }

    pub fn is_empty(&self) -> bool {
        self.source.is_empty()
    }
}

impl LogAccessor for MmapLog {
    fn get_loggable(&self, address: Address) -> Result<Loggable> {
        if address.is_null() {
            return Err(Error::InvalidAddress);
        }
        let offset = address.0 as usize;
        if offset >= self.source.len() {
            return Err(Error::InvalidAddress);
        }
        let tag = TypeTag(self.source.byte_at(offset));
        if !tag.is_patricia_node() {
            return Err(Error::InvalidAddress);
        }
        Ok(Loggable::new(address, tag, offset + 1, self.source.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::varint;

    fn build_mmap(bytes: &[u8]) -> Mmap {
        let mut mmap = MmapOptions::new(bytes.len()).unwrap().map_mut().unwrap();
        mmap.as_mut_slice().copy_from_slice(bytes);
        mmap.make_read_only().unwrap_or_else(|(m, _)| m.into())
    }

    #[test]
    fn reads_a_leaf_node_tag_and_payload() {
        let mut bytes = vec![TypeTag::new(true, true, false, true).0];
        bytes.extend(varint::encode(3));
        bytes.extend(b"abc");
        bytes.extend(varint::encode(7));

        let log = MmapLog::new(build_mmap(&bytes));
        let loggable = log.get_loggable(Address(0)).unwrap();
        assert!(loggable.tag().has_value());
        assert!(!loggable.tag().has_children());

        let mut cursor = loggable.data_cursor();
        assert_eq!(varint::decode(&mut cursor).unwrap(), 3);
        assert_eq!(cursor.next().unwrap(), b'a');
    }

    #[test]
    fn non_patricia_tag_is_rejected() {
        let bytes = vec![0u8];
        let log = MmapLog::new(build_mmap(&bytes));
        assert!(matches!(log.get_loggable(Address(0)), Err(Error::InvalidAddress)));
    }

    #[test]
    fn out_of_range_address_is_rejected() {
        let log = MmapLog::new(build_mmap(&[TypeTag::new(true, false, false, false).0]));
        assert!(matches!(log.get_loggable(Address(100)), Err(Error::InvalidAddress)));
    }
}
