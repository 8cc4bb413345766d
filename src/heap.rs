//! Host-side heap arena
//!
//! Data reached through pointers needs somewhere to live on the host side.
//! The heap is a caller-visible arena of byte blocks; pointer-shaped
//! fields in host buffers hold an 8-byte little-endian handle instead of a
//! machine address, with 0 meaning null.
//!
//! Blocks carry their own byte length, so the write engine can recompute
//! how many items a pointer references without any allocator
//! introspection, and handles are stable identities for alias detection
//! (two fields holding the same handle reference the same block and are
//! written as one).

use crate::error::{PdbError, PdbResult};

/// Handle to one heap block; 0 is reserved for null.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct HeapHandle(pub u64);

impl HeapHandle {
    pub const NULL: HeapHandle = HeapHandle(0);

    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

/// Arena of byte blocks addressed by handle.
#[derive(Default)]
pub struct Heap {
    blocks: Vec<Vec<u8>>,
}

impl Heap {
    pub fn new() -> Heap {
        Heap::default()
    }

    /// Allocate a zeroed block of `len` bytes.
    pub fn alloc(&mut self, len: usize) -> HeapHandle {
        self.blocks.push(vec![0u8; len]);
        HeapHandle(self.blocks.len() as u64)
    }

    /// Allocate a block holding a copy of `data`.
    pub fn alloc_from(&mut self, data: &[u8]) -> HeapHandle {
        self.blocks.push(data.to_vec());
        HeapHandle(self.blocks.len() as u64)
    }

    pub fn get(&self, h: HeapHandle) -> PdbResult<&[u8]> {
        self.blocks
            .get(h.0.wrapping_sub(1) as usize)
            .map(|b| b.as_slice())
            .ok_or_else(|| PdbError::Allocation {
                reason: format!("dangling heap handle {}", h.0),
            })
    }

    pub fn get_mut(&mut self, h: HeapHandle) -> PdbResult<&mut Vec<u8>> {
        self.blocks
            .get_mut(h.0.wrapping_sub(1) as usize)
            .ok_or_else(|| PdbError::Allocation {
                reason: format!("dangling heap handle {}", h.0),
            })
    }

    /// Items a pointer to this block references, from the block's byte
    /// length and the item size.
    pub fn number_refd(&self, h: HeapHandle, bytes_per_item: usize) -> PdbResult<u64> {
        if bytes_per_item == 0 {
            return Err(PdbError::Allocation { reason: "zero-size item".to_string() });
        }
        let len = self.get(h)?.len();
        if len % bytes_per_item != 0 {
            return Err(PdbError::Allocation {
                reason: format!(
                    "heap block of {} bytes is not a whole number of {}-byte items",
                    len, bytes_per_item
                ),
            });
        }
        Ok((len / bytes_per_item) as u64)
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

/// Read a pointer field (8-byte little-endian handle) from a host buffer.
pub fn read_handle(buf: &[u8], offs: usize) -> PdbResult<HeapHandle> {
    let bytes: [u8; 8] = buf
        .get(offs..offs + 8)
        .and_then(|s| s.try_into().ok())
        .ok_or_else(|| PdbError::Allocation {
            reason: format!("pointer field at offset {} overruns its buffer", offs),
        })?;
    Ok(HeapHandle(u64::from_le_bytes(bytes)))
}

/// Store a pointer field into a host buffer.
pub fn write_handle(buf: &mut [u8], offs: usize, h: HeapHandle) -> PdbResult<()> {
    buf.get_mut(offs..offs + 8)
        .ok_or_else(|| PdbError::Allocation {
            reason: format!("pointer field at offset {} overruns its buffer", offs),
        })?
        .copy_from_slice(&h.0.to_le_bytes());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_start_at_one_and_zero_is_null() {
        let mut heap = Heap::new();
        let h = heap.alloc(16);
        assert_eq!(h, HeapHandle(1));
        assert!(!h.is_null());
        assert!(HeapHandle::NULL.is_null());
        assert!(heap.get(HeapHandle::NULL).is_err());
    }

    #[test]
    fn number_refd_comes_from_block_length() {
        let mut heap = Heap::new();
        let h = heap.alloc_from(&[0u8; 40]);
        assert_eq!(heap.number_refd(h, 8).unwrap(), 5);
        assert!(heap.number_refd(h, 3).is_err());
    }

    #[test]
    fn handle_fields_round_trip_through_buffers() {
        let mut buf = vec![0u8; 24];
        write_handle(&mut buf, 8, HeapHandle(7)).unwrap();
        assert_eq!(read_handle(&buf, 8).unwrap(), HeapHandle(7));
        assert_eq!(read_handle(&buf, 0).unwrap(), HeapHandle::NULL);
        assert!(read_handle(&buf, 20).is_err());
    }
}
