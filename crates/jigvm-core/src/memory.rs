//! Linear memory access used by the marshaling layer.
//!
//! [`LinearMemory`] is implemented by the wasm-backed guest memory in
//! [`crate::instance`] and by [`VecMemory`], a plain byte vector with a bump
//! allocator that lets the marshaling rules be exercised without a module.

use anyhow::{anyhow, Result};

/// Guest allocations are aligned to this boundary.
pub const ALLOC_ALIGN: u32 = 8;

/// Byte-addressed memory with a guest allocator.
pub trait LinearMemory {
    /// Allocate `size` bytes aligned to [`ALLOC_ALIGN`]. Never returns 0.
    fn alloc(&mut self, size: u32) -> Result<u32>;

    /// Current memory size in bytes.
    fn data_size(&self) -> u64;

    fn read(&self, ptr: u32, len: u32) -> Result<Vec<u8>>;

    fn write(&mut self, ptr: u32, bytes: &[u8]) -> Result<()>;

    /// Fails unless `[ptr, ptr + len)` lies inside memory.
    fn check_range(&self, ptr: u32, len: u64) -> Result<()> {
        let end = ptr as u64 + len;
        if end > self.data_size() {
            return Err(anyhow!(
                "memory access out of bounds: {}+{} > {}",
                ptr,
                len,
                self.data_size()
            ));
        }
        Ok(())
    }

    fn read_u32(&self, ptr: u32) -> Result<u32> {
        let bytes = self.read(ptr, 4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn write_u32(&mut self, ptr: u32, value: u32) -> Result<()> {
        self.write(ptr, &value.to_le_bytes())
    }

    /// Read a `[u32 len][bytes]` buffer.
    fn read_buf(&self, ptr: u32) -> Result<Vec<u8>> {
        let len = self.read_u32(ptr)?;
        let data = ptr
            .checked_add(4)
            .ok_or_else(|| anyhow!("buffer pointer overflow at {}", ptr))?;
        self.check_range(data, len as u64)?;
        self.read(data, len)
    }

    /// Allocate and fill a `[u32 len][bytes]` buffer.
    fn write_buf(&mut self, bytes: &[u8]) -> Result<u32> {
        let len = u32::try_from(bytes.len()).map_err(|_| anyhow!("buffer too large"))?;
        let ptr = self.alloc(4 + len)?;
        self.write_u32(ptr, len)?;
        self.write(ptr + 4, bytes)?;
        Ok(ptr)
    }
}

/// In-process memory backed by a `Vec<u8>`.
#[derive(Debug, Clone)]
pub struct VecMemory {
    data: Vec<u8>,
    next: u32,
}

impl VecMemory {
    pub fn new() -> Self {
        // Keep address 0 unused so it can mean "null".
        Self {
            data: vec![0; ALLOC_ALIGN as usize],
            next: ALLOC_ALIGN,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }
}

impl Default for VecMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl LinearMemory for VecMemory {
    fn alloc(&mut self, size: u32) -> Result<u32> {
        let ptr = self.next;
        let end = ptr
            .checked_add(size)
            .ok_or_else(|| anyhow!("allocation of {} bytes overflows", size))?;
        self.next = end.div_ceil(ALLOC_ALIGN) * ALLOC_ALIGN;
        self.data.resize(self.next as usize, 0);
        Ok(ptr)
    }

    fn data_size(&self) -> u64 {
        self.data.len() as u64
    }

    fn read(&self, ptr: u32, len: u32) -> Result<Vec<u8>> {
        self.check_range(ptr, len as u64)?;
        Ok(self.data[ptr as usize..(ptr + len) as usize].to_vec())
    }

    fn write(&mut self, ptr: u32, bytes: &[u8]) -> Result<()> {
        self.check_range(ptr, bytes.len() as u64)?;
        self.data[ptr as usize..ptr as usize + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_is_aligned_and_nonzero() {
        let mut mem = VecMemory::new();
        let a = mem.alloc(3).unwrap();
        let b = mem.alloc(1).unwrap();
        assert_ne!(a, 0);
        assert_eq!(a % ALLOC_ALIGN, 0);
        assert_eq!(b % ALLOC_ALIGN, 0);
        assert!(b > a);
    }

    #[test]
    fn test_buffer_roundtrip() {
        let mut mem = VecMemory::new();
        let ptr = mem.write_buf(b"hello").unwrap();
        assert_eq!(mem.read_u32(ptr).unwrap(), 5);
        assert_eq!(mem.read_buf(ptr).unwrap(), b"hello");
    }

    #[test]
    fn test_out_of_bounds_rejected() {
        let mut mem = VecMemory::new();
        let ptr = mem.alloc(4).unwrap();
        assert!(mem.read(ptr, 64).is_err());
        assert!(mem.write(ptr + 4096, &[1]).is_err());

        // A length prefix pointing past the end must not be trusted.
        mem.write_u32(ptr, u32::MAX).unwrap();
        assert!(mem.read_buf(ptr).is_err());
    }
}
