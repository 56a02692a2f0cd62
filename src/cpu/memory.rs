//! Main memory for the virtual CPU.
//!
//! A flat, byte-addressable array of 4 KiB. The program image is copied
//! in starting at address 0; everything else starts zeroed. Every access
//! goes through the checked `read`/`write` API so an out-of-range address
//! surfaces as a typed fault instead of aborting the process.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default memory capacity in bytes (4 KiB of RAM).
pub const MEMORY_SIZE: usize = 4096;

/// Byte-addressable main memory.
#[derive(Clone, Serialize, Deserialize)]
pub struct Memory {
    cells: Vec<u8>,
}

impl Memory {
    /// Create a new memory of the default 4 KiB capacity, zero-filled.
    pub fn new() -> Self {
        Self::with_capacity(MEMORY_SIZE)
    }

    /// Create a zero-filled memory of an explicit capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            cells: vec![0; capacity],
        }
    }

    /// Number of addressable cells.
    pub fn capacity(&self) -> usize {
        self.cells.len()
    }

    /// Read the byte at `addr`.
    #[inline]
    pub fn read(&self, addr: u16) -> Result<u8, MemoryError> {
        self.cells
            .get(addr as usize)
            .copied()
            .ok_or(MemoryError::AddressOutOfRange {
                addr,
                capacity: self.cells.len(),
            })
    }

    /// Write a byte to `addr`.
    #[inline]
    pub fn write(&mut self, addr: u16, value: u8) -> Result<(), MemoryError> {
        let capacity = self.cells.len();
        let cell = self
            .cells
            .get_mut(addr as usize)
            .ok_or(MemoryError::AddressOutOfRange { addr, capacity })?;
        *cell = value;
        Ok(())
    }

    /// Reset every cell to zero.
    pub fn clear(&mut self) {
        self.cells.fill(0);
    }

    /// Copy a program image into memory starting at address 0.
    ///
    /// Images larger than the capacity are rejected outright; the
    /// remainder of memory past the image stays zeroed.
    pub fn load_image(&mut self, image: &[u8]) -> Result<(), MemoryError> {
        if image.len() > self.cells.len() {
            return Err(MemoryError::ImageTooLarge {
                size: image.len(),
                capacity: self.cells.len(),
            });
        }
        self.cells[..image.len()].copy_from_slice(image);
        Ok(())
    }
}

impl Default for Memory {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Memory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let non_zero = self.cells.iter().filter(|b| **b != 0).count();
        f.debug_struct("Memory")
            .field("non_zero_cells", &non_zero)
            .field("capacity", &self.cells.len())
            .finish()
    }
}

/// Errors that can occur during memory operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MemoryError {
    /// Address is at or beyond the end of memory.
    #[error("memory address {addr:#06X} out of range (capacity {capacity})")]
    AddressOutOfRange { addr: u16, capacity: usize },

    /// Program image does not fit in memory.
    #[error("program image of {size} bytes exceeds memory capacity {capacity}")]
    ImageTooLarge { size: usize, capacity: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_read_write() {
        let mut mem = Memory::new();

        mem.write(0x10, 0xAB).unwrap();
        assert_eq!(mem.read(0x10).unwrap(), 0xAB);
    }

    #[test]
    fn test_memory_starts_zeroed() {
        let mem = Memory::new();
        assert!((0..MEMORY_SIZE).all(|a| mem.read(a as u16).unwrap() == 0));
    }

    #[test]
    fn test_memory_bounds() {
        let mut mem = Memory::new();

        assert!(mem.read(4095).is_ok());
        assert_eq!(
            mem.read(4096),
            Err(MemoryError::AddressOutOfRange {
                addr: 4096,
                capacity: 4096
            })
        );
        assert!(mem.write(4096, 0).is_err());
    }

    #[test]
    fn test_load_image() {
        let mut mem = Memory::new();
        mem.load_image(&[0x01, 0x02, 0x03]).unwrap();

        assert_eq!(mem.read(0).unwrap(), 0x01);
        assert_eq!(mem.read(1).unwrap(), 0x02);
        assert_eq!(mem.read(2).unwrap(), 0x03);
        assert_eq!(mem.read(3).unwrap(), 0x00);
    }

    #[test]
    fn test_load_image_too_large() {
        let mut mem = Memory::with_capacity(8);
        let image = [0u8; 9];

        assert_eq!(
            mem.load_image(&image),
            Err(MemoryError::ImageTooLarge {
                size: 9,
                capacity: 8
            })
        );
    }
}
