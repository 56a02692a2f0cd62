//! Binary program image files.
//!
//! A program image is a flat binary file whose bytes are copied into
//! memory verbatim, starting at address 0. The only structural rule is
//! the size: an image larger than memory capacity is rejected at load
//! time instead of being silently truncated.

use crate::cpu::memory::MEMORY_SIZE;
use std::path::Path;
use thiserror::Error;

/// Read a program image from disk.
///
/// Fails if the file is missing or unreadable, or if it would not fit
/// into the default memory capacity.
pub fn load_image<P: AsRef<Path>>(path: P) -> Result<Vec<u8>, ImageError> {
    let path = path.as_ref();
    let bytes = std::fs::read(path).map_err(|e| ImageError::Io {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;

    if bytes.len() > MEMORY_SIZE {
        return Err(ImageError::TooLarge {
            size: bytes.len(),
            capacity: MEMORY_SIZE,
        });
    }

    Ok(bytes)
}

/// Write a program image to disk.
pub fn save_image<P: AsRef<Path>>(path: P, image: &[u8]) -> Result<(), ImageError> {
    let path = path.as_ref();
    std::fs::write(path, image).map_err(|e| ImageError::Io {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

/// Errors that can occur while loading or saving program images.
#[derive(Debug, Clone, Error)]
pub enum ImageError {
    #[error("cannot access {path}: {message}")]
    Io { path: String, message: String },

    #[error("program image of {size} bytes exceeds memory capacity {capacity}")]
    TooLarge { size: usize, capacity: usize },
}
