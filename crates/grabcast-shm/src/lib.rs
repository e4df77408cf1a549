//! Read-only view into a target's shared-memory frame ring.
//!
//! The target owns and writes the ring; the controller only ever maps it
//! read-only and copies slots out. There is no synchronization primitive
//! inside the region — the commit message on the control pipe is what
//! makes a slot's contents visible.

use std::fs::File;
use std::path::{Path, PathBuf};

use memmap2::{Mmap, MmapOptions};
use thiserror::Error;

/// Errors opening or mapping a shared ring.
#[derive(Debug, Error)]
pub enum ShmError {
    #[error("could not open shared memory {path:?}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not map shared memory {path:?}: {source}")]
    Map {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("shared memory {path:?} is {actual} bytes, expected at least {expected}")]
    Undersized {
        path: PathBuf,
        actual: u64,
        expected: u64,
    },
}

/// A read-only mapping of a named shared-memory object holding
/// fixed-size frame slots laid out densely from offset zero.
pub struct FrameRing {
    map: Mmap,
    path: PathBuf,
}

impl FrameRing {
    /// Map `size` bytes of the object at `path` read-only.
    pub fn open(path: impl AsRef<Path>, size: u64) -> Result<Self, ShmError> {
        let path = path.as_ref().to_path_buf();

        let file = File::open(&path).map_err(|source| ShmError::Open {
            path: path.clone(),
            source,
        })?;

        let actual = file
            .metadata()
            .map_err(|source| ShmError::Open {
                path: path.clone(),
                source,
            })?
            .len();
        if actual < size {
            return Err(ShmError::Undersized {
                path,
                actual,
                expected: size,
            });
        }

        // Safety: the mapping is read-only. The target mutates the region
        // concurrently; slot contents are only read after the matching
        // commit message, which orders the writes.
        let map = unsafe {
            MmapOptions::new()
                .len(size as usize)
                .map(&file)
                .map_err(|source| ShmError::Map {
                    path: path.clone(),
                    source,
                })?
        };

        Ok(Self { map, path })
    }

    /// Mapped size in bytes.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Path the ring was mapped from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The slot at `index`, for rings of `slot_size`-byte slots.
    /// `None` when the slot would fall outside the mapping.
    pub fn slot(&self, index: u32, slot_size: usize) -> Option<&[u8]> {
        let start = (index as usize).checked_mul(slot_size)?;
        self.range(start, slot_size)
    }

    /// An arbitrary `len`-byte range starting at byte `offset`.
    pub fn range(&self, offset: usize, len: usize) -> Option<&[u8]> {
        let end = offset.checked_add(len)?;
        self.map.get(offset..end)
    }
}

impl std::fmt::Debug for FrameRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameRing")
            .field("path", &self.path)
            .field("len", &self.map.len())
            .finish()
    }
}
