//! Whole-file content digests.
//!
//! The content hash is a 128-bit XXH3 digest of every byte of the file,
//! hex-encoded. Files of 1MB and above are memory-mapped rather than copied
//! into a buffer; the digest is the same either way.

use memmap2::Mmap;
use std::fs::File;
use std::io;
use std::path::Path;
use xxhash_rust::xxh3::xxh3_128;

/// Minimum file size to use memory-mapped I/O (1MB)
const MMAP_THRESHOLD: u64 = 1024 * 1024;

/// Length of a hex-encoded content hash
pub const CONTENT_HASH_LEN: usize = 32;

/// Digest of a byte slice
pub fn hash_bytes(bytes: &[u8]) -> String {
    format!("{:032x}", xxh3_128(bytes))
}

/// Digest of a file on disk
pub fn hash_file(path: &Path) -> io::Result<String> {
    let bytes = read_file_bytes(path)?;
    Ok(hash_bytes(&bytes))
}

/// Read file bytes, memory-mapping large files.
pub fn read_file_bytes(path: &Path) -> io::Result<FileBytes> {
    let file = File::open(path)?;
    if file.metadata()?.len() >= MMAP_THRESHOLD {
        // SAFETY: the mapping is read-only and the file handle outlives it
        // for the duration of the call that consumes the bytes.
        let mmap = unsafe { Mmap::map(&file) }?;
        Ok(FileBytes::Mmap(mmap))
    } else {
        Ok(FileBytes::Vec(std::fs::read(path)?))
    }
}

/// File bytes that may be either owned or memory-mapped.
pub enum FileBytes {
    Vec(Vec<u8>),
    Mmap(Mmap),
}

impl AsRef<[u8]> for FileBytes {
    fn as_ref(&self) -> &[u8] {
        match self {
            FileBytes::Vec(v) => v,
            FileBytes::Mmap(m) => m,
        }
    }
}

impl std::ops::Deref for FileBytes {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.as_ref()
    }
}
