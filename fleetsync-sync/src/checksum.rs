//! SHA-256 checksums of deployable files.
//!
//! Content is hashed byte-for-byte. A path that does not exist is
//! [`FileChecksum::Missing`]; anything else that cannot be read (a directory,
//! permission denied) is [`FileChecksum::Unreadable`], which never equals a
//! real digest.

use std::io::ErrorKind;
use std::path::Path;

use sha2::{Digest, Sha256};

use fleetsync_core::{ChecksumTable, FileChecksum};

pub fn digest_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

pub fn checksum_file(path: &Path) -> FileChecksum {
    match std::fs::read(path) {
        Ok(bytes) => FileChecksum::Present(digest_bytes(&bytes)),
        Err(err) if err.kind() == ErrorKind::NotFound => FileChecksum::Missing,
        Err(err) => {
            tracing::debug!(path = %path.display(), error = %err, "unreadable file");
            FileChecksum::Unreadable
        }
    }
}

/// Checksum every path, keyed by its display string.
pub fn checksum_paths<'a, I>(paths: I) -> ChecksumTable
where
    I: IntoIterator<Item = &'a str>,
{
    paths
        .into_iter()
        .map(|key| (key.to_string(), checksum_file(Path::new(key))))
        .collect()
}
