//! Change stamps: a cheap fingerprint of a file's identity and modification
//! time, used to notice external edits without reading the contents.

use std::{fs::Metadata, io, time::UNIX_EPOCH};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChangeStamp {
    device: u64,
    inode: u64,
    modified_nanos: u128,
}

impl ChangeStamp {
    /// # Errors
    /// Returns an error if the platform cannot report a modification time.
    pub fn from_metadata(metadata: &Metadata) -> io::Result<Self> {
        let (device, inode) = identity(metadata);
        let modified_nanos = metadata
            .modified()?
            .duration_since(UNIX_EPOCH)
            .map_or(0, |since| since.as_nanos());

        Ok(Self {
            device,
            inode,
            modified_nanos,
        })
    }

    /// Whether both stamps describe the same file, regardless of content.
    #[must_use]
    pub fn same_file(&self, other: &Self) -> bool {
        self.device == other.device && self.inode == other.inode
    }
}

#[cfg(unix)]
fn identity(metadata: &Metadata) -> (u64, u64) {
    use std::os::unix::fs::MetadataExt;
    (metadata.dev(), metadata.ino())
}

#[cfg(not(unix))]
fn identity(_metadata: &Metadata) -> (u64, u64) {
    (0, 0)
}
