use std::fs;
use std::io;
#[cfg(unix)]
use std::os::unix::fs::MetadataExt;
use std::path::Path;

/// The stat data the engine cares about.
#[derive(Copy, Clone, Hash, Ord, PartialOrd, PartialEq, Eq, Debug, Default)]
pub struct FileMeta {
    pub size: u64,
    pub dev: u64,
    pub ino: u64,
}

impl FileMeta {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, io::Error> {
        let m = fs::symlink_metadata(path)?;
        Ok(Self::new(&m))
    }

    pub fn new(m: &fs::Metadata) -> Self {
        FileMeta {
            size: m.len(),
            dev: get_device_id(m),
            ino: get_inode(m),
        }
    }
}

#[cfg(unix)]
fn get_device_id(m: &fs::Metadata) -> u64 {
    m.dev()
}

#[cfg(unix)]
fn get_inode(m: &fs::Metadata) -> u64 {
    m.ino()
}

#[cfg(windows)]
fn get_device_id(_m: &fs::Metadata) -> u64 {
    // No portable volume identity on stable Windows; a constant keeps all
    // files on one "device", which is the conservative choice for linking.
    0
}

#[cfg(windows)]
fn get_inode(_m: &fs::Metadata) -> u64 {
    // File ids are not available on stable Windows. Zero is the documented
    // "no hardlink identity" value, so hardlink detection disables itself.
    0
}
