use crate::file::{ContentKey, FileId, FileRecord, CONTENT_KEY_LEN};
use md5::{Digest, Md5};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// Chunk size for content reads, shared with byte-verification. Larger
/// buffers gave diminishing returns.
pub const READ_CHUNK: usize = 2 * 1024 * 1024;

/// Marks synthetic keys of unreadable files; no real digest starts with a
/// chosen fixed tag except with negligible probability.
const SYNTHETIC_TAG: [u8; 8] = *b"\0unread\0";

/// Streams file contents into MD5 digests, reusing one read buffer across
/// all files of the scan.
#[derive(Debug)]
pub struct Hasher {
    buf: Vec<u8>,
}

impl Hasher {
    pub fn new() -> Self {
        Hasher { buf: vec![0; READ_CHUNK] }
    }

    /// Fingerprint the file's entire contents into `record.key`.
    ///
    /// A file that cannot be opened or read gets a synthetic identity key
    /// instead, so the scan continues and the record clusters with nothing.
    pub fn hash_file(&mut self, record: &mut FileRecord, id: FileId) {
        record.key = Some(match self.md5_of(&record.path) {
            Ok(key) => key,
            Err(err) => {
                eprintln!("kdedup: warning: error reading '{}': {}", record.path.display(), err);
                synthetic_key(id)
            }
        });
    }

    fn md5_of(&mut self, path: &Path) -> io::Result<ContentKey> {
        let mut file = File::open(path)?;
        let mut md5 = Md5::new();
        loop {
            let n = match file.read(&mut self.buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            };
            md5.update(&self.buf[..n]);
        }
        Ok(ContentKey::new(md5.finalize().into()))
    }
}

/// Key for a record whose contents could not be read: a fixed tag plus the
/// record's arena index. Unique per record, totally ordered like any other
/// key, and disjoint from real digests.
fn synthetic_key(id: FileId) -> ContentKey {
    let mut bytes = [0; CONTENT_KEY_LEN];
    bytes[..8].copy_from_slice(&SYNTHETIC_TAG);
    bytes[8..].copy_from_slice(&(id.index() as u64).to_le_bytes());
    ContentKey::new(bytes)
}
