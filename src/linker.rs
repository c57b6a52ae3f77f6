use crate::file::{FileArena, FileId, FileRecord};
use crate::hasher::READ_CHUNK;
use crate::scanner::ScanListener;
use std::error::Error;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

/// Suffix carried by the original while its path is being relinked. Also
/// the marker that identifies orphans left by an interrupted run.
pub const BACKUP_SUFFIX: &str = ".kDepBackup";

/// Longest backup path the transaction will attempt.
const MAX_BACKUP_PATH: usize = 0x4000;

#[derive(Debug, Default, Copy, Clone)]
#[cfg_attr(feature = "json", derive(serde_derive::Serialize))]
pub struct LinkStats {
    /// Duplicates replaced by hardlinks.
    pub hardlinked: u64,
    pub bytes_saved: u64,
    /// Pairs skipped because the contents no longer matched the scan.
    pub verify_skipped: u64,
    /// Pairs skipped over rename or link trouble.
    pub failed: u64,
}

/// The link pass left the filesystem in a state it cannot safely reason
/// about; the run must stop so the stranded backup is not hidden by
/// further work.
#[derive(Debug)]
pub enum FatalLinkError {
    /// The hardlink is in place but the renamed original would not go away.
    RemoveBackup { backup: PathBuf, source: io::Error },
    /// Hardlinking failed and the original could not be renamed back.
    RestoreBackup { backup: PathBuf, original: PathBuf, source: io::Error },
}

impl fmt::Display for FatalLinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FatalLinkError::RemoveBackup { backup, source } => {
                write!(f, "failed to delete '{}' after hardlinking: {}", backup.display(), source)
            }
            FatalLinkError::RestoreBackup { backup, original, source } => {
                write!(
                    f,
                    "failed to restore '{}' to '{}' after hardlinking failed: {}",
                    backup.display(),
                    original.display(),
                    source
                )
            }
        }
    }
}

impl Error for FatalLinkError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            FatalLinkError::RemoveBackup { source, .. }
            | FatalLinkError::RestoreBackup { source, .. } => Some(source),
        }
    }
}

enum Outcome {
    Linked,
    VerifyMismatch,
    Soft,
}

/// Walk every duplicate group and replace each same-device copy with a
/// hardlink to the running target. Cross-device copies start a new run
/// with themselves as target; device runs are contiguous by construction.
pub(crate) fn hardlink_duplicates(
    arena: &FileArena,
    dup_heads: &[FileId],
    listener: &mut dyn ScanListener,
) -> Result<LinkStats, FatalLinkError> {
    let mut comparer = Comparer::new();
    let mut stats = LinkStats::default();

    for &head in dup_heads {
        let mut target = head;
        let mut cursor = arena[head].next_dup;
        while let Some(id) = cursor {
            let record = &arena[id];
            if record.dev != arena[target].dev {
                target = id;
            } else {
                match replace_with_link(&arena[target], record, &mut comparer, listener)? {
                    Outcome::Linked => {
                        stats.hardlinked += 1;
                        stats.bytes_saved += record.size;
                    }
                    Outcome::VerifyMismatch => stats.verify_skipped += 1,
                    Outcome::Soft => stats.failed += 1,
                }
            }
            cursor = record.next_dup;
        }
    }
    Ok(stats)
}

/// One replacement: verify, rename aside, link, drop the backup.
///
/// Soft failures leave the original untouched (or restored) and are
/// reported by outcome; only the two post-link states that would strand
/// data escalate to `FatalLinkError`.
fn replace_with_link(
    target: &FileRecord,
    dup: &FileRecord,
    comparer: &mut Comparer,
    listener: &mut dyn ScanListener,
) -> Result<Outcome, FatalLinkError> {
    match comparer.contents_equal(&dup.path, &target.path) {
        Ok(true) => {}
        Ok(false) => return Ok(Outcome::VerifyMismatch),
        Err(err) => {
            eprintln!(
                "kdedup: warning: cannot verify '{}' against '{}': {}",
                dup.path.display(),
                target.path.display(),
                err
            );
            return Ok(Outcome::VerifyMismatch);
        }
    }

    let backup = match backup_path(&dup.path) {
        Some(backup) => backup,
        None => {
            eprintln!("kdedup: error: too long backup path: '{}'", dup.path.display());
            return Ok(Outcome::Soft);
        }
    };
    if fs::symlink_metadata(&backup).is_ok() {
        eprintln!(
            "kdedup: error: failed to rename '{}' to '{}': file already exists",
            dup.path.display(),
            backup.display()
        );
        return Ok(Outcome::Soft);
    }
    if let Err(err) = fs::rename(&dup.path, &backup) {
        eprintln!(
            "kdedup: error: failed to rename '{}' to '{}': {}",
            dup.path.display(),
            backup.display(),
            err
        );
        return Ok(Outcome::Soft);
    }

    // From here until the unlink the original lives on under the backup
    // name; a crash leaves it recoverable there.
    if let Err(err) = fs::hard_link(&target.path, &dup.path) {
        eprintln!(
            "kdedup: error: failed to hard link '{}' to '{}': {}",
            dup.path.display(),
            target.path.display(),
            err
        );
        if let Err(source) = fs::rename(&backup, &dup.path) {
            return Err(FatalLinkError::RestoreBackup {
                backup,
                original: dup.path.to_path_buf(),
                source,
            });
        }
        return Ok(Outcome::Soft);
    }
    if let Err(source) = fs::remove_file(&backup) {
        return Err(FatalLinkError::RemoveBackup { backup, source });
    }

    listener.hardlinked(&dup.path, &target.path);
    Ok(Outcome::Linked)
}

/// `<path>.kDepBackup`, or None when the result would exceed the longest
/// path the transaction is willing to handle.
fn backup_path(path: &Path) -> Option<PathBuf> {
    let mut assembled = path.as_os_str().to_os_string();
    assembled.push(BACKUP_SUFFIX);
    if assembled.len() >= MAX_BACKUP_PATH {
        return None;
    }
    Some(PathBuf::from(assembled))
}

/// Byte-for-byte comparison in 2 MiB chunks. Catches files changed since
/// the scan as well as fingerprint collisions; nothing gets replaced
/// without passing it.
struct Comparer {
    buf_a: Vec<u8>,
    buf_b: Vec<u8>,
}

impl Comparer {
    fn new() -> Self {
        Comparer {
            buf_a: vec![0; READ_CHUNK],
            buf_b: vec![0; READ_CHUNK],
        }
    }

    fn contents_equal(&mut self, a: &Path, b: &Path) -> io::Result<bool> {
        let mut file_a = File::open(a)?;
        let mut file_b = File::open(b)?;
        let mut offset = 0u64;
        loop {
            let n_a = read_full(&mut file_a, &mut self.buf_a)?;
            let n_b = read_full(&mut file_b, &mut self.buf_b)?;
            if n_a != n_b {
                eprintln!(
                    "kdedup: warning: '{}' now differs from '{}' in size",
                    a.display(),
                    b.display()
                );
                return Ok(false);
            }
            if n_a == 0 {
                return Ok(true);
            }
            if self.buf_a[..n_a] != self.buf_b[..n_b] {
                eprintln!(
                    "kdedup: warning: '{}' differs from '{}' near offset {}",
                    a.display(),
                    b.display(),
                    offset
                );
                return Ok(false);
            }
            offset += n_a as u64;
        }
    }
}

/// Read until the buffer is full or the file ends, hiding EINTR.
fn read_full(file: &mut File, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match file.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod test {
    use super::*;
    use std::fs;
    use tempdir::TempDir;

    #[test]
    fn backup_path_appends_the_suffix() {
        let backup = backup_path(Path::new("/a/b/file.bin")).expect("short path");
        assert_eq!(backup, Path::new("/a/b/file.bin.kDepBackup"));
    }

    #[test]
    fn backup_path_rejects_overlong_paths() {
        let long = "x".repeat(MAX_BACKUP_PATH);
        assert!(backup_path(Path::new(&long)).is_none());
    }

    #[test]
    fn equal_contents_compare_equal() {
        let tmp = TempDir::new("cmptest").expect("tmp");
        let a = tmp.path().join("a");
        let b = tmp.path().join("b");
        fs::write(&a, "the same bytes").expect("write");
        fs::write(&b, "the same bytes").expect("write");

        assert!(Comparer::new().contents_equal(&a, &b).expect("compare"));
    }

    #[test]
    fn same_length_different_bytes_compare_unequal() {
        let tmp = TempDir::new("cmptest2").expect("tmp");
        let a = tmp.path().join("a");
        let b = tmp.path().join("b");
        fs::write(&a, "aaaa").expect("write");
        fs::write(&b, "aaab").expect("write");

        assert!(!Comparer::new().contents_equal(&a, &b).expect("compare"));
    }

    #[test]
    fn different_lengths_compare_unequal() {
        let tmp = TempDir::new("cmptest3").expect("tmp");
        let a = tmp.path().join("a");
        let b = tmp.path().join("b");
        fs::write(&a, "short").expect("write");
        fs::write(&b, "rather longer").expect("write");

        assert!(!Comparer::new().contents_equal(&a, &b).expect("compare"));
    }

    #[test]
    fn missing_file_is_an_error_not_a_verdict() {
        let tmp = TempDir::new("cmptest4").expect("tmp");
        let a = tmp.path().join("a");
        fs::write(&a, "here").expect("write");

        assert!(Comparer::new().contents_equal(&a, &tmp.path().join("gone")).is_err());
    }
}
