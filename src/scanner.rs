use crate::file::{ContentKey, FileArena, FileId, FileRecord};
use crate::hasher::Hasher;
use crate::linker::{self, FatalLinkError, LinkStats};
use crate::metadata::FileMeta;
use crate::walk::{Entry, WalkOptions, Walker};
use std::collections::btree_map::Entry as BTreeEntry;
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::mem;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct Settings {
    pub walk: WalkOptions,
    /// Smallest file size considered. The default of 1 leaves zero-length
    /// files alone.
    pub min_file_size: u64,
    pub max_file_size: u64,
    // If nonzero, stop scanning at the next file.
    pub break_on: Option<&'static AtomicU32>,
}

impl Settings {
    pub fn breaks(&self) -> u32 {
        if let Some(break_on) = self.break_on {
            break_on.load(Ordering::SeqCst)
        } else {
            0
        }
    }
}

#[derive(Debug, Default, Copy, Clone)]
#[cfg_attr(feature = "json", derive(serde_derive::Serialize))]
pub struct Stats {
    /// Files inside the size range that entered the index.
    pub files: u64,
    /// Entries passed over: wrong kind, unfollowed symlinks, size range.
    pub skipped: u64,
    /// Content fingerprints computed; at most one per file.
    pub hashed: u64,
    /// Files that were already hardlinks of an indexed file, or the same
    /// path given twice.
    pub hardlinked: u64,
    /// Files with identical content on a distinct inode.
    pub duplicates: u64,
    /// Duplicates sharing a device with an earlier copy, i.e. linkable.
    pub saveable: u64,
    /// Bytes reclaimed by hardlinking every saveable duplicate.
    pub saveable_bytes: u64,
}

/// Callbacks for everything worth telling the user about.
pub trait ScanListener: Debug {
    fn file_scanned(&mut self, path: &Path, stats: &Stats);
    fn scan_over(&self, scanner: &Scanner, stats: &Stats, scan_duration: Duration);
    fn hardlink_found(&mut self, path: &Path, existing: &Path);
    fn duplicate_found(&mut self, path: &Path, existing: &Path, same_device: bool);
    fn size_skipped(&mut self, path: &Path, size: u64);
    fn hardlinked(&mut self, dest: &Path, target: &Path);
}

#[derive(Debug)]
struct SilentListener;
impl ScanListener for SilentListener {
    fn file_scanned(&mut self, _: &Path, _: &Stats) {}

    fn scan_over(&self, _: &Scanner, _: &Stats, _: Duration) {}

    fn hardlink_found(&mut self, _: &Path, _: &Path) {}

    fn duplicate_found(&mut self, _: &Path, _: &Path, _: bool) {}

    fn size_skipped(&mut self, _: &Path, _: u64) {}

    fn hardlinked(&mut self, _: &Path, _: &Path) {}
}

/// All same-length files. A lone file is kept unhashed; its fingerprint is
/// computed only once a second file of this length shows up.
#[derive(Debug, Default)]
struct SizeBucket {
    unhashed: Option<FileId>,
    by_content: BTreeMap<ContentKey, FileId>,
}

/// The deduplication engine: walks roots, indexes files by size and then
/// by content, and collects duplicate groups for the optional link pass.
#[derive(Debug)]
pub struct Scanner {
    arena: FileArena,
    /// Outer index: one bucket per file length seen.
    by_size: BTreeMap<u64, SizeBucket>,
    /// Heads of duplicate groups in discovery order.
    dup_heads: Vec<FileId>,
    /// Roots queued by `enqueue`, drained by `flush`.
    to_scan: Vec<PathBuf>,
    hasher: Hasher,
    scan_listener: Box<dyn ScanListener>,
    stats: Stats,
    soft_error: bool,
    interrupted: bool,
    warned_inode_zero: bool,
    pub settings: Settings,
}

impl Scanner {
    pub fn new() -> Self {
        Scanner {
            settings: Settings {
                walk: WalkOptions::default(),
                min_file_size: 1,
                max_file_size: u64::MAX,
                break_on: None,
            },
            arena: FileArena::default(),
            by_size: BTreeMap::new(),
            dup_heads: Vec::new(),
            to_scan: Vec::new(),
            hasher: Hasher::new(),
            scan_listener: Box::new(SilentListener),
            stats: Stats::default(),
            soft_error: false,
            interrupted: false,
            warned_inode_zero: false,
        }
    }

    /// Set the scan listener. Caution: This overrides previously set listeners!
    pub fn set_listener(&mut self, listener: Box<dyn ScanListener>) {
        self.scan_listener = listener;
    }

    /// Scan one file or directory. Duplicates are found within the path as
    /// well as against all previously scanned paths.
    pub fn scan(&mut self, path: impl Into<PathBuf>) {
        self.enqueue(path);
        self.flush();
    }

    pub fn enqueue(&mut self, path: impl Into<PathBuf>) {
        self.to_scan.push(path.into());
    }

    /// Walk every queued root and feed each regular file into the index.
    pub fn flush(&mut self) {
        let start_time = Instant::now();
        let walker = Walker::new(self.settings.walk);
        'roots: for root in mem::take(&mut self.to_scan) {
            for entry in walker.entries(root) {
                if self.settings.breaks() > 0 {
                    eprintln!("Stopping scan");
                    self.interrupted = true;
                    break 'roots;
                }
                self.add(entry);
            }
        }
        let scan_duration = start_time.elapsed();
        self.scan_listener.scan_over(self, &self.stats, scan_duration);
    }

    fn add(&mut self, entry: Entry) {
        match entry {
            Entry::File(path, meta) => {
                self.scan_listener.file_scanned(&path, &self.stats);
                self.classify(path.into_boxed_path(), meta);
            }
            Entry::Dir(path) => {
                self.scan_listener.file_scanned(&path, &self.stats);
            }
            Entry::Symlink(_) | Entry::Other(_) => {
                self.stats.skipped += 1;
            }
            Entry::Cycle(path) => {
                eprintln!("kdedup: warning: ignoring cycle '{}'", path.display());
            }
            Entry::Failed(err) => {
                eprintln!("kdedup: error: {}", err);
                if err.depth() == 0 {
                    self.soft_error = true;
                }
            }
        }
    }

    /// Decide what one file is: first of its size, a known hardlink, new
    /// unique content, or a duplicate.
    fn classify(&mut self, path: Box<Path>, meta: FileMeta) {
        if meta.size < self.settings.min_file_size || meta.size > self.settings.max_file_size {
            self.scan_listener.size_skipped(&path, meta.size);
            self.stats.skipped += 1;
            return;
        }
        if meta.ino == 0 && !self.warned_inode_zero {
            self.warned_inode_zero = true;
            eprintln!(
                "kdedup: warning: '{}' has inode 0; hardlinks cannot be told apart from duplicates here",
                path.display()
            );
        }

        self.stats.files += 1;
        let id = self.arena.push(FileRecord::new(path, meta));

        let bucket = match self.by_size.entry(meta.size) {
            BTreeEntry::Vacant(e) => {
                // First file of this length; fingerprinting can wait until
                // a second one makes it necessary.
                e.insert(SizeBucket { unhashed: Some(id), ..SizeBucket::default() });
                return;
            }
            BTreeEntry::Occupied(e) => e.into_mut(),
        };

        let arena = &mut self.arena;
        let stats = &mut self.stats;
        let listener = &mut self.scan_listener;

        if let Some(sole) = bucket.unhashed {
            if arena[sole].same_inode(&arena[id]) {
                link_into_hardlink_chain(arena, sole, id);
                stats.hardlinked += 1;
                listener.hardlink_found(&arena[id].path, &arena[sole].path);
                return;
            }
            // A second, distinct file of this length: fingerprint the
            // deferred one and seat it in the content index.
            bucket.unhashed = None;
            self.hasher.hash_file(&mut arena[sole], sole);
            stats.hashed += 1;
            let key = arena[sole].key.expect("just hashed");
            bucket.by_content.insert(key, sole);
        }

        self.hasher.hash_file(&mut arena[id], id);
        stats.hashed += 1;
        let key = arena[id].key.expect("just hashed");

        let head = match bucket.by_content.entry(key) {
            BTreeEntry::Vacant(e) => {
                // Unique content.
                e.insert(id);
                return;
            }
            BTreeEntry::Occupied(e) => *e.get(),
        };

        if arena[head].same_inode(&arena[id]) {
            link_into_hardlink_chain(arena, head, id);
            stats.hardlinked += 1;
            listener.hardlink_found(&arena[id].path, &arena[head].path);
            return;
        }

        // Identical content on a different inode: a genuine duplicate.
        if arena[head].next_dup.is_none() {
            self.dup_heads.push(head);
        }
        let same_device = link_into_dup_chain(arena, head, id);
        stats.duplicates += 1;
        if same_device {
            stats.saveable += 1;
            stats.saveable_bytes += meta.size;
        }
        listener.duplicate_found(&arena[id].path, &arena[head].path, same_device);
    }

    /// Replace every linkable duplicate with a hardlink to the first
    /// surviving copy of its group.
    pub fn hardlink_duplicates(&mut self) -> Result<LinkStats, FatalLinkError> {
        linker::hardlink_duplicates(&self.arena, &self.dup_heads, &mut *self.scan_listener)
    }

    pub fn stats(&self) -> Stats {
        self.stats
    }

    /// A warning-level problem happened somewhere during the scan.
    pub fn had_errors(&self) -> bool {
        self.soft_error
    }

    pub fn interrupted(&self) -> bool {
        self.interrupted
    }

    /// All duplicate groups in discovery order; each group lists the first
    /// seen copy first, then its duplicates in chain order.
    pub fn duplicate_groups(&self) -> Vec<Vec<PathBuf>> {
        self.dup_heads
            .iter()
            .map(|&head| {
                let mut group = Vec::new();
                let mut cursor = Some(head);
                while let Some(id) = cursor {
                    group.push(self.arena[id].path.to_path_buf());
                    cursor = self.arena[id].next_dup;
                }
                group
            })
            .collect()
    }
}

impl Default for Scanner {
    fn default() -> Self {
        Self::new()
    }
}

/// Hang `id` off `head`'s hardlink chain, right behind the head.
fn link_into_hardlink_chain(arena: &mut FileArena, head: FileId, id: FileId) {
    let next = arena[head].next_hardlink;
    arena[id].next_hardlink = next;
    arena[head].next_hardlink = Some(id);
}

/// Insert `id` into `head`'s duplicate chain behind the last record on the
/// same device, falling back to the chain tail. Keeps each device's run
/// contiguous, which lets the link pass pick targets in a single sweep.
/// Returns whether the predecessor shares `id`'s device.
fn link_into_dup_chain(arena: &mut FileArena, head: FileId, id: FileId) -> bool {
    let dev = arena[id].dev;
    let mut tail = head;
    let mut last_match = if arena[head].dev == dev { Some(head) } else { None };
    while let Some(next) = arena[tail].next_dup {
        tail = next;
        if arena[tail].dev == dev {
            last_match = Some(tail);
        }
    }

    let same_device = last_match.is_some();
    let after = last_match.unwrap_or(tail);
    let next = arena[after].next_dup;
    arena[id].next_dup = next;
    arena[after].next_dup = Some(id);
    same_device
}

#[cfg(test)]
mod test {
    use super::*;
    use std::fs;
    use tempdir::TempDir;

    /// Feed a real file through classification with made-up stat identity,
    /// so device layouts impossible in a tempdir can be exercised.
    fn classify_as(scanner: &mut Scanner, path: &Path, dev: u64, ino: u64) {
        let size = fs::metadata(path).expect("stat").len();
        scanner.classify(path.into(), FileMeta { size, dev, ino });
    }

    fn write_files(dir: &TempDir, names_and_contents: &[(&str, &str)]) -> Vec<PathBuf> {
        names_and_contents
            .iter()
            .map(|(name, contents)| {
                let path = dir.path().join(name);
                fs::write(&path, contents).expect("write");
                path
            })
            .collect()
    }

    #[test]
    fn same_device_runs_stay_contiguous() {
        let tmp = TempDir::new("devtest").expect("tmp");
        let paths = write_files(&tmp, &[("a", "dupe"), ("b", "dupe"), ("c", "dupe"), ("d", "dupe")]);

        let mut s = Scanner::new();
        classify_as(&mut s, &paths[0], 1, 100);
        classify_as(&mut s, &paths[1], 2, 200);
        classify_as(&mut s, &paths[2], 1, 101);
        classify_as(&mut s, &paths[3], 2, 201);

        let groups = s.duplicate_groups();
        assert_eq!(groups.len(), 1);
        // a(dev1) keeps c(dev1) next to it; b and d cluster behind.
        assert_eq!(groups[0], vec![paths[0].clone(), paths[2].clone(), paths[1].clone(), paths[3].clone()]);

        let stats = s.stats();
        assert_eq!(stats.files, 4);
        assert_eq!(stats.duplicates, 3);
        assert_eq!(stats.saveable, 2);
        assert_eq!(stats.saveable_bytes, 2 * 4);
    }

    #[test]
    fn cross_device_duplicate_saves_nothing() {
        let tmp = TempDir::new("devtest2").expect("tmp");
        let paths = write_files(&tmp, &[("a", "dupe"), ("b", "dupe")]);

        let mut s = Scanner::new();
        classify_as(&mut s, &paths[0], 1, 100);
        classify_as(&mut s, &paths[1], 2, 100);

        let stats = s.stats();
        assert_eq!(stats.duplicates, 1);
        assert_eq!(stats.saveable, 0);
        assert_eq!(stats.saveable_bytes, 0);
    }

    #[test]
    fn shared_inode_is_not_hashed_or_reported_as_duplicate() {
        let tmp = TempDir::new("devtest3").expect("tmp");
        let paths = write_files(&tmp, &[("a", "dupe"), ("b", "dupe")]);

        let mut s = Scanner::new();
        classify_as(&mut s, &paths[0], 1, 100);
        classify_as(&mut s, &paths[1], 1, 100);

        let stats = s.stats();
        assert_eq!(stats.files, 2);
        assert_eq!(stats.hardlinked, 1);
        assert_eq!(stats.duplicates, 0);
        assert_eq!(stats.hashed, 0);
        assert!(s.duplicate_groups().is_empty());
    }

    #[test]
    fn inode_zero_files_count_as_duplicates() {
        let tmp = TempDir::new("devtest4").expect("tmp");
        let paths = write_files(&tmp, &[("a", "dupe"), ("b", "dupe")]);

        let mut s = Scanner::new();
        classify_as(&mut s, &paths[0], 1, 0);
        classify_as(&mut s, &paths[1], 1, 0);

        let stats = s.stats();
        assert_eq!(stats.hardlinked, 0);
        assert_eq!(stats.duplicates, 1);
    }

    #[test]
    fn hardlink_of_an_already_hashed_head_joins_its_chain() {
        let tmp = TempDir::new("devtest5").expect("tmp");
        let paths = write_files(&tmp, &[("a", "dupe"), ("b", "solo"), ("c", "dupe")]);

        let mut s = Scanner::new();
        classify_as(&mut s, &paths[0], 1, 100);
        classify_as(&mut s, &paths[1], 1, 101);
        // Another path to a's inode, arriving after hashing was forced.
        classify_as(&mut s, &paths[2], 1, 100);

        let stats = s.stats();
        assert_eq!(stats.hardlinked, 1);
        assert_eq!(stats.duplicates, 0);
        assert_eq!(stats.hashed, 3);
    }

    #[test]
    fn size_range_is_enforced() {
        let tmp = TempDir::new("sizetest").expect("tmp");
        let paths = write_files(&tmp, &[("small", "ab"), ("large", "abcdefgh")]);

        let mut s = Scanner::new();
        s.settings.min_file_size = 3;
        s.settings.max_file_size = 7;
        classify_as(&mut s, &paths[0], 1, 1);
        classify_as(&mut s, &paths[1], 1, 2);

        let stats = s.stats();
        assert_eq!(stats.files, 0);
        assert_eq!(stats.skipped, 2);
    }

    #[test]
    fn lone_sizes_never_hash() {
        let tmp = TempDir::new("lonetest").expect("tmp");
        let paths = write_files(&tmp, &[("a", "x"), ("b", "xy"), ("c", "xyz")]);

        let mut s = Scanner::new();
        for (i, path) in paths.iter().enumerate() {
            classify_as(&mut s, path, 1, i as u64 + 1);
        }

        let stats = s.stats();
        assert_eq!(stats.files, 3);
        assert_eq!(stats.hashed, 0);
        assert_eq!(stats.duplicates, 0);
    }
}
