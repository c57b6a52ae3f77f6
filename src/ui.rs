use crate::scanner::{ScanListener, Scanner, Stats};
use std::path::Path;
use std::time::{Duration, Instant};

#[derive(Debug)]
struct Timing {
    // Time in seconds, used to throttle console output
    next_update: u64,
    start_time: Instant,
}

#[derive(Debug)]
pub struct UI {
    verbosity: u32,
    timing: Timing,
}

impl UI {
    pub fn new(verbosity: u32) -> Self {
        UI {
            verbosity,
            timing: Timing {
                next_update: 0,
                start_time: Instant::now(),
            },
        }
    }
}

impl ScanListener for UI {
    fn file_scanned(&mut self, path: &Path, stats: &Stats) {
        if self.verbosity >= 2 {
            println!("debug: considering '{}'", path.display());
            return;
        }
        let elapsed = self.timing.start_time.elapsed().as_secs();
        if elapsed > self.timing.next_update {
            self.timing.next_update = elapsed + 1;
            println!("{}+{} dupes. {}+{} files scanned. {}/…",
                stats.duplicates, stats.hardlinked, stats.files, stats.skipped,
                path.parent().unwrap_or(path).display());
        }
    }

    fn scan_over(&self, _: &Scanner, stats: &Stats, scan_duration: Duration) {
        let nice_duration = match scan_duration.as_secs() {
            x @ 0..=5 => format!("{:.1}s", (x * 1_000_000_000 + u64::from(scan_duration.subsec_nanos())) as f64 / 1_000_000_000f64),
            x @ 6..=59 => format!("{}s", x),
            x => format!("{}m{}s", x / 60, x % 60),
        };
        println!("Found {} duplicate files, out of which {} can be hardlinked saving {} bytes",
            stats.duplicates, stats.saveable, stats.saveable_bytes);
        println!("Existing hardlinks: {}. Scanned: {}. Skipped: {}. Hashed: {}. Total scan duration: {}",
            stats.hardlinked, stats.files, stats.skipped, stats.hashed, nice_duration);
    }

    fn hardlink_found(&mut self, path: &Path, existing: &Path) {
        if self.verbosity >= 1 {
            println!("Found hardlinked: '{}' -> '{}'", path.display(), existing.display());
        }
    }

    fn duplicate_found(&mut self, path: &Path, existing: &Path, same_device: bool) {
        if self.verbosity >= 1 {
            if same_device {
                println!("Found duplicate: '{}' <-> '{}'", path.display(), existing.display());
            } else {
                println!("Found duplicate: '{}' <-> '{}' (devices differ)", path.display(), existing.display());
            }
        }
    }

    fn size_skipped(&mut self, path: &Path, size: u64) {
        if self.verbosity >= 1 {
            println!("Skipping '{}' because {} bytes is outside the size range", path.display(), size);
        }
    }

    fn hardlinked(&mut self, dest: &Path, target: &Path) {
        if self.verbosity >= 1 {
            println!("Hardlinked '{}' to '{}'", dest.display(), target.display());
        }
    }
}
