use crate::scanner::{ScanListener, Scanner, Stats};
use serde_derive::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Holds everything back until the scan is over, then prints one JSON
/// document on stdout.
#[derive(Debug)]
pub struct JsonOutput;

impl JsonOutput {
    pub fn new() -> Self {
        JsonOutput
    }
}

impl ScanListener for JsonOutput {
    fn file_scanned(&mut self, _: &Path, _: &Stats) {
        // output only at scan_over
    }

    fn scan_over(&self, scanner: &Scanner, stats: &Stats, scan_duration: Duration) {
        let data = JsonSerializable::new(scanner, stats, scan_duration);
        let json_string = serde_json::to_string_pretty(&data).unwrap();
        println!("{}", json_string);
    }

    fn hardlink_found(&mut self, _: &Path, _: &Path) {
        // output only at scan_over
    }

    fn duplicate_found(&mut self, _: &Path, _: &Path, _: bool) {
        // output only at scan_over
    }

    fn size_skipped(&mut self, _: &Path, _: u64) {
        // output only at scan_over
    }

    fn hardlinked(&mut self, _: &Path, _: &Path) {
        // output only at scan_over
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JsonSerializable {
    creator: String,
    duplicate_groups: Vec<Vec<PathBuf>>,
    stats: Stats,
    scan_duration: Duration,
}

impl JsonSerializable {
    pub fn new(scanner: &Scanner, stats: &Stats, scan_duration: Duration) -> Self {
        JsonSerializable {
            creator: format!("kdedup {}", env!("CARGO_PKG_VERSION")),
            duplicate_groups: scanner.duplicate_groups(),
            stats: *stats,
            scan_duration,
        }
    }
}
