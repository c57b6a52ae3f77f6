use crate::metadata::FileMeta;
use std::fs;
use std::path::PathBuf;
use walkdir::WalkDir;

/// Traversal policy, set once from the command line.
#[derive(Debug, Copy, Clone)]
pub struct WalkOptions {
    /// Enter subdirectories. Off by default; directories named on the
    /// command line still have their immediate contents listed.
    pub recursive: bool,
    /// Treat directory-pointing symlinks like directories.
    pub follow_symlinked_dirs: bool,
    /// Stat through file-pointing symlinks. On by default.
    pub follow_symlinked_files: bool,
    /// Do not cross device boundaries.
    pub one_file_system: bool,
    /// Follow symlinks given as top-level arguments only.
    pub dereference_command_line: bool,
}

impl Default for WalkOptions {
    fn default() -> Self {
        WalkOptions {
            recursive: false,
            follow_symlinked_dirs: false,
            follow_symlinked_files: true,
            one_file_system: false,
            dereference_command_line: false,
        }
    }
}

/// What the walker saw at one filesystem entry.
#[derive(Debug)]
pub enum Entry {
    /// Regular file and its stat data.
    File(PathBuf, FileMeta),
    /// Directory about to be listed.
    Dir(PathBuf),
    /// Symlink left unfollowed under the current options.
    Symlink(PathBuf),
    /// Directory cycle introduced by a followed symlink.
    Cycle(PathBuf),
    /// Neither file, directory nor symlink (socket, device node, ...).
    Other(PathBuf),
    /// stat or directory read failure; `depth() == 0` means the root
    /// argument itself was bad.
    Failed(walkdir::Error),
}

/// Directory traversal for one root, shaped by `WalkOptions`.
#[derive(Debug)]
pub struct Walker {
    opts: WalkOptions,
}

impl Walker {
    pub fn new(opts: WalkOptions) -> Self {
        Walker { opts }
    }

    pub fn entries(&self, root: impl Into<PathBuf>) -> Entries {
        // Symlinked files are statted through by hand below, so walkdir
        // only has to follow directory links.
        let mut walk = WalkDir::new(root.into())
            .follow_links(self.opts.follow_symlinked_dirs)
            .follow_root_links(self.opts.dereference_command_line || self.opts.follow_symlinked_dirs)
            .same_file_system(self.opts.one_file_system);
        if !self.opts.recursive {
            walk = walk.max_depth(1);
        }
        Entries {
            opts: self.opts,
            it: walk.into_iter(),
        }
    }
}

pub struct Entries {
    opts: WalkOptions,
    it: walkdir::IntoIter,
}

impl Iterator for Entries {
    type Item = Entry;

    fn next(&mut self) -> Option<Entry> {
        let entry = match self.it.next()? {
            Ok(entry) => entry,
            Err(err) => {
                return Some(match err.loop_ancestor() {
                    Some(_) => Entry::Cycle(err.path().map(PathBuf::from).unwrap_or_default()),
                    None => Entry::Failed(err),
                });
            }
        };

        let ty = entry.file_type();
        if ty.is_dir() {
            return Some(Entry::Dir(entry.into_path()));
        }
        if ty.is_symlink() {
            // Only reachable with follow_links off. Stat through by hand
            // when symlinked files are wanted; directory links stay alone.
            let path = entry.into_path();
            if self.opts.follow_symlinked_files {
                return Some(match fs::metadata(&path) {
                    Ok(ref m) if m.is_file() => Entry::File(path, FileMeta::new(m)),
                    _ => Entry::Symlink(path),
                });
            }
            return Some(Entry::Symlink(path));
        }
        if ty.is_file() {
            // With follow_links on, a symlinked file still surfaces here;
            // honor the file-symlink option by its original path.
            if entry.path_is_symlink() && !self.opts.follow_symlinked_files {
                return Some(Entry::Symlink(entry.into_path()));
            }
            return Some(match entry.metadata() {
                Ok(ref m) => {
                    let meta = FileMeta::new(m);
                    Entry::File(entry.into_path(), meta)
                }
                Err(err) => Entry::Failed(err),
            });
        }
        Some(Entry::Other(entry.into_path()))
    }
}
