mod file;
mod hasher;
#[cfg(feature = "json")]
mod json;
mod linker;
mod metadata;
mod scanner;
mod ui;
mod walk;

pub use crate::file::{ContentKey, FileId};
#[cfg(feature = "json")]
pub use crate::json::JsonOutput;
pub use crate::linker::{FatalLinkError, LinkStats, BACKUP_SUFFIX};
pub use crate::metadata::FileMeta;
pub use crate::scanner::{ScanListener, Scanner, Settings, Stats};
pub use crate::ui::UI as TextUserInterface;
pub use crate::walk::WalkOptions;
