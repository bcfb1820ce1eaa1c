//! Change events and the batches they are published in

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// What happened to a path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    /// The path was created
    Create,
    /// The path was modified
    Modify,
    /// The path was deleted
    Delete,
}

/// Kind of filesystem object an event refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    /// Regular file
    File,
    /// Directory
    Directory,
    /// Symbolic link
    Symlink,
}

impl FileType {
    /// Map the watch service's one-letter type code. Unknown codes are files.
    #[must_use]
    pub fn from_code(code: &str) -> Self {
        match code {
            "d" => Self::Directory,
            "l" => Self::Symlink,
            _ => Self::File,
        }
    }
}

/// A single path changed inside a cell
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathEvent {
    /// Root of the cell the path belongs to
    pub cell: PathBuf,
    /// What happened
    pub kind: ChangeKind,
    /// Path relative to the cell root
    pub path: PathBuf,
    /// Object type
    pub file_type: FileType,
}

impl PathEvent {
    /// Absolute path of the changed object
    #[must_use]
    pub fn absolute_path(&self) -> PathBuf {
        self.cell.join(&self.path)
    }
}

/// Everything under `cell` must be assumed changed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverflowEvent {
    /// Root of the affected cell
    pub cell: PathBuf,
    /// Human readable cause
    pub reason: String,
}

/// One entry of a [`ChangeBatch`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum WatchEvent {
    /// A single path changed
    Path(PathEvent),
    /// Unknown set of changes in a cell
    Overflow(OverflowEvent),
}

impl WatchEvent {
    /// Cell root the event belongs to
    #[must_use]
    pub fn cell(&self) -> &Path {
        match self {
            Self::Path(event) => &event.cell,
            Self::Overflow(event) => &event.cell,
        }
    }
}

/// Immutable set of events produced by one poll cycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeBatch {
    events: Vec<WatchEvent>,
}

impl ChangeBatch {
    /// Batch holding the given events in order
    #[must_use]
    pub fn new(events: Vec<WatchEvent>) -> Self {
        Self { events }
    }

    /// Batch holding a single overflow for `cell`
    pub fn overflow(cell: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::new(vec![WatchEvent::Overflow(OverflowEvent {
            cell: cell.into(),
            reason: reason.into(),
        })])
    }

    /// Concatenate per-cell batches, preserving each part's internal order
    pub fn merge(parts: impl IntoIterator<Item = ChangeBatch>) -> Self {
        Self::new(parts.into_iter().flat_map(|part| part.events).collect())
    }

    /// All events
    #[must_use]
    pub fn events(&self) -> &[WatchEvent] {
        &self.events
    }

    /// Path events only
    pub fn path_events(&self) -> impl Iterator<Item = &PathEvent> {
        self.events.iter().filter_map(|event| match event {
            WatchEvent::Path(path) => Some(path),
            WatchEvent::Overflow(_) => None,
        })
    }

    /// Overflow events only
    pub fn overflows(&self) -> impl Iterator<Item = &OverflowEvent> {
        self.events.iter().filter_map(|event| match event {
            WatchEvent::Overflow(overflow) => Some(overflow),
            WatchEvent::Path(_) => None,
        })
    }

    /// Whether any cell overflowed
    #[must_use]
    pub fn has_overflow(&self) -> bool {
        self.overflows().next().is_some()
    }

    /// Cells that overflowed in this batch
    #[must_use]
    pub fn overflowed_cells(&self) -> BTreeSet<&Path> {
        self.overflows().map(|overflow| overflow.cell.as_path()).collect()
    }

    /// Number of events
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// True when the batch carries no events
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn modify(cell: &str, path: &str) -> WatchEvent {
        WatchEvent::Path(PathEvent {
            cell: PathBuf::from(cell),
            kind: ChangeKind::Modify,
            path: PathBuf::from(path),
            file_type: FileType::File,
        })
    }

    #[test]
    fn test_type_codes() {
        assert_eq!(FileType::from_code("d"), FileType::Directory);
        assert_eq!(FileType::from_code("l"), FileType::Symlink);
        assert_eq!(FileType::from_code("f"), FileType::File);
        assert_eq!(FileType::from_code("?"), FileType::File);
    }

    #[test]
    fn test_merge_keeps_part_order() {
        let first = ChangeBatch::new(vec![modify("/a", "x"), modify("/a", "y")]);
        let second = ChangeBatch::overflow("/b", "Too many files changed.");

        let merged = ChangeBatch::merge([first, second]);

        assert_eq!(merged.len(), 3);
        assert_eq!(merged.events()[0], modify("/a", "x"));
        assert_eq!(merged.events()[1], modify("/a", "y"));
        assert!(merged.has_overflow());
        assert_eq!(merged.path_events().count(), 2);
        let cells: Vec<_> = merged.overflowed_cells().into_iter().collect();
        assert_eq!(cells, vec![Path::new("/b")]);
    }

    #[test]
    fn test_absolute_path_joins_cell() {
        let WatchEvent::Path(event) = modify("/repo", "src/lib.rs") else {
            unreachable!()
        };
        assert_eq!(event.absolute_path(), PathBuf::from("/repo/src/lib.rs"));
    }
}
