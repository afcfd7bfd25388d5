//! Read/unread state, kept outside the immutable archive.
//!
//! Messages are keyed by the XXH64 hash of their message-id, so the state
//! survives a rebuild of the archive as long as the ids stay the same.

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt};
use tracing::{debug, warn};
use xxhash_rust::xxh64::xxh64;

use crate::error::{ArchiveError, Result};

/// Hash under which a message-id is recorded.
pub fn visited_key(message_id: &[u8]) -> u64 {
    xxh64(message_id, 0)
}

/// Minimal visited-state contract.
pub trait VisitedStore {
    fn mark_visited(&mut self, message_id: &[u8]) -> Result<()>;
    fn was_visited(&self, message_id: &[u8]) -> bool;
}

/// In-memory store; forgets everything on drop.
#[derive(Debug, Default, Clone)]
pub struct MemoryVisited {
    seen: HashSet<u64>,
}

impl MemoryVisited {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

impl VisitedStore for MemoryVisited {
    fn mark_visited(&mut self, message_id: &[u8]) -> Result<()> {
        self.seen.insert(visited_key(message_id));
        Ok(())
    }

    fn was_visited(&self, message_id: &[u8]) -> bool {
        self.seen.contains(&visited_key(message_id))
    }
}

/// Append-only log of visited hashes, one little-endian `u64` per entry.
///
/// The whole log is loaded into a set on open. Marking an already visited
/// message writes nothing.
#[derive(Debug)]
pub struct VisitedLog {
    path: PathBuf,
    seen: HashSet<u64>,
    file: File,
}

impl VisitedLog {
    /// Open or create the log at `path`, creating parent directories.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ArchiveError::io(parent, e))?;
        }

        let mut seen = HashSet::new();
        if path.exists() {
            let file = File::open(path).map_err(|e| ArchiveError::io(path, e))?;
            let len = file.metadata().map_err(|e| ArchiveError::io(path, e))?.len();
            if len % 8 != 0 {
                warn!(
                    path = %path.display(),
                    len,
                    "Visited log has a partial trailing entry; truncating it"
                );
                OpenOptions::new()
                    .write(true)
                    .open(path)
                    .and_then(|f| f.set_len(len - len % 8))
                    .map_err(|e| ArchiveError::io(path, e))?;
            }
            let mut reader = BufReader::new(file);
            for _ in 0..len / 8 {
                let key = reader
                    .read_u64::<LittleEndian>()
                    .map_err(|e| ArchiveError::io(path, e))?;
                seen.insert(key);
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| ArchiveError::io(path, e))?;
        debug!(path = %path.display(), entries = seen.len(), "Opened visited log");

        Ok(Self {
            path: path.to_path_buf(),
            seen,
            file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

impl VisitedStore for VisitedLog {
    fn mark_visited(&mut self, message_id: &[u8]) -> Result<()> {
        let key = visited_key(message_id);
        if self.seen.insert(key) {
            self.file
                .write_all(&key.to_le_bytes())
                .map_err(|e| ArchiveError::io(&self.path, e))?;
        }
        Ok(())
    }

    fn was_visited(&self, message_id: &[u8]) -> bool {
        self.seen.contains(&visited_key(message_id))
    }
}
