//! String table: an offset array over a blob of NUL-terminated strings.

use std::borrow::Cow;
use std::path::Path;

use crate::error::{ArchiveError, Result};
use crate::store::mapped::{MappedFile, RecordView};

/// Index → string, with no copy and no allocation.
pub struct StringTable {
    offsets: RecordView<u32>,
    blob: MappedFile,
}

impl StringTable {
    pub fn open(meta: &Path, data: &Path) -> Result<Self> {
        Ok(Self::new(RecordView::open(meta)?, MappedFile::open(data)?))
    }

    pub fn new(offsets: RecordView<u32>, blob: MappedFile) -> Self {
        Self { offsets, blob }
    }

    /// Number of strings.
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Raw bytes of string `index`, without its terminator.
    ///
    /// Fails with `OutOfRange` past the table and `InvalidArchive` if the
    /// offset does not point at a terminated string.
    pub fn get(&self, index: usize) -> Result<&[u8]> {
        let offset = self.offsets.try_get(index)?;
        self.blob.cstr_at(offset as usize).ok_or_else(|| {
            ArchiveError::invalid(
                self.blob.path(),
                format!("string {index} at offset {offset} is not NUL-terminated"),
            )
        })
    }

    /// String `index` decoded as UTF-8, replacing invalid sequences.
    pub fn get_str(&self, index: usize) -> Result<Cow<'_, str>> {
        self.get(index).map(String::from_utf8_lossy)
    }
}
