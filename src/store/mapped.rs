//! Read-only memory-mapped files and typed record views over them.
//!
//! Nothing in the archive is deserialized up front. Every store is a
//! [`MappedFile`] (a byte region) or a [`RecordView`] (the same region
//! split into fixed-size records), and every accessor checks offsets
//! against the mapped length before touching the bytes.

use std::fs::File;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use byteorder::{ByteOrder, LittleEndian};
use memmap2::Mmap;
use tracing::debug;

use crate::error::{ArchiveError, Result};
use crate::index::format::Record;

enum Backing {
    Mapped(Mmap),
    Owned(Vec<u8>),
    Empty,
}

/// An immutable byte region backed by a read-only memory map.
pub struct MappedFile {
    path: PathBuf,
    backing: Backing,
}

impl MappedFile {
    /// Map a required file. A missing file is an [`ArchiveError::InvalidArchive`].
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match Self::open_optional(path)? {
            Some(file) => Ok(file),
            None => Err(ArchiveError::invalid(path, "required file is missing")),
        }
    }

    /// Map a file that may legitimately be absent.
    pub fn open_optional(path: impl AsRef<Path>) -> Result<Option<Self>> {
        let path = path.as_ref().to_path_buf();
        let file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ArchiveError::io(&path, e)),
        };
        let len = file
            .metadata()
            .map_err(|e| ArchiveError::io(&path, e))?
            .len();

        let backing = if len == 0 {
            Backing::Empty
        } else {
            // SAFETY: archives are immutable once built; the map is read-only
            // and nothing in this process writes to the file.
            let map = unsafe { Mmap::map(&file) }.map_err(|e| ArchiveError::io(&path, e))?;
            Backing::Mapped(map)
        };
        debug!(path = %path.display(), len, "Mapped archive file");
        Ok(Some(Self { path, backing }))
    }

    /// Wrap an in-memory buffer. `label` stands in for the path in errors.
    pub fn from_bytes(label: impl Into<PathBuf>, bytes: Vec<u8>) -> Self {
        let backing = if bytes.is_empty() {
            Backing::Empty
        } else {
            Backing::Owned(bytes)
        };
        Self {
            path: label.into(),
            backing,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn bytes(&self) -> &[u8] {
        match &self.backing {
            Backing::Mapped(m) => m,
            Backing::Owned(v) => v,
            Backing::Empty => &[],
        }
    }

    pub fn len(&self) -> usize {
        self.bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `len` bytes starting at `offset`, if entirely inside the region.
    pub fn slice(&self, offset: usize, len: usize) -> Option<&[u8]> {
        let end = offset.checked_add(len)?;
        self.bytes().get(offset..end)
    }

    /// Little-endian `u32` at a byte offset.
    pub fn u32_at(&self, offset: usize) -> Option<u32> {
        self.slice(offset, 4).map(LittleEndian::read_u32)
    }

    /// The NUL-terminated byte string starting at `offset`, without the NUL.
    ///
    /// Returns `None` if `offset` is out of bounds or no terminator follows.
    pub fn cstr_at(&self, offset: usize) -> Option<&[u8]> {
        let tail = self.bytes().get(offset..)?;
        let end = tail.iter().position(|&b| b == 0)?;
        Some(&tail[..end])
    }
}

/// A [`MappedFile`] interpreted as a dense array of `T` records.
pub struct RecordView<T: Record> {
    file: MappedFile,
    len: usize,
    _marker: PhantomData<T>,
}

impl<T: Record> RecordView<T> {
    /// Map a required record table, checking that it holds whole records.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::new(MappedFile::open(path)?)
    }

    pub fn new(file: MappedFile) -> Result<Self> {
        if file.len() % T::SIZE != 0 {
            return Err(ArchiveError::invalid(
                file.path(),
                format!(
                    "size {} is not a multiple of the {}-byte record size",
                    file.len(),
                    T::SIZE
                ),
            ));
        }
        let len = file.len() / T::SIZE;
        Ok(Self {
            file,
            len,
            _marker: PhantomData,
        })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Record `index`, or `None` past the end.
    pub fn get(&self, index: usize) -> Option<T> {
        if index >= self.len {
            return None;
        }
        let start = index * T::SIZE;
        self.file.slice(start, T::SIZE).map(T::decode)
    }

    /// Record `index`, or [`ArchiveError::OutOfRange`].
    pub fn try_get(&self, index: usize) -> Result<T> {
        self.get(index)
            .ok_or_else(|| ArchiveError::out_of_range(index as u64, self.len))
    }

    pub fn iter(&self) -> impl ExactSizeIterator<Item = T> + '_ {
        (0..self.len).map(move |i| {
            let start = i * T::SIZE;
            T::decode(&self.file.bytes()[start..start + T::SIZE])
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::format::RawBlock;

    #[test]
    fn test_cstr_at() {
        let f = MappedFile::from_bytes("mem", b"abc\0de\0f".to_vec());
        assert_eq!(f.cstr_at(0), Some(&b"abc"[..]));
        assert_eq!(f.cstr_at(4), Some(&b"de"[..]));
        assert_eq!(f.cstr_at(3), Some(&b""[..]));
        // Unterminated tail is not a string
        assert_eq!(f.cstr_at(7), None);
        assert_eq!(f.cstr_at(100), None);
    }

    #[test]
    fn test_slice_bounds() {
        let f = MappedFile::from_bytes("mem", vec![1, 2, 3, 4, 5]);
        assert_eq!(f.slice(1, 3), Some(&[2u8, 3, 4][..]));
        assert_eq!(f.slice(3, 3), None);
        assert_eq!(f.slice(usize::MAX, 2), None);
        assert_eq!(f.u32_at(0), Some(0x0403_0201));
        assert_eq!(f.u32_at(2), None);
    }

    #[test]
    fn test_record_view_rejects_partial_records() {
        let f = MappedFile::from_bytes("zmeta", vec![0u8; 17]);
        let err = RecordView::<RawBlock>::new(f).err().expect("should fail");
        assert!(matches!(err, ArchiveError::InvalidArchive { .. }));
    }

    #[test]
    fn test_record_view_get() {
        let mut buf = Vec::new();
        for v in [10u32, 20, 30] {
            v.encode(&mut buf);
        }
        let view = RecordView::<u32>::new(MappedFile::from_bytes("t", buf)).unwrap();
        assert_eq!(view.len(), 3);
        assert_eq!(view.get(1), Some(20));
        assert_eq!(view.get(3), None);
        assert!(matches!(
            view.try_get(3),
            Err(ArchiveError::OutOfRange { index: 3, len: 3 })
        ));
        assert_eq!(view.iter().collect::<Vec<_>>(), vec![10, 20, 30]);
    }

    #[test]
    fn test_open_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = MappedFile::open(dir.path().join("nope")).err().unwrap();
        assert!(matches!(err, ArchiveError::InvalidArchive { .. }));
        assert!(MappedFile::open_optional(dir.path().join("nope"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_open_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty");
        std::fs::write(&path, b"").unwrap();
        let f = MappedFile::open(&path).unwrap();
        assert!(f.is_empty());
        assert_eq!(f.cstr_at(0), None);
    }
}
