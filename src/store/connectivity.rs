//! Connectivity store: per-message date, parent and children.
//!
//! Each message has one packed record in `conndata`, located through the
//! `connmeta` offset table:
//!
//! ```text
//! [date: u32][parent: i32][child_count: u32][child: u32 × child_count]
//! ```
//!
//! Thread roots are not found by scanning for `parent == -1`; the builder
//! precomputes them into `toplevel` in import order.

use std::path::Path;

use byteorder::{ByteOrder, LittleEndian};
use tracing::debug;

use crate::error::{ArchiveError, Result};
use crate::index::format::CONN_HEADER_SIZE;
use crate::model::message::MessageIndex;
use crate::store::mapped::{MappedFile, RecordView};

/// A borrowed, ordered list of message indices (children or roots).
#[derive(Debug, Clone, Copy)]
pub struct IndexList<'a> {
    bytes: &'a [u8],
}

impl<'a> IndexList<'a> {
    /// Wrap raw little-endian `u32`s. A trailing partial word is ignored.
    pub fn new(bytes: &'a [u8]) -> Self {
        let whole = bytes.len() - bytes.len() % 4;
        Self {
            bytes: &bytes[..whole],
        }
    }

    pub fn empty() -> Self {
        Self { bytes: &[] }
    }

    pub fn len(&self) -> usize {
        self.bytes.len() / 4
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn get(&self, i: usize) -> Option<MessageIndex> {
        let start = i.checked_mul(4)?;
        self.bytes.get(start..start.checked_add(4)?).map(LittleEndian::read_u32)
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = MessageIndex> + ExactSizeIterator + 'a {
        self.bytes.chunks_exact(4).map(LittleEndian::read_u32)
    }

    pub fn contains(&self, index: MessageIndex) -> bool {
        self.iter().any(|i| i == index)
    }

    pub fn to_vec(&self) -> Vec<MessageIndex> {
        self.iter().collect()
    }
}

/// The reply graph and per-message dates.
pub struct Connectivity {
    offsets: RecordView<u32>,
    data: MappedFile,
    top_level: MappedFile,
}

/// Decoded fixed part of a connectivity record.
#[derive(Debug, Clone, Copy)]
struct Header {
    date: u32,
    parent: i32,
    child_count: u32,
    body: usize,
}

impl Connectivity {
    pub fn open(meta: &Path, data: &Path, top_level: &Path) -> Result<Self> {
        let conn = Self::new(
            RecordView::open(meta)?,
            MappedFile::open(data)?,
            MappedFile::open(top_level)?,
        )?;
        debug!(
            messages = conn.len(),
            roots = conn.top_level().len(),
            "Opened connectivity store"
        );
        Ok(conn)
    }

    pub fn new(offsets: RecordView<u32>, data: MappedFile, top_level: MappedFile) -> Result<Self> {
        if top_level.len() % 4 != 0 {
            return Err(ArchiveError::invalid(
                top_level.path(),
                format!("size {} is not a whole number of indices", top_level.len()),
            ));
        }
        Ok(Self {
            offsets,
            data,
            top_level,
        })
    }

    /// Number of messages.
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    fn header(&self, index: MessageIndex) -> Result<Header> {
        let offset = self.offsets.try_get(index as usize)? as usize;
        let head = self.data.slice(offset, CONN_HEADER_SIZE).ok_or_else(|| {
            ArchiveError::invalid(
                self.data.path(),
                format!("record {index} at offset {offset} is truncated"),
            )
        })?;
        Ok(Header {
            date: LittleEndian::read_u32(&head[0..4]),
            parent: LittleEndian::read_i32(&head[4..8]),
            child_count: LittleEndian::read_u32(&head[8..12]),
            body: offset + CONN_HEADER_SIZE,
        })
    }

    /// Unix timestamp (seconds) of the message.
    pub fn date(&self, index: MessageIndex) -> Result<u32> {
        Ok(self.header(index)?.date)
    }

    /// Parent of the message, or `None` for a thread root.
    pub fn parent(&self, index: MessageIndex) -> Result<Option<MessageIndex>> {
        let parent = self.header(index)?.parent;
        Ok(u32::try_from(parent).ok())
    }

    /// Direct replies, in stored order.
    pub fn children(&self, index: MessageIndex) -> Result<IndexList<'_>> {
        let head = self.header(index)?;
        let len = head.child_count as usize * 4;
        self.data
            .slice(head.body, len)
            .map(IndexList::new)
            .ok_or_else(|| {
                ArchiveError::invalid(
                    self.data.path(),
                    format!(
                        "record {index} claims {} children past the end of the file",
                        head.child_count
                    ),
                )
            })
    }

    /// Thread roots in import order.
    pub fn top_level(&self) -> IndexList<'_> {
        IndexList::new(self.top_level.bytes())
    }

    /// Number of messages in the subtree rooted at `index`, the message
    /// itself included.
    pub fn total_children_count(&self, index: MessageIndex) -> Result<usize> {
        let mut stack = vec![index];
        let mut count = 0usize;
        while let Some(idx) = stack.pop() {
            count += 1;
            if count > self.len() {
                return Err(ArchiveError::invalid(
                    self.data.path(),
                    format!("reply graph below message {index} is not a tree"),
                ));
            }
            stack.extend(self.children(idx)?.iter());
        }
        Ok(count)
    }
}
