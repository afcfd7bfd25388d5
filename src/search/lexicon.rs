//! Lexicon store: term → posting list → hits, read straight off the maps.
//!
//! - `lexhash` resolves a term to its id;
//! - `lexmeta[id]` gives the byte offset and length of the term's postings in
//!   `lexdata`;
//! - each `lexdata` packet holds the document (low 30 bits), a cached
//!   child-count hint (top 2 bits) and an offset into `lexhit`;
//! - `lexhit` at that offset is `[count: u8][hit byte × count]`.
//!
//! Postings of a term are sorted by document, which is what makes binary
//! search membership tests possible during intersection.

use std::path::Path;

use tracing::debug;

use crate::error::{ArchiveError, Result};
use crate::index::format::{PostPacket, Record, TermMeta};
use crate::index::hash::HashIndex;
use crate::model::hit::Hit;
use crate::model::message::MessageIndex;
use crate::store::mapped::{MappedFile, RecordView};

/// Dense term number assigned at build time.
pub type TermId = u32;

/// The full-text search index.
pub struct Lexicon {
    meta: RecordView<TermMeta>,
    data: MappedFile,
    hits: MappedFile,
    hash: HashIndex,
}

/// Paths of the lexicon files.
pub struct LexiconPaths<'p> {
    pub meta: &'p Path,
    pub strings: &'p Path,
    pub data: &'p Path,
    pub hits: &'p Path,
    pub hash: &'p Path,
    pub hash_data: &'p Path,
}

impl Lexicon {
    pub fn open(paths: LexiconPaths<'_>) -> Result<Self> {
        let lexicon = Self::new(
            RecordView::open(paths.meta)?,
            MappedFile::open(paths.data)?,
            MappedFile::open(paths.hits)?,
            HashIndex::open(paths.strings, paths.hash, paths.hash_data)?,
        )?;
        debug!(
            terms = lexicon.term_count(),
            buckets = lexicon.hash.bucket_count(),
            "Opened lexicon"
        );
        Ok(lexicon)
    }

    pub fn new(
        meta: RecordView<TermMeta>,
        data: MappedFile,
        hits: MappedFile,
        hash: HashIndex,
    ) -> Result<Self> {
        if data.len() % PostPacket::SIZE != 0 {
            return Err(ArchiveError::invalid(
                data.path(),
                format!("size {} is not a whole number of postings", data.len()),
            ));
        }
        Ok(Self {
            meta,
            data,
            hits,
            hash,
        })
    }

    pub fn term_count(&self) -> usize {
        self.meta.len()
    }

    /// Id of a normalized term, or `None` if it is not indexed.
    pub fn lookup(&self, term: &str) -> Result<Option<TermId>> {
        match self.hash.search(term.as_bytes())? {
            Some(id) if (id as usize) < self.meta.len() => Ok(Some(id)),
            Some(id) => Err(ArchiveError::invalid(
                self.meta.path(),
                format!("term '{term}' maps to id {id} past {} terms", self.meta.len()),
            )),
            None => Ok(None),
        }
    }

    /// Posting list of a term.
    pub fn postings(&self, term: TermId) -> Result<PostingList<'_>> {
        let meta = self.meta.try_get(term as usize)?;
        let len = meta.count as usize * PostPacket::SIZE;
        let packets = self
            .data
            .slice(meta.data_offset as usize, len)
            .ok_or_else(|| {
                ArchiveError::invalid(
                    self.data.path(),
                    format!(
                        "term {term}: {} postings at offset {} run past the end",
                        meta.count, meta.data_offset
                    ),
                )
            })?;
        Ok(PostingList {
            packets,
            hits: &self.hits,
        })
    }

    /// Iterate over every `(term, id)` pair in the lexicon hash.
    pub fn terms(&self) -> impl Iterator<Item = Result<(&[u8], TermId)>> + '_ {
        self.hash.entries()
    }
}

/// A term's postings, ascending by document.
#[derive(Clone, Copy)]
pub struct PostingList<'a> {
    packets: &'a [u8],
    hits: &'a MappedFile,
}

impl<'a> PostingList<'a> {
    pub fn len(&self) -> usize {
        self.packets.len() / PostPacket::SIZE
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    /// Raw packet `i`.
    pub fn packet(&self, i: usize) -> Option<PostPacket> {
        let start = i.checked_mul(PostPacket::SIZE)?;
        self.packets
            .get(start..start.checked_add(PostPacket::SIZE)?)
            .map(PostPacket::decode)
    }

    /// Document of posting `i`.
    pub fn document(&self, i: usize) -> Option<MessageIndex> {
        self.packet(i).map(|p| p.document())
    }

    /// Documents in list order.
    pub fn documents(&self) -> impl Iterator<Item = MessageIndex> + 'a {
        self.packets
            .chunks_exact(PostPacket::SIZE)
            .map(|c| PostPacket::decode(c).document())
    }

    /// Position of `document` in the list, by binary search.
    pub fn find(&self, document: MessageIndex) -> Option<usize> {
        let (mut lo, mut hi) = (0usize, self.len());
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let doc = self.document(mid)?;
            match doc.cmp(&document) {
                std::cmp::Ordering::Equal => return Some(mid),
                std::cmp::Ordering::Less => lo = mid + 1,
                std::cmp::Ordering::Greater => hi = mid,
            }
        }
        None
    }

    pub fn contains(&self, document: MessageIndex) -> bool {
        self.find(document).is_some()
    }

    /// Whether documents are strictly ascending.
    pub fn is_sorted(&self) -> bool {
        let mut prev: Option<MessageIndex> = None;
        for doc in self.documents() {
            if prev.is_some_and(|p| p >= doc) {
                return false;
            }
            prev = Some(doc);
        }
        true
    }

    /// Posting `i` with its hit list.
    pub fn posting(&self, i: usize) -> Result<Posting<'a>> {
        let packet = self
            .packet(i)
            .ok_or_else(|| ArchiveError::out_of_range(i as u64, self.len()))?;
        let offset = packet.hit_offset as usize;
        let bad_hits = || {
            ArchiveError::invalid(
                self.hits.path(),
                format!(
                    "hit list at offset {offset} for document {} runs past the end",
                    packet.document()
                ),
            )
        };
        let count = self.hits.slice(offset, 1).ok_or_else(bad_hits)?[0];
        let bytes = self
            .hits
            .slice(offset + 1, count as usize)
            .ok_or_else(bad_hits)?;
        Ok(Posting {
            document: packet.document(),
            children_hint: packet.children_hint(),
            hits: HitList { bytes },
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = Result<Posting<'a>>> + '_ {
        (0..self.len()).map(move |i| self.posting(i))
    }
}

/// One document's entry in a posting list.
#[derive(Debug, Clone, Copy)]
pub struct Posting<'a> {
    pub document: MessageIndex,
    /// Child count cached at build time, saturated at 3.
    pub children_hint: u8,
    pub hits: HitList<'a>,
}

/// Encoded hits of one term in one document.
#[derive(Debug, Clone, Copy)]
pub struct HitList<'a> {
    bytes: &'a [u8],
}

impl<'a> HitList<'a> {
    /// Number of stored hit bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Decoded hits. Unassigned bytes are skipped.
    pub fn iter(&self) -> impl Iterator<Item = Hit> + 'a {
        self.bytes.iter().filter_map(|&b| Hit::decode(b))
    }

    /// Number of unassigned hit bytes.
    pub fn invalid_count(&self) -> usize {
        self.bytes.iter().filter(|&&b| Hit::decode(b).is_none()).count()
    }

    /// Sum of hit weights.
    pub fn score(&self) -> f32 {
        self.iter().map(Hit::weight).sum()
    }
}
