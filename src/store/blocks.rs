//! Compressed message store: reads individual messages by index.
//!
//! `zmeta` holds one [`RawBlock`] per message; `zdata` holds the zstd
//! frames back to back. All frames were compressed against one shared
//! dictionary (`zdict`), which is prepared once at open time and reused by
//! every [`Decompressor`].

use std::num::NonZeroUsize;
use std::path::Path;

use lru::LruCache;
use tracing::{debug, warn};
use zstd::dict::DecoderDictionary;

use crate::error::{ArchiveError, Result};
use crate::index::format::RawBlock;
use crate::store::mapped::{MappedFile, RecordView};

/// Default number of decompressed messages kept by a [`Decompressor`].
pub const DEFAULT_CACHE_SIZE: usize = 50;

/// Offset/size table plus compressed data, with the shared dictionary.
pub struct BlockStore {
    meta: RecordView<RawBlock>,
    data: MappedFile,
    dict: Option<DecoderDictionary<'static>>,
}

impl BlockStore {
    /// Open `zmeta`/`zdata` and, if present, the `zdict` dictionary.
    pub fn open(meta: &Path, data: &Path, dict: Option<&Path>) -> Result<Self> {
        let meta = RecordView::open(meta)?;
        let data = MappedFile::open(data)?;
        let dict = match dict {
            Some(path) => MappedFile::open_optional(path)?,
            None => None,
        };
        Self::new(meta, data, dict.as_ref().map(MappedFile::bytes))
    }

    /// Assemble a store from already-mapped parts.
    pub fn new(meta: RecordView<RawBlock>, data: MappedFile, dict: Option<&[u8]>) -> Result<Self> {
        // Frames are written in order, so the last one bounds them all.
        if let Some(last) = meta.len().checked_sub(1).and_then(|i| meta.get(i)) {
            let end = last.offset + u64::from(last.compressed_size);
            if end > data.len() as u64 {
                return Err(ArchiveError::invalid(
                    data.path(),
                    format!(
                        "offset table ends at byte {end} but data file holds {} bytes",
                        data.len()
                    ),
                ));
            }
        }

        let dict = dict.filter(|d| !d.is_empty()).map(DecoderDictionary::copy);
        debug!(
            messages = meta.len(),
            data_len = data.len(),
            dictionary = dict.is_some(),
            "Opened block store"
        );
        Ok(Self { meta, data, dict })
    }

    /// Number of messages.
    pub fn len(&self) -> usize {
        self.meta.len()
    }

    pub fn is_empty(&self) -> bool {
        self.meta.is_empty()
    }

    /// Sizes and location of a message's compressed block.
    pub fn raw(&self, index: u32) -> Result<RawBlock> {
        self.meta.try_get(index as usize)
    }

    /// Whether a shared dictionary is in use.
    pub fn has_dictionary(&self) -> bool {
        self.dict.is_some()
    }

    /// Create a decompression context with an LRU cache of `cache_size`
    /// messages (0 disables caching).
    ///
    /// Each concurrent reader should own its context.
    pub fn decompressor(&self, cache_size: usize) -> Result<Decompressor<'_>> {
        let zstd = match &self.dict {
            Some(dict) => zstd::bulk::Decompressor::with_prepared_dictionary(dict),
            None => zstd::bulk::Decompressor::new(),
        }
        .map_err(|e| ArchiveError::io(self.data.path(), e))?;

        Ok(Decompressor {
            store: self,
            zstd,
            scratch: Vec::new(),
            cache: NonZeroUsize::new(cache_size).map(LruCache::new),
        })
    }

    /// The compressed frame for `index`, bounds-checked against `zdata`.
    fn frame(&self, index: u32, raw: &RawBlock) -> Result<&[u8]> {
        usize::try_from(raw.offset)
            .ok()
            .and_then(|offset| self.data.slice(offset, raw.compressed_size as usize))
            .ok_or_else(|| ArchiveError::DecodeFailure {
                index,
                reason: format!(
                    "compressed block {}+{} lies outside the data file ({} bytes)",
                    raw.offset,
                    raw.compressed_size,
                    self.data.len()
                ),
            })
    }
}

/// A scoped decompression context bound to one [`BlockStore`].
///
/// Holds the zstd decoder state, a scratch buffer, and an optional LRU cache
/// of whole decompressed messages so that moving back and forth through a
/// thread does not decompress the same message repeatedly.
pub struct Decompressor<'a> {
    store: &'a BlockStore,
    zstd: zstd::bulk::Decompressor<'a>,
    scratch: Vec<u8>,
    cache: Option<LruCache<u32, Vec<u8>>>,
}

impl<'a> Decompressor<'a> {
    /// The store this context reads from.
    pub fn store(&self) -> &'a BlockStore {
        self.store
    }

    /// Decompress message `index`. The returned view is valid until the next
    /// call on this context.
    pub fn get(&mut self, index: u32) -> Result<&[u8]> {
        match self.cache {
            Some(ref mut cache) => {
                let store = self.store;
                let zstd = &mut self.zstd;
                let bytes = cache.try_get_or_insert(index, || {
                    let mut buf = Vec::new();
                    decompress_into(store, zstd, index, &mut buf).map(|()| buf)
                })?;
                Ok(bytes.as_slice())
            }
            None => {
                decompress_into(self.store, &mut self.zstd, index, &mut self.scratch)?;
                Ok(&self.scratch)
            }
        }
    }

    /// Decompress message `index` into a caller-supplied buffer, bypassing
    /// the cache. `out` is cleared first.
    pub fn get_into(&mut self, index: u32, out: &mut Vec<u8>) -> Result<()> {
        decompress_into(self.store, &mut self.zstd, index, out)
    }

    /// Number of messages currently cached.
    pub fn cached(&self) -> usize {
        self.cache.as_ref().map_or(0, LruCache::len)
    }
}

/// Decompress one whole block and check it against the recorded size.
fn decompress_into(
    store: &BlockStore,
    zstd: &mut zstd::bulk::Decompressor<'_>,
    index: u32,
    out: &mut Vec<u8>,
) -> Result<()> {
    let raw = store.raw(index)?;
    let frame = store.frame(index, &raw)?;

    out.clear();
    out.reserve_exact(raw.size as usize);
    let written = zstd.decompress_to_buffer(frame, out).map_err(|e| {
        warn!(index, error = %e, "Decompression failed");
        ArchiveError::DecodeFailure {
            index,
            reason: e.to_string(),
        }
    })?;

    if written != raw.size as usize {
        warn!(
            index,
            expected = raw.size,
            actual = written,
            "Decompressed size mismatch"
        );
        out.clear();
        return Err(ArchiveError::DecodeFailure {
            index,
            reason: format!(
                "decompressed {written} bytes, index records {}",
                raw.size
            ),
        });
    }
    Ok(())
}
