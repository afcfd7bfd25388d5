//! Disk-resident open-addressed hash table: byte-string key → `u32`.
//!
//! Three files make up one table:
//!
//! - the key source (`middata` or `lexstr`), NUL-terminated keys owned by
//!   another store;
//! - the bucket array (`midhash` / `lexhash`), `2^n` [`Bucket`]s of
//!   `{hash, key_offset}`;
//! - the value array (`midhashdata` / `lexhashdata`), one `u32` per bucket.
//!
//! Lookup hashes the key with XXH32 (seed 0), starts at `hash & (n - 1)` and
//! probes linearly with wrap-around. A bucket matches only when the stored
//! hash *and* the stored key bytes both equal the query, so colliding keys
//! never resolve to each other's value. The first empty bucket ends the
//! probe.

use std::path::Path;

use tracing::trace;
use xxhash_rust::xxh32::xxh32;

use crate::error::{ArchiveError, Result};
use crate::index::format::Bucket;
use crate::store::mapped::{MappedFile, RecordView};

/// Hash function shared by the builder and the reader.
pub fn hash_key(key: &[u8]) -> u32 {
    xxh32(key, 0)
}

/// Read side of an archive hash table.
pub struct HashIndex {
    keys: MappedFile,
    buckets: RecordView<Bucket>,
    values: RecordView<u32>,
}

impl HashIndex {
    pub fn open(keys: &Path, buckets: &Path, values: &Path) -> Result<Self> {
        Self::new(
            MappedFile::open(keys)?,
            RecordView::open(buckets)?,
            RecordView::open(values)?,
        )
    }

    /// Assemble a table from already-mapped parts, checking its shape.
    pub fn new(keys: MappedFile, buckets: RecordView<Bucket>, values: RecordView<u32>) -> Result<Self> {
        let n = buckets.len();
        if n != 0 && !n.is_power_of_two() {
            return Err(ArchiveError::invalid(
                buckets.path(),
                format!("bucket count {n} is not a power of two"),
            ));
        }
        if values.len() != n {
            return Err(ArchiveError::invalid(
                values.path(),
                format!("{} values for {n} buckets", values.len()),
            ));
        }
        Ok(Self {
            keys,
            buckets,
            values,
        })
    }

    /// Number of buckets (occupied or not).
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Value stored for `key`, or `None` if the key was never inserted.
    pub fn search(&self, key: &[u8]) -> Result<Option<u32>> {
        let hash = hash_key(key);
        match self.probe(key, hash)? {
            Some(slot) => self.values.try_get(slot).map(Some),
            None => Ok(None),
        }
    }

    /// Linear probe for `key` whose hash is `hash`. Returns the bucket index
    /// holding it.
    ///
    /// Visits at most `bucket_count()` buckets, so a table without any
    /// empty bucket still terminates.
    pub fn probe(&self, key: &[u8], hash: u32) -> Result<Option<usize>> {
        let n = self.buckets.len();
        if n == 0 {
            return Ok(None);
        }
        let mask = n - 1;
        let mut slot = hash as usize & mask;
        for step in 0..n {
            let bucket = self.buckets.try_get(slot)?;
            if bucket.is_empty() {
                trace!(step, "Hash probe hit empty bucket");
                return Ok(None);
            }
            if bucket.hash == hash && self.stored_key(&bucket)? == key {
                trace!(step, slot, "Hash probe matched");
                return Ok(Some(slot));
            }
            slot = (slot + 1) & mask;
        }
        Ok(None)
    }

    fn stored_key(&self, bucket: &Bucket) -> Result<&[u8]> {
        self.keys
            .cstr_at(bucket.key_offset as usize)
            .ok_or_else(|| {
                ArchiveError::invalid(
                    self.keys.path(),
                    format!("hash bucket points at bad key offset {}", bucket.key_offset),
                )
            })
    }

    /// Every `(key, value)` pair in the table, in bucket order.
    pub fn entries(&self) -> impl Iterator<Item = Result<(&[u8], u32)>> + '_ {
        self.buckets
            .iter()
            .zip(self.values.iter())
            .filter(|(b, _)| !b.is_empty())
            .map(move |(b, v)| self.stored_key(&b).map(|k| (k, v)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::builder::HashTableWriter;

    fn make_index(keys: &[&str], buckets: usize, force_hash: Option<u32>) -> HashIndex {
        let mut source = Vec::new();
        let mut writer = HashTableWriter::with_buckets(buckets);
        for (i, key) in keys.iter().enumerate() {
            let offset = source.len() as u32;
            source.extend_from_slice(key.as_bytes());
            source.push(0);
            let hash = force_hash.unwrap_or_else(|| hash_key(key.as_bytes()));
            writer.insert_hashed(hash, offset, i as u32).unwrap();
        }
        let (buckets, values) = writer.finish();
        HashIndex::new(
            MappedFile::from_bytes("keys", source),
            RecordView::new(MappedFile::from_bytes("hash", buckets)).unwrap(),
            RecordView::new(MappedFile::from_bytes("hashdata", values)).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn test_all_keys_found() {
        let keys = ["<a@x>", "<b@x>", "<c@y>", "<long.message.id@news.example>"];
        let index = make_index(&keys, 8, None);
        for (i, key) in keys.iter().enumerate() {
            assert_eq!(index.search(key.as_bytes()).unwrap(), Some(i as u32));
        }
    }

    #[test]
    fn test_missing_key() {
        let index = make_index(&["one", "two"], 4, None);
        assert_eq!(index.search(b"three").unwrap(), None);
        assert_eq!(index.search(b"").unwrap(), None);
        assert_eq!(index.search(b"on").unwrap(), None);
    }

    #[test]
    fn test_search_is_idempotent() {
        let index = make_index(&["alpha", "beta"], 4, None);
        assert_eq!(index.search(b"beta").unwrap(), index.search(b"beta").unwrap());
    }

    #[test]
    fn test_forced_collisions_resolve_exactly() {
        // Every key shares one hash: only the key bytes tell them apart.
        let keys = ["k0", "k1", "k2", "k3", "k4"];
        let index = make_index(&keys, 8, Some(hash_key(b"k0")));
        for (i, key) in keys.iter().enumerate() {
            let slot = index.probe(key.as_bytes(), hash_key(b"k0")).unwrap();
            assert!(slot.is_some());
            assert_eq!(
                index.values.get(slot.unwrap()),
                Some(i as u32),
                "collision chain for {key}"
            );
        }
        // A colliding key that was never inserted is still not found
        assert_eq!(index.probe(b"k9", hash_key(b"k0")).unwrap(), None);
    }

    #[test]
    fn test_full_table_terminates() {
        let keys = ["a", "b", "c", "d"];
        let index = make_index(&keys, 4, None);
        assert_eq!(index.search(b"zz").unwrap(), None);
        assert_eq!(index.search(b"d").unwrap(), Some(3));
    }

    #[test]
    fn test_empty_table() {
        let index = make_index(&[], 0, None);
        assert_eq!(index.bucket_count(), 0);
        assert_eq!(index.search(b"x").unwrap(), None);
    }

    #[test]
    fn test_bucket_count_must_be_power_of_two() {
        let err = HashIndex::new(
            MappedFile::from_bytes("keys", Vec::new()),
            RecordView::new(MappedFile::from_bytes("hash", vec![0xFF; 3 * 8])).unwrap(),
            RecordView::new(MappedFile::from_bytes("hashdata", vec![0; 3 * 4])).unwrap(),
        )
        .err()
        .unwrap();
        assert!(matches!(err, ArchiveError::InvalidArchive { .. }));
    }

    #[test]
    fn test_values_must_parallel_buckets() {
        let err = HashIndex::new(
            MappedFile::from_bytes("keys", Vec::new()),
            RecordView::new(MappedFile::from_bytes("hash", vec![0xFF; 4 * 8])).unwrap(),
            RecordView::new(MappedFile::from_bytes("hashdata", vec![0; 4])).unwrap(),
        )
        .err()
        .unwrap();
        assert!(matches!(err, ArchiveError::InvalidArchive { .. }));
    }

    #[test]
    fn test_entries() {
        let index = make_index(&["x", "y"], 4, None);
        let mut entries: Vec<(Vec<u8>, u32)> = index
            .entries()
            .map(|e| e.map(|(k, v)| (k.to_vec(), v)).unwrap())
            .collect();
        entries.sort();
        assert_eq!(entries, vec![(b"x".to_vec(), 0), (b"y".to_vec(), 1)]);
    }
}
