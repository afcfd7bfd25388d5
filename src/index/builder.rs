//! Archive construction.
//!
//! Reading never needs this module. It exists so that tools, benchmarks and
//! tests can produce a complete archive directory from already-extracted
//! messages: it compresses bodies against a shared zstd dictionary, packs
//! the reply graph, builds both hash tables and the lexicon, and writes
//! every file listed in [`crate::index::format`].

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use tracing::{debug, info, warn};

use crate::error::{ArchiveError, Result};
use crate::index::format::{
    self, Bucket, PostPacket, RawBlock, Record, TermMeta, NO_PARENT, POST_MASK,
};
use crate::index::hash::hash_key;
use crate::model::hit::{Hit, HitType};
use crate::model::message::MessageIndex;
use crate::search::query::tokenize;

/// Default zstd level used when packing messages.
pub const DEFAULT_LEVEL: i32 = 16;

/// Default upper bound for a trained dictionary (1 MB).
pub const DEFAULT_DICT_SIZE: usize = 1024 * 1024;

/// Most hits kept per term per message (the count is stored in one byte).
const MAX_HITS: usize = u8::MAX as usize;

/// Writes one open-addressed hash table: buckets plus a parallel value array.
pub struct HashTableWriter {
    buckets: Vec<Bucket>,
    values: Vec<u32>,
    used: usize,
}

impl HashTableWriter {
    /// A table with exactly `n` buckets, rounded up to a power of two.
    pub fn with_buckets(n: usize) -> Self {
        let n = if n == 0 { 0 } else { n.next_power_of_two() };
        Self {
            buckets: vec![Bucket::EMPTY; n],
            values: vec![0; n],
            used: 0,
        }
    }

    /// A table sized for `count` keys at a load factor of at most one half.
    pub fn for_entries(count: usize) -> Self {
        Self::with_buckets(count.saturating_mul(2).max(1))
    }

    /// Insert a key whose bytes live at `key_offset` in the key source file.
    pub fn insert(&mut self, key: &[u8], key_offset: u32, value: u32) -> Result<()> {
        self.insert_hashed(hash_key(key), key_offset, value)
    }

    /// Insert with a precomputed hash.
    pub fn insert_hashed(&mut self, hash: u32, key_offset: u32, value: u32) -> Result<()> {
        let n = self.buckets.len();
        if self.used >= n {
            return Err(ArchiveError::BuildError(format!(
                "hash table with {n} buckets is full"
            )));
        }
        let mask = n - 1;
        let mut slot = hash as usize & mask;
        while !self.buckets[slot].is_empty() {
            slot = (slot + 1) & mask;
        }
        self.buckets[slot] = Bucket { hash, key_offset };
        self.values[slot] = value;
        self.used += 1;
        Ok(())
    }

    /// Encoded `(buckets, values)` files.
    pub fn finish(self) -> (Vec<u8>, Vec<u8>) {
        let mut buckets = Vec::with_capacity(self.buckets.len() * Bucket::SIZE);
        for b in &self.buckets {
            b.encode(&mut buckets);
        }
        let mut values = Vec::with_capacity(self.values.len() * 4);
        for v in &self.values {
            v.encode(&mut values);
        }
        (buckets, values)
    }
}

/// One message to be written, with metadata already extracted.
#[derive(Debug, Clone)]
pub struct MessageInput {
    pub message_id: String,
    pub from: String,
    pub subject: String,
    /// Unix timestamp in seconds.
    pub date: u32,
    /// Index of the message this one replies to.
    pub parent: Option<MessageIndex>,
    /// Full raw message: headers, blank line, body.
    pub body: Vec<u8>,
}

impl MessageInput {
    pub fn new(message_id: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            message_id: message_id.into(),
            from: String::new(),
            subject: String::new(),
            date: 0,
            parent: None,
            body: body.into(),
        }
    }

    pub fn from(mut self, from: impl Into<String>) -> Self {
        self.from = from.into();
        self
    }

    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    pub fn date(mut self, date: u32) -> Self {
        self.date = date;
        self
    }

    pub fn reply_to(mut self, parent: MessageIndex) -> Self {
        self.parent = Some(parent);
        self
    }
}

/// How the shared compression dictionary is obtained.
#[derive(Debug, Clone)]
pub enum Dictionary {
    /// No dictionary; each message is compressed on its own.
    None,
    /// Train one from the messages themselves, up to `max_size` bytes.
    /// Falls back to no dictionary if there are too few samples.
    Train { max_size: usize },
    /// Use the given bytes as a raw-content or trained dictionary.
    Provided(Vec<u8>),
}

/// Summary of a finished build.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct BuildStats {
    pub messages: usize,
    pub roots: usize,
    pub terms: usize,
    pub postings: usize,
    pub compressed_size: u64,
    pub original_size: u64,
    pub dictionary_size: usize,
}

/// Collects messages and writes an archive directory.
pub struct ArchiveBuilder {
    messages: Vec<MessageInput>,
    name: Option<String>,
    description: Option<String>,
    dictionary: Dictionary,
    level: i32,
}

impl Default for ArchiveBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ArchiveBuilder {
    pub fn new() -> Self {
        Self {
            messages: Vec::new(),
            name: None,
            description: None,
            dictionary: Dictionary::None,
            level: DEFAULT_LEVEL,
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn dictionary(mut self, dictionary: Dictionary) -> Self {
        self.dictionary = dictionary;
        self
    }

    pub fn level(mut self, level: i32) -> Self {
        self.level = level;
        self
    }

    /// Append a message; returns the index it will have in the archive.
    pub fn add(&mut self, message: MessageInput) -> MessageIndex {
        self.messages.push(message);
        (self.messages.len() - 1) as MessageIndex
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Write the archive into `dir`, creating it if needed.
    pub fn write(&self, dir: &Path) -> Result<BuildStats> {
        info!(path = %dir.display(), messages = self.messages.len(), "Writing archive");
        std::fs::create_dir_all(dir).map_err(|e| ArchiveError::io(dir, e))?;

        if self.messages.len() > POST_MASK as usize {
            return Err(ArchiveError::BuildError(format!(
                "{} messages exceed the posting format limit of {POST_MASK}",
                self.messages.len()
            )));
        }
        let children = self.check_graph()?;

        let mut stats = BuildStats {
            messages: self.messages.len(),
            ..BuildStats::default()
        };
        self.write_blocks(dir, &mut stats)?;
        self.write_message_ids(dir)?;
        stats.roots = self.write_connectivity(dir, &children)?;
        self.write_strings(dir)?;
        self.write_lexicon(dir, &children, &mut stats)?;

        if let Some(name) = &self.name {
            write_file(dir, format::NAME, name.as_bytes())?;
        }
        if let Some(desc) = &self.description {
            write_file(dir, format::DESC, desc.as_bytes())?;
        }

        info!(
            messages = stats.messages,
            roots = stats.roots,
            terms = stats.terms,
            compressed = stats.compressed_size,
            "Archive written"
        );
        Ok(stats)
    }

    /// Validate parent links and derive child lists in insertion order.
    fn check_graph(&self) -> Result<Vec<Vec<MessageIndex>>> {
        let n = self.messages.len();
        let mut children = vec![Vec::new(); n];
        for (i, msg) in self.messages.iter().enumerate() {
            if let Some(p) = msg.parent {
                if p as usize >= n || p as usize == i {
                    return Err(ArchiveError::BuildError(format!(
                        "message {i} has invalid parent {p}"
                    )));
                }
                children[p as usize].push(i as MessageIndex);
            }
        }

        // Every message must reach a root; anything else is a cycle.
        let mut reaches_root = vec![false; n];
        for start in 0..n {
            let mut path = Vec::new();
            let mut cur = start;
            loop {
                if reaches_root[cur] {
                    break;
                }
                if path.len() > n {
                    return Err(ArchiveError::BuildError(format!(
                        "message {start} is part of a reply cycle"
                    )));
                }
                path.push(cur);
                match self.messages[cur].parent {
                    Some(p) => cur = p as usize,
                    None => break,
                }
            }
            for i in path {
                reaches_root[i] = true;
            }
        }
        Ok(children)
    }

    fn write_blocks(&self, dir: &Path, stats: &mut BuildStats) -> Result<()> {
        let dict = match &self.dictionary {
            Dictionary::None => None,
            Dictionary::Provided(bytes) => Some(bytes.clone()),
            Dictionary::Train { max_size } => {
                let samples: Vec<&[u8]> = self.messages.iter().map(|m| m.body.as_slice()).collect();
                match zstd::dict::from_samples(&samples, *max_size) {
                    Ok(dict) => Some(dict),
                    Err(e) => {
                        warn!(error = %e, "Dictionary training failed; packing without one");
                        None
                    }
                }
            }
        };

        let mut compressor = match &dict {
            Some(d) => zstd::bulk::Compressor::with_dictionary(self.level, d),
            None => zstd::bulk::Compressor::new(self.level),
        }
        .map_err(|e| ArchiveError::BuildError(format!("zstd init: {e}")))?;

        let mut meta = Vec::with_capacity(self.messages.len() * RawBlock::SIZE);
        let mut data = Vec::new();
        for (i, msg) in self.messages.iter().enumerate() {
            let frame = compressor
                .compress(&msg.body)
                .map_err(|e| ArchiveError::BuildError(format!("compressing message {i}: {e}")))?;
            RawBlock {
                offset: data.len() as u64,
                size: to_u32(msg.body.len(), "message size")?,
                compressed_size: to_u32(frame.len(), "compressed size")?,
            }
            .encode(&mut meta);
            stats.original_size += msg.body.len() as u64;
            data.extend_from_slice(&frame);
        }
        stats.compressed_size = data.len() as u64;

        write_file(dir, format::ZMETA, &meta)?;
        write_file(dir, format::ZDATA, &data)?;
        if let Some(d) = &dict {
            stats.dictionary_size = d.len();
            write_file(dir, format::ZDICT, d)?;
        }
        debug!(
            original = stats.original_size,
            compressed = stats.compressed_size,
            dictionary = stats.dictionary_size,
            "Packed message bodies"
        );
        Ok(())
    }

    fn write_message_ids(&self, dir: &Path) -> Result<()> {
        let mut seen: HashMap<&str, usize> = HashMap::with_capacity(self.messages.len());
        let mut meta = Vec::with_capacity(self.messages.len() * 4);
        let mut data = Vec::new();
        let mut hash = HashTableWriter::for_entries(self.messages.len());

        for (i, msg) in self.messages.iter().enumerate() {
            if let Some(prev) = seen.insert(msg.message_id.as_str(), i) {
                return Err(ArchiveError::BuildError(format!(
                    "duplicate message-id '{}' (messages {prev} and {i})",
                    msg.message_id
                )));
            }
            let offset = to_u32(data.len(), "message-id table")?;
            offset.encode(&mut meta);
            push_cstr(&mut data, msg.message_id.as_bytes())?;
            hash.insert(msg.message_id.as_bytes(), offset, i as u32)?;
        }

        let (buckets, values) = hash.finish();
        write_file(dir, format::MIDMETA, &meta)?;
        write_file(dir, format::MIDDATA, &data)?;
        write_file(dir, format::MIDHASH, &buckets)?;
        write_file(dir, format::MIDHASHDATA, &values)
    }

    fn write_connectivity(&self, dir: &Path, children: &[Vec<MessageIndex>]) -> Result<usize> {
        let mut meta = Vec::with_capacity(self.messages.len() * 4);
        let mut data = Vec::new();
        let mut top = Vec::new();
        let mut roots = 0;

        for (i, msg) in self.messages.iter().enumerate() {
            to_u32(data.len(), "connectivity data")?.encode(&mut meta);
            data.extend_from_slice(&msg.date.to_le_bytes());
            let parent = msg.parent.map_or(NO_PARENT, |p| p as i32);
            data.extend_from_slice(&parent.to_le_bytes());
            (children[i].len() as u32).encode(&mut data);
            for c in &children[i] {
                c.encode(&mut data);
            }
            if msg.parent.is_none() {
                (i as u32).encode(&mut top);
                roots += 1;
            }
        }

        write_file(dir, format::CONNMETA, &meta)?;
        write_file(dir, format::CONNDATA, &data)?;
        write_file(dir, format::TOPLEVEL, &top)?;
        Ok(roots)
    }

    fn write_strings(&self, dir: &Path) -> Result<()> {
        let mut meta = Vec::with_capacity(self.messages.len() * 8);
        let mut data = Vec::new();
        for msg in &self.messages {
            for s in [&msg.from, &msg.subject] {
                to_u32(data.len(), "string table")?.encode(&mut meta);
                push_cstr(&mut data, s.as_bytes())?;
            }
        }
        write_file(dir, format::STRMETA, &meta)?;
        write_file(dir, format::STRINGS, &data)
    }

    fn write_lexicon(
        &self,
        dir: &Path,
        children: &[Vec<MessageIndex>],
        stats: &mut BuildStats,
    ) -> Result<()> {
        // Documents are visited in index order, so every list comes out sorted.
        let mut terms: BTreeMap<String, Vec<(MessageIndex, Vec<Hit>)>> = BTreeMap::new();
        for (i, msg) in self.messages.iter().enumerate() {
            let mut per_doc: BTreeMap<String, Vec<Hit>> = BTreeMap::new();
            for (term, hit) in extract_hits(&msg.body) {
                let hits = per_doc.entry(term).or_default();
                if hits.len() < MAX_HITS {
                    hits.push(hit);
                }
            }
            for (term, hits) in per_doc {
                terms.entry(term).or_default().push((i as MessageIndex, hits));
            }
        }

        let mut meta = Vec::with_capacity(terms.len() * TermMeta::SIZE);
        let mut strings = Vec::new();
        let mut data = Vec::new();
        let mut hit_data = Vec::new();
        let mut hash = HashTableWriter::for_entries(terms.len());

        for (id, (term, postings)) in terms.iter().enumerate() {
            let key_offset = to_u32(strings.len(), "lexicon strings")?;
            push_cstr(&mut strings, term.as_bytes())?;
            hash.insert(term.as_bytes(), key_offset, id as u32)?;

            TermMeta {
                data_offset: to_u32(data.len(), "lexicon data")?,
                count: postings.len() as u32,
            }
            .encode(&mut meta);

            for (doc, hits) in postings {
                let hint = children[*doc as usize].len().min(u8::MAX as usize) as u8;
                PostPacket::new(*doc, hint, to_u32(hit_data.len(), "lexicon hits")?)
                    .encode(&mut data);
                hit_data.push(hits.len() as u8);
                hit_data.extend(hits.iter().map(|h| h.encode()));
            }
            stats.postings += postings.len();
        }
        stats.terms = terms.len();

        let (buckets, values) = hash.finish();
        write_file(dir, format::LEXMETA, &meta)?;
        write_file(dir, format::LEXSTR, &strings)?;
        write_file(dir, format::LEXDATA, &data)?;
        write_file(dir, format::LEXHIT, &hit_data)?;
        write_file(dir, format::LEXHASH, &buckets)?;
        write_file(dir, format::LEXHASHDATA, &values)
    }
}

/// Structural context of a line while scanning a message.
fn classify_line(line: &str, in_signature: bool) -> HitType {
    if in_signature {
        return HitType::Signature;
    }
    let depth = line
        .chars()
        .take_while(|c| *c == '>' || *c == ' ')
        .filter(|c| *c == '>')
        .count();
    match depth {
        0 => {
            let trimmed = line.trim_end();
            if trimmed.ends_with("wrote:") || trimmed.ends_with("writes:") {
                HitType::Wrote
            } else {
                HitType::Content
            }
        }
        1 => HitType::Quote1,
        2 => HitType::Quote2,
        _ => HitType::Quote3,
    }
}

/// Every `(term, hit)` in a raw message, in token order.
///
/// Headers end at the first empty line (`\n` or `\r\n` endings). Only
/// the `From:` and `Subject:` headers are indexed (as `Header` hits).
/// In the body, `>` depth selects the quote level, lines ending in
/// `wrote:`/`writes:` are attribution lines, and everything after a `-- `
/// line is signature.
pub fn extract_hits(raw: &[u8]) -> Vec<(String, Hit)> {
    let text = String::from_utf8_lossy(raw);
    let mut lines = text.lines();
    let has_headers = text.lines().any(str::is_empty);

    let mut out = Vec::new();
    let mut position = 0u32;
    let mut push = |line: &str, hit_type: HitType, out: &mut Vec<(String, Hit)>| {
        for term in tokenize(line) {
            out.push((term, Hit::new(hit_type, position)));
            position = position.saturating_add(1);
        }
    };

    if has_headers {
        for line in lines.by_ref().take_while(|line| !line.is_empty()) {
            let lower = line.to_ascii_lowercase();
            if lower.starts_with("subject:") || lower.starts_with("from:") {
                let value = line.split_once(':').map_or("", |(_, v)| v);
                push(value, HitType::Header, &mut out);
            }
        }
    }

    let mut in_signature = false;
    for line in lines {
        if line == "-- " || line == "--" {
            in_signature = true;
            continue;
        }
        let hit_type = classify_line(line, in_signature);
        push(line, hit_type, &mut out);
    }
    out
}

fn to_u32(value: usize, what: &str) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| ArchiveError::BuildError(format!("{what} exceeds 4 GB ({value} bytes)")))
}

fn push_cstr(out: &mut Vec<u8>, s: &[u8]) -> Result<()> {
    if s.contains(&0) {
        return Err(ArchiveError::BuildError(format!(
            "string contains a NUL byte: {}",
            String::from_utf8_lossy(s)
        )));
    }
    out.extend_from_slice(s);
    out.push(0);
    Ok(())
}

fn write_file(dir: &Path, name: &str, bytes: &[u8]) -> Result<()> {
    let path = dir.join(name);
    std::fs::write(&path, bytes).map_err(|e| ArchiveError::io(&path, e))
}
