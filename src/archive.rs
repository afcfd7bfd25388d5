//! The archive: every store of one directory, opened together.
//!
//! Opening maps each file read-only and checks that the stores agree on
//! the message count; nothing is decoded up front. After that the archive
//! is immutable and can be shared between threads. Per-caller state
//! (decompression buffers, the message cache) lives in a
//! [`Decompressor`] obtained from [`Archive::decompressor`].

use std::borrow::Cow;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::{ArchiveError, Result};
use crate::index::format::{self, REQUIRED_FILES};
use crate::index::hash::HashIndex;
use crate::model::address::Author;
use crate::model::message::{Message, MessageIndex};
use crate::search::lexicon::{Lexicon, LexiconPaths};
use crate::search::query::{self, parse_query, SearchHit};
use crate::store::blocks::{BlockStore, Decompressor};
use crate::store::connectivity::{Connectivity, IndexList};
use crate::store::strings::StringTable;
use crate::threading::ThreadWalker;
use crate::visited::VisitedStore;

/// A read-only archive directory.
pub struct Archive {
    path: PathBuf,
    blocks: BlockStore,
    message_ids: StringTable,
    id_index: HashIndex,
    strings: StringTable,
    conn: Connectivity,
    lexicon: Lexicon,
    name: Option<String>,
    description: Option<String>,
}

impl Archive {
    /// Open the archive in `dir`.
    ///
    /// Fails with `ArchiveNotFound` if the directory does not exist and with
    /// `InvalidArchive` if a required file is missing or the files disagree
    /// about their sizes. Either everything opens or nothing does.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(ArchiveError::ArchiveNotFound(dir.to_path_buf()));
        }
        for name in REQUIRED_FILES {
            let path = dir.join(name);
            if !path.is_file() {
                return Err(ArchiveError::invalid(path, "required file is missing"));
            }
        }
        let file = |name: &str| dir.join(name);

        let blocks = BlockStore::open(
            &file(format::ZMETA),
            &file(format::ZDATA),
            Some(&file(format::ZDICT)),
        )?;
        let message_ids = StringTable::open(&file(format::MIDMETA), &file(format::MIDDATA))?;
        let id_index = HashIndex::open(
            &file(format::MIDDATA),
            &file(format::MIDHASH),
            &file(format::MIDHASHDATA),
        )?;
        let strings = StringTable::open(&file(format::STRMETA), &file(format::STRINGS))?;
        let conn = Connectivity::open(
            &file(format::CONNMETA),
            &file(format::CONNDATA),
            &file(format::TOPLEVEL),
        )?;
        let lexicon = Lexicon::open(LexiconPaths {
            meta: &file(format::LEXMETA),
            strings: &file(format::LEXSTR),
            data: &file(format::LEXDATA),
            hits: &file(format::LEXHIT),
            hash: &file(format::LEXHASH),
            hash_data: &file(format::LEXHASHDATA),
        })?;

        let n = blocks.len();
        let expect = |what: &str, actual: usize, expected: usize| -> Result<()> {
            if actual != expected {
                return Err(ArchiveError::invalid(
                    dir.join(what),
                    format!("holds {actual} entries, expected {expected} for {n} messages"),
                ));
            }
            Ok(())
        };
        expect(format::MIDMETA, message_ids.len(), n)?;
        expect(format::STRMETA, strings.len(), n * 2)?;
        expect(format::CONNMETA, conn.len(), n)?;
        if conn.top_level().len() > n {
            return Err(ArchiveError::invalid(
                file(format::TOPLEVEL),
                format!("{} roots for {n} messages", conn.top_level().len()),
            ));
        }

        let archive = Self {
            path: dir.to_path_buf(),
            blocks,
            message_ids,
            id_index,
            strings,
            conn,
            lexicon,
            name: read_optional(&file(format::NAME))?,
            description: read_optional(&file(format::DESC))?,
        };
        info!(
            path = %dir.display(),
            messages = n,
            roots = archive.conn.top_level().len(),
            terms = archive.lexicon.term_count(),
            "Opened archive"
        );
        Ok(archive)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of messages.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Archive name from the `name` file (e.g. the newsgroup), if present.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Short description from the `desc` file, if present.
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn blocks(&self) -> &BlockStore {
        &self.blocks
    }

    pub fn connectivity(&self) -> &Connectivity {
        &self.conn
    }

    pub fn lexicon(&self) -> &Lexicon {
        &self.lexicon
    }

    fn check(&self, index: MessageIndex) -> Result<()> {
        if index as usize >= self.len() {
            return Err(ArchiveError::out_of_range(index, self.len()));
        }
        Ok(())
    }

    // ── Bodies ──────────────────────────────────────────────────

    /// A decompression context for this archive; `cache_size` decompressed
    /// messages are kept (0 disables caching).
    pub fn decompressor(&self, cache_size: usize) -> Result<Decompressor<'_>> {
        self.blocks.decompressor(cache_size)
    }

    /// Raw text of message `index`, valid until the next use of `ctx`.
    pub fn message<'c>(
        &self,
        index: MessageIndex,
        ctx: &'c mut Decompressor<'_>,
    ) -> Result<&'c [u8]> {
        debug_assert!(
            std::ptr::eq(ctx.store(), &self.blocks),
            "decompressor belongs to another archive"
        );
        ctx.get(index)
    }

    /// Copy every field of message `index` into an owned [`Message`].
    pub fn load(&self, index: MessageIndex, ctx: &mut Decompressor<'_>) -> Result<Message> {
        let from = self.from(index)?.into_owned();
        let real_name = Author::parse(&from).real_name().to_string();
        Ok(Message {
            index,
            message_id: self.message_id(index)?.into_owned(),
            real_name,
            from,
            subject: self.subject(index)?.into_owned(),
            date: self.date(index)?,
            parent: self.parent(index)?,
            children: self.children(index)?.to_vec(),
            body: String::from_utf8_lossy(self.message(index, ctx)?).into_owned(),
        })
    }

    // ── Message-ids ─────────────────────────────────────────────

    /// Index of the message with this message-id, or `None`.
    pub fn lookup(&self, message_id: &[u8]) -> Result<Option<MessageIndex>> {
        match self.id_index.search(message_id)? {
            Some(index) if index as usize >= self.len() => Err(ArchiveError::invalid(
                self.path.join(format::MIDHASHDATA),
                format!("message-id maps to index {index} of {}", self.len()),
            )),
            found => Ok(found),
        }
    }

    pub fn message_id_bytes(&self, index: MessageIndex) -> Result<&[u8]> {
        self.check(index)?;
        self.message_ids.get(index as usize)
    }

    pub fn message_id(&self, index: MessageIndex) -> Result<Cow<'_, str>> {
        self.message_id_bytes(index).map(String::from_utf8_lossy)
    }

    // ── Strings ─────────────────────────────────────────────────

    /// Raw `From:` value.
    pub fn from(&self, index: MessageIndex) -> Result<Cow<'_, str>> {
        self.check(index)?;
        self.strings.get_str(index as usize * 2)
    }

    pub fn subject(&self, index: MessageIndex) -> Result<Cow<'_, str>> {
        self.check(index)?;
        self.strings.get_str(index as usize * 2 + 1)
    }

    /// Display name of the author, or the address if there is no name.
    pub fn real_name(&self, index: MessageIndex) -> Result<String> {
        Ok(Author::parse(&self.from(index)?).real_name().to_string())
    }

    // ── Reply graph ─────────────────────────────────────────────

    pub fn date(&self, index: MessageIndex) -> Result<u32> {
        self.check(index)?;
        self.conn.date(index)
    }

    pub fn parent(&self, index: MessageIndex) -> Result<Option<MessageIndex>> {
        self.check(index)?;
        self.conn.parent(index)
    }

    pub fn children(&self, index: MessageIndex) -> Result<IndexList<'_>> {
        self.check(index)?;
        self.conn.children(index)
    }

    /// Thread roots in import order.
    pub fn top_level(&self) -> IndexList<'_> {
        self.conn.top_level()
    }

    /// Size of the subtree rooted at `index`, counting `index` itself.
    pub fn total_children_count(&self, index: MessageIndex) -> Result<usize> {
        self.check(index)?;
        self.conn.total_children_count(index)
    }

    /// Pre-order walk over the replies below `root`.
    pub fn thread(&self, root: MessageIndex) -> Result<ThreadWalker<'_>> {
        self.check(root)?;
        Ok(ThreadWalker::new(&self.conn, root))
    }

    /// Pre-order walk starting with `root` itself.
    pub fn thread_with_root(&self, root: MessageIndex) -> Result<ThreadWalker<'_>> {
        self.check(root)?;
        Ok(ThreadWalker::including_root(&self.conn, root))
    }

    /// Whether `root` and every reply below it have been visited.
    pub fn is_thread_visited(&self, root: MessageIndex, visited: &dyn VisitedStore) -> Result<bool> {
        for node in self.thread_with_root(root)? {
            if !visited.was_visited(self.message_id_bytes(node?.index)?) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    // ── Search ──────────────────────────────────────────────────

    /// Messages containing every known word of `query`, ascending.
    pub fn search(&self, query: &str) -> Result<Vec<MessageIndex>> {
        let parsed = parse_query(query);
        let result = query::search(&self.lexicon, &parsed)?;
        if let Some(&last) = result.last() {
            self.check_document(last)?;
        }
        Ok(result)
    }

    /// Same matches as [`Archive::search`], best first.
    pub fn search_ranked(&self, query: &str) -> Result<Vec<SearchHit>> {
        let parsed = parse_query(query);
        let hits = query::search_ranked(&self.lexicon, &parsed)?;
        if let Some(max) = hits.iter().map(|h| h.index).max() {
            self.check_document(max)?;
        }
        Ok(hits)
    }

    fn check_document(&self, index: MessageIndex) -> Result<()> {
        if index as usize >= self.len() {
            return Err(ArchiveError::invalid(
                self.path.join(format::LEXDATA),
                format!("posting refers to message {index} of {}", self.len()),
            ));
        }
        Ok(())
    }

    // ── Files ───────────────────────────────────────────────────

    /// Every archive file that exists, with its size in bytes.
    pub fn files(&self) -> Vec<(&'static str, u64)> {
        format::ALL_FILES
            .iter()
            .filter_map(|name| {
                let meta = std::fs::metadata(self.path.join(name)).ok()?;
                Some((*name, meta.len()))
            })
            .collect()
    }

    // ── Verification ────────────────────────────────────────────

    /// Check every message and every posting list.
    ///
    /// Decompresses each message, checks that parent and child links agree,
    /// that `toplevel` lists exactly the messages without a parent, and
    /// that every posting list is sorted. Problems are collected rather than
    /// returned, so one corrupt record does not hide the others.
    /// `progress` receives `(done, total)` over messages then terms.
    pub fn verify(&self, progress: &dyn Fn(usize, usize)) -> Result<VerifyReport> {
        let n = self.len();
        let total = n + self.lexicon.term_count();
        let mut report = VerifyReport {
            messages: n,
            terms: self.lexicon.term_count(),
            problems: Vec::new(),
        };
        let mut ctx = self.decompressor(0)?;

        let mut is_root = vec![false; n];
        for index in 0..n as MessageIndex {
            progress(index as usize, total);
            if let Err(e) = self.message(index, &mut ctx) {
                warn!(index, error = %e, "Message failed to decode");
                report.problems.push(e.to_string());
            }
            let parent = match self.parent(index) {
                Ok(parent) => parent,
                Err(e) => {
                    warn!(index, error = %e, "Connectivity record is unreadable");
                    report.problems.push(e.to_string());
                    continue;
                }
            };
            match parent {
                None => is_root[index as usize] = true,
                Some(p) if p as usize >= n => report
                    .problems
                    .push(format!("message {index}: parent {p} out of range")),
                Some(p) => match self.children(p) {
                    Ok(siblings) if siblings.contains(index) => {}
                    Ok(_) => report
                        .problems
                        .push(format!("message {index}: missing from children of {p}")),
                    Err(e) => report.problems.push(e.to_string()),
                },
            }
            let children = match self.children(index) {
                Ok(children) => children,
                Err(e) => {
                    report.problems.push(e.to_string());
                    continue;
                }
            };
            for child in children.iter() {
                let points_back = child < n as MessageIndex
                    && matches!(self.parent(child), Ok(Some(p)) if p == index);
                if !points_back {
                    report
                        .problems
                        .push(format!("message {index}: child {child} does not point back"));
                }
            }
        }

        let mut listed = vec![false; n];
        for root in self.top_level().iter() {
            match listed.get_mut(root as usize) {
                Some(seen) if !*seen && is_root[root as usize] => *seen = true,
                _ => report
                    .problems
                    .push(format!("top level: {root} is not a unique root")),
            }
        }
        let missing = is_root.iter().zip(&listed).filter(|(r, l)| **r && !**l).count();
        if missing > 0 {
            report
                .problems
                .push(format!("top level: {missing} roots are not listed"));
        }

        for term in 0..self.lexicon.term_count() as u32 {
            progress(n + term as usize, total);
            match self.lexicon.postings(term) {
                Ok(list) if !list.is_sorted() => {
                    report.problems.push(format!("term {term}: postings out of order"))
                }
                Ok(_) => {}
                Err(e) => report.problems.push(e.to_string()),
            }
        }
        progress(total, total);

        debug!(problems = report.problems.len(), "Verification finished");
        Ok(report)
    }
}

/// Outcome of [`Archive::verify`].
#[derive(Debug, Clone, serde::Serialize)]
pub struct VerifyReport {
    pub messages: usize,
    pub terms: usize,
    pub problems: Vec<String>,
}

impl VerifyReport {
    pub fn is_ok(&self) -> bool {
        self.problems.is_empty()
    }
}

fn read_optional(path: &Path) -> Result<Option<String>> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).trim_end().to_string())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(ArchiveError::io(path, e)),
    }
}
