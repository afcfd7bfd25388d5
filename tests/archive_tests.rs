//! Integration tests: build archives on disk, reopen them, and check the
//! reader against what was written.

use std::collections::BTreeSet;
use std::path::Path;

use proptest::prelude::*;
use tempfile::TempDir;

use uatshell::index::builder::{ArchiveBuilder, Dictionary, MessageInput};
use uatshell::index::format;
use uatshell::visited::{MemoryVisited, VisitedStore};
use uatshell::{Archive, ArchiveError};

const VOCAB: [&str; 6] = ["alpha", "beta", "gamma", "delta", "usenet", "archive"];

/// Deterministic pseudo-random forest with word sets per message.
struct Synthetic {
    parents: Vec<Option<u32>>,
    words: Vec<BTreeSet<&'static str>>,
}

impl Synthetic {
    fn new(n: u32) -> Self {
        let mut state = 0x2545_F491u32;
        let mut next = || {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            state
        };
        let mut parents = Vec::new();
        let mut words = Vec::new();
        for i in 0..n {
            let r = next();
            parents.push(if i == 0 || r % 4 == 0 { None } else { Some(r % i) });
            let mask = next();
            words.push(
                VOCAB
                    .iter()
                    .enumerate()
                    .filter(|(k, _)| mask & (1 << k) != 0)
                    .map(|(_, w)| *w)
                    .collect(),
            );
        }
        Self { parents, words }
    }

    fn build(&self, dir: &Path, dictionary: Dictionary) -> Archive {
        let mut b = ArchiveBuilder::new().dictionary(dictionary);
        for (i, (parent, words)) in self.parents.iter().zip(&self.words).enumerate() {
            let body = format!(
                "m{i} {}\n",
                words.iter().copied().collect::<Vec<_>>().join(" ")
            );
            let mut msg = MessageInput::new(format!("<{i}@test>"), body)
                .from(format!("Poster {} <p{}@test>", i % 7, i % 7))
                .subject(format!("Topic {}", i % 11))
                .date(1_000_000 + i as u32 * 60);
            if let Some(p) = parent {
                msg = msg.reply_to(*p);
            }
            b.add(msg);
        }
        b.write(dir).unwrap();
        Archive::open(dir).unwrap()
    }

    fn brute_force(&self, terms: &[&'static str]) -> Vec<u32> {
        (0..self.words.len() as u32)
            .filter(|&i| terms.iter().all(|t| self.words[i as usize].contains(t)))
            .collect()
    }
}

fn three_message_archive() -> (TempDir, Archive) {
    let dir = tempfile::tempdir().unwrap();
    let mut b = ArchiveBuilder::new();
    let root = b.add(MessageInput::new("<root@x>", "original question"));
    b.add(MessageInput::new("<r1@x>", "> original question\nfirst answer").reply_to(root));
    b.add(MessageInput::new("<r2@x>", "second answer").reply_to(root));
    b.write(dir.path()).unwrap();
    let archive = Archive::open(dir.path()).unwrap();
    (dir, archive)
}

// ─── Reply graph ────────────────────────────────────────────────────

#[test]
fn test_three_message_thread() {
    let (_dir, a) = three_message_archive();
    assert_eq!(a.children(0).unwrap().to_vec(), vec![1, 2]);
    assert_eq!(a.parent(1).unwrap(), Some(0));
    assert_eq!(a.parent(2).unwrap(), Some(0));
    assert_eq!(a.top_level().to_vec(), vec![0]);

    let walked: Vec<(u32, usize)> = a
        .thread(0)
        .unwrap()
        .map(|n| n.map(|n| (n.index, n.depth)).unwrap())
        .collect();
    assert_eq!(walked, vec![(1, 1), (2, 1)]);
}

#[test]
fn test_children_point_back_to_parent() {
    let dir = tempfile::tempdir().unwrap();
    let syn = Synthetic::new(500);
    let a = syn.build(dir.path(), Dictionary::None);

    for m in 0..a.len() as u32 {
        for child in a.children(m).unwrap().iter() {
            assert_eq!(a.parent(child).unwrap(), Some(m));
        }
        if let Some(p) = a.parent(m).unwrap() {
            let siblings = a.children(p).unwrap().to_vec();
            assert_eq!(siblings.iter().filter(|&&c| c == m).count(), 1);
        }
    }
}

#[test]
fn test_top_level_is_exactly_the_roots() {
    let dir = tempfile::tempdir().unwrap();
    let syn = Synthetic::new(300);
    let a = syn.build(dir.path(), Dictionary::None);

    let top = a.top_level().to_vec();
    let unique: BTreeSet<u32> = top.iter().copied().collect();
    assert_eq!(unique.len(), top.len(), "duplicate roots");

    let roots: BTreeSet<u32> = (0..a.len() as u32)
        .filter(|&m| a.parent(m).unwrap().is_none())
        .collect();
    assert_eq!(unique, roots);
    // Import order, not date order
    assert!(top.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn test_threads_cover_every_message_once() {
    let dir = tempfile::tempdir().unwrap();
    let syn = Synthetic::new(400);
    let a = syn.build(dir.path(), Dictionary::None);

    let mut seen = vec![0u32; a.len()];
    for root in a.top_level().iter() {
        let mut size = 0;
        for node in a.thread_with_root(root).unwrap() {
            seen[node.unwrap().index as usize] += 1;
            size += 1;
        }
        assert_eq!(size, a.total_children_count(root).unwrap());
    }
    assert!(seen.iter().all(|&c| c == 1));
}

// ─── Message-id index ───────────────────────────────────────────────

#[test]
fn test_every_message_id_resolves() {
    let dir = tempfile::tempdir().unwrap();
    let syn = Synthetic::new(1000);
    let a = syn.build(dir.path(), Dictionary::None);

    for i in 0..a.len() as u32 {
        let id = format!("<{i}@test>");
        assert_eq!(a.lookup(id.as_bytes()).unwrap(), Some(i));
        assert_eq!(a.message_id(i).unwrap(), id);
    }
    assert_eq!(a.lookup(b"<1000@test>").unwrap(), None);
    assert_eq!(a.lookup(b"").unwrap(), None);
}

// ─── Bodies ─────────────────────────────────────────────────────────

#[test]
fn test_bodies_roundtrip_with_dictionary() {
    let dir = tempfile::tempdir().unwrap();
    let syn = Synthetic::new(200);
    let dict = b"alpha beta gamma delta usenet archive ".repeat(64);
    let a = syn.build(dir.path(), Dictionary::Provided(dict));
    assert!(a.blocks().has_dictionary());
    assert!(dir.path().join(format::ZDICT).exists());

    let mut ctx = a.decompressor(0).unwrap();
    for i in [0u32, 17, 199] {
        let body = String::from_utf8(a.message(i, &mut ctx).unwrap().to_vec()).unwrap();
        assert!(body.starts_with(&format!("m{i} ")));
    }
}

#[test]
fn test_cache_returns_identical_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let a = Synthetic::new(20).build(dir.path(), Dictionary::None);

    let mut cached = a.decompressor(4).unwrap();
    let mut plain = a.decompressor(0).unwrap();
    let first = a.message(3, &mut cached).unwrap().to_vec();
    let again = a.message(3, &mut cached).unwrap().to_vec();
    assert_eq!(first, again);
    assert_eq!(first, a.message(3, &mut plain).unwrap());
    assert_eq!(cached.cached(), 1);

    let mut buf = Vec::new();
    cached.get_into(3, &mut buf).unwrap();
    assert_eq!(buf, first);
}

#[test]
fn test_size_mismatch_is_decode_failure() {
    let dir = tempfile::tempdir().unwrap();
    Synthetic::new(5).build(dir.path(), Dictionary::None);

    // Bump the recorded size of message 1
    let zmeta = dir.path().join(format::ZMETA);
    let mut bytes = std::fs::read(&zmeta).unwrap();
    let at = 16 + 8;
    let size = u32::from_le_bytes(bytes[at..at + 4].try_into().unwrap());
    bytes[at..at + 4].copy_from_slice(&(size + 5).to_le_bytes());
    std::fs::write(&zmeta, bytes).unwrap();

    let a = Archive::open(dir.path()).unwrap();
    let mut ctx = a.decompressor(0).unwrap();
    match a.message(1, &mut ctx) {
        Err(ArchiveError::DecodeFailure { index, .. }) => assert_eq!(index, 1),
        other => panic!("expected DecodeFailure, got {:?}", other.map(<[u8]>::len)),
    }
    // Other messages are unaffected
    assert!(a.message(0, &mut ctx).is_ok());
    assert!(!a.verify(&|_, _| {}).unwrap().is_ok());
}

// ─── Open failures ──────────────────────────────────────────────────

#[test]
fn test_missing_directory() {
    let dir = tempfile::tempdir().unwrap();
    let err = Archive::open(dir.path().join("nope")).err().unwrap();
    assert!(matches!(err, ArchiveError::ArchiveNotFound(_)));
}

#[test]
fn test_each_missing_required_file_fails_open() {
    for name in format::REQUIRED_FILES {
        let (dir, _) = three_message_archive();
        std::fs::remove_file(dir.path().join(name)).unwrap();
        let err = Archive::open(dir.path()).err().unwrap();
        assert!(
            matches!(err, ArchiveError::InvalidArchive { .. }),
            "{name}: {err}"
        );
    }
}

#[test]
fn test_truncated_tables_fail_open() {
    for name in [format::STRMETA, format::MIDMETA, format::CONNMETA, format::ZMETA] {
        let (dir, _) = three_message_archive();
        let path = dir.path().join(name);
        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 1]).unwrap();
        let err = Archive::open(dir.path()).err().unwrap();
        assert!(
            matches!(err, ArchiveError::InvalidArchive { .. }),
            "{name}: {err}"
        );
    }
}

#[test]
fn test_short_string_table_fails_open() {
    let (dir, _) = three_message_archive();
    let path = dir.path().join(format::STRMETA);
    let bytes = std::fs::read(&path).unwrap();
    std::fs::write(&path, &bytes[..bytes.len() - 4]).unwrap();
    assert!(matches!(
        Archive::open(dir.path()),
        Err(ArchiveError::InvalidArchive { .. })
    ));
}

#[test]
fn test_optional_files_may_be_absent() {
    let (dir, a) = three_message_archive();
    assert_eq!(a.name(), None);
    assert!(!dir.path().join(format::ZDICT).exists());
    assert!(!dir.path().join(format::DESC).exists());
}

// ─── Search ─────────────────────────────────────────────────────────

#[test]
fn test_search_matches_brute_force() {
    let dir = tempfile::tempdir().unwrap();
    let syn = Synthetic::new(600);
    let a = syn.build(dir.path(), Dictionary::None);

    for x in VOCAB {
        assert_eq!(a.search(x).unwrap(), syn.brute_force(&[x]), "{x}");
        for y in VOCAB {
            let query = format!("{x} {y}");
            assert_eq!(a.search(&query).unwrap(), syn.brute_force(&[x, y]), "{query}");
        }
    }
    assert_eq!(
        a.search("alpha beta gamma").unwrap(),
        syn.brute_force(&["alpha", "beta", "gamma"])
    );
}

#[test]
fn test_unknown_terms() {
    let (_dir, a) = three_message_archive();
    assert!(a.search("zebra").unwrap().is_empty());
    assert!(a.search("").unwrap().is_empty());
    assert!(a.search("!!! ???").unwrap().is_empty());
    assert_eq!(a.search("answer zebra").unwrap(), vec![1, 2]);
}

#[test]
fn test_ranked_search_prefers_content_over_quotes() {
    let (_dir, a) = three_message_archive();
    // "original question" is content in 0 and quoted in 1
    let hits = a.search_ranked("original question").unwrap();
    let order: Vec<u32> = hits.iter().map(|h| h.index).collect();
    assert_eq!(order, vec![0, 1]);
    assert!(hits[0].score > hits[1].score);
    assert_eq!(hits[0].children_hint, 2);
    assert_eq!(hits[1].children_hint, 0);

    let unranked: BTreeSet<u32> = a.search("original question").unwrap().into_iter().collect();
    assert_eq!(unranked, order.into_iter().collect());
}

#[test]
fn test_posting_lists_are_sorted() {
    let dir = tempfile::tempdir().unwrap();
    let a = Synthetic::new(300).build(dir.path(), Dictionary::None);
    let lexicon = a.lexicon();
    for term in 0..lexicon.term_count() as u32 {
        assert!(lexicon.postings(term).unwrap().is_sorted());
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_intersection_equals_brute_force(
        docs in prop::collection::vec(prop::collection::vec(any::<bool>(), VOCAB.len()), 1..40),
        a in 0usize..VOCAB.len(),
        b in 0usize..VOCAB.len(),
    ) {
        let dir = tempfile::tempdir().unwrap();
        let mut builder = ArchiveBuilder::new();
        let mut sets = Vec::new();
        for (i, present) in docs.iter().enumerate() {
            let words: Vec<&str> = VOCAB
                .iter()
                .zip(present)
                .filter(|(_, p)| **p)
                .map(|(w, _)| *w)
                .collect();
            builder.add(MessageInput::new(format!("<{i}>"), format!("m{i} {}", words.join(" "))));
            sets.push(words);
        }
        builder.write(dir.path()).unwrap();
        let archive = Archive::open(dir.path()).unwrap();

        let expected: Vec<u32> = (0..sets.len() as u32)
            .filter(|&i| sets[i as usize].contains(&VOCAB[a]) && sets[i as usize].contains(&VOCAB[b]))
            .collect();
        let got = archive.search(&format!("{} {}", VOCAB[a], VOCAB[b])).unwrap();
        prop_assert_eq!(got, expected);
    }
}

// ─── Visited state ──────────────────────────────────────────────────

#[test]
fn test_thread_visited() {
    let (_dir, a) = three_message_archive();
    let mut visited = MemoryVisited::new();
    assert!(!a.is_thread_visited(0, &visited).unwrap());

    visited.mark_visited(b"<root@x>").unwrap();
    visited.mark_visited(b"<r1@x>").unwrap();
    assert!(!a.is_thread_visited(0, &visited).unwrap());
    assert!(a.is_thread_visited(1, &visited).unwrap());

    visited.mark_visited(b"<r2@x>").unwrap();
    assert!(a.is_thread_visited(0, &visited).unwrap());
}
