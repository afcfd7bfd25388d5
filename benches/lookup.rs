use criterion::{criterion_group, criterion_main, Criterion};
use tempfile::TempDir;

use uatshell::index::builder::{ArchiveBuilder, Dictionary, MessageInput};
use uatshell::Archive;

const MESSAGES: u32 = 5_000;
const WORDS: [&str; 8] = [
    "rust", "usenet", "archive", "thread", "compiler", "borrow", "lifetime", "trait",
];

fn build_archive() -> (TempDir, Archive) {
    let dir = tempfile::tempdir().unwrap();
    let mut b = ArchiveBuilder::new().dictionary(Dictionary::Train { max_size: 16 * 1024 });
    for i in 0..MESSAGES {
        let words: Vec<&str> = WORDS
            .iter()
            .enumerate()
            .filter(|(k, _)| (i as usize + k) % 3 != 0)
            .map(|(_, w)| *w)
            .collect();
        let body = format!(
            "Subject: message {i}\n\nOn Monday someone wrote:\n> quoted {}\n{}\n-- \nsig\n",
            words[0],
            words.join(" ")
        );
        let mut msg = MessageInput::new(format!("<{i}@bench>"), body)
            .from(format!("Poster {} <p{}@bench>", i % 50, i % 50))
            .subject(format!("message {i}"))
            .date(1_000_000_000 + i);
        if i % 5 != 0 {
            msg = msg.reply_to(i - 1);
        }
        b.add(msg);
    }
    b.write(dir.path()).unwrap();
    let archive = Archive::open(dir.path()).unwrap();
    (dir, archive)
}

fn bench_lookup(c: &mut Criterion) {
    let (_dir, archive) = build_archive();
    let ids: Vec<String> = (0..MESSAGES).step_by(97).map(|i| format!("<{i}@bench>")).collect();

    c.bench_function("message_id_lookup", |b| {
        b.iter(|| {
            ids.iter()
                .filter_map(|id| archive.lookup(id.as_bytes()).unwrap())
                .count()
        })
    });
}

fn bench_decompress(c: &mut Criterion) {
    let (_dir, archive) = build_archive();
    let mut ctx = archive.decompressor(0).unwrap();

    c.bench_function("decompress_message", |b| {
        let mut i = 0u32;
        b.iter(|| {
            i = (i + 131) % MESSAGES;
            archive.message(i, &mut ctx).unwrap().len()
        })
    });
}

fn bench_search(c: &mut Criterion) {
    let (_dir, archive) = build_archive();

    c.bench_function("search_two_terms", |b| {
        b.iter(|| archive.search("rust lifetime").unwrap().len())
    });
    c.bench_function("search_ranked_two_terms", |b| {
        b.iter(|| archive.search_ranked("borrow trait").unwrap().len())
    });
}

criterion_group!(benches, bench_lookup, bench_decompress, bench_search);
criterion_main!(benches);
