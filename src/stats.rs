//! Whole-archive summaries for the `info` command.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::archive::Archive;
use crate::error::Result;
use crate::model::message::timestamp;

/// Summary of an archive's contents.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ArchiveStats {
    pub name: Option<String>,
    pub description: Option<String>,
    pub messages: usize,
    pub threads: usize,
    pub terms: usize,
    pub dictionary: bool,
    /// Oldest and newest message dates.
    pub date_range: Option<(DateTime<Utc>, DateTime<Utc>)>,
    /// Authors with the most messages, by display name.
    pub top_posters: Vec<(String, usize)>,
    /// `(file, bytes)` for every file present.
    pub files: Vec<(&'static str, u64)>,
}

impl ArchiveStats {
    /// Total size of all archive files.
    pub fn total_size(&self) -> u64 {
        self.files.iter().map(|(_, size)| size).sum()
    }
}

/// Scan the metadata of every message. Bodies are not decompressed.
pub fn collect(archive: &Archive, top_n: usize) -> Result<ArchiveStats> {
    let mut dates: Option<(u32, u32)> = None;
    let mut counts: HashMap<String, usize> = HashMap::new();
    for index in 0..archive.len() as u32 {
        let date = archive.date(index)?;
        dates = Some(match dates {
            Some((min, max)) => (min.min(date), max.max(date)),
            None => (date, date),
        });
        *counts.entry(archive.real_name(index)?).or_default() += 1;
    }

    Ok(ArchiveStats {
        name: archive.name().map(str::to_string),
        description: archive.description().map(str::to_string),
        messages: archive.len(),
        threads: archive.top_level().len(),
        terms: archive.lexicon().term_count(),
        dictionary: archive.blocks().has_dictionary(),
        date_range: dates.map(|(min, max)| (timestamp(min), timestamp(max))),
        top_posters: top_posters(counts, top_n),
        files: archive.files(),
    })
}

/// The `n` largest counts, ties broken by name.
fn top_posters(counts: HashMap<String, usize>, n: usize) -> Vec<(String, usize)> {
    let mut sorted: Vec<(String, usize)> = counts.into_iter().collect();
    sorted.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    sorted.truncate(n);
    sorted
}
