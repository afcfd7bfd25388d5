//! Query tokenization and evaluation over the lexicon.
//!
//! A query is a list of words with implicit AND between them. Words are
//! normalized the same way the lexicon builder normalizes message text:
//! split on anything that is not alphanumeric, then lowercased. Words that
//! are not in the lexicon are dropped; they do not make the query fail.

use serde::Serialize;
use tracing::debug;

use crate::error::Result;
use crate::model::message::MessageIndex;

use super::lexicon::{Lexicon, PostingList, TermId};

/// Split text into normalized terms.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// A parsed query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    /// Normalized terms, duplicates removed, in query order.
    pub terms: Vec<String>,
}

/// Parse a query string. Never fails; an empty string gives an empty query.
pub fn parse_query(input: &str) -> SearchQuery {
    let mut terms: Vec<String> = Vec::new();
    for term in tokenize(input) {
        if !terms.contains(&term) {
            terms.push(term);
        }
    }
    SearchQuery { terms }
}

/// One ranked search result.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SearchHit {
    pub index: MessageIndex,
    /// Sum of the weights of every hit of every matched term.
    pub score: f32,
    /// Child count cached in the posting at build time.
    pub children_hint: u8,
}

/// Resolve query terms to posting lists. Unknown terms are skipped.
pub fn resolve<'a>(lexicon: &'a Lexicon, query: &SearchQuery) -> Result<Vec<PostingList<'a>>> {
    let mut seen: Vec<TermId> = Vec::new();
    let mut lists = Vec::with_capacity(query.terms.len());
    for term in &query.terms {
        match lexicon.lookup(term)? {
            Some(id) if !seen.contains(&id) => {
                seen.push(id);
                let list = lexicon.postings(id)?;
                debug!(term = %term, id, postings = list.len(), "Resolved search term");
                lists.push(list);
            }
            Some(_) => {}
            None => debug!(term = %term, "Search term not in lexicon"),
        }
    }
    Ok(lists)
}

/// For each document common to all lists, its position in every list.
///
/// The shortest list drives the scan and every other list is probed by
/// binary search, so the cost is `O(min_len × terms × log max_len)`.
fn matches(lists: &[PostingList<'_>]) -> Vec<Vec<usize>> {
    let Some(driver) = (0..lists.len()).min_by_key(|&i| lists[i].len()) else {
        return Vec::new();
    };

    let mut out = Vec::new();
    for (pos, doc) in lists[driver].documents().enumerate() {
        let mut positions = Vec::with_capacity(lists.len());
        for (i, list) in lists.iter().enumerate() {
            let found = if i == driver { Some(pos) } else { list.find(doc) };
            match found {
                Some(p) => positions.push(p),
                None => break,
            }
        }
        if positions.len() == lists.len() {
            out.push(positions);
        }
    }
    out
}

/// Documents present in every list, ascending.
pub fn intersect(lists: &[PostingList<'_>]) -> Vec<MessageIndex> {
    let Some(first) = lists.first() else {
        return Vec::new();
    };
    if lists.len() == 1 {
        return first.documents().collect();
    }
    matches(lists)
        .into_iter()
        .filter_map(|positions| first.document(positions[0]))
        .collect()
}

/// Unranked search: documents containing every known query term, ascending.
pub fn search(lexicon: &Lexicon, query: &SearchQuery) -> Result<Vec<MessageIndex>> {
    let lists = resolve(lexicon, query)?;
    let result = intersect(&lists);
    debug!(
        terms = query.terms.len(),
        resolved = lists.len(),
        results = result.len(),
        "Search finished"
    );
    Ok(result)
}

/// Ranked search: same documents as [`search`], ordered by descending score,
/// ties broken by ascending index.
pub fn search_ranked(lexicon: &Lexicon, query: &SearchQuery) -> Result<Vec<SearchHit>> {
    let lists = resolve(lexicon, query)?;
    if lists.is_empty() {
        return Ok(Vec::new());
    }

    let mut hits = Vec::new();
    let rows: Vec<Vec<usize>> = if lists.len() == 1 {
        (0..lists[0].len()).map(|p| vec![p]).collect()
    } else {
        matches(&lists)
    };
    for positions in rows {
        let mut score = 0.0f32;
        let mut hit = None;
        for (list, &pos) in lists.iter().zip(&positions) {
            let posting = list.posting(pos)?;
            score += posting.hits.score();
            hit.get_or_insert((posting.document, posting.children_hint));
        }
        if let Some((index, children_hint)) = hit {
            hits.push(SearchHit {
                index,
                score,
                children_hint,
            });
        }
    }

    hits.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.index.cmp(&b.index)));
    Ok(hits)
}
