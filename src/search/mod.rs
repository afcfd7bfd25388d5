//! Full-text search: the lexicon store and the query evaluator.

pub mod lexicon;
pub mod query;

pub use self::lexicon::{HitList, Lexicon, Posting, PostingList, TermId};
pub use self::query::{parse_query, tokenize, SearchHit, SearchQuery};
