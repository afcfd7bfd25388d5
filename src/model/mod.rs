//! Core data model types: messages, authors, and lexicon hits.

pub mod address;
pub mod hit;
pub mod message;
