//! `uatshell`: a read-only Usenet archive engine.
//!
//! This crate provides the core library for opening memory-mapped archive
//! directories, reading compressed messages, walking reply threads and
//! running full-text searches over the prebuilt lexicon.

pub mod archive;
pub mod config;
pub mod error;
pub mod index;
pub mod model;
pub mod search;
pub mod stats;
pub mod store;
pub mod threading;
pub mod visited;

pub use archive::Archive;
pub use error::{ArchiveError, Result};
