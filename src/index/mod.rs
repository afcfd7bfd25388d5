//! On-disk layout, hash tables, and the archive writer.

pub mod builder;
pub mod format;
pub mod hash;
