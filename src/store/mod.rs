//! Memory-mapped stores: compressed bodies, strings, and the reply graph.

pub mod blocks;
pub mod connectivity;
pub mod mapped;
pub mod strings;
