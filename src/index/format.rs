//! On-disk archive layout.
//!
//! An archive is a directory of flat little-endian files. Every store is a
//! table of fixed-size records plus a blob they point into:
//!
//! ```text
//! zmeta        [offset: u64][size: u32][compressed_size: u32]   × messages
//! zdata        concatenated zstd frames
//! zdict        zstd dictionary (optional)
//! toplevel     [index: u32]                                     × roots
//! midmeta      [offset: u32]                                    × messages
//! middata      NUL-terminated message-ids
//! midhash      [hash: u32][key_offset: u32]                     × buckets
//! midhashdata  [value: u32]                                     × buckets
//! connmeta     [offset: u32]                                    × messages
//! conndata     [date: u32][parent: i32][count: u32][child: u32 × count] …
//! strmeta      [offset: u32]                                    × 2 × messages
//! strings      NUL-terminated "From" / "Subject" pairs
//! lexmeta      [data_offset: u32][count: u32]                   × terms
//! lexstr       NUL-terminated terms
//! lexdata      [post: u32][hit_offset: u32]                     × postings
//! lexhit       [hit_count: u8][hit: u8 × hit_count] …
//! lexhash      [hash: u32][key_offset: u32]                     × buckets
//! lexhashdata  [value: u32]                                     × buckets
//! name, desc   plain text (optional)
//! ```

use byteorder::{ByteOrder, LittleEndian};

pub const ZMETA: &str = "zmeta";
pub const ZDATA: &str = "zdata";
pub const ZDICT: &str = "zdict";
pub const TOPLEVEL: &str = "toplevel";
pub const MIDMETA: &str = "midmeta";
pub const MIDDATA: &str = "middata";
pub const MIDHASH: &str = "midhash";
pub const MIDHASHDATA: &str = "midhashdata";
pub const CONNMETA: &str = "connmeta";
pub const CONNDATA: &str = "conndata";
pub const STRMETA: &str = "strmeta";
pub const STRINGS: &str = "strings";
pub const LEXMETA: &str = "lexmeta";
pub const LEXSTR: &str = "lexstr";
pub const LEXDATA: &str = "lexdata";
pub const LEXHIT: &str = "lexhit";
pub const LEXHASH: &str = "lexhash";
pub const LEXHASHDATA: &str = "lexhashdata";
pub const NAME: &str = "name";
pub const DESC: &str = "desc";

/// Files that must exist for an archive to open.
pub const REQUIRED_FILES: &[&str] = &[
    ZMETA,
    ZDATA,
    TOPLEVEL,
    MIDMETA,
    MIDDATA,
    MIDHASH,
    MIDHASHDATA,
    CONNMETA,
    CONNDATA,
    STRMETA,
    STRINGS,
    LEXMETA,
    LEXSTR,
    LEXDATA,
    LEXHIT,
    LEXHASH,
    LEXHASHDATA,
];

/// Every file an archive may contain, required or not.
pub const ALL_FILES: &[&str] = &[
    ZMETA,
    ZDATA,
    ZDICT,
    TOPLEVEL,
    MIDMETA,
    MIDDATA,
    MIDHASH,
    MIDHASHDATA,
    CONNMETA,
    CONNDATA,
    STRMETA,
    STRINGS,
    LEXMETA,
    LEXSTR,
    LEXDATA,
    LEXHIT,
    LEXHASH,
    LEXHASHDATA,
    NAME,
    DESC,
];

/// Bucket marker for an unused hash slot.
pub const EMPTY_BUCKET: u32 = u32::MAX;

/// Parent value stored for thread roots.
pub const NO_PARENT: i32 = -1;

/// Size of the fixed `[date][parent][count]` connectivity header.
pub const CONN_HEADER_SIZE: usize = 12;

/// Bits of a posting's `post` word holding the document index.
pub const POST_MASK: u32 = 0x3FFF_FFFF;

/// Shift of the cached child-count hint inside a posting's `post` word.
pub const CHILD_SHIFT: u32 = 30;

/// Largest child-count hint that fits above [`POST_MASK`].
pub const MAX_CHILD_HINT: u8 = 3;

/// A fixed-size little-endian record that can be read out of a mapped table.
pub trait Record: Sized {
    /// Encoded size in bytes.
    const SIZE: usize;

    /// Decode from exactly `SIZE` bytes.
    fn decode(bytes: &[u8]) -> Self;

    /// Append the encoded form to `out`.
    fn encode(&self, out: &mut Vec<u8>);
}

impl Record for u32 {
    const SIZE: usize = 4;

    fn decode(bytes: &[u8]) -> Self {
        LittleEndian::read_u32(bytes)
    }

    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }
}

/// One `zmeta` entry: where a compressed message lives and how big it is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawBlock {
    /// Byte offset of the compressed frame in `zdata`.
    pub offset: u64,
    /// Decompressed length in bytes.
    pub size: u32,
    /// Compressed length in bytes.
    pub compressed_size: u32,
}

impl Record for RawBlock {
    const SIZE: usize = 16;

    fn decode(bytes: &[u8]) -> Self {
        Self {
            offset: LittleEndian::read_u64(&bytes[0..8]),
            size: LittleEndian::read_u32(&bytes[8..12]),
            compressed_size: LittleEndian::read_u32(&bytes[12..16]),
        }
    }

    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.offset.to_le_bytes());
        out.extend_from_slice(&self.size.to_le_bytes());
        out.extend_from_slice(&self.compressed_size.to_le_bytes());
    }
}

/// One hash table bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bucket {
    /// XXH32 of the key, as stored at build time.
    pub hash: u32,
    /// Offset of the NUL-terminated key in the key source file,
    /// or [`EMPTY_BUCKET`].
    pub key_offset: u32,
}

impl Bucket {
    pub const EMPTY: Bucket = Bucket {
        hash: 0,
        key_offset: EMPTY_BUCKET,
    };

    pub fn is_empty(&self) -> bool {
        self.key_offset == EMPTY_BUCKET
    }
}

impl Record for Bucket {
    const SIZE: usize = 8;

    fn decode(bytes: &[u8]) -> Self {
        Self {
            hash: LittleEndian::read_u32(&bytes[0..4]),
            key_offset: LittleEndian::read_u32(&bytes[4..8]),
        }
    }

    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.hash.to_le_bytes());
        out.extend_from_slice(&self.key_offset.to_le_bytes());
    }
}

/// One `lexmeta` entry: the slice of `lexdata` holding a term's postings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TermMeta {
    /// Byte offset into `lexdata`.
    pub data_offset: u32,
    /// Number of postings.
    pub count: u32,
}

impl Record for TermMeta {
    const SIZE: usize = 8;

    fn decode(bytes: &[u8]) -> Self {
        Self {
            data_offset: LittleEndian::read_u32(&bytes[0..4]),
            count: LittleEndian::read_u32(&bytes[4..8]),
        }
    }

    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.data_offset.to_le_bytes());
        out.extend_from_slice(&self.count.to_le_bytes());
    }
}

/// One `lexdata` packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PostPacket {
    /// Document index in the low 30 bits, child-count hint in the top 2.
    pub post: u32,
    /// Byte offset of the hit list in `lexhit`.
    pub hit_offset: u32,
}

impl PostPacket {
    pub fn new(document: u32, children_hint: u8, hit_offset: u32) -> Self {
        let hint = u32::from(children_hint.min(MAX_CHILD_HINT));
        Self {
            post: (document & POST_MASK) | (hint << CHILD_SHIFT),
            hit_offset,
        }
    }

    pub fn document(&self) -> u32 {
        self.post & POST_MASK
    }

    pub fn children_hint(&self) -> u8 {
        (self.post >> CHILD_SHIFT) as u8
    }
}

impl Record for PostPacket {
    const SIZE: usize = 8;

    fn decode(bytes: &[u8]) -> Self {
        Self {
            post: LittleEndian::read_u32(&bytes[0..4]),
            hit_offset: LittleEndian::read_u32(&bytes[4..8]),
        }
    }

    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.post.to_le_bytes());
        out.extend_from_slice(&self.hit_offset.to_le_bytes());
    }
}
