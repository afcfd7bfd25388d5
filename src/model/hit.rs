//! Lexicon hit types and the one-byte hit encoding.
//!
//! Every occurrence of a term in a message is stored as a single byte: a
//! high-bit-justified type tag of 1 to 5 bits followed by a saturated
//! position in the remaining low bits. The table below is a closed format
//! with no version field; it must not change.
//!
//! ```text
//! type       weight  tag        position mask
//! Content    1.0     0000 0000  0111 1111
//! Signature  0.5     1110 0000  0001 1111
//! Quote1     0.7     1000 0000  0001 1111
//! Quote2     0.5     1010 0000  0001 1111
//! Quote3     0.3     1100 0000  0000 1111
//! Header     0.1     1111 0000  0000 0111
//! Wrote      0.05    1111 1000  0000 0111
//! ```
//!
//! Decoding tries the longest tags first. Bytes `0xF0..=0xFF` therefore
//! belong to `Header`/`Wrote`, which caps usable `Signature` positions at
//! `0x0F` even though its mask is `0x1F`. Bytes `0xD0..=0xDF` are unassigned.

use serde::Serialize;

/// Structural category of a term occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[repr(u8)]
pub enum HitType {
    Content = 0,
    Signature = 1,
    Quote1 = 2,
    Quote2 = 3,
    Quote3 = 4,
    Header = 5,
    Wrote = 6,
}

struct HitTypeInfo {
    name: &'static str,
    weight: f32,
    tag: u8,
    mask: u8,
}

const TABLE: [HitTypeInfo; HitType::COUNT] = [
    HitTypeInfo { name: "Content", weight: 1.0, tag: 0x00, mask: 0x7F },
    HitTypeInfo { name: "Signature", weight: 0.5, tag: 0xE0, mask: 0x1F },
    HitTypeInfo { name: "Quote1", weight: 0.7, tag: 0x80, mask: 0x1F },
    HitTypeInfo { name: "Quote2", weight: 0.5, tag: 0xA0, mask: 0x1F },
    HitTypeInfo { name: "Quote3", weight: 0.3, tag: 0xC0, mask: 0x0F },
    HitTypeInfo { name: "Header", weight: 0.1, tag: 0xF0, mask: 0x07 },
    HitTypeInfo { name: "Wrote", weight: 0.05, tag: 0xF8, mask: 0x07 },
];

/// Types ordered by descending tag width.
const DECODE_ORDER: [HitType; HitType::COUNT] = [
    HitType::Header,
    HitType::Wrote,
    HitType::Quote3,
    HitType::Signature,
    HitType::Quote1,
    HitType::Quote2,
    HitType::Content,
];

const MAX_POSITION: [u8; HitType::COUNT] = {
    let mut out = [0u8; HitType::COUNT];
    let mut i = 0;
    while i < HitType::COUNT {
        out[i] = max_decodable_position(HitType::ALL[i]);
        i += 1;
    }
    out
};

impl HitType {
    pub const COUNT: usize = 7;

    /// All types in table order.
    pub const ALL: [HitType; HitType::COUNT] = [
        HitType::Content,
        HitType::Signature,
        HitType::Quote1,
        HitType::Quote2,
        HitType::Quote3,
        HitType::Header,
        HitType::Wrote,
    ];

    pub fn name(self) -> &'static str {
        TABLE[self as usize].name
    }

    /// Relevance weight used for ranking. Never used for filtering.
    pub fn weight(self) -> f32 {
        TABLE[self as usize].weight
    }

    /// Tag bits, high-bit-justified.
    pub const fn tag(self) -> u8 {
        TABLE[self as usize].tag
    }

    /// Mask of the bits left for the position.
    pub const fn position_mask(self) -> u8 {
        TABLE[self as usize].mask
    }

    /// Number of high bits taken by the tag.
    pub const fn tag_width(self) -> u32 {
        8 - self.position_mask().count_ones()
    }

    /// Largest position that survives an encode/decode round trip.
    pub const fn max_position(self) -> u8 {
        MAX_POSITION[self as usize]
    }

    /// Type encoded in a hit byte, or `None` for an unassigned byte.
    pub const fn decode(byte: u8) -> Option<HitType> {
        let mut i = 0;
        while i < DECODE_ORDER.len() {
            let t = DECODE_ORDER[i];
            if byte & !t.position_mask() == t.tag() {
                return Some(t);
            }
            i += 1;
        }
        None
    }
}

const fn max_decodable_position(t: HitType) -> u8 {
    let mut p = t.position_mask();
    loop {
        if let Some(d) = HitType::decode(t.tag() | p) {
            if d as u8 == t as u8 {
                return p;
            }
        }
        if p == 0 {
            return 0;
        }
        p -= 1;
    }
}

impl std::fmt::Display for HitType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// One occurrence of a term inside a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Hit {
    pub hit_type: HitType,
    /// Saturated position in the message's token stream.
    pub position: u8,
}

impl Hit {
    /// Build a hit, saturating `position` at the type's maximum.
    pub fn new(hit_type: HitType, position: u32) -> Self {
        let max = hit_type.max_position();
        Self {
            hit_type,
            position: position.min(u32::from(max)) as u8,
        }
    }

    pub fn encode(self) -> u8 {
        self.hit_type.tag() | self.position
    }

    /// Decode a hit byte, or `None` for an unassigned byte.
    pub fn decode(byte: u8) -> Option<Self> {
        HitType::decode(byte).map(|hit_type| Self {
            hit_type,
            position: byte & hit_type.position_mask(),
        })
    }

    pub fn weight(self) -> f32 {
        self.hit_type.weight()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_is_exact() {
        let expected: [(&str, f32, u8, u8); 7] = [
            ("Content", 1.0, 0x00, 0x7F),
            ("Signature", 0.5, 0xE0, 0x1F),
            ("Quote1", 0.7, 0x80, 0x1F),
            ("Quote2", 0.5, 0xA0, 0x1F),
            ("Quote3", 0.3, 0xC0, 0x0F),
            ("Header", 0.1, 0xF0, 0x07),
            ("Wrote", 0.05, 0xF8, 0x07),
        ];
        for (t, (name, weight, tag, mask)) in HitType::ALL.iter().zip(expected) {
            assert_eq!(t.name(), name);
            assert_eq!(t.weight(), weight);
            assert_eq!(t.tag(), tag);
            assert_eq!(t.position_mask(), mask);
        }
    }

    #[test]
    fn test_tag_widths() {
        let widths: Vec<u32> = HitType::ALL.iter().map(|t| t.tag_width()).collect();
        assert_eq!(widths, vec![1, 3, 3, 3, 4, 5, 5]);
    }

    #[test]
    fn test_quote2_roundtrip() {
        let hit = Hit::new(HitType::Quote2, 5);
        assert_eq!(hit.encode(), 0xA5);
        assert_eq!(Hit::decode(hit.encode()), Some(hit));
    }

    #[test]
    fn test_boundary_positions_all_types() {
        for t in HitType::ALL {
            for pos in [0u32, u32::from(t.max_position())] {
                let hit = Hit::new(t, pos);
                let decoded = Hit::decode(hit.encode()).expect("assigned byte");
                assert_eq!(decoded.hit_type, t, "type for {t} at {pos}");
                assert_eq!(u32::from(decoded.position), pos, "position for {t}");
            }
        }
    }

    #[test]
    fn test_max_positions() {
        let max: Vec<u8> = HitType::ALL.iter().map(|t| t.max_position()).collect();
        assert_eq!(max, vec![0x7F, 0x0F, 0x1F, 0x1F, 0x0F, 0x07, 0x07]);
    }

    #[test]
    fn test_position_saturates() {
        let hit = Hit::new(HitType::Content, 1000);
        assert_eq!(hit.position, 0x7F);
        let hit = Hit::new(HitType::Signature, 31);
        assert_eq!(Hit::decode(hit.encode()).unwrap().hit_type, HitType::Signature);
    }

    #[test]
    fn test_every_byte_decodes_consistently() {
        for byte in 0..=255u8 {
            match Hit::decode(byte) {
                Some(hit) => assert_eq!(hit.encode(), byte),
                None => assert!((0xD0..=0xDF).contains(&byte), "byte {byte:#x}"),
            }
        }
    }
}
