use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BramCategory {
    Ramb18,
    Ramb36,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum BramKind {
    Ramb36E1,
    Ramb18E1 { top: bool },
    Ramb36E2,
}

impl BramKind {
    pub fn primitive(self) -> &'static str {
        match self {
            BramKind::Ramb36E1 => "RAMB36E1",
            BramKind::Ramb18E1 { .. } => "RAMB18E1",
            BramKind::Ramb36E2 => "RAMB36E2",
        }
    }

    pub fn category(self) -> BramCategory {
        match self {
            BramKind::Ramb36E1 | BramKind::Ramb36E2 => BramCategory::Ramb36,
            BramKind::Ramb18E1 { .. } => BramCategory::Ramb18,
        }
    }
}

/// One block RAM tile of a device.
///
/// `offset_bits` is the position of the tile's first frame-data bit relative
/// to the frame-data area of the SLR holding the tile. The internal layout of
/// a tile is identical for every tile of a given primitive; only the start
/// offsets depend on the device geometry.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct BramTile {
    pub kind: BramKind,
    pub x: u32,
    pub y: u32,
    pub slr: usize,
    pub offset_bits: usize,
}

// RAMB36E1/RAMB36E2 tiles are physically organized as 1024 x (32+4) bits;
// a RAMB18E1 macro occupies the lower or upper half of a RAMB36E1 tile.
//
// The bit positions were recovered from logic location files: synthesize a
// design with a single block RAM, generate the bitstream with logic location
// information, and read off where each RAM bit lands. The raw offset tables
// turn out to have a regular structure that collapses into small group
// tables, a per-block scale constant, and shifts.
//
// For RAMB36E1, each 256-bit chunk of data address space occupies one
// configuration frame (block scale 0xCA left-shifted by 4 = 3232 bits, one
// 101-word frame). Logic location excerpt for RAMB36_X0Y0 on an XC7Z020:
//
//   frame bit 0  = BIT0      frame bit 1  = BIT64     frame bit 4 = BIT32
//   frame bit 64 = PARBIT0   frame bit 65 = PARBIT8
//
// which the group tables below reproduce.

const RAMB36E1_GROUP_L: [usize; 16] = [
    0x0, 0x8, 0x4, 0xC, 0x1, 0x9, 0x5, 0xD, 0x2, 0xA, 0x6, 0xE, 0x3, 0xB, 0x7, 0xF,
];

const RAMB36E1_GROUP_H: [usize; 16] = [
    0x00, 0x0B, 0x01, 0x0C, 0x02, 0x0D, 0x03, 0x0E, 0x05, 0x10, 0x06, 0x11, 0x07, 0x12, 0x08, 0x13,
];

const RAMB36E1_GROUP_P: [usize; 2] = [0x4, 0xF];

const RAMB36E1_BLOCK_SCALE: usize = 0xCA;

fn ramb36e1_data_bit(bit: usize) -> usize {
    assert!(bit < 32768, "RAMB36E1 data bit address out of range: {bit}");
    let base = bit / 256 * RAMB36E1_BLOCK_SCALE + RAMB36E1_GROUP_H[bit & 0xF];
    (base << 4) + RAMB36E1_GROUP_L[bit >> 4 & 0xF]
}

fn ramb36e1_parity_bit(bit: usize) -> usize {
    assert!(bit < 4096, "RAMB36E1 parity bit address out of range: {bit}");
    let base = bit / 32 * RAMB36E1_BLOCK_SCALE + RAMB36E1_GROUP_P[bit & 1];
    (base << 4) + RAMB36E1_GROUP_L[bit >> 1 & 0xF]
}

// RAMB36E2 (UltraScale+) follows the same scheme with 128-bit data blocks and
// 16-bit parity blocks on a 0xBA0-bit block scale.

const RAMB36E2_DATA_TABLE: [u16; 128] = [
    0x00, 0x84, 0x0C, 0x90, 0x18, 0x9C, 0x24, 0xA8, 0x3C, 0xC0, 0x48, 0xCC, 0x54, 0xD8, 0x60,
    0xE4, 0x06, 0x8A, 0x12, 0x96, 0x1E, 0xA2, 0x2A, 0xAE, 0x42, 0xC6, 0x4E, 0xD2, 0x5A, 0xDE,
    0x66, 0xEA, 0x03, 0x87, 0x0F, 0x93, 0x1B, 0x9F, 0x27, 0xAB, 0x3F, 0xC3, 0x4B, 0xCF, 0x57,
    0xDB, 0x63, 0xE7, 0x09, 0x8D, 0x15, 0x99, 0x21, 0xA5, 0x2D, 0xB1, 0x45, 0xC9, 0x51, 0xD5,
    0x5D, 0xE1, 0x69, 0xED, 0x02, 0x86, 0x0E, 0x92, 0x1A, 0x9E, 0x26, 0xAA, 0x3E, 0xC2, 0x4A,
    0xCE, 0x56, 0xDA, 0x62, 0xE6, 0x08, 0x8C, 0x14, 0x98, 0x20, 0xA4, 0x2C, 0xB0, 0x44, 0xC8,
    0x50, 0xD4, 0x5C, 0xE0, 0x68, 0xEC, 0x05, 0x89, 0x11, 0x95, 0x1D, 0xA1, 0x29, 0xAD, 0x41,
    0xC5, 0x4D, 0xD1, 0x59, 0xDD, 0x65, 0xE9, 0x0B, 0x8F, 0x17, 0x9B, 0x23, 0xA7, 0x2F, 0xB3,
    0x47, 0xCB, 0x53, 0xD7, 0x5F, 0xE3, 0x6B, 0xEF,
];

const RAMB36E2_PARITY_TABLE: [u16; 16] = [
    0x30, 0xB4, 0x36, 0xBA, 0x33, 0xB7, 0x39, 0xBD, 0x32, 0xB6, 0x38, 0xBC, 0x35, 0xB9, 0x3B,
    0xBF,
];

const RAMB36E2_BLOCK_SCALE: usize = 0xBA0;

fn ramb36e2_data_bit(bit: usize) -> usize {
    assert!(bit < 32768, "RAMB36E2 data bit address out of range: {bit}");
    (bit >> 7) * RAMB36E2_BLOCK_SCALE + RAMB36E2_DATA_TABLE[bit & 0x7F] as usize
}

fn ramb36e2_parity_bit(bit: usize) -> usize {
    assert!(bit < 4096, "RAMB36E2 parity bit address out of range: {bit}");
    (bit >> 4) * RAMB36E2_BLOCK_SCALE + RAMB36E2_PARITY_TABLE[bit & 0xF] as usize
}

impl BramTile {
    pub const fn num_words(&self) -> usize {
        1024
    }

    pub const fn data_bits_per_word(&self) -> usize {
        match self.kind {
            BramKind::Ramb36E1 | BramKind::Ramb36E2 => 32,
            BramKind::Ramb18E1 { .. } => 16,
        }
    }

    pub const fn parity_bits_per_word(&self) -> usize {
        match self.kind {
            BramKind::Ramb36E1 | BramKind::Ramb36E2 => 4,
            // Half of the parent RAMB36E1 parity plane; the top half starts
            // 0x800 parity bits in, so each half carries 2 bits per word.
            BramKind::Ramb18E1 { .. } => 2,
        }
    }

    pub fn category(&self) -> BramCategory {
        self.kind.category()
    }

    /// Total number of bits in the data or parity image of this tile.
    pub const fn image_bits(&self, parity: bool) -> usize {
        if parity {
            self.num_words() * self.parity_bits_per_word()
        } else {
            self.num_words() * self.data_bits_per_word()
        }
    }

    /// Maps a logical bit address of this tile to an absolute bit offset in
    /// the frame-data area of the tile's SLR.
    ///
    /// Frame data is swapped at 32-bit word level in the bitstream; the
    /// returned offset is in pre-swap bit numbering, as consumed by the
    /// bitstream container's frame-data accessors.
    pub fn map_bit(&self, bit: usize, parity: bool) -> usize {
        let rel = match (self.kind, parity) {
            (BramKind::Ramb36E1, false) => ramb36e1_data_bit(bit),
            (BramKind::Ramb36E1, true) => ramb36e1_parity_bit(bit),
            (BramKind::Ramb36E2, false) => ramb36e2_data_bit(bit),
            (BramKind::Ramb36E2, true) => ramb36e2_parity_bit(bit),
            // RAMB18E1 delegates to the enclosing RAMB36E1 layout; the upper
            // half starts 0x4000 data bits / 0x800 parity bits in.
            // TODO: verify the top/bottom half assignment against per-device
            // logic location data; the halves may be twisted.
            (BramKind::Ramb18E1 { top }, false) => {
                ramb36e1_data_bit(bit + if top { 0x4000 } else { 0 })
            }
            (BramKind::Ramb18E1 { top }, true) => {
                ramb36e1_parity_bit(bit + if top { 0x800 } else { 0 })
            }
        };
        self.offset_bits + rel
    }
}

impl std::fmt::Display for BramTile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}_X{}Y{}", self.kind.primitive(), self.x, self.y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn e1_tile() -> BramTile {
        BramTile {
            kind: BramKind::Ramb36E1,
            x: 0,
            y: 0,
            slr: 0,
            offset_bits: 0,
        }
    }

    #[test]
    fn ramb36e1_data_matches_logic_locations() {
        // Spot checks against the logic location excerpt for RAMB36_X0Y0.
        assert_eq!(ramb36e1_data_bit(0), 0);
        assert_eq!(ramb36e1_data_bit(64), 1);
        assert_eq!(ramb36e1_data_bit(128), 2);
        assert_eq!(ramb36e1_data_bit(192), 3);
        assert_eq!(ramb36e1_data_bit(32), 4);
        assert_eq!(ramb36e1_data_bit(96), 5);
        assert_eq!(ramb36e1_data_bit(246), 63);
        assert_eq!(ramb36e1_data_bit(255), 319);
        // Second frame starts one block scale later.
        assert_eq!(ramb36e1_data_bit(256), 0xCA << 4);
        assert_eq!(ramb36e1_data_bit(320), (0xCA << 4) + 1);
    }

    #[test]
    fn ramb36e1_parity_matches_logic_locations() {
        assert_eq!(ramb36e1_parity_bit(0), 64);
        assert_eq!(ramb36e1_parity_bit(8), 65);
        assert_eq!(ramb36e1_parity_bit(32), (0xCA << 4) + 64);
    }

    #[test]
    fn ramb36e1_images_are_disjoint() {
        let mut seen = BTreeSet::new();
        for bit in 0..32768 {
            assert!(seen.insert(ramb36e1_data_bit(bit)), "data bit {bit} collides");
        }
        for bit in 0..4096 {
            assert!(
                seen.insert(ramb36e1_parity_bit(bit)),
                "parity bit {bit} collides with data"
            );
        }
    }

    #[test]
    fn ramb36e2_images_are_disjoint() {
        let mut seen = BTreeSet::new();
        for bit in 0..32768 {
            assert!(seen.insert(ramb36e2_data_bit(bit)), "data bit {bit} collides");
        }
        for bit in 0..4096 {
            assert!(
                seen.insert(ramb36e2_parity_bit(bit)),
                "parity bit {bit} collides with data"
            );
        }
    }

    #[test]
    fn ramb36e2_table_corners() {
        assert_eq!(ramb36e2_data_bit(0), 0);
        assert_eq!(ramb36e2_data_bit(1), 0x84);
        assert_eq!(ramb36e2_data_bit(127), 0xEF);
        assert_eq!(ramb36e2_data_bit(128), 0xBA0);
        assert_eq!(ramb36e2_parity_bit(0), 0x30);
        assert_eq!(ramb36e2_parity_bit(16), 0xBA0 + 0x30);
    }

    #[test]
    fn ramb18_halves_partition_the_parent_data() {
        let parent = e1_tile();
        let bottom = BramTile {
            kind: BramKind::Ramb18E1 { top: false },
            ..parent
        };
        let top = BramTile {
            kind: BramKind::Ramb18E1 { top: true },
            ..parent
        };
        assert_eq!(bottom.map_bit(0, false), parent.map_bit(0, false));
        assert_eq!(top.map_bit(0, false), parent.map_bit(0x4000, false));
        assert_eq!(bottom.image_bits(false), 16384);
        let mut seen = BTreeSet::new();
        for bit in 0..16384 {
            seen.insert(bottom.map_bit(bit, false));
        }
        for bit in 0..16384 {
            assert!(
                seen.insert(top.map_bit(bit, false)),
                "top data bit {bit} collides with bottom half"
            );
        }
    }

    #[test]
    fn tile_offset_is_applied() {
        let tile = BramTile {
            offset_bits: 0x1000,
            ..e1_tile()
        };
        assert_eq!(tile.map_bit(64, false), 0x1000 + 1);
    }

    #[test]
    #[should_panic]
    fn data_domain_is_checked() {
        ramb36e1_data_bit(32768);
    }
}
