use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use unnamed_entity::{entity_id, EntityVec};

pub mod bram;
mod vup;
mod zynq7;

pub use bram::{BramCategory, BramKind, BramTile};

entity_id! {
    pub id BramId usize;
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum DeviceKind {
    Zynq7,
    VirtexUp,
}

/// Description of one supported FPGA model.
///
/// Devices are immutable and live for the whole process; `by_idcode` hands
/// out references into the catalog built on first use.
#[derive(Clone, Debug)]
pub struct Device {
    pub name: &'static str,
    pub idcode: u32,
    pub kind: DeviceKind,
    /// 32-bit words per configuration frame (101 on 7-series, 93 on
    /// UltraScale+).
    pub words_per_frame: usize,
    pub frames_per_device: usize,
    pub slrs_per_device: usize,
    pub brams36: EntityVec<BramId, BramTile>,
    pub brams18: EntityVec<BramId, BramTile>,
}

impl Device {
    pub(crate) fn new(
        name: &'static str,
        idcode: u32,
        kind: DeviceKind,
        words_per_frame: usize,
        frames_per_device: usize,
        slrs_per_device: usize,
        brams36: Vec<BramTile>,
    ) -> Device {
        // RAMB18E1 macros are the bottom/top halves of the RAMB36E1 tiles;
        // they share the parent's x and frame-area offset.
        let brams18 = brams36
            .iter()
            .flat_map(|parent| {
                [false, true].map(|top| BramTile {
                    kind: BramKind::Ramb18E1 { top },
                    x: parent.x,
                    y: 2 * parent.y + u32::from(top),
                    slr: parent.slr,
                    offset_bits: parent.offset_bits,
                })
            })
            .collect();
        Device {
            name,
            idcode,
            kind,
            words_per_frame,
            frames_per_device,
            slrs_per_device,
            brams36: brams36.into_iter().collect(),
            brams18,
        }
    }

    pub fn matches(&self, idcode: u32) -> bool {
        match self.kind {
            DeviceKind::Zynq7 => idcode == self.idcode,
            // UltraScale+ IDCODEs carry the silicon revision in the top
            // nibble; match on the family/size part only.
            DeviceKind::VirtexUp => idcode & 0x0FFF_FFFF == self.idcode,
        }
    }

    /// Resolves a device by IDCODE; known devices are tried in order, first
    /// match wins.
    pub fn by_idcode(idcode: u32) -> Option<&'static Device> {
        catalog().iter().find(|dev| dev.matches(idcode))
    }

    pub fn frame_bytes(&self) -> usize {
        self.words_per_frame * 4
    }

    pub fn brams(&self, category: BramCategory) -> &EntityVec<BramId, BramTile> {
        match category {
            BramCategory::Ramb36 => &self.brams36,
            BramCategory::Ramb18 => &self.brams18,
        }
    }

    pub fn num_brams(&self, category: BramCategory) -> usize {
        self.brams(category).len()
    }

    pub fn bram(&self, category: BramCategory, id: BramId) -> Option<&BramTile> {
        self.brams(category).get(id)
    }

    pub fn bram_by_loc(&self, category: BramCategory, x: u32, y: u32) -> Option<&BramTile> {
        self.brams(category)
            .values()
            .find(|tile| tile.x == x && tile.y == y)
    }
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name)
    }
}

fn catalog() -> &'static [Device] {
    static CATALOG: OnceLock<Vec<Device>> = OnceLock::new();
    CATALOG.get_or_init(|| {
        let mut devices = zynq7::devices();
        devices.extend(vup::devices());
        devices
    })
}

pub(crate) fn ramb36e1_tiles(table: &[(u32, u32, usize)]) -> Vec<BramTile> {
    table
        .iter()
        .map(|&(x, y, offset_bits)| BramTile {
            kind: BramKind::Ramb36E1,
            x,
            y,
            slr: 0,
            offset_bits,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use unnamed_entity::EntityId;

    #[test]
    fn catalog_resolves_known_idcodes() {
        assert_eq!(Device::by_idcode(0x03722093).unwrap().name, "xc7z010");
        assert_eq!(Device::by_idcode(0x0373B093).unwrap().name, "xc7z015");
        assert_eq!(Device::by_idcode(0x03727093).unwrap().name, "xc7z020");
        assert!(Device::by_idcode(0xDEADBEEF).is_none());
    }

    #[test]
    fn vup_match_ignores_the_revision_nibble() {
        assert_eq!(Device::by_idcode(0x04B31093).unwrap().name, "xcvu9p");
        assert_eq!(Device::by_idcode(0x14B31093).unwrap().name, "xcvu9p");
        // Zynq matching stays exact.
        assert!(Device::by_idcode(0x13722093).is_none());
    }

    #[test]
    fn bram_counts() {
        assert_eq!(
            Device::by_idcode(0x03722093)
                .unwrap()
                .num_brams(BramCategory::Ramb36),
            60
        );
        assert_eq!(
            Device::by_idcode(0x0373B093)
                .unwrap()
                .num_brams(BramCategory::Ramb36),
            95
        );
        let z020 = Device::by_idcode(0x03727093).unwrap();
        assert_eq!(z020.num_brams(BramCategory::Ramb36), 140);
        assert_eq!(z020.num_brams(BramCategory::Ramb18), 280);
    }

    #[test]
    fn loc_and_index_lookups_agree() {
        let dev = Device::by_idcode(0x03722093).unwrap();
        for (id, tile) in dev.brams(BramCategory::Ramb36) {
            let by_loc = dev.bram_by_loc(BramCategory::Ramb36, tile.x, tile.y).unwrap();
            assert_eq!(by_loc, tile);
            assert_eq!(dev.bram(BramCategory::Ramb36, id), Some(tile));
        }
        for (id, tile) in dev.brams(BramCategory::Ramb18) {
            let by_loc = dev.bram_by_loc(BramCategory::Ramb18, tile.x, tile.y).unwrap();
            assert_eq!(by_loc, tile);
            assert_eq!(dev.bram(BramCategory::Ramb18, id), Some(tile));
        }
    }

    #[test]
    fn ramb18_halves_inherit_the_parent() {
        let dev = Device::by_idcode(0x03722093).unwrap();
        for parent in dev.brams36.values() {
            let bottom = dev
                .bram_by_loc(BramCategory::Ramb18, parent.x, 2 * parent.y)
                .unwrap();
            let top = dev
                .bram_by_loc(BramCategory::Ramb18, parent.x, 2 * parent.y + 1)
                .unwrap();
            assert_eq!(bottom.offset_bits, parent.offset_bits);
            assert_eq!(top.offset_bits, parent.offset_bits);
            assert_eq!(bottom.kind, BramKind::Ramb18E1 { top: false });
            assert_eq!(top.kind, BramKind::Ramb18E1 { top: true });
        }
    }

    #[test]
    fn x0y0_offset_of_the_xc7z010() {
        let dev = Device::by_idcode(0x03722093).unwrap();
        let tile = dev.bram_by_loc(BramCategory::Ramb36, 0, 0).unwrap();
        assert_eq!(tile.offset_bits, 0x00EB0AC0);
        assert_eq!(
            dev.bram(BramCategory::Ramb36, BramId::from_idx(0)),
            Some(tile)
        );
    }
}
