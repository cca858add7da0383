use bitsmith_xilinx_geom::BramTile;
use bitvec::prelude::*;
use unnamed_entity::EntityId;

use crate::bitstream::Bitstream;
use crate::error::{BitstreamError, Result};
use crate::SlrId;

/// Reads the whole data (or parity) image of a block RAM tile out of a
/// bitstream, packed little-endian bit within byte.
pub fn extract(bs: &Bitstream, tile: &BramTile, parity: bool) -> Result<Vec<u8>> {
    let bit_len = tile.image_bits(parity);
    let slr = SlrId::from_idx(tile.slr);
    let mut image: BitVec<u8, Lsb0> = BitVec::repeat(false, bit_len);
    for i in 0..bit_len {
        let value = bs.frame_data_bit(slr, tile.map_bit(i, parity))?;
        image.set(i, value);
    }
    Ok(image.into_vec())
}

/// Writes a data (or parity) image into the block RAM tile's bits of a
/// bitstream; the inverse of [`extract`].
pub fn inject(bs: &mut Bitstream, tile: &BramTile, parity: bool, data: &[u8]) -> Result<()> {
    let bit_len = tile.image_bits(parity);
    let expected = bit_len / 8;
    if data.len() != expected {
        return Err(BitstreamError::BramSizeMismatch {
            expected,
            actual: data.len(),
        });
    }
    let slr = SlrId::from_idx(tile.slr);
    let bits = data.view_bits::<Lsb0>();
    for i in 0..bit_len {
        bs.set_frame_data_bit(slr, tile.map_bit(i, parity), bits[i])?;
    }
    Ok(())
}
