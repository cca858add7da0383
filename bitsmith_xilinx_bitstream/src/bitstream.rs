use std::io::Write;
use std::path::Path;

use bitsmith_xilinx_geom::Device;
use log::debug;
use serde::{Deserialize, Serialize};
use unnamed_entity::EntityVec;

use crate::error::{BitstreamError, Result};
use crate::packet::{Packet, PacketOp, PacketParser, Step};
use crate::{Reg, SlrId};

/// Header word of a 1-word CRC register write; CRC stripping rewrites this
/// packet into two NOPs.
const CRC_WRITE_HDR: u32 = 0x3000_0001;
const NOP_HDR: u32 = 0x2000_0000;

/// Location of one SLR's data inside the bitstream buffer.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct SlrInfo {
    /// Byte offset of the first packet header behind the sync word; `None`
    /// for raw readback overlays, which have no packet structure.
    pub sync_offset: Option<usize>,
    /// Absolute byte offset of the SLR's frame data.
    pub frame_data_offset: usize,
    /// Size of the frame data in bytes; always a multiple of 4.
    pub frame_data_size: usize,
    pub idcode: Option<u32>,
}

/// Identity of a packet visited by [`Bitstream::edit_packets`].
#[derive(Clone, Copy, Debug)]
pub struct PacketSpan {
    pub hdr: u32,
    pub op: PacketOp,
    pub reg: Reg,
    /// Absolute byte offset of the packet header.
    pub offset: usize,
    /// Packet length in bytes, headers and payload.
    pub len: usize,
    /// Sub-stream index the packet belongs to.
    pub stream: usize,
}

/// An in-memory configuration bitstream (or readback stream).
///
/// The container owns the raw bytes and knows, per SLR, where the frame
/// data lives. The prelude (header, dummy padding, bus width detection
/// markers) is preserved verbatim so that saving an unmodified bitstream
/// reproduces the input byte for byte.
#[derive(Clone, Debug)]
pub struct Bitstream {
    data: Vec<u8>,
    slrs: EntityVec<SlrId, SlrInfo>,
    is_readback: bool,
}

/// Per sub-stream scratch state of the first scan pass.
#[derive(Clone, Debug, Default)]
struct SubStream {
    sync_offset: Option<usize>,
    frame_data_offset: usize,
    frame_data_size: usize,
    idcode: Option<u32>,
}

impl Bitstream {
    /// Loads a bitstream from a file. `expected_idcode` asserts the main
    /// IDCODE; `accept_readback` allows FDRO (readback) streams.
    pub fn load(
        path: impl AsRef<Path>,
        expected_idcode: Option<u32>,
        accept_readback: bool,
    ) -> Result<Bitstream> {
        Self::parse(std::fs::read(path)?, expected_idcode, accept_readback)
    }

    /// Parses an in-memory bitstream.
    ///
    /// Pass 1 walks all sub-streams (separated by fresh sync words or by
    /// writes to the SLR-switch register) and records per sub-stream the
    /// sync offset, the IDCODE, and the payload range of the first FDRI or
    /// FDRO packet. Pass 2 retains the sub-streams that carry frame data as
    /// the SLR list, in configuration order.
    pub fn parse(
        data: Vec<u8>,
        expected_idcode: Option<u32>,
        accept_readback: bool,
    ) -> Result<Bitstream> {
        let mut subs: Vec<SubStream> = Vec::new();
        let mut is_readback = false;
        let mut have_frame_data = false;
        let mut main_idcode: Option<u32> = None;

        Self::scan(&data, |pkt, stream| {
            if stream >= subs.len() {
                subs.resize_with(stream + 1, SubStream::default);
            }
            let sub = &mut subs[stream];
            if sub.sync_offset.is_none() {
                sub.sync_offset = Some(pkt.offset);
            }
            if pkt.op == PacketOp::Write && pkt.reg == Reg::Idcode && !pkt.payload.is_empty() {
                let idcode = pkt.word(0);
                if let Some(prev) = sub.idcode {
                    if prev != idcode {
                        return Err(BitstreamError::IdcodeMismatch {
                            expected: prev,
                            found: idcode,
                        });
                    }
                }
                sub.idcode = Some(idcode);
                main_idcode.get_or_insert(idcode);
            } else if pkt.op == PacketOp::Write && pkt.reg == Reg::Fdri && !pkt.payload.is_empty()
            {
                if sub.frame_data_size > 0 {
                    return Err(BitstreamError::MalformedBitstream {
                        offset: pkt.offset,
                        reason: "multiple FDRI writes in one sub-stream (compressed bitstream?)",
                    });
                }
                if have_frame_data && is_readback {
                    return Err(BitstreamError::MalformedBitstream {
                        offset: pkt.offset,
                        reason: "mix of FDRI and FDRO frame data in one bitstream",
                    });
                }
                sub.frame_data_offset = pkt.payload_offset;
                sub.frame_data_size = pkt.payload.len();
                is_readback = false;
                have_frame_data = true;
            } else if pkt.op == PacketOp::Read && pkt.reg == Reg::Fdro && !pkt.payload.is_empty()
            {
                // Readback streams (*.rbb) carry their captured frame data
                // as the payload of an FDRO read packet.
                if !accept_readback {
                    return Err(BitstreamError::UnsupportedBitstream {
                        reason: "unexpected readback (FDRO) bitstream",
                    });
                }
                if sub.frame_data_size > 0 {
                    return Err(BitstreamError::MalformedBitstream {
                        offset: pkt.offset,
                        reason: "multiple FDRO reads in one sub-stream",
                    });
                }
                if have_frame_data && !is_readback {
                    return Err(BitstreamError::MalformedBitstream {
                        offset: pkt.offset,
                        reason: "mix of FDRI and FDRO frame data in one bitstream",
                    });
                }
                // The capture starts with a device-specific pipeline plus one
                // padding frame; skip it so that readback and configuration
                // streams expose frame data uniformly. The main SLR's IDCODE
                // identifies the whole device.
                let idcode = main_idcode.unwrap_or(0xFFFF_FFFF);
                let device = Device::by_idcode(idcode)
                    .ok_or(BitstreamError::UnknownDevice { idcode })?;
                let padding = device.frame_bytes();
                if pkt.payload.len() < padding {
                    return Err(BitstreamError::MalformedBitstream {
                        offset: pkt.offset,
                        reason: "readback frame data smaller than the padding frame",
                    });
                }
                debug!("readback stream: stripping {padding:#x} padding bytes");
                sub.frame_data_offset = pkt.payload_offset + padding;
                sub.frame_data_size = pkt.payload.len() - padding;
                is_readback = true;
                have_frame_data = true;
            }
            Ok(())
        })?;

        if let (Some(expected), Some(found)) = (expected_idcode, main_idcode) {
            if expected != found {
                return Err(BitstreamError::IdcodeMismatch { expected, found });
            }
        }

        let slrs: EntityVec<SlrId, SlrInfo> = subs
            .into_iter()
            .filter(|sub| sub.frame_data_size > 0)
            .map(|sub| SlrInfo {
                sync_offset: sub.sync_offset,
                frame_data_offset: sub.frame_data_offset,
                frame_data_size: sub.frame_data_size,
                idcode: sub.idcode,
            })
            .collect();
        if slrs.is_empty() {
            return Err(BitstreamError::UnsupportedBitstream {
                reason: "bitstream did not contain any frame data",
            });
        }
        debug!(
            "parsed bitstream: {n} SLRs, readback: {is_readback}",
            n = slrs.len()
        );
        Ok(Bitstream {
            data,
            slrs,
            is_readback,
        })
    }

    /// Overlays the SLR layout of `reference` over a raw readback image
    /// (the output of `readback_hw_device -bin_file`): frame data only,
    /// packed back to back, without any packet structure.
    pub fn parse_raw(data: Vec<u8>, reference: &Bitstream) -> Result<Bitstream> {
        let mut slrs: EntityVec<SlrId, SlrInfo> = EntityVec::new();
        if reference.is_readback {
            // The reference already describes plain frame data ranges.
            for info in reference.slrs.values() {
                slrs.push(info.clone());
            }
        } else {
            let total: usize = reference.slrs.values().map(|s| s.frame_data_size).sum();
            if total > data.len() || total < 4 {
                return Err(BitstreamError::MalformedBitstream {
                    offset: 0,
                    reason: "frame data of the reference bitstream exceeds the readback image",
                });
            }
            let mut offset = 0;
            for info in reference.slrs.values() {
                slrs.push(SlrInfo {
                    sync_offset: None,
                    frame_data_offset: offset,
                    frame_data_size: info.frame_data_size,
                    idcode: info.idcode,
                });
                offset += info.frame_data_size;
            }
        }
        Ok(Bitstream {
            data,
            slrs,
            is_readback: true,
        })
    }

    /// Walks every packet of every sub-stream. The callback receives the
    /// packet and the index of the sub-stream it belongs to.
    fn scan<F>(data: &[u8], mut f: F) -> Result<()>
    where
        F: FnMut(&Packet<'_>, usize) -> Result<()>,
    {
        let mut parser = PacketParser::new(data, 0);
        let mut stream = 0;
        'streams: loop {
            if parser.synchronize().is_none() {
                if stream == 0 {
                    return Err(BitstreamError::UnsynchronizedStream { offset: 0 });
                }
                return Ok(());
            }
            loop {
                match parser.step()? {
                    Step::End => return Ok(()),
                    Step::Resync => {
                        // A fresh sync word starts the next sub-stream.
                        stream += 1;
                        continue 'streams;
                    }
                    Step::Packet(pkt) => {
                        f(&pkt, stream)?;
                        if pkt.op == PacketOp::Write
                            && pkt.reg == Reg::NextSlr
                            && !pkt.payload.is_empty()
                        {
                            // The write to the SLR-switch register wraps the
                            // next sub-stream; descend into the payload.
                            stream += 1;
                            parser.seek(pkt.payload_offset);
                            continue 'streams;
                        }
                    }
                }
            }
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    pub fn slrs(&self) -> &EntityVec<SlrId, SlrInfo> {
        &self.slrs
    }

    pub fn slr(&self, slr: SlrId) -> &SlrInfo {
        &self.slrs[slr]
    }

    pub fn is_readback(&self) -> bool {
        self.is_readback
    }

    /// IDCODE of the main (first) SLR.
    pub fn idcode(&self) -> Option<u32> {
        self.slrs.values().next().and_then(|slr| slr.idcode)
    }

    /// Device model resolved from the main IDCODE.
    pub fn device(&self) -> Result<&'static Device> {
        let idcode = self.idcode().unwrap_or(0xFFFF_FFFF);
        Device::by_idcode(idcode).ok_or(BitstreamError::UnknownDevice { idcode })
    }

    // Frame data (e.g. BRAM content) is stored with a byte swap at 32-bit
    // word level relative to the bit numbering used by the BRAM offset
    // tables.
    fn swap_frame_data_offset(byte: usize) -> usize {
        (byte & !3) + (3 - (byte & 3))
    }

    fn frame_data_byte(&self, slr: SlrId, bit_offset: usize) -> Result<usize> {
        let info = &self.slrs[slr];
        let byte = Self::swap_frame_data_offset(bit_offset / 8);
        if byte >= info.frame_data_size {
            return Err(BitstreamError::FrameDataOutOfRange {
                offset: byte,
                size: info.frame_data_size,
            });
        }
        Ok(info.frame_data_offset + byte)
    }

    /// Reads one bit of an SLR's frame data, in logical (pre-swap) bit
    /// numbering.
    pub fn frame_data_bit(&self, slr: SlrId, bit_offset: usize) -> Result<bool> {
        let byte = self.frame_data_byte(slr, bit_offset)?;
        Ok(self.data[byte] >> (bit_offset % 8) & 1 != 0)
    }

    /// Writes one bit of an SLR's frame data, in logical (pre-swap) bit
    /// numbering.
    pub fn set_frame_data_bit(&mut self, slr: SlrId, bit_offset: usize, value: bool) -> Result<()> {
        let byte = self.frame_data_byte(slr, bit_offset)?;
        if value {
            self.data[byte] |= 1 << (bit_offset % 8);
        } else {
            self.data[byte] &= !(1 << (bit_offset % 8));
        }
        Ok(())
    }

    /// Re-runs the packet scan and hands out each packet's bytes (headers
    /// included) for in-place editing. The scan happens up front, so edits
    /// cannot confuse the packet walk.
    pub fn edit_packets<F>(&mut self, mut f: F) -> Result<()>
    where
        F: FnMut(&PacketSpan, &mut [u8]) -> Result<()>,
    {
        let mut spans = Vec::new();
        Self::scan(&self.data, |pkt, stream| {
            spans.push(PacketSpan {
                hdr: pkt.hdr,
                op: pkt.op,
                reg: pkt.reg,
                offset: pkt.offset,
                len: pkt.len_bytes(),
                stream,
            });
            Ok(())
        })?;
        for span in &spans {
            f(span, &mut self.data[span.offset..span.offset + span.len])?;
        }
        Ok(())
    }

    /// Rewrites every CRC check command into two NOPs. The packet layout is
    /// unchanged, so the result stays loadable; stripping twice is a no-op.
    pub fn strip_crc_checks(&mut self) -> Result<()> {
        self.edit_packets(|span, bytes| {
            if span.hdr == CRC_WRITE_HDR {
                bytes[..4].copy_from_slice(&NOP_HDR.to_be_bytes());
                bytes[4..].copy_from_slice(&NOP_HDR.to_be_bytes());
            }
            Ok(())
        })
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        Ok(std::fs::write(path, &self.data)?)
    }

    pub fn write_to(&self, w: &mut impl Write) -> Result<()> {
        Ok(w.write_all(&self.data)?)
    }

    /// Writes the frame data of all SLRs back to back, as a simulated
    /// readback capture.
    ///
    /// TODO: emit the device-specific pipeline words and the padding frame
    /// that the corresponding device strips on import.
    pub fn write_readback_to(&self, w: &mut impl Write) -> Result<()> {
        for info in self.slrs.values() {
            w.write_all(&self.data[info.frame_data_offset..][..info.frame_data_size])?;
        }
        Ok(())
    }

    pub fn save_as_readback(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = std::fs::File::create(path)?;
        self.write_readback_to(&mut file)
    }
}
