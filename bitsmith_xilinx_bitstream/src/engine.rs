use crate::error::{BitstreamError, Result};
use crate::packet::{Packet, PacketOp, PacketParser, Step};

/// Continue/stop discriminator returned by packet callbacks.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Flow {
    Continue,
    Stop,
}

/// Callback surface of the raw packet engine.
///
/// Implementors override the operations they care about; by default write
/// and nop packets are discarded, read and reserved packets stop the scan.
#[allow(unused_variables)]
pub trait PacketVisitor {
    fn on_write(&mut self, pkt: &Packet<'_>) -> Result<Flow> {
        Ok(Flow::Continue)
    }

    fn on_read(&mut self, pkt: &Packet<'_>) -> Result<Flow> {
        Ok(Flow::Stop)
    }

    fn on_nop(&mut self, pkt: &Packet<'_>) -> Result<Flow> {
        Ok(Flow::Continue)
    }

    fn on_reserved(&mut self, pkt: &Packet<'_>) -> Result<Flow> {
        Ok(Flow::Stop)
    }
}

/// Feeds a configuration stream through a [`PacketVisitor`].
///
/// `base` is the absolute offset of `data` in the backing store (reported in
/// packet offsets and errors). With `synced` the leading sync scan is
/// skipped. Returns the number of bytes consumed: the whole input when the
/// stream is exhausted, or the position of the packet boundary where a
/// callback stopped the scan. A stream without any sync word is an
/// `UnsynchronizedStream` error under `strict`, and a completed zero-work
/// scan otherwise.
pub fn process_packets(
    data: &[u8],
    base: usize,
    synced: bool,
    strict: bool,
    visitor: &mut impl PacketVisitor,
) -> Result<usize> {
    if data.is_empty() {
        return Ok(0);
    }
    let mut parser = PacketParser::new(data, base);
    if synced {
        parser.assume_synced();
    } else if parser.synchronize().is_none() {
        if strict {
            return Err(BitstreamError::UnsynchronizedStream { offset: base });
        }
        return Ok(data.len());
    }
    loop {
        match parser.step()? {
            Step::Packet(pkt) => {
                let flow = match pkt.op {
                    PacketOp::Nop => visitor.on_nop(&pkt)?,
                    PacketOp::Read => visitor.on_read(&pkt)?,
                    PacketOp::Write => visitor.on_write(&pkt)?,
                    PacketOp::Reserved => visitor.on_reserved(&pkt)?,
                };
                if flow == Flow::Stop {
                    return Ok(parser.pos() - base);
                }
            }
            Step::Resync => {
                if parser.synchronize().is_none() {
                    return Ok(data.len());
                }
            }
            Step::End => return Ok(parser.pos() - base),
        }
    }
}
