use crate::{Reg, WriteMode};

pub type Result<T> = std::result::Result<T, BitstreamError>;

/// Everything that can go wrong while parsing, emulating or rewriting a
/// configuration bitstream. Offsets are byte positions in the input buffer.
#[derive(Debug, thiserror::Error)]
pub enum BitstreamError {
    #[error("no sync word (AA995566) found in the bitstream (at offset {offset:#x})")]
    UnsynchronizedStream { offset: usize },
    #[error("unsupported or unknown configuration packet at offset {offset:#x}")]
    MalformedPacket { offset: usize },
    #[error("packet at offset {offset:#x} exceeds the end of the bitstream")]
    TruncatedPayload { offset: usize },
    #[error("idcode mismatch: expected {expected:#010x}, found {found:#010x}")]
    IdcodeMismatch { expected: u32, found: u32 },
    #[error("unexpected {reg} write in {mode:?} mode at offset {offset:#x}")]
    UnexpectedWrite {
        offset: usize,
        reg: Reg,
        mode: WriteMode,
    },
    #[error("malformed bitstream at offset {offset:#x}: {reason}")]
    MalformedBitstream { offset: usize, reason: &'static str },
    #[error("unsupported bitstream: {reason}")]
    UnsupportedBitstream { reason: &'static str },
    #[error("unknown or unsupported device (idcode {idcode:#010x})")]
    UnknownDevice { idcode: u32 },
    #[error("block ram data size mismatch: expected {expected} bytes, got {actual}")]
    BramSizeMismatch { expected: usize, actual: usize },
    #[error("frame data access at byte {offset:#x} is outside the {size:#x} byte frame data area")]
    FrameDataOutOfRange { offset: usize, size: usize },
    #[error("i/o error while accessing bitstream data")]
    Io(#[from] std::io::Error),
}
