use enum_map::Enum;
use serde::{Deserialize, Serialize};
use unnamed_entity::entity_id;

mod bitstream;
mod bram;
mod config;
mod engine;
mod error;
mod packet;

pub use bitstream::{Bitstream, PacketSpan, SlrInfo};
pub use bram::{extract, inject};
pub use config::{ConfigContext, ConfigEngine, ConfigListener, WriteMode};
pub use engine::{process_packets, Flow, PacketVisitor};
pub use error::{BitstreamError, Result};
pub use packet::{Packet, PacketOp, PacketParser, Step, SYNC_WORD};

entity_id! {
    pub id SlrId usize;
}

/// Configuration registers of Series-7 and UltraScale+ devices, addressed by
/// the 5-bit register field of a type 1 packet header.
#[derive(
    Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Enum, Serialize, Deserialize,
)]
pub enum Reg {
    /// CRC check register
    Crc,
    /// Frame address register
    Far,
    /// Frame data input register (configuration data write)
    Fdri,
    /// Frame data output register (readback data)
    Fdro,
    /// Command register
    Cmd,
    Ctl0,
    /// Mask for CTL0/CTL1 writes
    Mask,
    Stat,
    /// Legacy output register
    Lout,
    Cor0,
    /// Multi frame write register
    Mfwr,
    /// Initial CBC value register
    Cbc,
    Idcode,
    /// User access register
    Axss,
    Cor1,
    Rsvd15,
    /// Warm boot start address register
    WbStar,
    /// Watchdog timer register
    Timer,
    Rsvd18,
    Rsvd19,
    Rsvd20,
    Rsvd21,
    /// Boot history status register
    BootSts,
    Rsvd23,
    Ctl1,
    Rsvd25,
    Rsvd26,
    Rsvd27,
    Rsvd28,
    Rsvd29,
    /// Reserved register 30; a write with non-empty payload encapsulates the
    /// configuration sub-stream of the next SLR.
    NextSlr,
    /// BPI/SPI configuration options register
    Bspi,
}

impl Reg {
    pub fn from_code(code: u32) -> Reg {
        match code & 0x1F {
            0b00000 => Reg::Crc,
            0b00001 => Reg::Far,
            0b00010 => Reg::Fdri,
            0b00011 => Reg::Fdro,
            0b00100 => Reg::Cmd,
            0b00101 => Reg::Ctl0,
            0b00110 => Reg::Mask,
            0b00111 => Reg::Stat,
            0b01000 => Reg::Lout,
            0b01001 => Reg::Cor0,
            0b01010 => Reg::Mfwr,
            0b01011 => Reg::Cbc,
            0b01100 => Reg::Idcode,
            0b01101 => Reg::Axss,
            0b01110 => Reg::Cor1,
            0b01111 => Reg::Rsvd15,
            0b10000 => Reg::WbStar,
            0b10001 => Reg::Timer,
            0b10010 => Reg::Rsvd18,
            0b10011 => Reg::Rsvd19,
            0b10100 => Reg::Rsvd20,
            0b10101 => Reg::Rsvd21,
            0b10110 => Reg::BootSts,
            0b10111 => Reg::Rsvd23,
            0b11000 => Reg::Ctl1,
            0b11001 => Reg::Rsvd25,
            0b11010 => Reg::Rsvd26,
            0b11011 => Reg::Rsvd27,
            0b11100 => Reg::Rsvd28,
            0b11101 => Reg::Rsvd29,
            0b11110 => Reg::NextSlr,
            _ => Reg::Bspi,
        }
    }

    pub fn code(self) -> u32 {
        self.into_usize() as u32
    }
}

impl std::fmt::Display for Reg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Reg::Crc => "CRC",
            Reg::Far => "FAR",
            Reg::Fdri => "FDRI",
            Reg::Fdro => "FDRO",
            Reg::Cmd => "CMD",
            Reg::Ctl0 => "CTL0",
            Reg::Mask => "MASK",
            Reg::Stat => "STAT",
            Reg::Lout => "LOUT",
            Reg::Cor0 => "COR0",
            Reg::Mfwr => "MFWR",
            Reg::Cbc => "CBC",
            Reg::Idcode => "IDCODE",
            Reg::Axss => "AXSS",
            Reg::Cor1 => "COR1",
            Reg::WbStar => "WBSTAR",
            Reg::Timer => "TIMER",
            Reg::BootSts => "BOOTSTS",
            Reg::Ctl1 => "CTL1",
            Reg::NextSlr => "RSVD30",
            Reg::Bspi => "BSPI",
            Reg::Rsvd15 => "RSVD15",
            Reg::Rsvd18 => "RSVD18",
            Reg::Rsvd19 => "RSVD19",
            Reg::Rsvd20 => "RSVD20",
            Reg::Rsvd21 => "RSVD21",
            Reg::Rsvd23 => "RSVD23",
            Reg::Rsvd25 => "RSVD25",
            Reg::Rsvd26 => "RSVD26",
            Reg::Rsvd27 => "RSVD27",
            Reg::Rsvd28 => "RSVD28",
            Reg::Rsvd29 => "RSVD29",
        };
        f.write_str(name)
    }
}

/// Command register codes.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Cmd {
    /// Null command; places the configuration array in read-only mode.
    Nul,
    /// Write configuration data; precedes FDRI writes.
    Wcfg,
    /// Multi frame write; precedes MFWR writes in compressed bitstreams.
    Mfw,
    /// Last frame / deassert the GHIGH_B signal.
    DgHigh,
    /// Read configuration data; precedes FDRO reads.
    Rcfg,
    /// Begin the start-up sequence.
    Start,
    /// Trigger clearing of the URAM.
    Uram,
    /// Reset the CRC register.
    Rcrc,
    /// Assert the GHIGH_B signal.
    AgHigh,
    /// Switch the CCLK frequency.
    Switch,
    /// Pulse the GRESTORE signal.
    GRestore,
    /// Begin the shutdown sequence.
    Shutdown,
    Rsvd12,
    /// Desynchronize the device at the end of configuration.
    Desync,
    Rsvd14,
    /// Trigger a warm boot.
    IProg,
    /// Trigger calculation of the first readback CRC.
    Crcc,
    /// Reload the watchdog timer.
    LTimer,
    /// BPI/SPI re-initiate bitstream read.
    BspiRead,
    /// Switch to negative-edge clocking.
    FallEdge,
}

impl Cmd {
    pub fn from_code(code: u32) -> Option<Cmd> {
        Some(match code {
            0 => Cmd::Nul,
            1 => Cmd::Wcfg,
            2 => Cmd::Mfw,
            3 => Cmd::DgHigh,
            4 => Cmd::Rcfg,
            5 => Cmd::Start,
            6 => Cmd::Uram,
            7 => Cmd::Rcrc,
            8 => Cmd::AgHigh,
            9 => Cmd::Switch,
            10 => Cmd::GRestore,
            11 => Cmd::Shutdown,
            12 => Cmd::Rsvd12,
            13 => Cmd::Desync,
            14 => Cmd::Rsvd14,
            15 => Cmd::IProg,
            16 => Cmd::Crcc,
            17 => Cmd::LTimer,
            18 => Cmd::BspiRead,
            19 => Cmd::FallEdge,
            _ => return None,
        })
    }

    pub fn code(self) -> u32 {
        match self {
            Cmd::Nul => 0,
            Cmd::Wcfg => 1,
            Cmd::Mfw => 2,
            Cmd::DgHigh => 3,
            Cmd::Rcfg => 4,
            Cmd::Start => 5,
            Cmd::Uram => 6,
            Cmd::Rcrc => 7,
            Cmd::AgHigh => 8,
            Cmd::Switch => 9,
            Cmd::GRestore => 10,
            Cmd::Shutdown => 11,
            Cmd::Rsvd12 => 12,
            Cmd::Desync => 13,
            Cmd::Rsvd14 => 14,
            Cmd::IProg => 15,
            Cmd::Crcc => 16,
            Cmd::LTimer => 17,
            Cmd::BspiRead => 18,
            Cmd::FallEdge => 19,
        }
    }
}

impl std::fmt::Display for Cmd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Cmd::Nul => "NULL",
            Cmd::Wcfg => "WCFG",
            Cmd::Mfw => "MFW",
            Cmd::DgHigh => "DGHIGH",
            Cmd::Rcfg => "RCFG",
            Cmd::Start => "START",
            Cmd::Uram => "URAM",
            Cmd::Rcrc => "RCRC",
            Cmd::AgHigh => "AGHIGH",
            Cmd::Switch => "SWITCH",
            Cmd::GRestore => "GRESTORE",
            Cmd::Shutdown => "SHUTDOWN",
            Cmd::Rsvd12 => "RSVD12",
            Cmd::Desync => "DESYNC",
            Cmd::Rsvd14 => "RSVD14",
            Cmd::IProg => "IPROG",
            Cmd::Crcc => "CRCC",
            Cmd::LTimer => "LTIMER",
            Cmd::BspiRead => "BSPI_READ",
            Cmd::FallEdge => "FALL_EDGE",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reg_codes_round_trip() {
        for code in 0..32 {
            assert_eq!(Reg::from_code(code).code(), code);
        }
        assert_eq!(Reg::from_code(0b00010), Reg::Fdri);
        assert_eq!(Reg::from_code(0b00011), Reg::Fdro);
        assert_eq!(Reg::from_code(0b01010), Reg::Mfwr);
        assert_eq!(Reg::from_code(0b11110), Reg::NextSlr);
    }

    #[test]
    fn cmd_codes_round_trip() {
        for code in 0..20 {
            assert_eq!(Cmd::from_code(code).unwrap().code(), code);
        }
        assert_eq!(Cmd::from_code(13), Some(Cmd::Desync));
        assert_eq!(Cmd::from_code(20), None);
    }
}
