//! T.30 control frames on the V.21 channel.
//!
//! A frame as handed to the HDLC framer is `[control, fcf, fif...]`; the
//! framer adds the 0xFF address. Bit positions follow `crate::bits`: the FIF
//! starts at buffer bit 17, so T.30 capability bit `n` lives at buffer bit
//! `16 + n`.

use crate::bits::{assignbit, assignfield, readbit, readfield};
use crate::hdlc::BROADCAST_ADDRESS;

pub const CONTROL_NOT_LAST: u8 = 0xC0;
pub const CONTROL_LAST: u8 = 0xC8;

/// Buffer bit where T.30 bit 1 sits
const FIF_BASE: usize = 16;

/// Characters in a CSI/TSI identifier
pub const ID_LEN: usize = 20;

/// X bit of the FCF, set by the station that received DIS
const X_BIT: u8 = 0x80;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fcf {
    Dis,
    Csi,
    Nsf,
    Dtc,
    Dcs,
    Tsi,
    Nss,
    Cfr,
    Ftt,
    Crp,
    Dcn,
    Unknown(u8),
}

impl Fcf {
    /// Decode an FCF octet. The initial identification frames are matched
    /// exactly; everything else ignores the X bit.
    pub fn from_byte(byte: u8) -> Fcf {
        match byte {
            0x01 => return Fcf::Dis,
            0x02 => return Fcf::Csi,
            0x04 => return Fcf::Nsf,
            0x81 => return Fcf::Dtc,
            _ => {}
        }
        match byte & !X_BIT {
            0x41 => Fcf::Dcs,
            0x42 => Fcf::Tsi,
            0x44 => Fcf::Nss,
            0x21 => Fcf::Cfr,
            0x22 => Fcf::Ftt,
            0x58 => Fcf::Crp,
            0x5F => Fcf::Dcn,
            _ => Fcf::Unknown(byte),
        }
    }

    /// Encode, setting the X bit on commands when `x` is true.
    pub fn to_byte(self, x: bool) -> u8 {
        let x = if x { X_BIT } else { 0 };
        match self {
            Fcf::Dis => 0x01,
            Fcf::Csi => 0x02,
            Fcf::Nsf => 0x04,
            Fcf::Dtc => 0x81,
            Fcf::Dcs => 0x41 | x,
            Fcf::Tsi => 0x42 | x,
            Fcf::Nss => 0x44 | x,
            Fcf::Cfr => 0x21 | x,
            Fcf::Ftt => 0x22 | x,
            Fcf::Crp => 0x58 | x,
            Fcf::Dcn => 0x5F | x,
            Fcf::Unknown(byte) => byte,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaxFrame {
    pub last: bool,
    pub fcf: Fcf,
    pub fif: Vec<u8>,
}

impl FaxFrame {
    pub fn new(fcf: Fcf, last: bool, fif: Vec<u8>) -> Self {
        Self { last, fcf, fif }
    }

    /// Parse a received frame, address included as delivered by the
    /// deframer. `None` for anything too short or not addressed to all.
    pub fn parse(frame: &[u8]) -> Option<FaxFrame> {
        let (&address, rest) = frame.split_first()?;
        if address != BROADCAST_ADDRESS || rest.len() < 2 {
            return None;
        }
        Some(FaxFrame {
            last: rest[0] & 0x08 != 0,
            fcf: Fcf::from_byte(rest[1]),
            fif: rest[2..].to_vec(),
        })
    }

    /// `[control, fcf, fif...]`, ready for the framer.
    pub fn to_bytes(&self, x: bool) -> Vec<u8> {
        let control = if self.last { CONTROL_LAST } else { CONTROL_NOT_LAST };
        let mut bytes = vec![control, self.fcf.to_byte(x)];
        bytes.extend_from_slice(&self.fif);
        bytes
    }
}

/// Data signalling rate codes (T.30 bits 11-14)
pub const RATE_V27_FALLBACK: u8 = 0x00;
pub const RATE_V27: u8 = 0x04;
pub const RATE_V29: u8 = 0x08;
pub const RATE_V27_V29: u8 = 0x0C;

/// Minimum scan line time code for 0 ms
pub const SCAN_TIME_0MS: u8 = 0x07;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisCapabilities {
    pub can_transmit: bool,
    pub can_receive: bool,
    pub rate_code: u8,
    /// 7.7 lines/mm
    pub fine: bool,
    pub two_d: bool,
    /// 0 = A4 (1728 pels)
    pub width: u8,
    /// 0 = A4, 2 = unlimited
    pub length: u8,
    pub min_scan: u8,
}

impl Default for DisCapabilities {
    fn default() -> Self {
        Self {
            can_transmit: false,
            can_receive: true,
            rate_code: RATE_V29,
            fine: true,
            two_d: false,
            width: 0,
            length: 2,
            min_scan: SCAN_TIME_0MS,
        }
    }
}

/// FIF bytes for DIS and DCS: T.30 bits 1..=24
const CAPABILITY_FIF_LEN: usize = 3;

fn write_capabilities(buf: &mut [u8], caps: &DisCapabilities) {
    assignbit(buf, FIF_BASE + 9, caps.can_transmit);
    assignbit(buf, FIF_BASE + 10, caps.can_receive);
    assignfield(buf, FIF_BASE + 11, 4, caps.rate_code as u32);
    assignbit(buf, FIF_BASE + 15, caps.fine);
    assignbit(buf, FIF_BASE + 16, caps.two_d);
    assignfield(buf, FIF_BASE + 17, 2, caps.width as u32);
    assignfield(buf, FIF_BASE + 19, 2, caps.length as u32);
    assignfield(buf, FIF_BASE + 21, 3, caps.min_scan as u32);
}

fn read_capabilities(buf: &[u8]) -> DisCapabilities {
    DisCapabilities {
        can_transmit: readbit(buf, FIF_BASE + 9),
        can_receive: readbit(buf, FIF_BASE + 10),
        rate_code: readfield(buf, FIF_BASE + 11, 4) as u8,
        fine: readbit(buf, FIF_BASE + 15),
        two_d: readbit(buf, FIF_BASE + 16),
        width: readfield(buf, FIF_BASE + 17, 2) as u8,
        length: readfield(buf, FIF_BASE + 19, 2) as u8,
        min_scan: readfield(buf, FIF_BASE + 21, 3) as u8,
    }
}

/// DIS, always the last frame of its burst.
pub fn build_dis(caps: &DisCapabilities) -> Vec<u8> {
    let mut buf = vec![0u8; 2 + CAPABILITY_FIF_LEN];
    buf[0] = CONTROL_LAST;
    buf[1] = Fcf::Dis.to_byte(false);
    write_capabilities(&mut buf, caps);
    buf
}

/// DCS as a caller would send it, for loopback and tests.
pub fn build_dcs(caps: &DisCapabilities) -> Vec<u8> {
    let mut buf = vec![0u8; 2 + CAPABILITY_FIF_LEN];
    buf[0] = CONTROL_LAST;
    buf[1] = Fcf::Dcs.to_byte(true);
    write_capabilities(&mut buf, caps);
    buf
}

/// Capabilities chosen by the remote in a DCS FIF.
pub fn parse_dcs(fif: &[u8]) -> DisCapabilities {
    // Reuse the buffer bit numbering by putting the FIF back behind a
    // two-byte header.
    let mut buf = vec![0u8; 2];
    buf.extend_from_slice(fif);
    read_capabilities(&buf)
}

/// Identifier FIF: padded with spaces to 20 characters and sent last
/// character first.
fn id_fif(id: &str) -> Vec<u8> {
    let mut chars: Vec<u8> = id
        .bytes()
        .filter(|b| b.is_ascii_graphic() || *b == b' ')
        .take(ID_LEN)
        .collect();
    chars.resize(ID_LEN, b' ');
    chars.reverse();
    chars
}

/// Recover an identifier from its FIF.
pub fn parse_id(fif: &[u8]) -> String {
    let text: String = fif.iter().rev().map(|&b| b as char).collect();
    text.trim().to_string()
}

pub fn build_csi(id: &str) -> Vec<u8> {
    FaxFrame::new(Fcf::Csi, false, id_fif(id)).to_bytes(false)
}

pub fn build_tsi(id: &str) -> Vec<u8> {
    FaxFrame::new(Fcf::Tsi, false, id_fif(id)).to_bytes(true)
}

pub fn build_nsf() -> Vec<u8> {
    FaxFrame::new(Fcf::Nsf, false, Vec::new()).to_bytes(false)
}

/// A response or command with no FIF.
pub fn build_simple(fcf: Fcf) -> Vec<u8> {
    FaxFrame::new(fcf, true, Vec::new()).to_bytes(false)
}
