//! HDLC bit-level framing primitives: FCS, bit stuffing and deframing.
//!
//! Bits travel LSB-first within each octet. The 16-bit FCS uses the X.25
//! polynomial in its reflected form (0x8408) and is sent as the ones
//! complement of the register, low byte first.

pub const FLAG: u8 = 0x7E;

/// Register value left after running a good frame, FCS included.
pub const FCS_GOOD_RESIDUE: u16 = 0xF0B8;

const FCS_INIT: u16 = 0xFFFF;

/// Longest frame accepted by the deframer, FCS included
pub const MAX_FRAME_BYTES: usize = 260;

const FCS_TABLE: [u16; 256] = build_fcs_table();

const fn build_fcs_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u16;
        let mut k = 0;
        while k < 8 {
            crc = if crc & 1 != 0 { (crc >> 1) ^ 0x8408 } else { crc >> 1 };
            k += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

fn fcs_update(mut fcs: u16, data: &[u8]) -> u16 {
    for &byte in data {
        fcs = (fcs >> 8) ^ FCS_TABLE[((fcs ^ byte as u16) & 0xFF) as usize];
    }
    fcs
}

/// FCS to transmit after `data`.
pub fn fcs16(data: &[u8]) -> u16 {
    !fcs_update(FCS_INIT, data)
}

/// True when `frame` (payload followed by its two FCS octets) is intact.
pub fn fcs_ok(frame: &[u8]) -> bool {
    frame.len() >= 2 && fcs_update(FCS_INIT, frame) == FCS_GOOD_RESIDUE
}

/// Append the unstuffed bits of one flag.
pub fn push_flag(out: &mut Vec<u8>) {
    for i in 0..8 {
        out.push(FLAG >> i & 1);
    }
}

/// Append `payload` and its FCS as stuffed bits, without flags.
pub fn push_stuffed_frame(payload: &[u8], out: &mut Vec<u8>) {
    let fcs = fcs16(payload);
    let trailer = [fcs as u8, (fcs >> 8) as u8];
    let mut ones = 0;
    for &byte in payload.iter().chain(trailer.iter()) {
        for i in 0..8 {
            let bit = byte >> i & 1;
            out.push(bit);
            if bit == 1 {
                ones += 1;
                if ones == 5 {
                    out.push(0);
                    ones = 0;
                }
            } else {
                ones = 0;
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeframeEvent {
    /// A flag closed a frame or separated idle flags.
    Flag,
    /// Frame with a valid FCS, FCS stripped.
    Frame(Vec<u8>),
    /// Octet-aligned frame whose FCS did not check.
    FcsError(usize),
    /// Seven or more consecutive ones.
    Abort,
}

/// Bit-at-a-time HDLC receiver.
#[derive(Debug, Default)]
pub struct Deframer {
    bits: Vec<u8>,
    ones: u32,
    /// A flag has been seen since the last abort
    synced: bool,
}

impl Deframer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.bits.clear();
        self.ones = 0;
        self.synced = false;
    }

    /// Feed one bit, returning what it completed, if anything.
    ///
    /// A flag may yield two events (the frame it closed and the flag itself);
    /// the frame is reported and the flag is implied.
    pub fn push(&mut self, bit: u8) -> Option<DeframeEvent> {
        if bit != 0 {
            self.ones += 1;
            self.bits.push(1);
            if self.ones == 7 {
                let was_synced = self.synced;
                self.bits.clear();
                self.synced = false;
                return was_synced.then_some(DeframeEvent::Abort);
            }
            if self.ones > 7 {
                self.bits.clear();
            }
            return None;
        }

        let ones = std::mem::replace(&mut self.ones, 0);
        match ones {
            // Stuffed zero
            5 => None,
            6 => {
                // `bits` ends with the flag's leading 0 and six ones
                let end = self.bits.len().saturating_sub(7);
                let event = if self.synced {
                    self.close_frame(end)
                } else {
                    DeframeEvent::Flag
                };
                self.bits.clear();
                self.synced = true;
                Some(event)
            }
            _ => {
                if self.bits.len() >= (MAX_FRAME_BYTES + 1) * 8 {
                    log::debug!("deframer: frame exceeds {} bytes, resyncing", MAX_FRAME_BYTES);
                    self.bits.clear();
                    self.synced = false;
                }
                self.bits.push(0);
                None
            }
        }
    }

    fn close_frame(&self, end: usize) -> DeframeEvent {
        let bits = &self.bits[..end];
        if bits.is_empty() {
            return DeframeEvent::Flag;
        }
        if bits.len() % 8 != 0 || bits.len() < 32 {
            log::trace!("deframer: discarding {} stray bits", bits.len());
            return DeframeEvent::Flag;
        }
        let bytes: Vec<u8> = bits
            .chunks(8)
            .map(|c| c.iter().enumerate().fold(0u8, |acc, (i, &b)| acc | b << i))
            .collect();
        if fcs_ok(&bytes) {
            DeframeEvent::Frame(bytes[..bytes.len() - 2].to_vec())
        } else {
            DeframeEvent::FcsError(bytes.len())
        }
    }
}
