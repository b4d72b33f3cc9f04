//! Bit addressing for T.30 control frames.
//!
//! Positions are 1-based: position 1 is the least significant bit of byte 0,
//! position 8 its most significant bit, position 9 the least significant bit of
//! byte 1, and so on. This matches the LSB-first order in which HDLC puts each
//! octet on the wire, so position n is the n-th transmitted bit.
//!
//! Multi-bit fields are written most significant bit first: the top bit of the
//! value lands on the lowest position of the field.

/// Set or clear the bit at `pos`. Positions past the end of `buf` are ignored.
pub fn assignbit(buf: &mut [u8], pos: usize, value: bool) {
    if pos == 0 {
        return;
    }
    let byte = (pos - 1) / 8;
    let mask = 1u8 << ((pos - 1) % 8);
    if let Some(b) = buf.get_mut(byte) {
        if value {
            *b |= mask;
        } else {
            *b &= !mask;
        }
    }
}

pub fn readbit(buf: &[u8], pos: usize) -> bool {
    if pos == 0 {
        return false;
    }
    let byte = (pos - 1) / 8;
    buf.get(byte)
        .map(|b| b & (1 << ((pos - 1) % 8)) != 0)
        .unwrap_or(false)
}

/// Write the low `width` bits of `value` starting at `pos`, MSB first.
/// Fields may straddle a byte boundary.
pub fn assignfield(buf: &mut [u8], pos: usize, width: usize, value: u32) {
    debug_assert!(width <= 32);
    for i in 0..width {
        let bit = (value >> (width - 1 - i)) & 1 != 0;
        assignbit(buf, pos + i, bit);
    }
}

pub fn readfield(buf: &[u8], pos: usize, width: usize) -> u32 {
    debug_assert!(width <= 32);
    (0..width).fold(0u32, |acc, i| (acc << 1) | readbit(buf, pos + i) as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_one_is_lsb_of_first_byte() {
        let mut buf = [0u8; 2];
        assignbit(&mut buf, 1, true);
        assert_eq!(buf, [0x01, 0x00]);
        assignbit(&mut buf, 9, true);
        assert_eq!(buf, [0x01, 0x01]);
        assignbit(&mut buf, 8, true);
        assert_eq!(buf, [0x81, 0x01]);
    }

    #[test]
    fn test_clear_bit() {
        let mut buf = [0xFFu8];
        assignbit(&mut buf, 3, false);
        assert_eq!(buf, [0xFB]);
        assert!(!readbit(&buf, 3));
        assert!(readbit(&buf, 4));
    }

    #[test]
    fn test_field_msb_first() {
        let mut buf = [0u8; 2];
        // 0b1000 at position 3: only position 3 set
        assignfield(&mut buf, 3, 4, 0x08);
        assert_eq!(buf, [0x04, 0x00]);
        assert_eq!(readfield(&buf, 3, 4), 0x08);
    }

    #[test]
    fn test_field_straddles_bytes() {
        let mut buf = [0u8; 2];
        assignfield(&mut buf, 7, 4, 0b1011);
        assert_eq!(readfield(&buf, 7, 4), 0b1011);
        assert!(readbit(&buf, 7));
        assert!(!readbit(&buf, 8));
        assert!(readbit(&buf, 9));
        assert!(readbit(&buf, 10));
    }

    #[test]
    fn test_out_of_range_is_ignored() {
        let mut buf = [0u8; 1];
        assignbit(&mut buf, 0, true);
        assignbit(&mut buf, 9, true);
        assert_eq!(buf, [0]);
        assert!(!readbit(&buf, 12));
    }

    #[test]
    fn test_field_truncates_value() {
        let mut buf = [0u8; 1];
        assignfield(&mut buf, 1, 3, 0xFF);
        assert_eq!(readfield(&buf, 1, 3), 0b111);
        assert_eq!(readfield(&buf, 4, 5), 0);
    }
}
