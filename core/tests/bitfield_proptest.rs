use proptest::prelude::*;
use softfax_core::bits::{assignbit, assignfield, readbit, readfield};

proptest! {
    #[test]
    fn field_roundtrip_leaves_neighbours(
        start in prop::collection::vec(any::<u8>(), 10),
        pos in 1usize..=64,
        width in 1usize..=8,
        value in any::<u32>(),
    ) {
        let value = value & ((1u32 << width) - 1);
        let mut buf = start.clone();
        assignfield(&mut buf, pos, width, value);

        prop_assert_eq!(readfield(&buf, pos, width), value);
        for p in 1..=start.len() * 8 {
            if p < pos || p >= pos + width {
                prop_assert_eq!(readbit(&buf, p), readbit(&start, p), "bit {} moved", p);
            }
        }
    }

    #[test]
    fn single_bit_roundtrip(
        start in prop::collection::vec(any::<u8>(), 1..8),
        pos in 1usize..=64,
        value in any::<bool>(),
    ) {
        let mut buf = start.clone();
        assignbit(&mut buf, pos, value);
        if pos <= start.len() * 8 {
            prop_assert_eq!(readbit(&buf, pos), value);
        } else {
            // Out of range writes are dropped
            prop_assert_eq!(&buf, &start);
            prop_assert!(!readbit(&buf, pos));
        }
    }
}
