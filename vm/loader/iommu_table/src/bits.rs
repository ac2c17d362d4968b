// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Bit field helpers for virtual address decomposition.

/// Number of virtual address bits consumed by one table level.
pub const BITS_PER_LEVEL: u32 = 9;

/// First virtual address bit indexing each level, level 0 first.
pub const LEVEL_BEGIN_BITS: [u32; 4] = [39, 30, 21, 12];

/// Last (inclusive) virtual address bit indexing each level, level 0 first.
pub const LEVEL_END_BITS: [u32; 4] = [47, 38, 29, 20];

/// Mask with bits `begin..=end` set.
pub fn field_mask(begin: u32, end: u32) -> u64 {
    assert!(begin <= end && end < 64);
    let width = end - begin + 1;
    let low = if width == 64 {
        u64::MAX
    } else {
        (1 << width) - 1
    };
    low << begin
}

/// Extract bits `begin..=end` of `value`, shifted down to bit 0.
pub fn get_bits(value: u64, begin: u32, end: u32) -> u64 {
    (value & field_mask(begin, end)) >> begin
}

/// The index of `va` within a page of the given table level.
pub fn level_index(va: u64, level: usize) -> usize {
    get_bits(va, LEVEL_BEGIN_BITS[level], LEVEL_END_BITS[level]) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_mask() {
        assert_eq!(field_mask(0, 0), 1);
        assert_eq!(field_mask(12, 20), 0x1f_f000);
        assert_eq!(field_mask(0, 63), u64::MAX);
        assert_eq!(field_mask(63, 63), 1 << 63);
    }

    #[test]
    fn test_get_bits() {
        assert_eq!(get_bits(0x1000, 12, 20), 1);
        assert_eq!(get_bits(0xffff_ffff, 12, 20), 0x1ff);
        assert_eq!(get_bits(0x8000_0000, 30, 38), 2);
        assert_eq!(get_bits(u64::MAX, 0, 63), u64::MAX);
        assert_eq!(get_bits(0xabcd, 4, 7), 0xc);
    }

    #[test]
    fn test_level_index() {
        let va = (3 << 39) | (5 << 30) | (7 << 21) | (9 << 12) | 0xfff;
        assert_eq!(level_index(va, 0), 3);
        assert_eq!(level_index(va, 1), 5);
        assert_eq!(level_index(va, 2), 7);
        assert_eq!(level_index(va, 3), 9);
    }

    #[test]
    fn test_level_ranges_are_contiguous() {
        for level in 0..4 {
            assert_eq!(
                LEVEL_END_BITS[level] - LEVEL_BEGIN_BITS[level] + 1,
                BITS_PER_LEVEL
            );
        }
        for level in 1..4 {
            assert_eq!(LEVEL_BEGIN_BITS[level - 1], LEVEL_END_BITS[level] + 1);
        }
    }
}
