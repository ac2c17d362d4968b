// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Parsed configuration records.

use crate::RecordError;
use std::collections::HashMap;

/// Parse an unsigned integer written in decimal or with a `0x`, `0o` or `0b`
/// prefix.
pub fn parse_u64(s: &str) -> Option<u64> {
    let s = s.trim();
    let (digits, radix) = match s.get(..2).map(str::to_ascii_lowercase).as_deref() {
        Some("0x") => (&s[2..], 16),
        Some("0o") => (&s[2..], 8),
        Some("0b") => (&s[2..], 2),
        _ => (s, 10),
    };

    // from_str_radix accepts a leading sign, which is not an address.
    if digits.is_empty() || !digits.chars().all(|c| c.is_digit(radix)) {
        return None;
    }
    u64::from_str_radix(digits, radix).ok()
}

/// Virtual to physical mappings in insertion order, unique by virtual
/// address.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IommuMappings {
    entries: Vec<(u64, u64)>,
    index: HashMap<u64, usize>,
}

impl IommuMappings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `va` to `pa`. An existing mapping for `va` keeps its position and
    /// its previous physical address is returned.
    pub fn insert(&mut self, va: u64, pa: u64) -> Option<u64> {
        match self.index.get(&va) {
            Some(&i) => Some(std::mem::replace(&mut self.entries[i].1, pa)),
            None => {
                self.index.insert(va, self.entries.len());
                self.entries.push((va, pa));
                None
            }
        }
    }

    pub fn get(&self, va: u64) -> Option<u64> {
        self.index.get(&va).map(|&i| self.entries[i].1)
    }

    /// (va, pa) pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (u64, u64)> + '_ {
        self.entries.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(u64, u64)> for IommuMappings {
    fn from_iter<T: IntoIterator<Item = (u64, u64)>>(iter: T) -> Self {
        let mut mappings = Self::new();
        for (va, pa) in iter {
            mappings.insert(va, pa);
        }
        mappings
    }
}

/// A TLB entry attribute.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TlbFlag {
    /// `g`
    Global,
    /// `v`
    Valid,
    /// `d`
    Dirty,
    /// `c`
    Cacheable,
    /// `u`, implied when `c` is absent
    Uncacheable,
}

impl core::str::FromStr for TlbFlag {
    type Err = RecordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "g" => Ok(Self::Global),
            "v" => Ok(Self::Valid),
            "d" => Ok(Self::Dirty),
            "c" => Ok(Self::Cacheable),
            "u" => Ok(Self::Uncacheable),
            _ => Err(RecordError::UnknownFlag(s.to_string())),
        }
    }
}

/// One record of the TLB section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlbRecord {
    pub phys: u64,
    pub virt: u64,
    pub flags: Vec<TlbFlag>,
}

impl TlbRecord {
    /// Creates a record, marking it uncacheable unless it is cacheable.
    pub fn new(phys: u64, virt: u64, mut flags: Vec<TlbFlag>) -> Self {
        if !flags.contains(&TlbFlag::Cacheable) {
            flags.push(TlbFlag::Uncacheable);
        }
        Self { phys, virt, flags }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_u64() {
        assert_eq!(parse_u64("0"), Some(0));
        assert_eq!(parse_u64("4096"), Some(4096));
        assert_eq!(parse_u64("0x1000"), Some(0x1000));
        assert_eq!(parse_u64("0XcBfF8000"), Some(0xcbff_8000));
        assert_eq!(parse_u64("0o17"), Some(0o17));
        assert_eq!(parse_u64("0b101"), Some(5));
        assert_eq!(parse_u64(" 12 "), Some(12));
        assert_eq!(parse_u64("0xffffffffffffffff"), Some(u64::MAX));
    }

    #[test]
    fn test_parse_u64_rejects() {
        assert_eq!(parse_u64(""), None);
        assert_eq!(parse_u64("0x"), None);
        assert_eq!(parse_u64("-1"), None);
        assert_eq!(parse_u64("+1"), None);
        assert_eq!(parse_u64("12ab"), None);
        assert_eq!(parse_u64("0x1_000"), None);
        assert_eq!(parse_u64("0x10000000000000000"), None);
    }

    #[test]
    fn test_mappings_insert() {
        let mut mappings = IommuMappings::new();
        assert!(mappings.is_empty());
        assert_eq!(mappings.insert(0x20_0000, 1), None);
        assert_eq!(mappings.insert(0, 2), None);
        assert_eq!(mappings.insert(0x20_0000, 3), Some(1));
        assert_eq!(mappings.len(), 2);
        assert_eq!(mappings.get(0x20_0000), Some(3));
        assert_eq!(mappings.get(0x40_0000), None);
        assert_eq!(mappings.iter().collect::<Vec<_>>(), [(0x20_0000, 3), (0, 2)]);
    }

    #[test]
    fn test_mappings_from_iter() {
        let mappings: IommuMappings = [(1, 1), (2, 2), (1, 3)].into_iter().collect();
        assert_eq!(mappings.iter().collect::<Vec<_>>(), [(1, 3), (2, 2)]);
    }

    #[test]
    fn test_uncacheable_implied() {
        let record = TlbRecord::new(0, 0, vec![TlbFlag::Valid]);
        assert_eq!(record.flags, [TlbFlag::Valid, TlbFlag::Uncacheable]);

        let record = TlbRecord::new(0, 0, vec![TlbFlag::Cacheable]);
        assert_eq!(record.flags, [TlbFlag::Cacheable]);
    }
}
