// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Methods to construct static multi-level IOMMU page tables.
//!
//! The tables use a fixed radix of 512 entries per level (RISC-V Sv style)
//! and are meant to be emitted once at build time and linked into firmware
//! as a data section.

#![expect(missing_docs)]
#![forbid(unsafe_code)]

pub mod bits;
pub mod table;

pub use table::IommuTable;
pub use table::IommuTableBuilder;
pub use table::PageTable;
pub use table::PageTableEntry;
pub use table::TableLayout;

use thiserror::Error;

/// Errors returned by the IOMMU table builder
#[derive(Debug, PartialEq, Eq, Error)]
pub enum Error {
    /// The leaf page size token is not one of the supported sizes
    #[error("unknown leaf page size {0:?}, expected one of 512GB, 1GB, 2MB, 4KB")]
    UnknownPageSize(String),

    /// The physical address width cannot describe a table
    #[error("physical address width {0} is outside of 1..=64 bits")]
    InvalidPaWidth(u32),

    /// The corrected leaf address would not fit a 64-bit entry
    #[error("iommu address width {0} is outside of 1..=65 bits")]
    InvalidIommuWidth(u32),

    /// The layout needs more pages than the builder is willing to allocate
    #[error("table layout needs {pages} pages, more than the supported {max}")]
    TableTooLarge { pages: u64, max: u64 },

    /// A mapping resolves to a leaf page that the table does not contain
    #[error(
        "mapping for va {va:#x} resolves to page {page}, past the end of the {page_count} page table"
    )]
    MappingOutOfRange {
        va: u64,
        page: u64,
        page_count: u64,
    },
}

/// Size of the pages mapped by the leaf level of the table.
///
/// The size selects the leaf level: 512GB pages are mapped directly from
/// level 0, 4KB pages need all four levels.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LeafPageSize {
    /// 512GB pages, leaf level 0
    Size512Gb,
    /// 1GB pages, leaf level 1
    Size1Gb,
    /// 2MB pages, leaf level 2
    Size2Mb,
    /// 4KB pages, leaf level 3
    Size4Kb,
}

impl LeafPageSize {
    /// All supported sizes, largest first.
    pub const ALL: [Self; 4] = [
        Self::Size512Gb,
        Self::Size1Gb,
        Self::Size2Mb,
        Self::Size4Kb,
    ];

    /// The deepest level of a table mapping pages of this size.
    pub fn leaf_level(self) -> usize {
        match self {
            Self::Size512Gb => 0,
            Self::Size1Gb => 1,
            Self::Size2Mb => 2,
            Self::Size4Kb => 3,
        }
    }

    /// Number of bytes mapped by one leaf entry.
    pub fn size(self) -> u64 {
        1 << bits::LEVEL_BEGIN_BITS[self.leaf_level()]
    }

    /// The token used for this size on the command line.
    pub fn name(self) -> &'static str {
        match self {
            Self::Size512Gb => "512GB",
            Self::Size1Gb => "1GB",
            Self::Size2Mb => "2MB",
            Self::Size4Kb => "4KB",
        }
    }
}

impl core::fmt::Display for LeafPageSize {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

impl core::str::FromStr for LeafPageSize {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let token = s.trim();
        Self::ALL
            .into_iter()
            .find(|size| size.name().eq_ignore_ascii_case(token))
            .ok_or_else(|| Error::UnknownPageSize(token.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::Error;
    use super::LeafPageSize;

    #[test]
    fn test_leaf_levels() {
        let levels: Vec<_> = LeafPageSize::ALL.iter().map(|s| s.leaf_level()).collect();
        assert_eq!(levels, [0, 1, 2, 3]);
    }

    #[test]
    fn test_sizes() {
        assert_eq!(LeafPageSize::Size512Gb.size(), 1 << 39);
        assert_eq!(LeafPageSize::Size1Gb.size(), 0x4000_0000);
        assert_eq!(LeafPageSize::Size2Mb.size(), 0x20_0000);
        assert_eq!(LeafPageSize::Size4Kb.size(), 0x1000);
    }

    #[test]
    fn test_parse() {
        assert_eq!("2MB".parse::<LeafPageSize>(), Ok(LeafPageSize::Size2Mb));
        assert_eq!("4kb".parse::<LeafPageSize>(), Ok(LeafPageSize::Size4Kb));
        assert_eq!(" 512GB ".parse::<LeafPageSize>(), Ok(LeafPageSize::Size512Gb));
        for size in LeafPageSize::ALL {
            assert_eq!(size.to_string().parse::<LeafPageSize>(), Ok(size));
        }
    }

    #[test]
    fn test_parse_unknown() {
        assert_eq!(
            "16KB".parse::<LeafPageSize>(),
            Err(Error::UnknownPageSize("16KB".into()))
        );
        assert!("".parse::<LeafPageSize>().is_err());
    }
}
