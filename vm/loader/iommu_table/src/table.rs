// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Layout and construction of the flat IOMMU table image.
//!
//! The image is a sequence of 4K pages grouped by level: the pointer levels
//! first, in level order, followed by the leaf pages. Pointer entries refer to
//! pages of the next level by their position in this sequence, so the image
//! must be placed at the base address it was built for.

use crate::Error;
use crate::LeafPageSize;
use crate::bits::BITS_PER_LEVEL;
use crate::bits::LEVEL_BEGIN_BITS;
use crate::bits::get_bits;
use crate::bits::level_index;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;
use zerocopy::byteorder::little_endian::U64;

const PTE_VALID: u64 = 1;
const PTE_TYPE_SHIFT: u32 = 1;
const PTE_ADDR_SHIFT: u32 = 2;
const PTE_FLAGS_MASK: u64 = 0xf;

/// Number of entries in one table page.
pub const PAGE_TABLE_ENTRY_COUNT: usize = 512;
const PAGE_TABLE_ENTRY_SIZE: usize = 8;

/// Number of bytes in one table page.
pub const PAGE_TABLE_SIZE: u64 = 4096;

/// Largest table the builder will lay out, in pages (a 4GB image).
pub const MAX_TABLE_PAGES: u64 = 1 << 20;

static_assertions::const_assert_eq!(
    PAGE_TABLE_ENTRY_SIZE * PAGE_TABLE_ENTRY_COUNT,
    PAGE_TABLE_SIZE as usize
);
static_assertions::const_assert_eq!(PAGE_TABLE_ENTRY_COUNT, 1 << BITS_PER_LEVEL);

/// The type tag stored in bits 1..=3 of an entry.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PteType {
    /// Points to a page of the next level.
    Pointer,
    /// Maps a physical frame.
    Leaf,
}

impl PteType {
    fn bits(self) -> u64 {
        match self {
            Self::Pointer => 1,
            Self::Leaf => 7,
        }
    }
}

/// One table entry, stored little endian.
#[derive(Copy, Clone, PartialEq, Eq, IntoBytes, Immutable, KnownLayout, FromBytes)]
#[repr(transparent)]
pub struct PageTableEntry {
    entry: U64,
}

impl core::fmt::Debug for PageTableEntry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PageTableEntry")
            .field("entry", &format_args!("{:#x}", self.raw()))
            .field("is_valid", &self.is_valid())
            .field("address", &self.address())
            .finish()
    }
}

impl Default for PageTableEntry {
    fn default() -> Self {
        Self::from_raw(0)
    }
}

impl PageTableEntry {
    /// Encode a valid entry referring to `address`.
    ///
    /// The address is stored shifted right by two; bits of the address that
    /// land below bit 4 are merged with the type and valid bits.
    pub fn new(address: u64, pte_type: PteType) -> Self {
        Self::new_wide(address.into(), pte_type)
    }

    /// Encode an address that may be wider than 64 bits. Bits above 65 do
    /// not survive the shift into the entry.
    pub fn new_wide(address: u128, pte_type: PteType) -> Self {
        Self::from_raw(
            ((address >> PTE_ADDR_SHIFT) as u64)
                | (pte_type.bits() << PTE_TYPE_SHIFT)
                | PTE_VALID,
        )
    }

    /// Wrap an already encoded entry.
    pub fn from_raw(entry: u64) -> Self {
        Self {
            entry: U64::new(entry),
        }
    }

    /// The encoded value.
    pub fn raw(&self) -> u64 {
        self.entry.get()
    }

    pub fn is_valid(&self) -> bool {
        self.raw() & PTE_VALID == PTE_VALID
    }

    /// Decode the address of a valid entry.
    ///
    /// Exact for any address with bits 2..=5 clear, which covers every page
    /// aligned address.
    pub fn address(&self) -> Option<u64> {
        self.is_valid()
            .then(|| (self.raw() & !PTE_FLAGS_MASK) << PTE_ADDR_SHIFT)
    }
}

/// One 4K page of 512 entries.
#[repr(C)]
#[derive(Clone, PartialEq, Eq, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct PageTable {
    entries: [PageTableEntry; PAGE_TABLE_ENTRY_COUNT],
}

impl PageTable {
    fn from_fn(f: impl FnMut(usize) -> PageTableEntry) -> Self {
        Self {
            entries: core::array::from_fn(f),
        }
    }

    pub fn entries(&self) -> &[PageTableEntry; PAGE_TABLE_ENTRY_COUNT] {
        &self.entries
    }

    pub fn iter(&self) -> impl Iterator<Item = &PageTableEntry> {
        self.entries.iter()
    }

    /// Number of valid entries in the page.
    pub fn valid_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_valid()).count()
    }
}

impl core::ops::Index<usize> for PageTable {
    type Output = PageTableEntry;

    fn index(&self, index: usize) -> &Self::Output {
        &self.entries[index]
    }
}

/// Level, page and entry counts of a table.
///
/// A narrower physical address space truncates every level: level `L` only
/// gets `2^(pa_width - begin_bit(L))` usable entries, spread over as many
/// pages as needed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableLayout {
    leaf_page_size: LeafPageSize,
    usable_entries: Vec<u64>,
    page_counts: Vec<u64>,
    first_pages: Vec<u64>,
}

impl TableLayout {
    pub fn new(leaf_page_size: LeafPageSize, pa_width: u32) -> Result<Self, Error> {
        if !(1..=64).contains(&pa_width) {
            return Err(Error::InvalidPaWidth(pa_width));
        }

        let levels = leaf_page_size.leaf_level() + 1;
        let mut usable_entries = Vec::with_capacity(levels);
        let mut page_counts = Vec::with_capacity(levels);
        for &begin in &LEVEL_BEGIN_BITS[..levels] {
            let entry_bits = pa_width.saturating_sub(begin);
            usable_entries.push(1u64 << entry_bits);
            page_counts.push(1u64 << entry_bits.saturating_sub(BITS_PER_LEVEL));
        }

        let total: u64 = page_counts.iter().sum();
        if total > MAX_TABLE_PAGES {
            return Err(Error::TableTooLarge {
                pages: total,
                max: MAX_TABLE_PAGES,
            });
        }

        let first_pages = page_counts
            .iter()
            .scan(0, |next, &count| {
                let first = *next;
                *next += count;
                Some(first)
            })
            .collect();

        Ok(Self {
            leaf_page_size,
            usable_entries,
            page_counts,
            first_pages,
        })
    }

    pub fn leaf_page_size(&self) -> LeafPageSize {
        self.leaf_page_size
    }

    pub fn leaf_level(&self) -> usize {
        self.leaf_page_size.leaf_level()
    }

    /// Number of levels, leaf included.
    pub fn level_count(&self) -> usize {
        self.page_counts.len()
    }

    /// Usable entries at `level`, across all of its pages.
    pub fn usable_entries(&self, level: usize) -> u64 {
        self.usable_entries[level]
    }

    /// Number of pages at `level`.
    pub fn page_count(&self, level: usize) -> u64 {
        self.page_counts[level]
    }

    /// Index of the first page of `level` in the flat page sequence.
    pub fn first_page(&self, level: usize) -> u64 {
        self.first_pages[level]
    }

    /// Total number of pages in the table.
    pub fn total_pages(&self) -> u64 {
        self.page_counts.iter().sum()
    }

    fn is_usable(&self, level: usize, page: u64, slot: usize) -> bool {
        slot as u64 + PAGE_TABLE_ENTRY_COUNT as u64 * page < self.usable_entries[level]
    }

    /// Locate the leaf entry for `va` as (page index in the flat sequence,
    /// entry index within that page).
    ///
    /// The leaf page is selected by the index bits of the level above the
    /// leaf (level 0 for 512GB leaves).
    pub fn resolve(&self, va: u64) -> (u64, usize) {
        let leaf_level = self.leaf_level();
        let preleaf_level = leaf_level.saturating_sub(1);
        let page = self.first_page(leaf_level) + level_index(va, preleaf_level) as u64;
        (page, level_index(va, leaf_level))
    }
}

/// A built table: pages in placement order and the level of each page.
pub struct IommuTable {
    base_address: u64,
    layout: TableLayout,
    pages: Vec<PageTable>,
    levels: Vec<usize>,
}

impl core::fmt::Debug for IommuTable {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("IommuTable")
            .field("base_address", &format_args!("{:#x}", self.base_address))
            .field("layout", &self.layout)
            .field("page_count", &self.pages.len())
            .finish()
    }
}

impl IommuTable {
    /// The address the table was built to be placed at.
    pub fn base_address(&self) -> u64 {
        self.base_address
    }

    pub fn layout(&self) -> &TableLayout {
        &self.layout
    }

    pub fn pages(&self) -> &[PageTable] {
        &self.pages
    }

    /// The level of each page, parallel to [`Self::pages`].
    pub fn levels(&self) -> &[usize] {
        &self.levels
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Iterate over (level, page) pairs in placement order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &PageTable)> {
        self.levels.iter().copied().zip(self.pages.iter())
    }

    /// The table image as placed in memory.
    pub fn as_bytes(&self) -> &[u8] {
        self.pages.as_slice().as_bytes()
    }

    /// The leaf entry translating `va`, with its page and entry index.
    pub fn lookup(&self, va: u64) -> Option<(usize, usize, PageTableEntry)> {
        let (page, slot) = self.layout.resolve(va);
        let page = usize::try_from(page).ok()?;
        let entry = self.pages.get(page)?[slot];
        Some((page, slot, entry))
    }
}

/// Builds an [`IommuTable`] from a set of va to pa mappings.
#[derive(Debug, Clone)]
pub struct IommuTableBuilder {
    base_address: u64,
    leaf_page_size: LeafPageSize,
    pa_width: u32,
    iommu_width: u32,
    noelv_mode: bool,
}

impl IommuTableBuilder {
    /// Creates a builder for a table placed at `base_address`, with a 32-bit
    /// physical address space and a 40-bit IOMMU address width.
    pub fn new(base_address: u64, leaf_page_size: LeafPageSize) -> Self {
        Self {
            base_address,
            leaf_page_size,
            pa_width: 32,
            iommu_width: 40,
            noelv_mode: false,
        }
    }

    /// Width of the physical address space in bits.
    pub fn with_pa_width(mut self, pa_width: u32) -> Self {
        self.pa_width = pa_width;
        self
    }

    /// Width of the IOMMU output address in bits, used by the leaf address
    /// correction outside of noelv mode.
    pub fn with_iommu_width(mut self, iommu_width: u32) -> Self {
        self.iommu_width = iommu_width;
        self
    }

    /// In noelv mode mapped physical addresses are written unmodified.
    pub fn with_noelv_mode(mut self, noelv_mode: bool) -> Self {
        self.noelv_mode = noelv_mode;
        self
    }

    /// Build the table. Mappings are applied in iteration order, so a later
    /// mapping resolving to the same entry as an earlier one replaces it.
    pub fn build(
        &self,
        mappings: impl IntoIterator<Item = (u64, u64)>,
    ) -> Result<IommuTable, Error> {
        if !(1..=65).contains(&self.iommu_width) {
            return Err(Error::InvalidIommuWidth(self.iommu_width));
        }

        let layout = TableLayout::new(self.leaf_page_size, self.pa_width)?;

        #[cfg(feature = "tracing")]
        tracing::debug!(
            leaf_page_size = %self.leaf_page_size,
            pa_width = self.pa_width,
            pages = layout.total_pages(),
            "laying out iommu table"
        );

        let (mut levels, mut pages) = self.pointer_pages(&layout);
        let leaf_pages = self.leaf_pages(&layout, mappings)?;
        levels.extend(std::iter::repeat_n(layout.leaf_level(), leaf_pages.len()));
        pages.extend(leaf_pages);

        Ok(IommuTable {
            base_address: self.base_address,
            layout,
            pages,
            levels,
        })
    }

    /// Pages of every level above the leaf. Entry `i` of any page at level
    /// `L` points to page `i` of level `L + 1`.
    fn pointer_pages(&self, layout: &TableLayout) -> (Vec<usize>, Vec<PageTable>) {
        let mut levels = Vec::new();
        let mut pages = Vec::new();

        for level in 0..layout.leaf_level() {
            let child_base = self
                .base_address
                .wrapping_add(layout.first_page(level + 1) * PAGE_TABLE_SIZE);

            for page in 0..layout.page_count(level) {
                levels.push(level);
                pages.push(PageTable::from_fn(|slot| {
                    if layout.is_usable(level, page, slot) {
                        PageTableEntry::new(
                            child_base.wrapping_add(slot as u64 * PAGE_TABLE_SIZE),
                            PteType::Pointer,
                        )
                    } else {
                        PageTableEntry::default()
                    }
                }));
            }
        }

        (levels, pages)
    }

    /// Leaf pages, identity mapped over the whole usable range and then
    /// patched with the explicit mappings.
    fn leaf_pages(
        &self,
        layout: &TableLayout,
        mappings: impl IntoIterator<Item = (u64, u64)>,
    ) -> Result<Vec<PageTable>, Error> {
        let leaf_level = layout.leaf_level();
        let leaf_size = self.leaf_page_size.size();
        let first_leaf = layout.first_page(leaf_level);

        let mut pages: Vec<_> = (0..layout.page_count(leaf_level))
            .map(|page| {
                let page_bias = page.wrapping_mul(PAGE_TABLE_ENTRY_COUNT as u64 * leaf_size);
                PageTable::from_fn(|slot| {
                    if layout.is_usable(leaf_level, page, slot) {
                        PageTableEntry::new(
                            page_bias.wrapping_add((slot as u64).wrapping_mul(leaf_size)),
                            PteType::Leaf,
                        )
                    } else {
                        PageTableEntry::default()
                    }
                })
            })
            .collect();

        for (va, pa) in mappings {
            let (page, slot) = layout.resolve(va);
            let leaf_page = usize::try_from(page - first_leaf)
                .ok()
                .filter(|&index| index < pages.len())
                .ok_or(Error::MappingOutOfRange {
                    va,
                    page,
                    page_count: layout.total_pages(),
                })?;

            pages[leaf_page].entries[slot] =
                PageTableEntry::new_wide(self.leaf_address(va, pa), PteType::Leaf);

            #[cfg(feature = "tracing")]
            tracing::info!("0x{va:010x} -> 0x{pa:010x}");
        }

        Ok(pages)
    }

    /// The address written into the leaf entry for a mapping.
    ///
    /// Outside of noelv mode the frame is moved above the IOMMU address
    /// width, less the 4K page index of the va within its 2MB region.
    ///
    /// The sum is computed in 128 bits so a 64 or 65 bit IOMMU width still
    /// encodes once shifted into the entry.
    fn leaf_address(&self, va: u64, pa: u64) -> u128 {
        if self.noelv_mode {
            pa.into()
        } else {
            (1u128 << self.iommu_width)
                .wrapping_add(pa.into())
                .wrapping_sub(u128::from(get_bits(va, 12, 20) << 12))
        }
    }
}
