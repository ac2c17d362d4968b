// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Fixed TLB entry values for MIPS style EntryLo/PageMask registers.

use iommu_table::bits::field_mask;
use mmu_config::TlbFlag;
use mmu_config::TlbRecord;

/// Number of TLB entries that can be initialized.
pub const TLB_ENTRY_COUNT: usize = 16;

/// Wired register value used when the requested one is out of range.
pub const DEFAULT_WIRED: u32 = 8;

/// Offset from the even to the odd page in EntryLo1.
const ODD_PAGE_OFFSET: u64 = 0x40000;

const PFN_SHIFT: u32 = 6;

/// PageMask register value for a page size in KB.
pub fn page_mask(page_size_kb: u64) -> Option<u64> {
    let mask = match page_size_kb {
        4 => 0x0,
        16 => 0x3,
        64 => 0xf,
        256 => 0x3f,
        1024 => 0xff,
        4096 => 0x3ff,
        16384 => 0xfff,
        _ => return None,
    };
    Some(mask << 13)
}

/// Mask selecting the virtual page pair number for a page mask.
pub fn virt_addr_mask(page_mask: u64) -> u64 {
    let odd_bit = (page_mask + 0x1000).ilog2();
    field_mask(odd_bit + 1, 31)
}

/// Clamp the wired register value to the usable range.
pub fn wired(requested: u32) -> u32 {
    if (1..TLB_ENTRY_COUNT as u32).contains(&requested) {
        requested
    } else {
        DEFAULT_WIRED
    }
}

fn flag_mask(flag: TlbFlag) -> u64 {
    match flag {
        TlbFlag::Global => 0x1,
        TlbFlag::Valid => 0x2,
        TlbFlag::Dirty => 0x4,
        TlbFlag::Cacheable => 0x0,
        TlbFlag::Uncacheable => 0x38,
    }
}

/// EntryLo0 and EntryLo1 values for a record.
pub fn entry_lo(record: &TlbRecord) -> (u64, u64) {
    let flags = record
        .flags
        .iter()
        .fold(0, |acc, &flag| acc | flag_mask(flag));
    let lo0 = flags | (record.phys >> PFN_SHIFT);
    (lo0, lo0 + ODD_PAGE_OFFSET)
}

/// `tlb_entry_init` macro invocations for the first [`TLB_ENTRY_COUNT`]
/// records.
pub fn macro_calls(records: &[TlbRecord], page_mask: u64) -> Vec<String> {
    records
        .iter()
        .take(TLB_ENTRY_COUNT)
        .enumerate()
        .map(|(index, record)| {
            let (lo0, lo1) = entry_lo(record);
            format!(
                "tlb_entry_init 0x{index:08x} 0x{page_mask:08x} 0x{:08x} 0x{lo0:08x} 0x{lo1:08x}",
                record.virt
            )
        })
        .collect()
}
