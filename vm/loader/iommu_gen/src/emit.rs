// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! C++ source emission for a built table.

use iommu_table::IommuTable;
use std::fmt::Write;

/// Entries emitted per source line.
const ENTRIES_PER_ROW: usize = 32;

/// Render `table` as a C++ array placed in the `.iommu_table` section.
pub fn render_cpp(table: &IommuTable) -> Result<String, std::fmt::Error> {
    let mut out = String::new();
    write_cpp(table, &mut out)?;
    Ok(out)
}

fn write_cpp(table: &IommuTable, out: &mut String) -> std::fmt::Result {
    let root_entries = table.layout().usable_entries(0).min(512);
    writeln!(
        out,
        "// address of .iommu_table section is exactly {:#x}",
        table.base_address()
    )?;
    writeln!(
        out,
        "unsigned long long int iommu_table[][{}][512]  __attribute__ ((section (\".iommu_table\"))) = {{",
        table.page_count()
    )?;
    writeln!(
        out,
        "  // level 0 contains {root_entries} meaningful {}, leaf pages are {}",
        if root_entries == 1 { "entry" } else { "entries" },
        table.layout().leaf_page_size(),
    )?;
    write!(out, "  {{")?;

    for (level, page) in table.iter() {
        write!(out, "\n    {{ // level {level}")?;
        for row in page.entries().chunks(ENTRIES_PER_ROW) {
            write!(out, "\n      ")?;
            for entry in row {
                write!(out, "0x{:010x}, ", entry.raw())?;
            }
        }
        write!(out, "\n    }},")?;
    }

    write!(out, "\n  }}\n}};")
}
