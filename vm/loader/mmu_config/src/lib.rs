// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Parsing of the MMU mapping configuration table.
//!
//! The configuration is a semicolon delimited text table split into sections
//! by separator lines (any line containing `___;`). The TLB records live
//! between the second and third separators, the IOMMU mappings between the
//! fifth and sixth. Within a record, parenthesized text is a comment and
//! underscores are digit separators.

#![expect(missing_docs)]
#![forbid(unsafe_code)]

mod record;

pub use record::IommuMappings;
pub use record::TlbFlag;
pub use record::TlbRecord;
pub use record::parse_u64;

use thiserror::Error;

/// Marker identifying a section separator line.
pub const SECTION_SEPARATOR: &str = "___;";

/// Errors returned while parsing a configuration file.
#[derive(Debug, PartialEq, Eq, Error)]
pub enum Error {
    /// The file does not have enough separator lines for the section
    #[error("the {section} section needs {needed} separator lines, found {found}")]
    MissingSection {
        section: Section,
        needed: usize,
        found: usize,
    },
    /// A record could not be parsed
    #[error("malformed record on line {line}")]
    MalformedRecord {
        line: usize,
        #[source]
        reason: RecordError,
    },
}

/// The reason a record was rejected.
#[derive(Debug, PartialEq, Eq, Error)]
pub enum RecordError {
    /// The record has fewer fields than required
    #[error("missing field {0}")]
    MissingField(usize),
    /// A field is not a decimal or prefixed integer
    #[error("invalid integer {0:?}")]
    InvalidInteger(String),
    /// A TLB flag token is not one of g, v, d, c, u
    #[error("unknown flag {0:?}")]
    UnknownFlag(String),
}

/// A section of the configuration file.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Section {
    /// Fixed TLB entries
    Tlb,
    /// IOMMU table mappings
    Iommu,
}

impl Section {
    /// Indices of the separator lines enclosing the section.
    fn separators(self) -> (usize, usize) {
        match self {
            Self::Tlb => (1, 2),
            Self::Iommu => (4, 5),
        }
    }
}

impl core::fmt::Display for Section {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(match self {
            Self::Tlb => "tlb",
            Self::Iommu => "iommu",
        })
    }
}

/// A cleaned up record line: 1-based line number and its fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    pub line: usize,
    pub fields: Vec<String>,
}

impl RawRecord {
    fn field(&self, index: usize) -> Result<&str, Error> {
        self.fields
            .get(index)
            .map(String::as_str)
            .ok_or(Error::MalformedRecord {
                line: self.line,
                reason: RecordError::MissingField(index),
            })
    }

    fn integer(&self, index: usize) -> Result<u64, Error> {
        let field = self.field(index)?;
        parse_u64(field).ok_or_else(|| Error::MalformedRecord {
            line: self.line,
            reason: RecordError::InvalidInteger(field.to_string()),
        })
    }
}

/// Strip comments and digit separators from a record line and collapse
/// whitespace.
fn clean_line(line: &str) -> String {
    let mut line = line.to_string();
    if let (Some(open), Some(close)) = (line.find('('), line.rfind(')')) {
        if close > open {
            line.replace_range(open..=close, "");
        }
    }
    line.replace('_', "")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Extract the records of `section` from the configuration text.
///
/// Lines that are empty once cleaned up are skipped.
pub fn section_records(text: &str, section: Section) -> Result<Vec<RawRecord>, Error> {
    let separators: Vec<usize> = text
        .lines()
        .enumerate()
        .filter(|(_, line)| line.contains(SECTION_SEPARATOR))
        .map(|(index, _)| index)
        .collect();

    let (start, end) = section.separators();
    let (Some(&first), Some(&last)) = (separators.get(start), separators.get(end)) else {
        return Err(Error::MissingSection {
            section,
            needed: end + 1,
            found: separators.len(),
        });
    };

    let records = text
        .lines()
        .enumerate()
        .take(last)
        .skip(first + 1)
        .filter_map(|(index, line)| {
            let line = clean_line(line);
            (!line.is_empty()).then(|| RawRecord {
                line: index + 1,
                fields: line.split(';').map(|f| f.trim().to_string()).collect(),
            })
        })
        .collect();

    Ok(records)
}

/// Parse the IOMMU section into an ordered va to pa map.
///
/// Field 0 is the physical address, field 1 the virtual address. A repeated
/// virtual address replaces the earlier mapping.
pub fn parse_iommu_mappings(text: &str) -> Result<IommuMappings, Error> {
    let mut mappings = IommuMappings::new();
    for record in section_records(text, Section::Iommu)? {
        let pa = record.integer(0)?;
        let va = record.integer(1)?;
        if let Some(old) = mappings.insert(va, pa) {
            tracing::debug!(
                line = record.line,
                va,
                old,
                new = pa,
                "duplicate va replaces earlier mapping"
            );
        }
    }
    Ok(mappings)
}

/// Parse the TLB section into records in file order.
///
/// Field 0 is the physical address, field 1 the virtual address and field 3
/// the space separated flags.
pub fn parse_tlb_records(text: &str) -> Result<Vec<TlbRecord>, Error> {
    section_records(text, Section::Tlb)?
        .iter()
        .map(|record| -> Result<TlbRecord, Error> {
            let phys = record.integer(0)?;
            let virt = record.integer(1)?;
            let flags = record
                .field(3)?
                .split_whitespace()
                .map(|token| {
                    token.parse().map_err(|reason| Error::MalformedRecord {
                        line: record.line,
                        reason,
                    })
                })
                .collect::<Result<_, _>>()?;
            Ok(TlbRecord::new(phys, virt, flags))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = "\
MMU configuration___;
TLB entries___;
0x0000_0000; 0x8000_0000; 16MB; G V D C
0x1000_0000 (sram); 0xa000_0000; 16MB; g v d

___;
notes___;
IOMMU mappings___;
0x8000_0000; 0x0000_0000 (boot rom)
0x0020_0000;   2_097_152
___;
trailer
";

    #[test]
    fn test_clean_line() {
        assert_eq!(clean_line("0x1000_0000 (sram) ;  0x2"), "0x10000000 ; 0x2");
        assert_eq!(clean_line("a (b) c (d) e"), "a e");
        assert_eq!(clean_line("a ) b ( c"), "a ) b ( c");
        assert_eq!(clean_line("   \t "), "");
    }

    #[test]
    fn test_section_records() {
        let records = section_records(CONFIG, Section::Tlb).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].line, 3);
        assert_eq!(
            records[0].fields,
            ["0x00000000", "0x80000000", "16MB", "G V D C"]
        );
        assert_eq!(records[1].fields[0], "0x10000000");

        let records = section_records(CONFIG, Section::Iommu).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].line, 9);
    }

    #[test]
    fn test_missing_section() {
        let text = "a___;\nb___;\n0;0;0;v\nc___;\n";
        assert!(section_records(text, Section::Tlb).is_ok());
        assert_eq!(
            parse_iommu_mappings(text),
            Err(Error::MissingSection {
                section: Section::Iommu,
                needed: 6,
                found: 3,
            })
        );
    }

    #[test]
    fn test_iommu_mappings() {
        let mappings = parse_iommu_mappings(CONFIG).unwrap();
        assert_eq!(
            mappings.iter().collect::<Vec<_>>(),
            [(0, 0x8000_0000), (0x20_0000, 0x20_0000)]
        );
    }

    #[test]
    fn test_duplicate_va_keeps_position() {
        let text = "\
0___;\n1___;\n2___;\n3___;\n4___;
0x1000; 0x0
0x2000; 0x200000
0x3000; 0x0
5___;
";
        let mappings = parse_iommu_mappings(text).unwrap();
        assert_eq!(
            mappings.iter().collect::<Vec<_>>(),
            [(0, 0x3000), (0x20_0000, 0x2000)]
        );
    }

    #[test]
    fn test_malformed_address() {
        let text = "0___;\n1___;\n2___;\n3___;\n4___;\n0x10; zz\n5___;\n";
        assert_eq!(
            parse_iommu_mappings(text),
            Err(Error::MalformedRecord {
                line: 6,
                reason: RecordError::InvalidInteger("zz".into()),
            })
        );

        let text = "0___;\n1___;\n2___;\n3___;\n4___;\n0x10\n5___;\n";
        assert_eq!(
            parse_iommu_mappings(text),
            Err(Error::MalformedRecord {
                line: 6,
                reason: RecordError::MissingField(1),
            })
        );
    }

    #[test]
    fn test_tlb_records() {
        let records = parse_tlb_records(CONFIG).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].phys, 0);
        assert_eq!(records[0].virt, 0x8000_0000);
        assert_eq!(
            records[0].flags,
            [TlbFlag::Global, TlbFlag::Valid, TlbFlag::Dirty, TlbFlag::Cacheable]
        );
        assert_eq!(
            records[1].flags,
            [
                TlbFlag::Global,
                TlbFlag::Valid,
                TlbFlag::Dirty,
                TlbFlag::Uncacheable
            ]
        );
    }

    #[test]
    fn test_tlb_unknown_flag() {
        let text = "a___;\nb___;\n0;0;4KB;v x\nc___;\n";
        assert_eq!(
            parse_tlb_records(text),
            Err(Error::MalformedRecord {
                line: 3,
                reason: RecordError::UnknownFlag("x".into()),
            })
        );
    }

    #[test]
    fn test_tlb_missing_flags() {
        let text = "a___;\nb___;\n0;0;4KB\nc___;\n";
        assert_eq!(
            parse_tlb_records(text),
            Err(Error::MalformedRecord {
                line: 3,
                reason: RecordError::MissingField(3),
            })
        );
    }
}
