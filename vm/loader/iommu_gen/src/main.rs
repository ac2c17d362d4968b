// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Generates the static IOMMU page table linked into firmware.
//!
//! Reads the IOMMU section of the mapping configuration, builds the
//! multi-level table for the requested leaf page size and writes it out as a
//! C++ array placed in the `.iommu_table` section.

mod emit;

use anyhow::Context;
use clap::Parser;
use iommu_table::IommuTableBuilder;
use iommu_table::LeafPageSize;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(name = "iommu_gen", about = "Generate a static IOMMU page table")]
struct Options {
    /// Enable verbose logging (trace level)
    #[clap(short = 'v', long)]
    verbose: bool,

    /// Path to the mapping configuration
    #[clap(short = 'c', long, alias = "config_path", default_value = "config.csv")]
    config_path: PathBuf,

    /// Path of the generated C++ source
    #[clap(
        short = 'r',
        long,
        alias = "cpp_res_path",
        default_value = "iommu_table.cpp"
    )]
    cpp_res_path: PathBuf,

    /// Also write the raw little endian table image to this path
    #[clap(long)]
    bin_res_path: Option<PathBuf>,

    /// Leaf page size, one of 512GB, 1GB, 2MB, 4KB
    #[clap(short = 'p', long, alias = "page_size", default_value = "2MB")]
    page_size: String,

    /// Unmapped segment as start_address:end_address
    #[clap(short = 'u', long, alias = "unmap_seg", default_value = "0:0")]
    unmap_seg: String,

    /// Address the table is linked at
    #[clap(
        short = 'b',
        long,
        alias = "table_addr",
        default_value = "0xcbff8000",
        value_parser = parse_address
    )]
    table_addr: u64,

    /// Width of the physical address in bits
    #[clap(long, alias = "pa_power", default_value_t = 32)]
    pa_power: u32,

    /// Width of the IOMMU physical address in bits
    #[clap(long, alias = "iommu_power", default_value_t = 40)]
    iommu_power: u32,

    /// Write mapped physical addresses unmodified (pa.ppn = va.vpn + pte.ppn)
    #[clap(long, alias = "noelv_mode")]
    noelv_mode: bool,
}

fn parse_address(s: &str) -> Result<u64, String> {
    mmu_config::parse_u64(s).ok_or_else(|| format!("invalid address {s:?}"))
}

fn parse_segment(s: &str) -> anyhow::Result<(u64, u64)> {
    let (start, end) = s
        .trim()
        .split_once(':')
        .with_context(|| format!("unmapped segment {s:?} is not start:end"))?;
    let start = parse_address(start).map_err(anyhow::Error::msg)?;
    let end = parse_address(end).map_err(anyhow::Error::msg)?;
    Ok((start, end))
}

fn main() -> anyhow::Result<()> {
    let opts = Options::parse();

    tracing_subscriber::fmt()
        .log_internal_errors(true)
        .with_max_level(if opts.verbose {
            tracing::Level::TRACE
        } else {
            tracing::Level::INFO
        })
        .init();

    let page_size: LeafPageSize = opts.page_size.parse()?;
    let (unmap_start, unmap_end) = parse_segment(&opts.unmap_seg)?;
    tracing::debug!(start = unmap_start, end = unmap_end, "unmapped segment");

    let config = fs_err::read_to_string(&opts.config_path)?;
    let mappings = mmu_config::parse_iommu_mappings(&config)
        .with_context(|| format!("failed to parse {}", opts.config_path.display()))?;

    let table = IommuTableBuilder::new(opts.table_addr, page_size)
        .with_pa_width(opts.pa_power)
        .with_iommu_width(opts.iommu_power)
        .with_noelv_mode(opts.noelv_mode)
        .build(mappings.iter())
        .context("failed to build iommu table")?;

    let cpp = emit::render_cpp(&table).context("failed to render iommu table")?;
    fs_err::write(&opts.cpp_res_path, cpp)?;
    if let Some(path) = &opts.bin_res_path {
        fs_err::write(path, table.as_bytes())?;
    }

    tracing::info!(
        pages = table.page_count(),
        mappings = mappings.len(),
        path = %opts.cpp_res_path.display(),
        "wrote iommu table"
    );

    Ok(())
}
