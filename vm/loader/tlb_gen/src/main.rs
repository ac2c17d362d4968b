// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Generates the assembly that preloads fixed TLB entries.
//!
//! Reads the TLB section of the mapping configuration and substitutes the
//! resulting `tlb_entry_init` macro calls and register values into an
//! assembly template.

mod template;
mod tlb;

use anyhow::Context;
use clap::Parser;
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(name = "tlb_gen", about = "Generate fixed TLB entry initialization")]
struct Options {
    /// Enable verbose logging (trace level)
    #[clap(short = 'v', long)]
    verbose: bool,

    /// Path to the mapping configuration
    #[clap(short = 'c', long, alias = "config_path", default_value = "config.csv")]
    config_path: PathBuf,

    /// Path to the assembly template
    #[clap(
        short = 't',
        long,
        alias = "template_path",
        default_value = "asm_template.S"
    )]
    template_path: PathBuf,

    /// Path of the generated assembly
    #[clap(short = 'r', long, alias = "asm_res_path", default_value = "asm.S")]
    asm_res_path: PathBuf,

    /// TLB page size in KB, one of 4, 16, 64, 256, 1024, 4096, 16384
    #[clap(short = 'p', long, alias = "page_size", default_value_t = 16384)]
    page_size: u64,

    /// Value of the wired register, 1 to 15
    #[clap(short = 'w', long, default_value_t = tlb::DEFAULT_WIRED)]
    wired: u32,
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

    let page_mask = tlb::page_mask(opts.page_size)
        .with_context(|| format!("unsupported tlb page size {}KB", opts.page_size))?;
    let wired = tlb::wired(opts.wired);
    if wired != opts.wired {
        tracing::warn!(requested = opts.wired, wired, "wired value out of range");
    }

    let config = fs_err::read_to_string(&opts.config_path)?;
    let records = mmu_config::parse_tlb_records(&config)
        .with_context(|| format!("failed to parse {}", opts.config_path.display()))?;
    if records.len() > tlb::TLB_ENTRY_COUNT {
        tracing::warn!(
            records = records.len(),
            "only the first {} tlb records are used",
            tlb::TLB_ENTRY_COUNT
        );
    }

    let calls = tlb::macro_calls(&records, page_mask);
    for call in &calls {
        tracing::debug!("{call}");
    }

    let values = HashMap::from([
        ("tlb_page_size", format!("0x{page_mask:08x}      ")),
        ("tlb_page_size_bytes", opts.page_size.to_string()),
        (
            "virt_addr_mask",
            format!("0x{:08x}       ", tlb::virt_addr_mask(page_mask)),
        ),
        ("macros_call", calls.join("\n    ")),
        ("wired", wired.to_string()),
    ]);

    let template = fs_err::read_to_string(&opts.template_path)?;
    let asm = template::substitute(&template, &values)
        .with_context(|| format!("failed to expand {}", opts.template_path.display()))?;
    fs_err::write(&opts.asm_res_path, asm)?;

    tracing::info!(
        entries = calls.len(),
        path = %opts.asm_res_path.display(),
        "wrote tlb initialization"
    );

    Ok(())
}
