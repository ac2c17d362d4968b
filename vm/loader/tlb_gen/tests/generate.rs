// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! End to end runs of the tlb_gen binary.

use std::path::Path;
use std::process::Command;
use std::process::Output;

const CONFIG: &str = "\
MMU configuration___;
TLB entries___;
0x0000_0000; 0x8000_0000; 16MB; g v d c
0x0100_0000 (uart); 0xa100_0000; 16MB; G V D
___;
";

const TEMPLATE: &str = "\
    li    t0, $tlb_page_size# mask
    li    t1, ${virt_addr_mask}# vpn2
    # $tlb_page_size_bytes KB pages, $$ kept
    $macros_call
    mtc0  $wired, $$6
";

fn run(dir: &Path, template: &str, args: &[&str]) -> Output {
    fs_err::write(dir.join("config.csv"), CONFIG).unwrap();
    fs_err::write(dir.join("asm_template.S"), template).unwrap();
    Command::new(env!("CARGO_BIN_EXE_tlb_gen"))
        .current_dir(dir)
        .args(args)
        .output()
        .unwrap()
}

#[test]
fn expands_template() {
    let dir = tempfile::tempdir().unwrap();
    let output = run(dir.path(), TEMPLATE, &["-w", "2"]);
    assert!(output.status.success(), "{output:?}");

    let asm = fs_err::read_to_string(dir.path().join("asm.S")).unwrap();
    let expected = "\
    li    t0, 0x01ffe000      # mask
    li    t1, 0xfe000000       # vpn2
    # 16384 KB pages, $ kept
    tlb_entry_init 0x00000000 0x01ffe000 0x80000000 0x00000007 0x00040007
    tlb_entry_init 0x00000001 0x01ffe000 0xa1000000 0x0004003f 0x0008003f
    mtc0  2, $6
";
    assert_eq!(asm, expected);
}

#[test]
fn out_of_range_wired_falls_back() {
    let dir = tempfile::tempdir().unwrap();
    let output = run(dir.path(), "$wired", &["--wired", "16"]);
    assert!(output.status.success(), "{output:?}");
    assert_eq!(
        fs_err::read_to_string(dir.path().join("asm.S")).unwrap(),
        "8"
    );
}

#[test]
fn unknown_page_size_fails() {
    let dir = tempfile::tempdir().unwrap();
    let output = run(dir.path(), TEMPLATE, &["-p", "8"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("unsupported tlb page size"));
    assert!(!dir.path().join("asm.S").exists());
}

#[test]
fn unknown_placeholder_fails() {
    let dir = tempfile::tempdir().unwrap();
    let output = run(dir.path(), "$nope", &[]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("no value for placeholder"));
    assert!(!dir.path().join("asm.S").exists());
}
