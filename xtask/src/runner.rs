//! Runs one testsuite example and checks it.
//!
//! An example passes when it exits through semihosting with success and UART0 carries exactly
//! the text of its `//! @test-uart:` header line. Its defmt log must also be free of `ERROR`
//! frames and end with a counter summary whose `sent` count matches the bytes seen on UART0,
//! since every UART0 byte goes out through the transmit interrupt.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

use crate::build::{build_example, example_source};
use crate::defmt;
use crate::qemu::run_qemu;

const UART_HEADER: &str = "//! @test-uart:";

/// Options for running an example.
pub struct RunOptions {
    /// Print the decoded log and UART output even on success (for `qemu` command).
    pub verbose: bool,
    /// Build in release mode.
    pub release: bool,
}

/// Expected UART0 text from the example's header, if it has one.
///
/// Looks in the first few lines only.
fn expected_uart(source: &Path) -> Result<Option<String>> {
    let content = fs::read_to_string(source)
        .with_context(|| format!("Failed to read {}", source.display()))?;
    Ok(content
        .lines()
        .take(10)
        .find_map(|line| line.strip_prefix(UART_HEADER))
        .map(|text| text.trim().to_owned()))
}

/// Run an example with the given options.
///
/// Returns `Ok(true)` if the test passed, `Ok(false)` if it failed.
pub fn run_example(example: &str, opts: &RunOptions) -> Result<bool> {
    let expected = expected_uart(&example_source(example)?)?;

    println!("Building '{example}'...");
    let elf_path = build_example(example, opts.release)?;

    println!("Running in QEMU...");
    let output = run_qemu(&elf_path)?;
    let log = defmt::decode_output(example, &elf_path, &output.semihosting)?;
    let uart0 = String::from_utf8_lossy(&output.uart0);

    let uart_ok = expected.as_deref().is_none_or(|e| e == uart0);
    let counters_ok = log
        .counters
        .is_some_and(|c| c.sent == output.uart0.len() && c.rearms > 0);
    let passed = output.success && uart_ok && log.errors == 0 && counters_ok;

    if opts.verbose || !passed {
        println!("--- log ({} frames) ---", log.frames);
        print!("{}", log.text);
        println!("--- uart0 ---");
        println!("{uart0}");
        if !output.stderr.is_empty() {
            println!("--- qemu ---");
            print!("{}", output.stderr);
        }
    }

    if !output.success {
        println!("  FAIL: example exited with failure");
    } else if log.errors > 0 {
        println!("  FAIL: {} error frames in the log", log.errors);
    } else if !counters_ok {
        match log.counters {
            Some(c) => println!(
                "  FAIL: {} bytes on UART0, handler sent {}, not ready {}, idle {}, re-arms {}",
                output.uart0.len(),
                c.sent,
                c.not_ready,
                c.idle,
                c.rearms
            ),
            None => println!("  FAIL: no `{example}: Counters` summary in the log"),
        }
    } else if !uart_ok {
        println!("  FAIL: UART0 output differs from expected");
        println!("--- expected ---");
        println!("{}", expected.unwrap_or_default());
    } else {
        println!("  PASS");
    }

    Ok(passed)
}
