//! QEMU runner for Cortex-M3 emulation.

use std::fs;
use std::path::Path;
use std::process::{Command, Stdio};

use anyhow::{Context, Result};
use tempfile::NamedTempFile;

/// Output from running QEMU.
pub struct QemuOutput {
    /// Whether the program exited through semihosting with success.
    pub success: bool,
    /// defmt output from semihosting (stdout).
    pub semihosting: Vec<u8>,
    /// Bytes the driver transmitted on UART0.
    pub uart0: Vec<u8>,
    /// QEMU's own diagnostics.
    pub stderr: String,
}

/// Run an ELF on the LM3S6965 board, capturing UART0 to a file.
pub fn run_qemu(elf_path: &Path) -> Result<QemuOutput> {
    let uart0_file = NamedTempFile::new().context("Failed to create temp file for UART0")?;
    let uart0_path = uart0_file.path();

    let output = Command::new("qemu-system-arm")
        .arg("-cpu")
        .arg("cortex-m3")
        .arg("-machine")
        .arg("lm3s6965evb")
        .arg("-nographic")
        .arg("-monitor")
        .arg("none")
        .arg("-semihosting-config")
        .arg("enable=on,target=native")
        .arg("-serial")
        .arg(format!("file:{}", uart0_path.display()))
        .arg("-kernel")
        .arg(elf_path)
        .stdin(Stdio::null())
        .output()
        .context("Failed to run QEMU")?;

    let uart0 = fs::read(uart0_path).unwrap_or_default();

    Ok(QemuOutput {
        success: output.status.success(),
        semihosting: output.stdout,
        uart0,
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}
