//! Decoding of the examples' defmt log.
//!
//! Besides the text, the decoder picks out the two things the runner checks: `ERROR` frames
//! (panics end up there) and the handler counter summary each example logs as
//! `<example>: Counters { .. }`.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow, bail};
use defmt_decoder::{DecodeError, Frame, Locations, Table};

/// Transmit handler outcomes as logged by the testsuite's `Counters`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Counters {
    pub sent: usize,
    pub not_ready: usize,
    pub idle: usize,
    pub rearms: usize,
}

impl Counters {
    /// Parses `<example>: Counters { sent: 1, not_ready: 0, idle: 1, rearms: 1 }`.
    fn parse(example: &str, message: &str) -> Option<Counters> {
        let body = message
            .strip_prefix(example)?
            .strip_prefix(": Counters {")?
            .strip_suffix('}')?;

        let mut counters = Counters::default();
        for field in body.split(',') {
            let (name, value) = field.split_once(':')?;
            let value = value.trim().parse().ok()?;
            match name.trim() {
                "sent" => counters.sent = value,
                "not_ready" => counters.not_ready = value,
                "idle" => counters.idle = value,
                "rearms" => counters.rearms = value,
                _ => return None,
            }
        }
        Some(counters)
    }
}

/// A decoded example log.
pub struct DecodedLog {
    /// One line per frame.
    pub text: String,
    pub frames: usize,
    pub errors: usize,
    /// The last counter summary logged by the example.
    pub counters: Option<Counters>,
}

/// Decodes the raw defmt stream `example` wrote to semihosting stdout.
pub fn decode_output(example: &str, elf_path: &Path, raw_output: &[u8]) -> Result<DecodedLog> {
    let elf_data = fs::read(elf_path).context("Failed to read ELF file")?;
    let table = Table::parse(&elf_data)
        .context("Failed to parse defmt table from ELF")?
        .ok_or_else(|| anyhow!("No defmt data found in ELF"))?;

    let locs = table.get_locations(&elf_data).ok();

    let mut decoder = table.new_stream_decoder();
    decoder.received(raw_output);

    let mut log = DecodedLog {
        text: String::new(),
        frames: 0,
        errors: 0,
        counters: None,
    };
    loop {
        match decoder.decode() {
            Ok(frame) => {
                let message = frame.display_message().to_string();
                if frame.level().map(|l| l.as_str()) == Some("error") {
                    log.errors += 1;
                }
                if let Some(counters) = Counters::parse(example, &message) {
                    log.counters = Some(counters);
                }
                log.text.push_str(&format_frame(&frame, &message, locs.as_ref()));
                log.text.push('\n');
                log.frames += 1;
            }
            Err(DecodeError::UnexpectedEof) => break,
            Err(DecodeError::Malformed) => {
                bail!(
                    "Malformed defmt frame after {} frames:\n{}",
                    log.frames,
                    log.text
                );
            }
        }
    }

    Ok(log)
}

fn format_frame(frame: &Frame, message: &str, locs: Option<&Locations>) -> String {
    let level = frame
        .level()
        .map(|l| l.as_str())
        .unwrap_or("print")
        .to_uppercase();

    // File name and line only, the full path differs between machines.
    let loc = locs.and_then(|locs| locs.get(&frame.index())).map(|loc| {
        let file = loc
            .file
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_else(|| loc.file.display().to_string());
        format!("{file}:{}", loc.line)
    });

    match loc {
        Some(loc) => format!("{loc}: [{level:<5}] {message}"),
        None => format!("[{level:<5}] {message}"),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_counter_summary() {
        let c = Counters::parse(
            "not_ready",
            "not_ready: Counters { sent: 7, not_ready: 3, idle: 1, rearms: 1 }",
        );
        assert_eq!(
            c,
            Some(Counters {
                sent: 7,
                not_ready: 3,
                idle: 1,
                rearms: 1
            })
        );
    }

    #[test]
    fn ignores_other_examples_and_messages() {
        let line = "basic: Counters { sent: 1, not_ready: 0, idle: 1, rearms: 1 }";
        assert_eq!(Counters::parse("async_write", line), None);
        assert_eq!(Counters::parse("basic", "basic: started"), None);
        assert_eq!(
            Counters::parse("basic", "basic: Counters { sent: x, idle: 1 }"),
            None
        );
    }
}
