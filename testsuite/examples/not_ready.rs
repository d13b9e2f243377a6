//! @test-uart: stalled
//!
//! The transmitter reports "not ready" for a few interrupts. The handler must leave the byte
//! queued and retry on the next interrupt instead of waiting.

#![no_std]
#![no_main]

use testsuite::{counters, entry, exception, exit_failure, exit_success, init_tx, service_tx, uart, wait_idle};

const STALLS: usize = 3;

#[entry]
fn main() -> ! {
    let Some(mut tx) = init_tx() else {
        exit_failure();
    };

    uart::stall(STALLS);
    let msg = b"stalled";
    if tx.write(msg) != msg.len() {
        exit_failure();
    }

    wait_idle(&tx);

    let c = counters();
    defmt::info!("not_ready: {}", c);
    if c.not_ready != STALLS || c.sent != msg.len() {
        exit_failure();
    }

    exit_success();
}

#[exception]
fn PendSV() {
    service_tx();
}

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    defmt::error!("{}", defmt::Display2Format(info));
    exit_failure();
}
