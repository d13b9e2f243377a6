//! @test-uart: Hello from irq-uart!
//!
//! Queues a line longer than the buffer and lets the transmit interrupt drain it.

#![no_std]
#![no_main]

use testsuite::{counters, entry, exception, exit_failure, exit_success, init_tx, service_tx, wait_idle};

#[entry]
fn main() -> ! {
    let Some(mut tx) = init_tx() else {
        exit_failure();
    };

    let msg = b"Hello from irq-uart!";
    let mut rest = &msg[..];
    while !rest.is_empty() {
        let n = tx.write(rest);
        rest = &rest[n..];
    }

    wait_idle(&tx);

    let c = counters();
    defmt::info!("basic: {}", c);
    if c.sent != msg.len() || c.rearms == 0 || c.idle == 0 {
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
