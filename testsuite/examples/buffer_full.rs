//! @test-uart: 0123456789abcdef
//!
//! Fills the buffer with interrupts masked, checks that the next byte is rejected, then lets
//! the handler drain it. Every accepted byte re-arms, since the handler never got to run.

#![no_std]
#![no_main]

use irq_uart::BufferFull;
use testsuite::{CAPACITY, counters, entry, exception, exit_failure, exit_success, init_tx, service_tx, wait_idle};

#[entry]
fn main() -> ! {
    let Some(mut tx) = init_tx() else {
        exit_failure();
    };

    let (overflow, queued, pending) = critical_section::with(|_| {
        for &b in b"0123456789abcdef" {
            if tx.enqueue(b).is_err() {
                exit_failure();
            }
        }
        (tx.enqueue(b'!'), tx.len(), tx.is_pending())
    });

    defmt::info!("buffer_full: overflow {}, {=usize} queued", overflow, queued);
    if overflow != Err(BufferFull) || queued != CAPACITY || pending {
        exit_failure();
    }

    wait_idle(&tx);

    let c = counters();
    defmt::info!("buffer_full: {}", c);
    if c.sent != CAPACITY || c.rearms != CAPACITY {
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
