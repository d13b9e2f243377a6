//! @test-uart: The quick brown fox jumps over the lazy dog
//!
//! Writes more than the buffer holds through the async API and waits for the drain.

#![no_std]
#![no_main]

use testsuite::{block_on, counters, entry, exception, exit_failure, exit_success, init_tx, service_tx};

const MSG: &[u8] = b"The quick brown fox jumps over the lazy dog";

#[entry]
fn main() -> ! {
    let Some(mut tx) = init_tx() else {
        exit_failure();
    };

    block_on(async {
        tx.write_all(MSG).await;
        tx.flush().await;
    });

    if !tx.is_empty() {
        exit_failure();
    }

    let c = counters();
    defmt::info!("async_write: {}", c);
    if c.sent != MSG.len() {
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
