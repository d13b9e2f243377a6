//! Interrupt-driven UART0 for the LM3S6965 (QEMU testing only).
//!
//! QEMU's PL011 accepts bytes instantly, and the examples have no device crate to bind the
//! UART0 vector, so the PendSV exception plays the transmit interrupt:
//! - a write to the data register pends PendSV, as the peripheral would raise its TX interrupt
//!   once the byte is out,
//! - a not-ready sample pends PendSV, as the peripheral would once it becomes ready,
//! - the sender's re-arm pends PendSV.
//!
//! QEMU serial port mapping: the first `-serial` argument is UART0.

use core::sync::atomic::{AtomicUsize, Ordering};

use cortex_m::peripheral::SCB;
use irq_uart::{MmioUart, TxRegister, UartLayout};

/// Base address of UART0.
pub const UART0_BASE: usize = 0x4000_C000;

/// Remaining readiness samples to report as not ready.
static STALL: AtomicUsize = AtomicUsize::new(0);

/// Makes the next `samples` readiness checks report "not ready", as if the transmitter were
/// still busy.
pub fn stall(samples: usize) {
    STALL.store(samples, Ordering::SeqCst);
}

/// UART0 with PendSV standing in for its transmit interrupt.
pub struct IrqUart {
    inner: MmioUart,
}

impl IrqUart {
    /// Takes UART0.
    ///
    /// # Safety
    ///
    /// Must be called at most once, nothing else may write UART0's data register.
    pub unsafe fn take() -> Self {
        IrqUart {
            // SAFETY: Fixed, aligned PL011 register block; exclusivity is up to the caller.
            inner: unsafe { MmioUart::new(UART0_BASE, UartLayout::PL011) },
        }
    }
}

impl TxRegister for IrqUart {
    fn status(&mut self) -> u32 {
        self.inner.status()
    }

    fn is_tx_ready(&mut self) -> bool {
        let stalled = STALL
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if stalled {
            SCB::set_pendsv();
            return false;
        }
        self.inner.is_tx_ready()
    }

    fn write_data(&mut self, byte: u8) {
        self.inner.write_data(byte);
        SCB::set_pendsv();
    }
}
