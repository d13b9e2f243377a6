#![no_std]

mod logger;
pub mod uart;

use core::cell::RefCell;
use core::future::Future;
use core::pin::pin;
use core::sync::atomic::{AtomicUsize, Ordering};
use core::task::{Context, Poll, Waker};

use cortex_m::peripheral::SCB;
use cortex_m_semihosting::debug::{self, EXIT_FAILURE, EXIT_SUCCESS};
use critical_section::Mutex;
use irq_uart::{Sender, TxEvent, TxHandler, TxLine};

pub use cortex_m_rt::{entry, exception};

use uart::IrqUart;

/// Capacity of the test line's buffer.
pub const CAPACITY: usize = 16;

/// Sender half of the test line.
pub type TxSender = Sender<'static, CAPACITY, fn()>;

/// Handler half of the test line, owned by the PendSV exception.
static HANDLER: Mutex<RefCell<Option<TxHandler<'static, CAPACITY, IrqUart>>>> =
    Mutex::new(RefCell::new(None));

static SENT: AtomicUsize = AtomicUsize::new(0);
static NOT_READY: AtomicUsize = AtomicUsize::new(0);
static IDLE: AtomicUsize = AtomicUsize::new(0);
static REARMS: AtomicUsize = AtomicUsize::new(0);

/// Handler outcomes observed so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub struct Counters {
    /// Interrupts that wrote a byte.
    pub sent: usize,
    /// Interrupts that found data but a busy transmitter.
    pub not_ready: usize,
    /// Interrupts that found the buffer empty.
    pub idle: usize,
    /// Re-arms requested by the sender.
    pub rearms: usize,
}

/// Snapshot of the handler outcome counters.
pub fn counters() -> Counters {
    Counters {
        sent: SENT.load(Ordering::SeqCst),
        not_ready: NOT_READY.load(Ordering::SeqCst),
        idle: IDLE.load(Ordering::SeqCst),
        rearms: REARMS.load(Ordering::SeqCst),
    }
}

fn rearm() {
    REARMS.fetch_add(1, Ordering::SeqCst);
    SCB::set_pendsv();
}

/// Sets up UART0's transmit line and installs its handler for [`service_tx`].
///
/// Returns `None` if called more than once.
pub fn init_tx() -> Option<TxSender> {
    let line = cortex_m::singleton!(: TxLine<CAPACITY> = TxLine::new())?;
    // SAFETY: The singleton above makes this the only call that gets here.
    let uart = unsafe { IrqUart::take() };
    let (tx, handler) = line.split(uart, rearm as fn());
    critical_section::with(|cs| HANDLER.borrow_ref_mut(cs).replace(handler));
    Some(tx)
}

/// Runs the transmit handler. Call from the PendSV exception.
pub fn service_tx() {
    let event = critical_section::with(|cs| {
        HANDLER
            .borrow_ref_mut(cs)
            .as_mut()
            .map(|h| h.on_interrupt())
    });

    let counter = match event {
        Some(TxEvent::Sent(_)) => &SENT,
        Some(TxEvent::NotReady) => &NOT_READY,
        Some(TxEvent::Idle) => &IDLE,
        None => return,
    };
    counter.fetch_add(1, Ordering::SeqCst);
}

/// Spins until the handler has gone idle with nothing queued.
pub fn wait_idle(tx: &TxSender) {
    while !tx.is_empty() || tx.is_pending() {
        cortex_m::asm::nop();
    }
}

/// Ends the QEMU run with a success exit code.
pub fn exit_success() -> ! {
    debug::exit(EXIT_SUCCESS);
    #[allow(clippy::empty_loop)]
    loop {}
}

/// Ends the QEMU run with a failure exit code.
pub fn exit_failure() -> ! {
    debug::exit(EXIT_FAILURE);
    #[allow(clippy::empty_loop)]
    loop {}
}

/// Minimal block_on executor for testing.
pub fn block_on<F: Future>(fut: F) -> F::Output {
    let mut fut = pin!(fut);
    let mut cx = Context::from_waker(Waker::noop());

    loop {
        match fut.as_mut().poll(&mut cx) {
            Poll::Ready(val) => return val,
            Poll::Pending => {
                cortex_m::asm::nop();
            }
        }
    }
}
