//! `defmt` global logger writing encoded frames to semihosting stdout.
//!
//! The xtask captures QEMU's stdout and decodes it against the example's ELF.

use core::{
    cell::UnsafeCell,
    sync::atomic::{AtomicUsize, Ordering, compiler_fence},
};
use cortex_m_semihosting::hio::{self, HostStream};
use critical_section::RestoreState;
use defmt::Encoder;

#[defmt::global_logger]
struct Logger;

struct LoggerState {
    cs_state: UnsafeCell<RestoreState>,
    encoder: UnsafeCell<Encoder>,
    stdout: UnsafeCell<Option<HostStream>>,
    /// Nesting depth. 0 = not logging, 1 = logging, 2+ = nested. Nested frames (a panic while
    /// formatting, a log from an exception) are dropped.
    depth: AtomicUsize,
}

// SAFETY: All fields except `depth` are only accessed inside the critical section entered in
// `acquire` and left in `release`.
unsafe impl Sync for LoggerState {}

static STATE: LoggerState = LoggerState {
    cs_state: UnsafeCell::new(RestoreState::invalid()),
    encoder: UnsafeCell::new(Encoder::new()),
    stdout: UnsafeCell::new(None),
    depth: AtomicUsize::new(0),
};

/// Writes encoded bytes to semihosting stdout.
///
/// # Safety
///
/// Must be called from within the logger's critical section.
unsafe fn write_stdout(bytes: &[u8]) {
    // SAFETY: Caller guarantees we're in the critical section.
    let handle = unsafe { &mut *STATE.stdout.get() };

    // Lazily open stdout once, reopening would truncate it.
    if handle.is_none() {
        *handle = hio::hstdout().ok();
    }

    if let Some(stdout) = handle {
        let _ = stdout.write_all(bytes);
    }
}

// SAFETY: This impl upholds the `defmt::Logger` safety contract:
// - `acquire` enters a critical section before touching the encoder.
// - `release` exits it after the frame is complete.
// - Nested calls are detected through `depth` and dropped.
unsafe impl defmt::Logger for Logger {
    fn acquire() {
        if STATE.depth.fetch_add(1, Ordering::Acquire) > 0 {
            return;
        }

        // SAFETY: Released in `release()`, defmt guarantees balanced acquire/release calls.
        let restore = unsafe { critical_section::acquire() };

        compiler_fence(Ordering::SeqCst);

        // SAFETY: We're in the critical section, so exclusive access is guaranteed.
        unsafe { STATE.cs_state.get().write(restore) };

        // SAFETY: We're in the critical section, so exclusive access is guaranteed. The callback
        // runs inside it too.
        unsafe { &mut *STATE.encoder.get() }.start_frame(|b| unsafe { write_stdout(b) });
    }

    unsafe fn flush() {}

    unsafe fn release() {
        if STATE.depth.fetch_sub(1, Ordering::Release) != 1 {
            return;
        }

        // SAFETY: We're still in the critical section from `acquire()`.
        unsafe { &mut *STATE.encoder.get() }.end_frame(|b| unsafe { write_stdout(b) });

        compiler_fence(Ordering::SeqCst);

        // SAFETY: Restores the state saved in `acquire()`.
        unsafe { critical_section::release(STATE.cs_state.get().read()) };
    }

    unsafe fn write(bytes: &[u8]) {
        if STATE.depth.load(Ordering::Relaxed) != 1 {
            return;
        }

        // SAFETY: Caller (defmt) guarantees this runs between acquire() and release().
        unsafe { &mut *STATE.encoder.get() }.write(bytes, |b| unsafe { write_stdout(b) });
    }
}
