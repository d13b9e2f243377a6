//! Line state shared between the transmit handler and the producer, and the producer handle.

use core::{
    fmt,
    sync::atomic::{AtomicBool, Ordering, fence},
};

use crate::ring_buffer::{BufferFull, Producer};

/// Software state of the transmit line.
pub struct LineState {
    /// Set when the handler has just written a byte and expects another transmit interrupt,
    /// cleared when it finds the buffer empty.
    ///
    /// Only ever stored by the [`crate::TxHandler`]. Everyone else only loads it and must
    /// tolerate a stale value.
    pending: AtomicBool,
    #[cfg(feature = "async-await")]
    waker: crate::atomic_waker::AtomicWaker,
}

impl LineState {
    /// Creates the state of an idle line.
    pub const fn new() -> Self {
        LineState {
            pending: AtomicBool::new(false),
            #[cfg(feature = "async-await")]
            waker: crate::atomic_waker::AtomicWaker::new(),
        }
    }

    /// Whether the handler expects to still be servicing transmission.
    #[inline]
    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::SeqCst)
    }

    /// SeqCst: pairs with the producer's fence in [`Sender::kick`], see
    /// [`crate::TxHandler::on_interrupt`].
    #[inline]
    pub(crate) fn set_pending(&self, pending: bool) {
        self.pending.store(pending, Ordering::SeqCst);
    }

    #[inline]
    pub(crate) fn wake(&self) {
        #[cfg(feature = "async-await")]
        self.waker.wake();
    }
}

impl Default for LineState {
    fn default() -> Self {
        Self::new()
    }
}

/// Solicits the next transmit interrupt once the line has gone idle.
///
/// Typically pends the UART interrupt in the interrupt controller or enables the peripheral's
/// transmit interrupt. Must be callable from the producer's context and may be called again
/// before the interrupt was taken.
pub trait Rearm {
    /// Re-arms the transmit interrupt.
    fn rearm(&self);
}

impl<F: Fn()> Rearm for F {
    #[inline]
    fn rearm(&self) {
        self()
    }
}

/// The producer side of a transmit line.
///
/// Enqueues bytes for the handler and re-arms the transmit interrupt whenever, after publishing
/// a byte, it sees that the handler is no longer expecting one.
pub struct Sender<'a, const N: usize, A> {
    producer: Producer<'a, N>,
    state: &'a LineState,
    rearm: A,
}

impl<'a, const N: usize, A: Rearm> Sender<'a, N, A> {
    pub(crate) fn new(producer: Producer<'a, N>, state: &'a LineState, rearm: A) -> Self {
        Sender {
            producer,
            state,
            rearm,
        }
    }

    /// Queues one byte for transmission.
    ///
    /// # Errors
    ///
    /// Returns [`BufferFull`] when `N` bytes are already queued; nothing is queued then.
    pub fn enqueue(&mut self, byte: u8) -> Result<(), BufferFull> {
        self.producer.enqueue(byte)?;
        self.kick();
        Ok(())
    }

    /// Queues as many leading bytes of `data` as fit and returns how many that was.
    pub fn write(&mut self, data: &[u8]) -> usize {
        let n = self.producer.write(data);
        if n > 0 {
            self.kick();
        }
        n
    }

    /// Re-arms the line if the handler has gone idle.
    ///
    /// Runs after the new `tail` was published. The fence orders that store before the load of
    /// `pending`; the handler orders its store of `pending` before its re-check of the buffer
    /// the same way, so at least one side sees the other.
    fn kick(&self) {
        fence(Ordering::SeqCst);
        if !self.state.is_pending() {
            #[cfg(feature = "defmt")]
            defmt::trace!("tx idle, re-arming ({=usize} queued)", self.producer.len());
            self.rearm.rearm();
        }
    }

    /// Whether the handler expects to still be servicing transmission.
    #[inline]
    pub fn is_pending(&self) -> bool {
        self.state.is_pending()
    }

    /// Number of bytes queued and not yet handed to the hardware.
    #[inline]
    pub fn len(&self) -> usize {
        self.producer.len()
    }

    /// Returns `true` if every queued byte has been handed to the hardware.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.producer.is_empty()
    }

    /// Returns `true` if the next [`Sender::enqueue`] would fail.
    #[inline]
    pub fn is_full(&self) -> bool {
        self.producer.is_full()
    }

    /// Number of bytes the buffer can hold.
    #[inline]
    pub const fn capacity(&self) -> usize {
        N
    }

    #[cfg(feature = "async-await")]
    /// Waits until at least one byte can be queued.
    pub async fn wait_for_space(&mut self) {
        core::future::poll_fn(|cx| {
            self.state.waker.register(cx.waker());

            if self.producer.is_full() {
                core::task::Poll::Pending
            } else {
                core::task::Poll::Ready(())
            }
        })
        .await
    }

    #[cfg(feature = "async-await")]
    /// Queues all of `data`, waiting for space as the handler drains the buffer.
    pub async fn write_all(&mut self, mut data: &[u8]) {
        while !data.is_empty() {
            self.wait_for_space().await;
            let n = self.write(data);
            data = &data[n..];
        }
    }

    #[cfg(feature = "async-await")]
    /// Waits until every queued byte has been handed to the hardware.
    ///
    /// The last byte may still be shifting out when this returns.
    pub async fn flush(&mut self) {
        core::future::poll_fn(|cx| {
            self.state.waker.register(cx.waker());

            if self.producer.is_empty() {
                core::task::Poll::Ready(())
            } else {
                core::task::Poll::Pending
            }
        })
        .await
    }
}

/// Queues the formatted text, failing if it did not fit completely.
impl<const N: usize, A: Rearm> fmt::Write for Sender<'_, N, A> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        if self.write(s.as_bytes()) == s.len() {
            Ok(())
        } else {
            Err(fmt::Error)
        }
    }
}

#[cfg(test)]
mod test {
    use core::cell::Cell;
    use core::fmt::Write as _;

    use crate::ring_buffer::RingBuffer;

    use super::*;

    #[test]
    fn rearms_while_idle() {
        let mut rb = RingBuffer::<4>::new();
        let (p, _c) = rb.split();
        let state = LineState::new();
        let rearms = Cell::new(0);
        let mut s = Sender::new(p, &state, || rearms.set(rearms.get() + 1));

        s.enqueue(1).unwrap();
        assert_eq!(rearms.get(), 1);
        s.enqueue(2).unwrap();
        assert_eq!(rearms.get(), 2);
    }

    #[test]
    fn no_rearm_while_pending() {
        let mut rb = RingBuffer::<4>::new();
        let (p, _c) = rb.split();
        let state = LineState::new();
        state.set_pending(true);
        let rearms = Cell::new(0);
        let mut s = Sender::new(p, &state, || rearms.set(rearms.get() + 1));

        s.enqueue(1).unwrap();
        assert_eq!(s.write(b"ab"), 2);
        assert_eq!(rearms.get(), 0);
        assert!(s.is_pending());
    }

    #[test]
    fn full_buffer_does_not_rearm() {
        let mut rb = RingBuffer::<2>::new();
        let (p, _c) = rb.split();
        let state = LineState::new();
        state.set_pending(true);
        let rearms = Cell::new(0);
        let mut s = Sender::new(p, &state, || rearms.set(rearms.get() + 1));

        assert_eq!(s.write(b"xy"), 2);
        state.set_pending(false);
        assert_eq!(s.enqueue(b'z'), Err(BufferFull));
        assert_eq!(s.write(b"z"), 0);
        assert_eq!(rearms.get(), 0);
        assert_eq!(s.len(), 2);
    }

    #[test]
    fn fmt_write_reports_truncation() {
        let mut rb = RingBuffer::<8>::new();
        let (p, mut c) = rb.split();
        let state = LineState::new();
        let mut s = Sender::new(p, &state, || {});

        assert!(write!(s, "n={}", 42).is_ok());
        assert!(write!(s, "long!").is_err());
        assert!(s.is_full());

        let mut out = [0; 8];
        for b in &mut out {
            *b = c.dequeue().unwrap();
        }
        assert_eq!(&out, b"n=42long");
    }
}
