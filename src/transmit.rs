//! The transmit interrupt handler.

use core::sync::atomic::{Ordering, fence};

use crate::line::LineState;
use crate::register::TxRegister;
use crate::ring_buffer::Consumer;

/// What one [`TxHandler::on_interrupt`] call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TxEvent {
    /// The byte was written to the data register; another interrupt is expected.
    Sent(u8),
    /// Data is queued but the hardware was not ready. Nothing was dequeued and the pending flag
    /// has the value it had before the call.
    NotReady,
    /// The buffer was empty; the line is idle until the producer re-arms it.
    Idle,
}

/// Drains the transmit buffer into the hardware, one byte per interrupt.
///
/// Owns the consumer half of the buffer and the transmit register. Move it into whatever the
/// interrupt registration captures and call [`TxHandler::on_interrupt`] from the transmit
/// interrupt.
pub struct TxHandler<'a, const N: usize, R> {
    consumer: Consumer<'a, N>,
    state: &'a LineState,
    regs: R,
}

impl<'a, const N: usize, R: TxRegister> TxHandler<'a, N, R> {
    pub(crate) fn new(consumer: Consumer<'a, N>, state: &'a LineState, regs: R) -> Self {
        TxHandler {
            consumer,
            state,
            regs,
        }
    }

    /// Services one transmit interrupt.
    ///
    /// Never blocks and never waits for the hardware: if it is not ready, the next interrupt
    /// retries.
    pub fn on_interrupt(&mut self) -> TxEvent {
        // The status bits may clear on read, so this read is for the log only and readiness is
        // sampled again right before the write.
        let _status = self.regs.status();
        #[cfg(feature = "defmt")]
        defmt::trace!("tx irq, status {=u32:#x}", _status);

        if self.consumer.has_data() {
            return self.send_next();
        }

        let was_pending = self.state.is_pending();
        self.state.set_pending(false);

        // A byte published after the check above may have been followed by the producer
        // reading `pending` before the store above, in which case it did not re-arm. Pairs
        // with the fence in `Sender::kick`.
        fence(Ordering::SeqCst);
        self.recheck_after_idle(was_pending)
    }

    /// Second look at the buffer after `pending` was cleared.
    ///
    /// A byte found here is sent like any other. If the hardware is not ready, `pending` goes
    /// back to `was_pending`, so a `NotReady` outcome never changes the flag.
    fn recheck_after_idle(&mut self, was_pending: bool) -> TxEvent {
        if self.consumer.has_data() {
            let event = self.send_next();
            if event == TxEvent::NotReady {
                self.state.set_pending(was_pending);
            }
            return event;
        }

        #[cfg(feature = "defmt")]
        defmt::trace!("tx idle");
        self.state.wake();
        TxEvent::Idle
    }

    fn send_next(&mut self) -> TxEvent {
        if !self.regs.is_tx_ready() {
            #[cfg(feature = "defmt")]
            defmt::trace!("tx not ready, {=usize} queued", self.consumer.len());
            return TxEvent::NotReady;
        }

        // This handler is the only consumer, so data seen by `has_data` is still queued.
        let Some(byte) = self.consumer.dequeue() else {
            return TxEvent::NotReady;
        };
        self.regs.write_data(byte);
        self.state.set_pending(true);
        self.state.wake();
        TxEvent::Sent(byte)
    }

    /// Whether another transmit interrupt is expected.
    #[inline]
    pub fn is_pending(&self) -> bool {
        self.state.is_pending()
    }

    /// Number of bytes still queued.
    #[inline]
    pub fn queued(&self) -> usize {
        self.consumer.len()
    }

    /// The transmit register.
    #[inline]
    pub fn register(&self) -> &R {
        &self.regs
    }

    /// The transmit register, mutably.
    #[inline]
    pub fn register_mut(&mut self) -> &mut R {
        &mut self.regs
    }
}

#[cfg(test)]
mod test {
    use core::cell::Cell;
    use std::vec::Vec;

    use crate::TxLine;

    use super::*;

    /// Records written bytes; readiness is controlled by the test.
    #[derive(Default)]
    struct MockUart {
        ready: bool,
        written: Vec<u8>,
        status_reads: usize,
        ready_samples: usize,
    }

    impl MockUart {
        fn ready() -> Self {
            MockUart {
                ready: true,
                ..Default::default()
            }
        }
    }

    impl TxRegister for MockUart {
        fn status(&mut self) -> u32 {
            self.status_reads += 1;
            self.ready as u32
        }

        fn is_tx_ready(&mut self) -> bool {
            self.ready_samples += 1;
            self.ready
        }

        fn write_data(&mut self, byte: u8) {
            assert!(self.ready, "write while not ready");
            self.written.push(byte);
        }
    }

    #[test]
    fn drains_in_order_then_goes_idle() {
        let mut line = TxLine::<4>::new();
        let (mut tx, mut h) = line.split(MockUart::ready(), || {});
        assert_eq!(tx.write(&[0x41, 0x42, 0x43]), 3);

        assert_eq!(h.on_interrupt(), TxEvent::Sent(0x41));
        assert_eq!(h.register().written, b"A");
        assert_eq!(h.on_interrupt(), TxEvent::Sent(0x42));
        assert_eq!(h.on_interrupt(), TxEvent::Sent(0x43));
        assert_eq!(h.register().written, b"ABC");
        assert!(h.is_pending());
        assert_eq!(h.queued(), 0);

        assert_eq!(h.on_interrupt(), TxEvent::Idle);
        assert!(!h.is_pending());
        assert_eq!(h.register().written.len(), 3);
    }

    #[test]
    fn not_ready_leaves_buffer_and_flag() {
        let mut line = TxLine::<4>::new();
        let (mut tx, mut h) = line.split(MockUart::default(), || {});
        tx.enqueue(0x55).unwrap();

        assert_eq!(h.on_interrupt(), TxEvent::NotReady);
        assert_eq!(h.queued(), 1);
        assert!(!h.is_pending());
        assert!(h.register().written.is_empty());

        // Pending stays set across a not-ready interrupt, too.
        h.register_mut().ready = true;
        tx.enqueue(0x56).unwrap();
        assert_eq!(h.on_interrupt(), TxEvent::Sent(0x55));
        h.register_mut().ready = false;
        assert_eq!(h.on_interrupt(), TxEvent::NotReady);
        assert!(h.is_pending());
        assert_eq!(h.queued(), 1);

        h.register_mut().ready = true;
        assert_eq!(h.on_interrupt(), TxEvent::Sent(0x56));
        assert_eq!(h.register().written, b"UV");
    }

    #[test]
    fn readiness_sampled_per_write() {
        let mut line = TxLine::<4>::new();
        let (mut tx, mut h) = line.split(MockUart::ready(), || {});
        tx.write(b"ab");

        h.on_interrupt();
        h.on_interrupt();
        assert_eq!(h.register().status_reads, 2);
        assert_eq!(h.register().ready_samples, 2);

        // An empty buffer needs no readiness sample.
        h.on_interrupt();
        assert_eq!(h.register().status_reads, 3);
        assert_eq!(h.register().ready_samples, 2);
    }

    #[test]
    fn one_byte_per_interrupt() {
        let mut line = TxLine::<8>::new();
        let (mut tx, mut h) = line.split(MockUart::ready(), || {});
        assert_eq!(tx.write(b"hello"), 5);

        h.on_interrupt();
        assert_eq!(h.register().written, b"h");
        assert_eq!(tx.len(), 4);
    }

    #[test]
    fn producer_rearms_after_idle() {
        let rearms = Cell::new(0);
        let mut line = TxLine::<4>::new();
        let (mut tx, mut h) = line.split(MockUart::ready(), || rearms.set(rearms.get() + 1));

        tx.enqueue(b'a').unwrap();
        assert_eq!(rearms.get(), 1);
        assert_eq!(h.on_interrupt(), TxEvent::Sent(b'a'));

        // The handler expects another interrupt, so no re-arm.
        tx.enqueue(b'b').unwrap();
        assert_eq!(rearms.get(), 1);
        assert_eq!(h.on_interrupt(), TxEvent::Sent(b'b'));
        assert_eq!(h.on_interrupt(), TxEvent::Idle);

        tx.enqueue(b'c').unwrap();
        assert_eq!(rearms.get(), 2);
        assert_eq!(h.on_interrupt(), TxEvent::Sent(b'c'));
        assert_eq!(h.register().written, b"abc");
    }

    /// Runs the idle path of `on_interrupt` with a byte published by the producer after the
    /// first `has_data` check and before `pending` was cleared.
    fn idle_with_late_byte(ready: bool) -> (TxEvent, bool, usize, usize) {
        let rearms = Cell::new(0);
        let mut line = TxLine::<4>::new();
        let (mut tx, mut h) = line.split(MockUart::ready(), || rearms.set(rearms.get() + 1));

        tx.enqueue(b'a').unwrap();
        assert_eq!(h.on_interrupt(), TxEvent::Sent(b'a'));
        assert!(!h.consumer.has_data());

        // The producer still reads `pending` as set, so it leaves re-arming to the handler.
        tx.enqueue(b'b').unwrap();
        assert_eq!(rearms.get(), 1);

        h.register_mut().ready = ready;
        let was_pending = h.state.is_pending();
        h.state.set_pending(false);
        let event = h.recheck_after_idle(was_pending);
        (event, h.is_pending(), h.queued(), h.register().written.len())
    }

    #[test]
    fn idle_recheck_sends_late_byte() {
        let (event, pending, queued, written) = idle_with_late_byte(true);
        assert_eq!(event, TxEvent::Sent(b'b'));
        assert!(pending);
        assert_eq!(queued, 0);
        assert_eq!(written, 2);
    }

    #[test]
    fn idle_recheck_not_ready_restores_pending() {
        let (event, pending, queued, written) = idle_with_late_byte(false);
        assert_eq!(event, TxEvent::NotReady);
        assert!(pending);
        assert_eq!(queued, 1);
        assert_eq!(written, 1);
    }

    #[test]
    fn idle_recheck_not_ready_keeps_cleared_flag() {
        // A re-arm interrupt that finds the byte but not the hardware leaves `pending` false.
        let mut line = TxLine::<4>::new();
        let (mut tx, mut h) = line.split(MockUart::default(), || {});
        tx.enqueue(b'x').unwrap();

        assert_eq!(h.recheck_after_idle(false), TxEvent::NotReady);
        assert!(!h.is_pending());
        assert_eq!(h.queued(), 1);
    }

    /// The producer and the handler on two threads. The handler only runs when an interrupt
    /// would fire: after a re-arm, or as the completion interrupt of a byte it just sent. A
    /// lost re-arm strands bytes in the buffer and fails the final comparison.
    #[test]
    fn rearm_handshake_delivers_everything() {
        use core::sync::atomic::{AtomicBool, AtomicUsize};

        const ROUNDS: usize = 200;
        const TOTAL: usize = 2000;

        for _ in 0..ROUNDS {
            let armed = AtomicBool::new(false);
            let done = AtomicBool::new(false);
            let rearms = AtomicUsize::new(0);
            let mut line = TxLine::<8>::new();
            let (mut tx, mut h) = line.split(MockUart::ready(), || {
                rearms.fetch_add(1, Ordering::Relaxed);
                armed.store(true, Ordering::SeqCst);
            });

            std::thread::scope(|s| {
                s.spawn(|| {
                    for i in 0..TOTAL {
                        while tx.enqueue(i as u8).is_err() {
                            std::thread::yield_now();
                        }
                    }
                    done.store(true, Ordering::SeqCst);
                });
                s.spawn(|| {
                    let mut completion = false;
                    loop {
                        // Read before `armed`, so a re-arm made before the producer finished
                        // is seen on this pass or the next.
                        let finished = done.load(Ordering::SeqCst);
                        if completion || armed.swap(false, Ordering::SeqCst) {
                            completion = matches!(h.on_interrupt(), TxEvent::Sent(_));
                        } else if finished {
                            break;
                        } else {
                            std::thread::yield_now();
                        }
                    }
                });
            });

            assert_eq!(h.queued(), 0, "bytes stranded in the buffer");
            let written = &h.register().written;
            assert_eq!(written.len(), TOTAL);
            assert!(written.iter().enumerate().all(|(i, &b)| b == i as u8));
            assert!(!h.is_pending());
            assert!(rearms.load(Ordering::Relaxed) >= 1);
        }
    }

    #[cfg(feature = "async-await")]
    mod async_await {
        use core::future::Future;
        use core::pin::pin;
        use core::sync::atomic::AtomicUsize;
        use core::task::{Context, Poll};
        use std::sync::Arc;
        use std::task::{Wake, Waker};

        use super::*;

        struct CountingWaker(AtomicUsize);

        impl Wake for CountingWaker {
            fn wake(self: Arc<Self>) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        #[test]
        fn write_all_waits_for_handler() {
            let mut line = TxLine::<4>::new();
            let (mut tx, mut h) = line.split(MockUart::ready(), || {});
            let counter = Arc::new(CountingWaker(AtomicUsize::new(0)));
            let waker: Waker = counter.clone().into();
            let mut cx = Context::from_waker(&waker);

            {
                let mut fut = pin!(tx.write_all(b"abcdef"));
                assert_eq!(fut.as_mut().poll(&mut cx), Poll::Pending);

                assert_eq!(h.on_interrupt(), TxEvent::Sent(b'a'));
                assert_eq!(counter.0.load(Ordering::SeqCst), 1);
                assert_eq!(h.on_interrupt(), TxEvent::Sent(b'b'));

                assert_eq!(fut.as_mut().poll(&mut cx), Poll::Ready(()));
            }
            assert_eq!(tx.len(), 4);

            let mut flush = pin!(tx.flush());
            assert_eq!(flush.as_mut().poll(&mut cx), Poll::Pending);
            while h.on_interrupt() != TxEvent::Idle {}
            assert_eq!(flush.as_mut().poll(&mut cx), Poll::Ready(()));
            assert_eq!(h.register().written, b"abcdef");
        }

        #[test]
        fn flush_on_empty_is_ready() {
            let mut line = TxLine::<4>::new();
            let (mut tx, _h) = line.split(MockUart::ready(), || {});
            let mut cx = Context::from_waker(core::task::Waker::noop());
            assert_eq!(pin!(tx.flush()).poll(&mut cx), Poll::Ready(()));
            assert_eq!(pin!(tx.wait_for_space()).poll(&mut cx), Poll::Ready(()));
        }
    }
}
