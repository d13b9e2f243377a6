#![no_std]
#![warn(missing_docs)]
#![doc = include_str!("../README.md")]

#[cfg(test)]
extern crate std;

pub use line::{LineState, Rearm, Sender};
pub use register::{MmioUart, ReadyBit, TxRegister, UartLayout};
pub use ring_buffer::{BufferFull, Consumer, Producer, RingBuffer};
pub use transmit::{TxEvent, TxHandler};

#[cfg(feature = "async-await")]
pub(crate) mod atomic_waker;
mod line;
mod register;
mod ring_buffer;
mod transmit;

/// The driver context of one UART transmit line.
///
/// Holds the transmit buffer and the line state. Create one per peripheral, keep it somewhere
/// that outlives both halves (a `static` through a singleton is typical), then [`TxLine::split`]
/// it into the [`Sender`] used by application code and the [`TxHandler`] called from the
/// transmit interrupt.
pub struct TxLine<const N: usize> {
    buffer: RingBuffer<N>,
    state: LineState,
}

impl<const N: usize> TxLine<N> {
    /// Creates an idle line with an empty buffer of `N` bytes.
    pub const fn new() -> Self {
        TxLine {
            buffer: RingBuffer::new(),
            state: LineState::new(),
        }
    }

    /// Splits the line into its producer and interrupt halves.
    ///
    /// `regs` is the transmit register, owned by the handler from now on. `rearm` is invoked by
    /// the sender whenever it queues data while the handler is not expecting another transmit
    /// interrupt.
    pub fn split<R: TxRegister, A: Rearm>(
        &mut self,
        regs: R,
        rearm: A,
    ) -> (Sender<'_, N, A>, TxHandler<'_, N, R>) {
        let (producer, consumer) = self.buffer.split();
        let state = &self.state;
        (
            Sender::new(producer, state, rearm),
            TxHandler::new(consumer, state, regs),
        )
    }
}

impl<const N: usize> Default for TxLine<N> {
    fn default() -> Self {
        Self::new()
    }
}
