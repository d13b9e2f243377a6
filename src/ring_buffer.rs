//! A single-producer, single-consumer (SPSC) lock-free byte queue.

use core::{
    cell::UnsafeCell,
    fmt,
    mem::MaybeUninit,
    ptr,
    sync::atomic::{AtomicUsize, Ordering},
};

/// Error returned by [`Producer::enqueue`] when the queue already holds `N` bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BufferFull;

impl fmt::Display for BufferFull {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("transmit buffer is full")
    }
}

impl core::error::Error for BufferFull {}

/// A single-producer, single-consumer (SPSC) lock-free queue storing up to `N` bytes.
///
/// Both indices run modulo `2 * N`. The slot of an index is the index modulo `N`,
/// and `tail - head` (modulo `2 * N`) is the number of unread bytes, so a full
/// queue and an empty queue are told apart without a shared counter.
///
/// # Single writer per index
///
/// `head` is only ever stored by the [`Consumer`] and `tail` only by the
/// [`Producer`]. Either side loads both. Soundness of the lock-free access rests
/// on this rule; [`RingBuffer::split`] enforces it by handing out exactly one of
/// each.
pub struct RingBuffer<const N: usize> {
    /// Where the next read starts.
    ///
    /// Always `< 2 * N`.
    head: AtomicUsize,
    /// Where the next write starts.
    ///
    /// Always `< 2 * N`.
    tail: AtomicUsize,
    buf: [UnsafeCell<MaybeUninit<u8>>; N],
}

// SAFETY: A slot is only written by the `Producer` while it lies outside `head..tail`, and only
// read by the `Consumer` while it lies inside. Index stores use Release and the opposite side's
// loads use Acquire, so a slot's content is visible before the index that hands it over.
unsafe impl<const N: usize> Sync for RingBuffer<N> {}

/// Writes bytes into the queue.
pub struct Producer<'a, const N: usize> {
    rb: &'a RingBuffer<N>,
}

/// Reads bytes previously written to the queue.
pub struct Consumer<'a, const N: usize> {
    rb: &'a RingBuffer<N>,
}

impl<const N: usize> RingBuffer<N> {
    const CAPACITY_OK: () = assert!(
        N > 0 && N <= usize::MAX / 2,
        "ring buffer capacity must be non-zero and index arithmetic must not overflow"
    );

    /// Creates an empty queue.
    pub const fn new() -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::CAPACITY_OK;
        RingBuffer {
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
            buf: [const { UnsafeCell::new(MaybeUninit::uninit()) }; N],
        }
    }

    #[cfg(test)]
    pub(crate) fn at(pos: usize) -> Self {
        assert!(pos < 2 * N);
        let rb = Self::new();
        rb.head.store(pos, Ordering::Relaxed);
        rb.tail.store(pos, Ordering::Relaxed);
        rb
    }

    /// Number of bytes the queue can hold.
    #[inline]
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Splits the queue into its producer and consumer halves.
    #[inline]
    pub const fn split(&mut self) -> (Producer<'_, N>, Consumer<'_, N>) {
        let rb: &Self = self;
        (Producer { rb }, Consumer { rb })
    }

    /// Unread bytes between `head` and `tail`.
    #[inline]
    const fn occupancy(head: usize, tail: usize) -> usize {
        if tail >= head {
            tail - head
        } else {
            tail + 2 * N - head
        }
    }

    /// Moves an index forward by `by <= N` positions.
    #[inline]
    const fn advance(index: usize, by: usize) -> usize {
        let next = index + by;
        if next >= 2 * N { next - 2 * N } else { next }
    }

    /// Backing slot of an index.
    #[inline]
    const fn slot(index: usize) -> usize {
        if index >= N { index - N } else { index }
    }

    #[inline]
    fn buf_ptr(&self) -> *mut u8 {
        // `UnsafeCell<MaybeUninit<u8>>` has the layout of `u8`, and the cells allow writes
        // through a shared reference.
        self.buf.as_ptr().cast_mut().cast()
    }
}

impl<const N: usize> Default for RingBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> Producer<'_, N> {
    /// Appends one byte.
    ///
    /// # Errors
    ///
    /// Returns [`BufferFull`] when `N` bytes are already queued. The queued bytes are left as
    /// they were.
    #[inline]
    pub fn enqueue(&mut self, byte: u8) -> Result<(), BufferFull> {
        // Relaxed: producer owns `tail`, no cross-thread synchronization needed.
        let tail = self.rb.tail.load(Ordering::Relaxed);
        // Acquire: synchronizes with the consumer's Release store, so the slot we are about
        // to reuse has been read.
        let head = self.rb.head.load(Ordering::Acquire);
        if RingBuffer::<N>::occupancy(head, tail) == N {
            return Err(BufferFull);
        }

        // SAFETY: `slot(tail) < N`, and the slot is outside `head..tail`, so the consumer does
        // not read it until the store below publishes it.
        unsafe { self.rb.buf_ptr().add(RingBuffer::<N>::slot(tail)).write(byte) };

        self.rb
            .tail
            .store(RingBuffer::<N>::advance(tail, 1), Ordering::Release);
        Ok(())
    }

    /// Appends as many leading bytes of `data` as fit and returns how many that was.
    ///
    /// Bytes that do not fit are not queued.
    #[inline]
    pub fn write(&mut self, data: &[u8]) -> usize {
        // Relaxed: producer owns `tail`.
        let tail = self.rb.tail.load(Ordering::Relaxed);
        // Acquire: a stale `head` only underestimates free space.
        let head = self.rb.head.load(Ordering::Acquire);
        let len = data.len().min(N - RingBuffer::<N>::occupancy(head, tail));
        if len == 0 {
            return 0;
        }

        let start = RingBuffer::<N>::slot(tail);
        let first = len.min(N - start);
        let buf = self.rb.buf_ptr();

        // SAFETY:
        // - src: `data[..first]` is in bounds since `first <= len <= data.len()`.
        // - dst: `buf[start..start + first]`, in bounds since `first <= N - start`.
        // - The `len` slots starting at `tail` are free (`len <= N - occupancy`), so the
        //   consumer does not read them until `tail` is published.
        // - `data` cannot overlap `buf`, which is never handed out mutably.
        unsafe { ptr::copy_nonoverlapping(data.as_ptr(), buf.add(start), first) };
        if first < len {
            // Wrapping case: the rest continues at slot 0.
            // SAFETY: As above, with `data[first..len]` landing in `buf[..len - first]`, and
            // `len - first < N`.
            unsafe { ptr::copy_nonoverlapping(data.as_ptr().add(first), buf, len - first) };
        }

        self.rb
            .tail
            .store(RingBuffer::<N>::advance(tail, len), Ordering::Release);
        len
    }

    /// Number of queued bytes. May be stale by the time it returns.
    #[inline]
    pub fn len(&self) -> usize {
        let tail = self.rb.tail.load(Ordering::Relaxed);
        let head = self.rb.head.load(Ordering::Acquire);
        RingBuffer::<N>::occupancy(head, tail)
    }

    /// Returns `true` if no bytes are queued.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` if the next [`Producer::enqueue`] would fail.
    #[inline]
    pub fn is_full(&self) -> bool {
        self.len() == N
    }

    /// Number of bytes the queue can hold.
    #[inline]
    pub const fn capacity(&self) -> usize {
        N
    }
}

impl<const N: usize> Consumer<'_, N> {
    /// Returns `true` if there is at least one byte to read.
    ///
    /// Racing a concurrent [`Producer::enqueue`] may report `false` for a byte that is just
    /// being published.
    #[inline]
    pub fn has_data(&self) -> bool {
        // Acquire: synchronizes with producer's Release store to see written data.
        let tail = self.rb.tail.load(Ordering::Acquire);
        // Relaxed: consumer owns `head`.
        let head = self.rb.head.load(Ordering::Relaxed);

        tail != head
    }

    /// Removes and returns the oldest byte, or `None` if the queue is empty.
    #[inline]
    pub fn dequeue(&mut self) -> Option<u8> {
        // Acquire: synchronizes with producer's Release store, ensuring we see the written data.
        let tail = self.rb.tail.load(Ordering::Acquire);
        // Relaxed: consumer owns `head`.
        let head = self.rb.head.load(Ordering::Relaxed);
        if tail == head {
            return None;
        }

        // SAFETY: `slot(head) < N`, and the slot lies in `head..tail`, which the producer
        // initialized and published with the Release store observed above. The producer does
        // not overwrite it until `head` moves past it.
        let byte = unsafe { self.rb.buf_ptr().add(RingBuffer::<N>::slot(head)).read() };

        // Release: the slot has been read before the producer may reuse it.
        self.rb
            .head
            .store(RingBuffer::<N>::advance(head, 1), Ordering::Release);
        Some(byte)
    }

    /// Number of queued bytes. May be stale by the time it returns.
    #[inline]
    pub fn len(&self) -> usize {
        let tail = self.rb.tail.load(Ordering::Acquire);
        let head = self.rb.head.load(Ordering::Relaxed);
        RingBuffer::<N>::occupancy(head, tail)
    }

    /// Returns `true` if there is nothing to read.
    #[inline]
    pub fn is_empty(&self) -> bool {
        !self.has_data()
    }
}
