//! Hardware transmit register access.
//!
//! The handler only needs three things from the peripheral: a raw status read for diagnostics,
//! a transmit-ready sample, and a one-byte data write. [`TxRegister`] is that seam;
//! [`MmioUart`] implements it for a memory-mapped peripheral at an injected address.

use core::ptr::{with_exposed_provenance, with_exposed_provenance_mut};

/// The transmit side of a UART peripheral.
///
/// Status reads may have side effects on real hardware (bits that clear on read), which is why
/// every method takes `&mut self` and why [`TxRegister::is_tx_ready`] must sample the hardware
/// each time it is called.
pub trait TxRegister {
    /// Reads the raw status word.
    ///
    /// Diagnostic only, never used to decide whether to write.
    fn status(&mut self) -> u32;

    /// Samples the transmit-ready condition now.
    fn is_tx_ready(&mut self) -> bool;

    /// Writes `byte` to the data register, which starts its transmission and clears readiness
    /// until the hardware is done with it.
    fn write_data(&mut self, byte: u8);
}

impl<R: TxRegister + ?Sized> TxRegister for &mut R {
    #[inline]
    fn status(&mut self) -> u32 {
        (**self).status()
    }

    #[inline]
    fn is_tx_ready(&mut self) -> bool {
        (**self).is_tx_ready()
    }

    #[inline]
    fn write_data(&mut self, byte: u8) {
        (**self).write_data(byte)
    }
}

/// How the transmit-ready condition is encoded in the status word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ReadyBit {
    /// Ready while any bit of the mask is set.
    WhenSet(u32),
    /// Ready while all bits of the mask are clear, e.g. a "FIFO full" flag.
    WhenClear(u32),
}

impl ReadyBit {
    /// Decodes readiness from a status word.
    #[inline]
    pub const fn is_ready(self, status: u32) -> bool {
        match self {
            ReadyBit::WhenSet(mask) => status & mask != 0,
            ReadyBit::WhenClear(mask) => status & mask == 0,
        }
    }
}

/// Register layout of a UART's transmit side, relative to its base address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct UartLayout {
    /// Offset of the 32-bit status register.
    pub status_offset: usize,
    /// Offset of the 32-bit data register.
    pub data_offset: usize,
    /// Encoding of transmit-ready in the status register.
    pub ready: ReadyBit,
}

impl UartLayout {
    /// ARM PL011: data at `0x000`, flags at `0x018`, ready while `FR.TXFF` is clear.
    pub const PL011: UartLayout = UartLayout {
        status_offset: 0x018,
        data_offset: 0x000,
        ready: ReadyBit::WhenClear(1 << 5),
    };

    /// A single register that reads as status and takes the data byte on write, with
    /// transmit ready while any bit of `tx_ready_mask` is set.
    pub const fn combined(tx_ready_mask: u32) -> UartLayout {
        UartLayout {
            status_offset: 0,
            data_offset: 0,
            ready: ReadyBit::WhenSet(tx_ready_mask),
        }
    }
}

/// A memory-mapped UART transmitter.
pub struct MmioUart {
    base: usize,
    layout: UartLayout,
}

impl MmioUart {
    /// Creates the transmitter for the peripheral at `base`.
    ///
    /// # Safety
    ///
    /// - `base + layout.status_offset` and `base + layout.data_offset` must be 4-byte aligned
    ///   addresses of the peripheral's status and data registers, with exposed provenance.
    /// - The returned value must be the only writer of the data register for as long as it
    ///   lives.
    pub const unsafe fn new(base: usize, layout: UartLayout) -> Self {
        MmioUart { base, layout }
    }

    /// The layout this transmitter was configured with.
    pub const fn layout(&self) -> &UartLayout {
        &self.layout
    }
}

impl TxRegister for MmioUart {
    #[inline]
    fn status(&mut self) -> u32 {
        let sr = with_exposed_provenance::<u32>(self.base + self.layout.status_offset);
        // SAFETY: The caller of `MmioUart::new` guarantees the address is a valid, aligned
        // status register.
        unsafe { sr.read_volatile() }
    }

    #[inline]
    fn is_tx_ready(&mut self) -> bool {
        let status = self.status();
        self.layout.ready.is_ready(status)
    }

    #[inline]
    fn write_data(&mut self, byte: u8) {
        let dr = with_exposed_provenance_mut::<u32>(self.base + self.layout.data_offset);
        // SAFETY: The caller of `MmioUart::new` guarantees the address is a valid, aligned data
        // register that no one else writes.
        unsafe { dr.write_volatile(byte as u32) };
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn ready_bit_polarity() {
        let set = ReadyBit::WhenSet(1 << 3);
        assert!(set.is_ready(0b1000));
        assert!(set.is_ready(0b1001));
        assert!(!set.is_ready(0b0111));

        let clear = UartLayout::PL011.ready;
        assert!(clear.is_ready(0));
        assert!(clear.is_ready(1 << 4));
        assert!(!clear.is_ready(1 << 5));
    }

    #[test]
    fn combined_register_layout() {
        let l = UartLayout::combined(1 << 9);
        assert_eq!(l.status_offset, l.data_offset);
        assert!(l.ready.is_ready(1 << 9));
        assert!(!l.ready.is_ready(!(1 << 9)));

        // Top bit of the status word.
        let high = UartLayout::combined(1 << 31);
        assert!(high.ready.is_ready(u32::MAX));
        assert!(!high.ready.is_ready(u32::MAX >> 1));
    }

    #[test]
    fn mmio_reads_status_and_writes_data() {
        // Stand-in for a register block: [data, pad, pad, pad, pad, pad, flags].
        let mut regs = [0u32; 7];
        let base = regs.as_mut_ptr().expose_provenance();
        // SAFETY: `regs` is aligned, covers both offsets, and outlives `uart`.
        let mut uart = unsafe { MmioUart::new(base, UartLayout::PL011) };

        assert!(uart.is_tx_ready());
        uart.write_data(b'A');

        // SAFETY: Inside `regs`, aligned.
        unsafe { with_exposed_provenance_mut::<u32>(base + 0x018).write_volatile(1 << 5) };
        assert!(!uart.is_tx_ready());

        assert_eq!(regs[0], b'A' as u32);
    }
}
