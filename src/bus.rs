// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Access seam between the protocol engine and the peripheral.
//!
//! The engine only ever touches the hardware through [`UsbBus`], so the
//! same code drives the real memory-mapped peripheral (see [`mmio`]) and
//! the software model used by the test suite.

/// A transaction on some endpoint has completed.
pub const ISTR_CTR: u16 = 1 << 15;
/// The host has reset the bus.
pub const ISTR_RESET: u16 = 1 << 10;
/// Direction of the completed transaction: set for OUT (or SETUP).
pub const ISTR_DIR: u16 = 1 << 4;
/// Endpoint number of the completed transaction.
pub const ISTR_EPID: u16 = 0xF;

/// Enable the transaction-complete interrupt.
pub const CNTR_CTRM: u16 = 1 << 15;
/// Enable the bus-reset interrupt.
pub const CNTR_RESETM: u16 = 1 << 10;

/// Device address function-enable bit.
pub const DADDR_EF: u8 = 1 << 7;
/// Device address field.
pub const DADDR_ADD: u8 = 0x7F;

/// Register and packet-memory access required by the stack.
///
/// Implementations must preserve the hardware's write conventions for
/// `set_epr`: STAT/DTOG fields toggle on write-1, CTR flags clear on
/// write-0, SETUP is read-only.
pub trait UsbBus {
    /// Read the control register of endpoint `ep`.
    fn epr(&self, ep: usize) -> u16;
    /// Write an image to the control register of endpoint `ep`.
    fn set_epr(&mut self, ep: usize, image: u16);
    /// Read the interrupt status register.
    fn istr(&self) -> u16;
    /// Write the interrupt status register (rc_w0 bits).
    fn set_istr(&mut self, bits: u16);
    /// Write the interrupt mask register.
    fn set_cntr(&mut self, bits: u16);
    /// Current device address (ADD field only).
    fn daddr(&self) -> u8;
    /// Program the device address, keeping the function enabled.
    fn set_daddr(&mut self, addr: u8);
    /// Read one 16-bit word of packet memory at a byte offset.
    fn pma_read(&self, offset: u16) -> u16;
    /// Write one 16-bit word of packet memory at a byte offset.
    fn pma_write(&mut self, offset: u16, word: u16);
}

/// Memory-mapped implementation for the real peripheral.
pub mod mmio {
    use super::{UsbBus, DADDR_ADD, DADDR_EF};

    const USB_BASE: usize = 0x4000_5C00;
    const PMA_BASE: usize = 0x4000_6000;
    const CNTR_OFFSET: usize = 0x40;
    const ISTR_OFFSET: usize = 0x44;
    const DADDR_OFFSET: usize = 0x4C;

    cfg_if::cfg_if! {
        if #[cfg(feature = "family-f1")] {
            // Packet memory halfwords occupy the low half of 32-bit cells.
            const PMA_STRIDE: usize = 2;
        } else {
            const PMA_STRIDE: usize = 1;
        }
    }

    /// Direct volatile access to the USB register block and packet memory
    /// at their standard addresses.
    ///
    /// The BTABLE register is left at its reset value of zero, which is
    /// the layout the allocator assumes (descriptor table at the base of
    /// packet memory).
    pub struct UsbMmio {
        _not_send: core::marker::PhantomData<*const ()>,
    }

    impl UsbMmio {
        /// Conjure the peripheral out of thin air.
        ///
        /// # Safety
        ///
        /// The caller must ensure there is at most one `UsbMmio` in the
        /// program, that the peripheral clock is running, and that this
        /// is only used from the single execution context that owns USB
        /// (the interrupt handler plus code running with it masked).
        pub unsafe fn steal() -> Self {
            UsbMmio {
                _not_send: core::marker::PhantomData,
            }
        }

        fn reg(offset: usize) -> *mut u32 {
            (USB_BASE + offset) as *mut u32
        }
    }

    impl UsbBus for UsbMmio {
        fn epr(&self, ep: usize) -> u16 {
            unsafe { core::ptr::read_volatile(Self::reg(ep * 4)) as u16 }
        }

        fn set_epr(&mut self, ep: usize, image: u16) {
            unsafe { core::ptr::write_volatile(Self::reg(ep * 4), image as u32) }
        }

        fn istr(&self) -> u16 {
            unsafe { core::ptr::read_volatile(Self::reg(ISTR_OFFSET)) as u16 }
        }

        fn set_istr(&mut self, bits: u16) {
            unsafe { core::ptr::write_volatile(Self::reg(ISTR_OFFSET), bits as u32) }
        }

        fn set_cntr(&mut self, bits: u16) {
            unsafe { core::ptr::write_volatile(Self::reg(CNTR_OFFSET), bits as u32) }
        }

        fn daddr(&self) -> u8 {
            let raw = unsafe { core::ptr::read_volatile(Self::reg(DADDR_OFFSET)) };
            raw as u8 & DADDR_ADD
        }

        fn set_daddr(&mut self, addr: u8) {
            let bits = (DADDR_EF | (addr & DADDR_ADD)) as u32;
            unsafe { core::ptr::write_volatile(Self::reg(DADDR_OFFSET), bits) }
        }

        fn pma_read(&self, offset: u16) -> u16 {
            let addr = (PMA_BASE + offset as usize * PMA_STRIDE) as *const u16;
            unsafe { core::ptr::read_volatile(addr) }
        }

        fn pma_write(&mut self, offset: u16, word: u16) {
            let addr = (PMA_BASE + offset as usize * PMA_STRIDE) as *mut u16;
            unsafe { core::ptr::write_volatile(addr, word) }
        }
    }
}
