// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Packet-memory copy primitives and the buffer-descriptor-table layout.
//!
//! Packet memory is only addressable in 16-bit units, so all copies run
//! in 2-byte steps; an odd trailing byte is written as a whole word with
//! a zero high byte, and reads never spill past the caller's slice.

use crate::bus::UsbBus;
use crate::endpoint::Endpoint;

cfg_if::cfg_if! {
    if #[cfg(feature = "family-f1")] {
        /// Total packet memory available to the buffer table.
        pub const BTABLE_SIZE: u16 = 512;
    } else {
        /// Total packet memory available to the buffer table.
        pub const BTABLE_SIZE: u16 = 1024;
    }
}

/// First byte of packet memory past the buffer descriptor table itself
/// (eight endpoints, four words each).
pub const BUFFERS_BASE: u16 = 64;

/// Received byte count lives in the low ten bits of COUNT_RX.
pub const COUNT_RX_MASK: u16 = 0x3FF;

/// Byte offset of the ADDR_TX word for endpoint `ep`.
pub fn addr_tx_off(ep: usize) -> u16 {
    ep as u16 * 8
}

/// Byte offset of the COUNT_TX word for endpoint `ep`.
pub fn count_tx_off(ep: usize) -> u16 {
    ep as u16 * 8 + 2
}

/// Byte offset of the ADDR_RX word for endpoint `ep`.
pub fn addr_rx_off(ep: usize) -> u16 {
    ep as u16 * 8 + 4
}

/// Byte offset of the COUNT_RX word for endpoint `ep`.
pub fn count_rx_off(ep: usize) -> u16 {
    ep as u16 * 8 + 6
}

/// Copy `data` into packet memory starting at byte offset `addr`.
pub fn write_buffer<B: UsbBus>(bus: &mut B, addr: u16, data: &[u8]) {
    let mut i = 0;
    while i < data.len() {
        let lo = data[i];
        let hi = if i + 1 < data.len() { data[i + 1] } else { 0 };
        bus.pma_write(addr + i as u16, u16::from_le_bytes([lo, hi]));
        i += 2;
    }
}

/// Copy `out.len()` bytes out of packet memory starting at byte offset
/// `addr`.
pub fn read_buffer<B: UsbBus>(bus: &B, addr: u16, out: &mut [u8]) {
    let mut i = 0;
    while i < out.len() {
        let word = bus.pma_read(addr + i as u16).to_le_bytes();
        out[i] = word[0];
        if i + 1 < out.len() {
            out[i + 1] = word[1];
        }
        i += 2;
    }
}

/// Queue `data` for transmission on `ep`, truncated to the endpoint's TX
/// buffer capacity, and program COUNT_TX. Returns the number of bytes
/// queued. Does not touch the endpoint control register; the caller arms
/// the direction.
pub fn ep_write<B: UsbBus>(bus: &mut B, ep: &Endpoint, data: &[u8]) -> usize {
    let len = data.len().min(ep.tx_size as usize);
    write_buffer(bus, ep.tx_addr, &data[..len]);
    bus.pma_write(count_tx_off(ep.number as usize), len as u16);
    len
}

/// Copy the most recently received packet on `ep` into `out`. Returns the
/// number of bytes copied (the latched receive count, capped at `out`).
pub fn ep_read<B: UsbBus>(bus: &B, ep: &Endpoint, out: &mut [u8]) -> usize {
    let len = (ep.rx_count as usize).min(out.len());
    read_buffer(bus, ep.rx_addr, &mut out[..len]);
    len
}
