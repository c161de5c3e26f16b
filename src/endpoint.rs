// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Per-endpoint records and the transaction-handler seam.

use crate::bus::UsbBus;
use crate::epr::Epr;

/// Transfer type of an endpoint, encoded as the EP_TYPE register field.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EpType {
    Bulk = 0b00,
    Control = 0b01,
    Isochronous = 0b10,
    Interrupt = 0b11,
}

/// Snapshot of one endpoint's configuration and the state of its current
/// transaction. The dispatcher refreshes the flags and receive count on
/// every transaction-complete event before invoking the handler.
#[derive(Copy, Clone, Debug)]
pub struct Endpoint {
    /// Endpoint number, which is also its index in the device table.
    pub number: u8,
    pub ty: EpType,
    /// Byte offset of the TX buffer inside packet memory.
    pub tx_addr: u16,
    pub tx_size: u16,
    /// Byte offset of the RX buffer inside packet memory.
    pub rx_addr: u16,
    pub rx_size: u16,
    /// Byte count of the most recently completed OUT transaction.
    pub rx_count: u16,
    /// An OUT transaction completed.
    pub rx_flag: bool,
    /// An IN transaction completed.
    pub tx_flag: bool,
    /// The completed OUT transaction carried a SETUP token.
    pub setup_flag: bool,
    /// The control register as read at dispatch time.
    pub status: Epr,
}

/// A transaction handler owning the protocol logic of one endpoint.
///
/// Invoked by the dispatcher with interrupts masked, once per completed
/// transaction, with a fresh snapshot. The returned image is normalized
/// (data toggles kept, completion flags cleared) and committed as the
/// endpoint's single final register write.
pub trait EndpointHandler<B: UsbBus> {
    fn on_transaction(&mut self, ep: &Endpoint, bus: &mut B) -> Epr;
}

/// Handler for an interrupt-IN pipe such as the HID report endpoint.
///
/// There is nothing to schedule when a report finishes transmitting: the
/// hardware has already fallen back to NAK and stays there until the
/// application queues the next report with `write`. The STAT fields are
/// toggle bits, so preserving that NAK takes masking them out of the
/// image, not writing them back.
pub struct InterruptIn;

impl<B: UsbBus> EndpointHandler<B> for InterruptIn {
    fn on_transaction(&mut self, ep: &Endpoint, _bus: &mut B) -> Epr {
        ep.status.keep_stat_rx().keep_stat_tx()
    }
}
