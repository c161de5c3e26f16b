// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The endpoint-0 control-transfer state machine.
//!
//! Each SETUP packet is classified by recipient (low five bits of
//! `bmRequestType`), type (bits 6..5) and direction (bit 7), then routed
//! to the standard/class request handlers. Device-to-host data stages go
//! out through a resumable cursor: one max-packet chunk is queued per IN
//! completion, so a descriptor longer than the endpoint buffer never
//! blocks inside the interrupt handler. A data stage whose length is an
//! exact multiple of the packet size is terminated with an explicit
//! zero-length packet.

use byteorder::LittleEndian;
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use zerocopy::{AsBytes, FromBytes, Unaligned, U16};

use crate::bus::UsbBus;
use crate::descriptors::{self, UsbDescType, EP0_BUF_SIZE};
use crate::endpoint::{Endpoint, EndpointHandler};
use crate::epr::{Epr, Stat};
use crate::pma;

/// Layout of the 8-byte SETUP packet.
#[repr(C)]
#[derive(Copy, Clone, Debug, AsBytes, FromBytes, Unaligned)]
pub struct SetupPacket {
    /// Direction, type and recipient bits.
    pub request_type: u8,
    pub request: u8,
    pub value: U16<LittleEndian>,
    pub index: U16<LittleEndian>,
    /// Byte count of the data stage: exact for OUT, an upper bound for IN.
    pub length: U16<LittleEndian>,
}

impl SetupPacket {
    const fn zeroed() -> Self {
        SetupPacket {
            request_type: 0,
            request: 0,
            value: U16::ZERO,
            index: U16::ZERO,
            length: U16::ZERO,
        }
    }
}

/// Enumeration progress of the device.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DeviceState {
    /// Powered or reset; the device answers on address 0 only.
    Default,
    /// The host-assigned address is in effect.
    Addressed,
    /// SET_CONFIGURATION received; application endpoints are live.
    Configured,
}

/// Recipient and type of a request, from the low seven bits of
/// `bmRequestType`. Combinations not listed fall into the bad-request
/// path.
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive)]
enum RequestKind {
    StandardDevice = 0x00,
    StandardInterface = 0x01,
    StandardEndpoint = 0x02,
    ClassInterface = 0x21,
}

/// Standard request codes this device recognizes.
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive)]
enum StandardRequest {
    GetStatus = 0x00,
    ClearFeature = 0x01,
    SetFeature = 0x03,
    SetAddress = 0x05,
    GetDescriptor = 0x06,
    GetConfiguration = 0x08,
    SetConfiguration = 0x09,
}

/// Class (HID) request codes this device recognizes.
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive)]
enum HidRequest {
    SetFeature = 0x03,
    SetIdle = 0x0A,
}

/// An in-progress device-to-host data stage. `data` is already truncated
/// to the host's `wLength`.
struct InTransfer {
    data: &'static [u8],
    offset: usize,
}

/// State owned by the control endpoint: the latched SETUP packet, the
/// OUT data-stage scratch buffer, enumeration state, and the pending
/// address and IN cursor.
pub struct ControlPipe {
    pub(crate) setup: SetupPacket,
    /// Scratch for the most recent OUT data-stage payload. Overwritten on
    /// each new SETUP; valid until the next transaction.
    pub(crate) data: [u8; EP0_BUF_SIZE as usize],
    pub(crate) data_len: usize,
    state: DeviceState,
    /// Address requested by SET_ADDRESS. Applied only once the status
    /// stage acknowledging that request has gone out on the old address.
    address: u8,
    configuration: u8,
    in_transfer: Option<InTransfer>,
}

impl ControlPipe {
    pub const fn new() -> Self {
        ControlPipe {
            setup: SetupPacket::zeroed(),
            data: [0; EP0_BUF_SIZE as usize],
            data_len: 0,
            state: DeviceState::Default,
            address: 0,
            configuration: 0,
            in_transfer: None,
        }
    }

    /// Forget everything; invoked on bus reset. Only the descriptor
    /// constants survive a reset.
    pub fn reset(&mut self) {
        self.setup = SetupPacket::zeroed();
        self.data_len = 0;
        self.state = DeviceState::Default;
        self.address = 0;
        self.configuration = 0;
        self.in_transfer = None;
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    pub fn configuration(&self) -> u8 {
        self.configuration
    }

    /// The most recent OUT data-stage payload.
    pub fn data(&self) -> &[u8] {
        &self.data[..self.data_len]
    }

    /// Queue a device-to-host data stage, truncated to the host's
    /// `wLength`, and transmit its first packet. Subsequent packets go
    /// out one per IN completion; a final packet that exactly fills the
    /// endpoint buffer is followed by a zero-length packet.
    fn start_tx<B: UsbBus>(&mut self, ep: &Endpoint, bus: &mut B, data: &'static [u8]) {
        let len = data.len().min(self.setup.length.get() as usize);
        if len == 0 {
            // The host asked for nothing; there is no data stage to
            // stream, and the queued ZLP is the handshake itself.
            self.acknowledge(ep, bus);
            return;
        }
        self.in_transfer = Some(InTransfer {
            data: &data[..len],
            offset: 0,
        });
        self.continue_tx(ep, bus);
    }

    /// Queue the next chunk of the pending data stage, if any.
    fn continue_tx<B: UsbBus>(&mut self, ep: &Endpoint, bus: &mut B) {
        if let Some(t) = &mut self.in_transfer {
            let chunk = (t.data.len() - t.offset).min(ep.tx_size as usize);
            pma::ep_write(bus, ep, &t.data[t.offset..t.offset + chunk]);
            t.offset += chunk;
            // A short packet ends the stage. A full-size final packet
            // leaves the cursor in place so the next completion sends the
            // terminating ZLP (chunk 0).
            if t.offset == t.data.len() && chunk < ep.tx_size as usize {
                self.in_transfer = None;
            }
        }
    }

    /// Zero-length packet, used as the status-stage acknowledgement of
    /// host-to-device requests and as the catch-all answer that keeps the
    /// bus from stalling on requests we do not implement.
    fn acknowledge<B: UsbBus>(&self, ep: &Endpoint, bus: &mut B) {
        pma::ep_write(bus, ep, &[]);
    }

    /// GET_DESCRIPTOR: serve the blob named by the high byte of wValue
    /// (type) and its low byte (index).
    fn get_descriptor<B: UsbBus>(&mut self, ep: &Endpoint, bus: &mut B) {
        let value = self.setup.value.get();
        let ty = UsbDescType::from_u16(value >> 8);
        match ty.and_then(|t| descriptors::lookup(t, value as u8)) {
            Some(blob) => {
                log::debug!("get_descriptor {:#06x}", value);
                self.start_tx(ep, bus, blob);
            }
            None => log::warn!("get_descriptor: unknown wValue {:#06x}", value),
        }
    }

    /// Standard device-to-host requests (GET_*).
    fn standard_device_in<B: UsbBus>(&mut self, ep: &Endpoint, bus: &mut B) {
        match StandardRequest::from_u8(self.setup.request) {
            Some(StandardRequest::GetDescriptor) => self.get_descriptor(ep, bus),
            Some(StandardRequest::GetStatus) => {
                // Bus powered, no remote wakeup pending.
                pma::ep_write(bus, ep, &[0, 0]);
            }
            Some(StandardRequest::GetConfiguration) => {
                let configuration = self.configuration;
                pma::ep_write(bus, ep, &[configuration]);
            }
            _ => log::warn!("unhandled IN request {:#04x}", self.setup.request),
        }
    }

    /// Standard host-to-device requests (SET_*). The caller sends the
    /// zero-length status packet afterwards.
    fn standard_device_out(&mut self) {
        match StandardRequest::from_u8(self.setup.request) {
            Some(StandardRequest::SetAddress) => {
                // Not applied yet: the acknowledgement must go out on the
                // old address. See the tx-completion path.
                self.address = self.setup.value.get() as u8;
            }
            Some(StandardRequest::SetConfiguration) => {
                self.state = DeviceState::Configured;
                self.configuration = self.setup.value.get() as u8;
            }
            _ => log::warn!("unhandled OUT request {:#04x}", self.setup.request),
        }
    }

    /// Classify and run one SETUP packet, returning the register image
    /// that arms the right directions for its data/status stages.
    fn handle_setup<B: UsbBus>(&mut self, ep: &Endpoint, bus: &mut B, status: Epr) -> Epr {
        // A fresh SETUP overrides whatever transfer was in flight.
        self.in_transfer = None;
        let device_to_host = self.setup.request_type & 0x80 != 0;
        match RequestKind::from_u8(self.setup.request_type & 0x7F) {
            Some(RequestKind::StandardDevice) => {
                if device_to_host {
                    self.standard_device_in(ep, bus);
                } else {
                    self.standard_device_out();
                    self.acknowledge(ep, bus);
                }
                status.set_stat_rx(Stat::Nak).set_stat_tx(Stat::Valid)
            }
            Some(RequestKind::StandardInterface) => {
                if device_to_host
                    && StandardRequest::from_u8(self.setup.request)
                        == Some(StandardRequest::GetDescriptor)
                    && UsbDescType::from_u16(self.setup.value.get() >> 8)
                        == Some(UsbDescType::HidReport)
                {
                    log::debug!("hid report descriptor");
                    self.start_tx(ep, bus, &descriptors::HID_REPORT_DESCRIPTOR);
                }
                status.set_stat_rx(Stat::Nak).set_stat_tx(Stat::Valid)
            }
            Some(RequestKind::StandardEndpoint) => {
                if StandardRequest::from_u8(self.setup.request)
                    == Some(StandardRequest::ClearFeature)
                {
                    self.acknowledge(ep, bus);
                    status.set_stat_rx(Stat::Nak).set_stat_tx(Stat::Valid)
                } else {
                    log::warn!("unhandled endpoint request {:#04x}", self.setup.request);
                    // Deliberate: committing the as-read STAT bits toggles
                    // both fields to Disabled, parking the pipe until the
                    // host sends another SETUP.
                    status
                }
            }
            Some(RequestKind::ClassInterface) => match HidRequest::from_u8(self.setup.request) {
                Some(HidRequest::SetIdle) => {
                    self.acknowledge(ep, bus);
                    status.set_stat_rx(Stat::Nak).set_stat_tx(Stat::Valid)
                }
                Some(HidRequest::SetFeature) => {
                    // Arm the receive side for the feature-report data
                    // stage; it will land in the scratch buffer.
                    status.set_stat_rx(Stat::Valid).keep_stat_tx()
                }
                _ => {
                    log::warn!("unhandled class request {:#04x}", self.setup.request);
                    // Deliberate park, as for unhandled endpoint requests.
                    status
                }
            },
            None => {
                log::warn!(
                    "bad request: bmRequestType {:#04x} bRequest {:#04x}",
                    self.setup.request_type,
                    self.setup.request
                );
                self.acknowledge(ep, bus);
                status.set_stat_rx(Stat::Nak).set_stat_tx(Stat::Valid)
            }
        }
    }
}

impl<B: UsbBus> EndpointHandler<B> for ControlPipe {
    fn on_transaction(&mut self, ep: &Endpoint, bus: &mut B) -> Epr {
        let status = ep.status;
        if ep.rx_flag && ep.setup_flag {
            self.handle_setup(ep, bus, status)
        } else if ep.rx_flag || ep.tx_flag {
            if ep.rx_flag {
                // OUT data stage or status-stage ZLP; the dispatcher has
                // already copied the payload into the scratch buffer.
                log::debug!("ep0 out, {} bytes", self.data_len);
            } else {
                if self.in_transfer.is_some() {
                    // Advance the pending device-to-host stage by one
                    // packet and wait for its completion.
                    self.continue_tx(ep, bus);
                    return status.set_stat_rx(Stat::Nak).set_stat_tx(Stat::Valid);
                }
                // The acknowledgement of SET_ADDRESS has gone out on the
                // old address; the new one may take effect now.
                if bus.daddr() != self.address {
                    bus.set_daddr(self.address);
                    self.state = DeviceState::Addressed;
                    log::debug!("address {} in effect", self.address);
                }
            }
            // End of transaction: reset both toggles and re-arm both
            // directions so the next SETUP is accepted immediately.
            status
                .clear_dtog_rx()
                .clear_dtog_tx()
                .set_stat_rx(Stat::Valid)
                .set_stat_tx(Stat::Valid)
        } else {
            status
        }
    }
}
