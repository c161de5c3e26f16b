// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The USB device controller: buffer-table allocation, the interrupt
//! dispatcher, and the read/write surface offered to the application.

use zerocopy::LayoutVerified;

use crate::bus::{self, UsbBus};
use crate::control::{ControlPipe, DeviceState, SetupPacket};
use crate::descriptors::EP0_BUF_SIZE;
use crate::endpoint::{Endpoint, EndpointHandler, EpType};
use crate::epr::{self, Epr, Stat};
use crate::pma;

/// Endpoints supported by the peripheral (and the size of the BTABLE).
pub const NUM_ENDPOINTS: usize = 8;

/// Largest receive buffer the COUNT_RX encoding can express.
const MAX_RX_SIZE: u16 = 992;

/// Why an endpoint allocation was rejected. These are bring-up failures:
/// the caller must pick different sizes, there is nothing to retry.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AllocError {
    /// Endpoint number outside the peripheral's table.
    BadEndpoint,
    /// A single buffer exceeds the packet memory capacity.
    BufferTooLarge,
    /// Cumulative allocation would overflow the packet memory.
    TableExhausted,
    /// Receive size violates the COUNT_RX granularity rule: it must be
    /// even and at most 992, and a multiple of 32 once it reaches 64.
    BadRxGranularity,
}

/// Who handles transactions on an endpoint. Resolved at allocation time;
/// endpoint 0 is always routed to the controller's own control pipe.
enum EpRole<'h, B: UsbBus> {
    Unused,
    Control,
    App(&'h mut dyn EndpointHandler<B>),
}

/// One USB device function: the endpoint table, the packet-memory bump
/// allocator, the endpoint-0 control pipe, and the peripheral itself.
///
/// All methods except `write`, `read` and the state accessors are meant
/// to run with the USB interrupt masked; `interrupt()` is the handler's
/// single entry point and masks it itself.
pub struct UsbDevice<'h, B: UsbBus> {
    bus: B,
    eps: [Option<Endpoint>; NUM_ENDPOINTS],
    roles: [EpRole<'h, B>; NUM_ENDPOINTS],
    control: ControlPipe,
    /// Bump pointer into packet memory; rewound on bus reset.
    next_addr: u16,
}

impl<'h, B: UsbBus> UsbDevice<'h, B> {
    pub fn new(bus: B) -> Self {
        UsbDevice {
            bus,
            eps: [None; NUM_ENDPOINTS],
            roles: core::array::from_fn(|_| EpRole::Unused),
            control: ControlPipe::new(),
            next_addr: pma::BUFFERS_BASE,
        }
    }

    /// Bring the function up: clear pending interrupts, create endpoint 0
    /// and unmask the reset and transaction-complete interrupts. Clock
    /// and transceiver bring-up is the board code's business and must
    /// happen first.
    pub fn init(&mut self) {
        self.bus.set_istr(0);
        self.reset();
        self.bus.set_cntr(bus::CNTR_RESETM | bus::CNTR_CTRM);
    }

    /// React to a bus reset: rewind the allocator, drop every endpoint
    /// registration, re-create endpoint 0 as a control endpoint and fall
    /// back to address 0 in Default state. Application endpoints must be
    /// allocated again once the host re-configures the device.
    pub fn reset(&mut self) {
        self.next_addr = pma::BUFFERS_BASE;
        self.eps = [None; NUM_ENDPOINTS];
        for role in &mut self.roles {
            *role = EpRole::Unused;
        }
        self.control.reset();
        if let Err(e) = self.alloc_inner(
            0,
            EpType::Control,
            EP0_BUF_SIZE,
            EP0_BUF_SIZE,
            EpRole::Control,
        ) {
            // Unreachable with the fixed EP0 geometry, but never silent.
            log::error!("ep0 allocation failed: {:?}", e);
        }
        self.bus.set_daddr(0);
    }

    /// Register an application endpoint: carve its buffers out of packet
    /// memory, program its type and BTABLE entry, arm RX valid / TX NAK
    /// and install `handler` as the owner of its transactions.
    ///
    /// Endpoint 0 belongs to the controller and is rejected here.
    pub fn allocate(
        &mut self,
        number: u8,
        ty: EpType,
        tx_size: u16,
        rx_size: u16,
        handler: &'h mut dyn EndpointHandler<B>,
    ) -> Result<(), AllocError> {
        if number == 0 {
            return Err(AllocError::BadEndpoint);
        }
        self.alloc_inner(number, ty, tx_size, rx_size, EpRole::App(handler))
    }

    fn alloc_inner(
        &mut self,
        number: u8,
        ty: EpType,
        tx_size: u16,
        rx_size: u16,
        role: EpRole<'h, B>,
    ) -> Result<(), AllocError> {
        if usize::from(number) >= NUM_ENDPOINTS {
            return Err(AllocError::BadEndpoint);
        }
        if tx_size > pma::BTABLE_SIZE || rx_size > pma::BTABLE_SIZE {
            return Err(AllocError::BufferTooLarge);
        }
        if rx_size % 2 != 0 || rx_size > MAX_RX_SIZE {
            return Err(AllocError::BadRxGranularity);
        }
        // COUNT_RX block encoding: byte-granular pairs below 64 bytes,
        // 32-byte blocks from there up.
        let count_rx = if rx_size < 64 {
            rx_size / 2
        } else {
            if rx_size % 32 != 0 {
                return Err(AllocError::BadRxGranularity);
            }
            31 + rx_size / 32
        };
        if self.next_addr + tx_size + rx_size >= pma::BTABLE_SIZE {
            return Err(AllocError::TableExhausted);
        }

        let n = usize::from(number);
        // Program type and address, then toggle RX to VALID and TX to NAK
        // (both fields are zero after reset, so the XOR write lands them
        // exactly there).
        self.bus
            .set_epr(n, (ty as u16) << 9 | u16::from(number) & epr::EA);
        let current = self.bus.epr(n);
        self.bus
            .set_epr(n, current ^ (epr::STAT_RX | epr::STAT_TX_1));

        let tx_addr = self.next_addr;
        let rx_addr = self.next_addr + tx_size;
        self.bus.pma_write(pma::addr_tx_off(n), tx_addr);
        self.bus.pma_write(pma::count_tx_off(n), 0);
        self.bus.pma_write(pma::addr_rx_off(n), rx_addr);
        self.bus.pma_write(pma::count_rx_off(n), count_rx << 10);
        self.next_addr += tx_size + rx_size;

        self.eps[n] = Some(Endpoint {
            number,
            ty,
            tx_addr,
            tx_size,
            rx_addr,
            rx_size,
            rx_count: 0,
            rx_flag: false,
            tx_flag: false,
            setup_flag: false,
            status: Epr(0),
        });
        self.roles[n] = role;
        Ok(())
    }

    /// The interrupt handler's entry point. Masks the peripheral's
    /// interrupts, services the reset and transaction-complete
    /// conditions, and re-enables interrupts only after the final
    /// register write.
    pub fn interrupt(&mut self) {
        self.bus.set_cntr(0);
        if self.bus.istr() & bus::ISTR_RESET != 0 {
            self.bus.set_istr(0);
            log::debug!("bus reset");
            self.reset();
        }
        let istr = self.bus.istr();
        if istr & bus::ISTR_CTR != 0 {
            let n = usize::from((istr & bus::ISTR_EPID) as u8);
            self.transaction(n, istr & bus::ISTR_DIR != 0);
        }
        self.bus.set_cntr(bus::CNTR_RESETM | bus::CNTR_CTRM);
    }

    /// Service one transaction-complete event: snapshot the endpoint,
    /// latch SETUP/OUT bytes for endpoint 0, run the owning handler and
    /// commit its normalized register image.
    fn transaction(&mut self, n: usize, out_direction: bool) {
        if n >= NUM_ENDPOINTS {
            log::warn!("transaction on bad endpoint id {}", n);
            return;
        }
        let raw = Epr(self.bus.epr(n));
        let normalized = |image: Epr| {
            image
                .keep_dtog_rx()
                .keep_dtog_tx()
                .clear_ctr_rx()
                .clear_ctr_tx()
        };
        let Some(mut ep) = self.eps[n] else {
            log::warn!("transaction on unconfigured endpoint {}", n);
            self.bus.set_epr(n, normalized(raw).0);
            return;
        };
        ep.status = raw;
        ep.rx_flag = raw.ctr_rx();
        ep.tx_flag = raw.ctr_tx();
        ep.setup_flag = raw.setup();
        ep.rx_count = self.bus.pma_read(pma::count_rx_off(n)) & pma::COUNT_RX_MASK;
        self.eps[n] = Some(ep);

        if out_direction && n == 0 {
            if ep.setup_flag {
                // Latch the 8-byte SETUP packet; it stays valid until the
                // next SETUP overwrites it.
                let mut raw_setup = [0u8; 8];
                pma::read_buffer(&self.bus, ep.rx_addr, &mut raw_setup);
                if let Some(packet) =
                    LayoutVerified::<_, SetupPacket>::new_unaligned(&raw_setup[..])
                {
                    self.control.setup = *packet.into_ref();
                }
                self.control.data_len = 0;
            } else if ep.rx_flag {
                // OUT data stage: stash the payload for the handler.
                let len = (ep.rx_count as usize).min(self.control.data.len());
                pma::read_buffer(&self.bus, ep.rx_addr, &mut self.control.data[..len]);
                self.control.data_len = len;
            }
        }

        let image = match &mut self.roles[n] {
            EpRole::Control => self.control.on_transaction(&ep, &mut self.bus),
            EpRole::App(handler) => handler.on_transaction(&ep, &mut self.bus),
            EpRole::Unused => ep.status,
        };
        self.bus.set_epr(n, normalized(image).0);
    }

    /// Queue `data` (truncated to the endpoint's TX capacity) and arm the
    /// endpoint: TX valid, RX NAK, toggles untouched. Returns the number
    /// of bytes queued. Safe to call outside the interrupt context.
    pub fn write(&mut self, number: usize, data: &[u8]) -> usize {
        let Some(ep) = self.eps.get(number).copied().flatten() else {
            return 0;
        };
        let len = pma::ep_write(&mut self.bus, &ep, data);
        let image = Epr(self.bus.epr(number))
            .set_stat_rx(Stat::Nak)
            .set_stat_tx(Stat::Valid)
            .keep_dtog_rx()
            .keep_dtog_tx();
        self.bus.set_epr(number, image.0);
        len
    }

    /// Queue `data` without touching the control register. For use from
    /// endpoint handlers, where the dispatcher owns the final register
    /// write.
    pub fn write_irq(&mut self, number: usize, data: &[u8]) -> usize {
        match self.eps.get(number).copied().flatten() {
            Some(ep) => pma::ep_write(&mut self.bus, &ep, data),
            None => 0,
        }
    }

    /// Copy out the most recently received packet on `number`. Returns
    /// the byte count (zero if nothing was received).
    pub fn read(&self, number: usize, buf: &mut [u8]) -> usize {
        match self.eps.get(number).copied().flatten() {
            Some(ep) => pma::ep_read(&self.bus, &ep, buf),
            None => 0,
        }
    }

    /// Enumeration progress, for the application to poll.
    pub fn state(&self) -> DeviceState {
        self.control.state()
    }

    /// Value set by the last SET_CONFIGURATION (zero when unconfigured).
    pub fn configuration(&self) -> u8 {
        self.control.configuration()
    }

    /// Payload of the most recent OUT data stage on endpoint 0.
    pub fn setup_data(&self) -> &[u8] {
        self.control.data()
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }
}
