// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Protocol-level tests driving the stack against a software model of
//! the peripheral, write conventions included: STAT/DTOG toggle on
//! write-1, CTR flags clear on write-0, SETUP is read-only and falls
//! with CTR_RX.

use usbd_btable::bus::{self, UsbBus};
use usbd_btable::descriptors::{self, HID_REPORT_DESCRIPTOR};
use usbd_btable::{
    epr, AllocError, DeviceState, Endpoint, EndpointHandler, EpType, Epr,
    InterruptIn, Stat, UsbDevice,
};
use usbd_btable::pma;
use zerocopy::AsBytes;

struct FakeBus {
    epr: [u16; 8],
    istr: u16,
    cntr: u16,
    daddr: u8,
    pma: [u16; 512],
}

impl FakeBus {
    fn new() -> Self {
        FakeBus {
            epr: [0; 8],
            istr: 0,
            cntr: 0,
            daddr: 0,
            pma: [0; 512],
        }
    }

    /// Simulate the hardware completing a transaction: latch the given
    /// completion flags, drop the completed direction to NAK as the real
    /// peripheral does, and raise the interrupt status for endpoint `n`.
    fn trigger(&mut self, n: usize, flags: u16, out_direction: bool) {
        self.epr[n] |= flags;
        if flags & epr::CTR_TX != 0 {
            self.epr[n] = self.epr[n] & !epr::STAT_TX | 0b10 << 4;
        }
        if flags & epr::CTR_RX != 0 {
            self.epr[n] = self.epr[n] & !epr::STAT_RX | 0b10 << 12;
        }
        let dir = if out_direction { bus::ISTR_DIR } else { 0 };
        self.istr = bus::ISTR_CTR | dir | n as u16;
    }
}

impl UsbBus for FakeBus {
    fn epr(&self, ep: usize) -> u16 {
        self.epr[ep]
    }

    fn set_epr(&mut self, ep: usize, image: u16) {
        const TOGGLE: u16 = epr::STAT_RX | epr::STAT_TX | epr::DTOG_RX | epr::DTOG_TX;
        const RC_W0: u16 = epr::CTR_RX | epr::CTR_TX;
        const RW: u16 = epr::EP_TYPE | epr::EP_KIND | epr::EA;
        let cur = self.epr[ep];
        let mut new = (cur ^ image) & TOGGLE
            | cur & image & RC_W0
            | image & RW
            | cur & epr::SETUP;
        // SETUP is only meaningful while CTR_RX is pending.
        if new & epr::CTR_RX == 0 {
            new &= !epr::SETUP;
        }
        self.epr[ep] = new;
    }

    fn istr(&self) -> u16 {
        self.istr
    }

    fn set_istr(&mut self, bits: u16) {
        self.istr &= bits;
    }

    fn set_cntr(&mut self, bits: u16) {
        self.cntr = bits;
    }

    fn daddr(&self) -> u8 {
        self.daddr
    }

    fn set_daddr(&mut self, addr: u8) {
        self.daddr = addr & bus::DADDR_ADD;
    }

    fn pma_read(&self, offset: u16) -> u16 {
        self.pma[offset as usize / 2]
    }

    fn pma_write(&mut self, offset: u16, word: u16) {
        self.pma[offset as usize / 2] = word;
    }
}

fn make_device<'h>() -> UsbDevice<'h, FakeBus> {
    let mut dev = UsbDevice::new(FakeBus::new());
    dev.init();
    dev
}

/// Deliver an 8-byte SETUP packet on endpoint 0 and run the dispatcher.
fn send_setup(dev: &mut UsbDevice<'_, FakeBus>, packet: [u8; 8]) {
    let rx_addr = dev.bus().pma_read(pma::addr_rx_off(0));
    let b = dev.bus_mut();
    pma::write_buffer(b, rx_addr, &packet);
    b.pma_write(pma::count_rx_off(0), 8);
    b.trigger(0, epr::CTR_RX | epr::SETUP, true);
    dev.interrupt();
}

/// Deliver an OUT data packet on endpoint 0 and run the dispatcher.
fn send_out(dev: &mut UsbDevice<'_, FakeBus>, payload: &[u8]) {
    let rx_addr = dev.bus().pma_read(pma::addr_rx_off(0));
    let b = dev.bus_mut();
    pma::write_buffer(b, rx_addr, payload);
    b.pma_write(pma::count_rx_off(0), payload.len() as u16);
    b.trigger(0, epr::CTR_RX, true);
    dev.interrupt();
}

/// Simulate the host collecting the queued IN packet on endpoint 0.
fn complete_in(dev: &mut UsbDevice<'_, FakeBus>) {
    dev.bus_mut().trigger(0, epr::CTR_TX, false);
    dev.interrupt();
}

/// The packet currently queued for transmission on endpoint `n`.
fn queued(dev: &UsbDevice<'_, FakeBus>, n: usize) -> Vec<u8> {
    let b = dev.bus();
    let addr = b.pma_read(pma::addr_tx_off(n));
    let count = b.pma_read(pma::count_tx_off(n)) as usize;
    let mut out = vec![0; count];
    pma::read_buffer(b, addr, &mut out);
    out
}

fn setup_packet(request_type: u8, request: u8, value: u16, index: u16, length: u16) -> [u8; 8] {
    let v = value.to_le_bytes();
    let i = index.to_le_bytes();
    let l = length.to_le_bytes();
    [request_type, request, v[0], v[1], i[0], i[1], l[0], l[1]]
}

#[test]
fn ep0_comes_up_armed_after_init() {
    let dev = make_device();
    let ep0 = Epr(dev.bus().epr(0));
    assert_eq!(ep0.stat_rx(), Stat::Valid);
    assert_eq!(ep0.stat_tx(), Stat::Nak);
    assert_eq!(dev.state(), DeviceState::Default);
    // BTABLE entry: TX buffer right after the table, RX after it.
    assert_eq!(dev.bus().pma_read(pma::addr_tx_off(0)), 64);
    assert_eq!(dev.bus().pma_read(pma::addr_rx_off(0)), 128);
}

#[test]
fn allocations_are_disjoint_and_in_bounds() {
    let mut h1 = InterruptIn;
    let mut h2 = InterruptIn;
    let mut h3 = InterruptIn;
    let mut dev = make_device();
    dev.allocate(1, EpType::Interrupt, 64, 64, &mut h1).unwrap();
    dev.allocate(2, EpType::Bulk, 32, 32, &mut h2).unwrap();
    dev.allocate(3, EpType::Bulk, 16, 96, &mut h3).unwrap();

    let sizes = [(0usize, 64u16, 64u16), (1, 64, 64), (2, 32, 32), (3, 16, 96)];
    let mut ranges: Vec<(u16, u16)> = Vec::new();
    for (n, tx, rx) in sizes {
        let tx_base = dev.bus().pma_read(pma::addr_tx_off(n));
        let rx_base = dev.bus().pma_read(pma::addr_rx_off(n));
        ranges.push((tx_base, tx_base + tx));
        ranges.push((rx_base, rx_base + rx));
    }
    for (i, a) in ranges.iter().enumerate() {
        assert!(a.0 >= 64, "buffer below the descriptor table: {:?}", a);
        assert!(a.1 <= pma::BTABLE_SIZE, "buffer out of bounds: {:?}", a);
        for b in &ranges[i + 1..] {
            assert!(a.1 <= b.0 || b.1 <= a.0, "overlap: {:?} vs {:?}", a, b);
        }
    }
}

#[test]
fn allocation_rejects_bad_geometry() {
    let mut handlers = [InterruptIn, InterruptIn, InterruptIn, InterruptIn, InterruptIn, InterruptIn];
    let [h0, h1, h2, h3, h4, h5] = &mut handlers;
    let mut dev = make_device();
    assert_eq!(
        dev.allocate(8, EpType::Bulk, 64, 64, h0).unwrap_err(),
        AllocError::BadEndpoint
    );
    assert_eq!(
        dev.allocate(0, EpType::Control, 64, 64, h1).unwrap_err(),
        AllocError::BadEndpoint
    );
    assert_eq!(
        dev.allocate(1, EpType::Bulk, 2048, 64, h2).unwrap_err(),
        AllocError::BufferTooLarge
    );
    // odd
    assert_eq!(
        dev.allocate(1, EpType::Bulk, 64, 63, h3).unwrap_err(),
        AllocError::BadRxGranularity
    );
    // beyond the COUNT_RX encoding
    assert_eq!(
        dev.allocate(1, EpType::Bulk, 0, 994, h4).unwrap_err(),
        AllocError::BadRxGranularity
    );
    // >= 64 but not a multiple of 32
    assert_eq!(
        dev.allocate(1, EpType::Bulk, 64, 100, h5).unwrap_err(),
        AllocError::BadRxGranularity
    );
}

#[test]
fn allocation_exhausts_the_table() {
    let mut h1 = InterruptIn;
    let mut h2 = InterruptIn;
    let mut h3 = InterruptIn;
    let mut dev = make_device();
    // 64 (table) + 128 (ep0) + 896 = 1088 would overflow; stop short.
    assert_eq!(
        dev.allocate(1, EpType::Bulk, 448, 448, &mut h1).unwrap_err(),
        AllocError::TableExhausted
    );
    dev.allocate(1, EpType::Bulk, 384, 384, &mut h2).unwrap();
    assert_eq!(
        dev.allocate(2, EpType::Bulk, 64, 64, &mut h3).unwrap_err(),
        AllocError::TableExhausted
    );
}

#[test]
fn get_device_descriptor() {
    let mut dev = make_device();
    send_setup(&mut dev, setup_packet(0x80, 0x06, 0x0100, 0, 64));
    let reply = queued(&dev, 0);
    assert_eq!(reply, descriptors::DEVICE_DESCRIPTOR.as_bytes());
    assert_eq!(&reply[..4], &[18, 0x01, 0x00, 0x02]);
    // TX armed for the data stage.
    assert_eq!(Epr(dev.bus().epr(0)).stat_tx(), Stat::Valid);
    assert_eq!(Epr(dev.bus().epr(0)).stat_rx(), Stat::Nak);
}

#[test]
fn get_device_descriptor_truncated() {
    let mut dev = make_device();
    send_setup(&mut dev, setup_packet(0x80, 0x06, 0x0100, 0, 9));
    let reply = queued(&dev, 0);
    assert_eq!(reply, descriptors::DEVICE_DESCRIPTOR.as_bytes()[..9]);
}

#[test]
fn get_configuration_descriptor() {
    let mut dev = make_device();
    send_setup(&mut dev, setup_packet(0x80, 0x06, 0x0200, 0, 64));
    let reply = queued(&dev, 0);
    assert_eq!(reply.len(), 34);
    assert_eq!(u16::from_le_bytes([reply[2], reply[3]]), 34);
}

#[test]
fn get_string_and_qualifier_descriptors() {
    let mut dev = make_device();
    send_setup(&mut dev, setup_packet(0x80, 0x06, 0x0300, 0, 255));
    assert_eq!(queued(&dev, 0), &[4, 0x03, 0x09, 0x04]);

    send_setup(&mut dev, setup_packet(0x80, 0x06, 0x0302, 0, 255));
    assert_eq!(queued(&dev, 0), descriptors::STRING_PRODUCT);

    send_setup(&mut dev, setup_packet(0x80, 0x06, 0x0600, 0, 10));
    let reply = queued(&dev, 0);
    assert_eq!(reply.len(), 10);
    assert_eq!(reply[1], 0x06);
}

#[test]
fn get_status_and_configuration() {
    let mut dev = make_device();
    send_setup(&mut dev, setup_packet(0x80, 0x00, 0, 0, 2));
    assert_eq!(queued(&dev, 0), &[0, 0]);

    send_setup(&mut dev, setup_packet(0x80, 0x08, 0, 0, 1));
    assert_eq!(queued(&dev, 0), &[0]);

    send_setup(&mut dev, setup_packet(0x00, 0x09, 1, 0, 0));
    assert_eq!(queued(&dev, 0).len(), 0); // status-stage ZLP
    assert_eq!(dev.state(), DeviceState::Configured);
    assert_eq!(dev.configuration(), 1);

    send_setup(&mut dev, setup_packet(0x80, 0x08, 0, 0, 1));
    assert_eq!(queued(&dev, 0), &[1]);
}

#[test]
fn set_address_is_deferred_until_status_stage_completes() {
    let mut dev = make_device();
    send_setup(&mut dev, setup_packet(0x00, 0x05, 5, 0, 0));
    // Acknowledged with a ZLP, but still on the old address.
    assert_eq!(queued(&dev, 0).len(), 0);
    assert_eq!(dev.bus().daddr(), 0);
    assert_eq!(dev.state(), DeviceState::Default);

    complete_in(&mut dev);
    assert_eq!(dev.bus().daddr(), 5);
    assert_eq!(dev.state(), DeviceState::Addressed);
    // Both directions re-armed for the next SETUP.
    assert_eq!(Epr(dev.bus().epr(0)).stat_rx(), Stat::Valid);
    assert_eq!(Epr(dev.bus().epr(0)).stat_tx(), Stat::Valid);
}

#[test]
fn hid_report_descriptor_streams_in_chunks() {
    let len = HID_REPORT_DESCRIPTOR.len();
    let mut dev = make_device();
    send_setup(&mut dev, setup_packet(0x81, 0x06, 0x2200, 0, len as u16));

    let mut collected = queued(&dev, 0);
    assert_eq!(collected.len(), 64);
    complete_in(&mut dev);
    let rest = queued(&dev, 0);
    assert_eq!(rest.len(), len - 64);
    collected.extend_from_slice(&rest);
    assert_eq!(collected, HID_REPORT_DESCRIPTOR);

    // The short final packet ended the stage; the next completion is the
    // status handshake, which re-arms both directions.
    complete_in(&mut dev);
    assert_eq!(Epr(dev.bus().epr(0)).stat_rx(), Stat::Valid);
    assert_eq!(Epr(dev.bus().epr(0)).stat_tx(), Stat::Valid);
}

#[test]
fn full_size_final_packet_is_followed_by_zlp() {
    let mut dev = make_device();
    // Host asks for exactly one max packet of the report descriptor.
    send_setup(&mut dev, setup_packet(0x81, 0x06, 0x2200, 0, 64));
    assert_eq!(queued(&dev, 0).len(), 64);
    complete_in(&mut dev);
    assert_eq!(queued(&dev, 0).len(), 0);
    // ZLP queued with TX armed.
    assert_eq!(Epr(dev.bus().epr(0)).stat_tx(), Stat::Valid);
}

#[test]
fn unknown_requests_are_acknowledged_not_ignored() {
    let mut dev = make_device();
    // Vendor request we have no idea about.
    send_setup(&mut dev, setup_packet(0x40, 0x99, 0, 0, 0));
    assert_eq!(queued(&dev, 0).len(), 0);
    assert_eq!(Epr(dev.bus().epr(0)).stat_tx(), Stat::Valid);
    assert_eq!(Epr(dev.bus().epr(0)).stat_rx(), Stat::Nak);
}

#[test]
fn class_set_feature_accepts_a_data_stage() {
    let mut dev = make_device();
    send_setup(&mut dev, setup_packet(0x21, 0x03, 0x0300, 0, 2));
    // RX armed for the feature report.
    assert_eq!(Epr(dev.bus().epr(0)).stat_rx(), Stat::Valid);

    send_out(&mut dev, &[0xAA, 0x55]);
    assert_eq!(dev.setup_data(), &[0xAA, 0x55]);
}

#[test]
fn new_setup_abandons_pending_transfer() {
    let mut dev = make_device();
    send_setup(&mut dev, setup_packet(0x81, 0x06, 0x2200, 0, 115));
    assert_eq!(queued(&dev, 0).len(), 64);
    // Host gives up mid-transfer and starts over with a device request.
    send_setup(&mut dev, setup_packet(0x80, 0x06, 0x0100, 0, 64));
    assert_eq!(queued(&dev, 0).len(), 18);
    // No leftover cursor: the completion runs the end-of-transaction
    // path, not another report chunk.
    complete_in(&mut dev);
    assert_eq!(Epr(dev.bus().epr(0)).stat_rx(), Stat::Valid);
}

#[test]
fn write_truncates_and_copies_whole_words() {
    let mut h = InterruptIn;
    let mut dev = make_device();
    dev.allocate(1, EpType::Interrupt, 8, 0, &mut h).unwrap();

    assert_eq!(dev.write(1, &[0u8; 10]), 8);
    assert_eq!(dev.bus().pma_read(pma::count_tx_off(1)), 8);

    assert_eq!(dev.write(1, &[0x11, 0x22, 0x33]), 3);
    assert_eq!(dev.bus().pma_read(pma::count_tx_off(1)), 3);
    let tx_addr = dev.bus().pma_read(pma::addr_tx_off(1));
    assert_eq!(dev.bus().pma_read(tx_addr), 0x2211);
    assert_eq!(dev.bus().pma_read(tx_addr + 2), 0x0033);

    // write() arms the endpoint; toggles are its own business.
    let ep1 = Epr(dev.bus().epr(1));
    assert_eq!(ep1.stat_tx(), Stat::Valid);
    assert_eq!(dev.write(5, &[0]), 0); // never allocated
}

#[test]
fn interrupt_in_completion_leaves_endpoint_nak() {
    let mut h = InterruptIn;
    let mut dev = make_device();
    dev.allocate(1, EpType::Interrupt, 8, 0, &mut h).unwrap();
    dev.write(1, &[2, 0, 0, 0, 0, 0, 0, 0]);
    assert_eq!(Epr(dev.bus().epr(1)).stat_tx(), Stat::Valid);

    dev.bus_mut().trigger(1, epr::CTR_TX, false);
    dev.interrupt();
    // The hardware fell back to NAK when the report went out; the
    // handler must not disturb that (a committed STAT bit toggles).
    assert_eq!(Epr(dev.bus().epr(1)).stat_tx(), Stat::Nak);
    assert!(!Epr(dev.bus().epr(1)).ctr_tx());
}

#[test]
fn zero_length_in_request_leaves_no_cursor() {
    let mut dev = make_device();
    send_setup(&mut dev, setup_packet(0x80, 0x06, 0x0100, 0, 0));
    // Nothing to stream: the queued ZLP is the handshake itself.
    assert_eq!(queued(&dev, 0).len(), 0);
    complete_in(&mut dev);
    // Straight to the end-of-transaction re-arm, no stray data packet.
    assert_eq!(queued(&dev, 0).len(), 0);
    assert_eq!(Epr(dev.bus().epr(0)).stat_rx(), Stat::Valid);
    assert_eq!(Epr(dev.bus().epr(0)).stat_tx(), Stat::Valid);
}

#[test]
fn write_irq_queues_without_touching_the_register() {
    let mut h = InterruptIn;
    let mut dev = make_device();
    dev.allocate(1, EpType::Interrupt, 8, 0, &mut h).unwrap();
    let before = dev.bus().epr(1);

    assert_eq!(dev.write_irq(1, &[0xAB; 6]), 6);
    assert_eq!(dev.bus().pma_read(pma::count_tx_off(1)), 6);
    assert_eq!(dev.bus().epr(1), before);

    assert_eq!(dev.write_irq(1, &[0xCD; 12]), 8); // truncated like write
    assert_eq!(dev.write_irq(5, &[0]), 0); // never allocated
}

struct Recorder {
    seen: usize,
}

impl EndpointHandler<FakeBus> for Recorder {
    fn on_transaction(&mut self, ep: &Endpoint, _bus: &mut FakeBus) -> Epr {
        self.seen = ep.rx_count as usize;
        // Accept the next packet right away.
        ep.status.set_stat_rx(Stat::Valid).keep_stat_tx()
    }
}

#[test]
fn out_endpoint_handler_and_read() {
    let mut rec = Recorder { seen: 0 };
    let mut dev = make_device();
    dev.allocate(2, EpType::Bulk, 0, 64, &mut rec).unwrap();

    let rx_addr = dev.bus().pma_read(pma::addr_rx_off(2));
    let b = dev.bus_mut();
    pma::write_buffer(b, rx_addr, &[1, 2, 3, 4, 5]);
    b.pma_write(pma::count_rx_off(2), 5);
    b.trigger(2, epr::CTR_RX, true);
    dev.interrupt();

    let mut buf = [0u8; 64];
    assert_eq!(dev.read(2, &mut buf), 5);
    assert_eq!(&buf[..5], &[1, 2, 3, 4, 5]);
    // Handler re-armed reception.
    assert_eq!(Epr(dev.bus().epr(2)).stat_rx(), Stat::Valid);

    drop(dev);
    assert_eq!(rec.seen, 5);
}

#[test]
fn bus_reset_rewinds_everything() {
    let mut h1 = InterruptIn;
    let mut h2 = InterruptIn;
    let mut dev = make_device();
    dev.allocate(1, EpType::Interrupt, 64, 0, &mut h1).unwrap();
    send_setup(&mut dev, setup_packet(0x00, 0x05, 7, 0, 0));
    complete_in(&mut dev);
    assert_eq!(dev.bus().daddr(), 7);
    assert_eq!(dev.state(), DeviceState::Addressed);
    let ep1_tx = dev.bus().pma_read(pma::addr_tx_off(1));

    dev.bus_mut().istr = bus::ISTR_RESET;
    dev.interrupt();

    assert_eq!(dev.state(), DeviceState::Default);
    assert_eq!(dev.bus().daddr(), 0);
    // Registration is gone until the application re-allocates...
    assert_eq!(dev.write(1, &[0; 4]), 0);
    // ...and the bump pointer was rewound: same geometry as before.
    dev.allocate(1, EpType::Interrupt, 64, 0, &mut h2).unwrap();
    assert_eq!(dev.bus().pma_read(pma::addr_tx_off(1)), ep1_tx);
}
