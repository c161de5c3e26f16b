// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The descriptor store: immutable wire-format tables describing this
//! device to the host, plus the lookup that serves them.
//!
//! Descriptors are declared as `#[repr(C)]` zerocopy structs whose
//! `as_bytes()` image is exactly what goes on the wire, so field order
//! and little-endian encoding are checked by construction rather than by
//! eyeballing a byte array. The one exception is the HID report
//! descriptor, which is an opaque item stream and stays a byte table.

use byteorder::LittleEndian;
use num_derive::FromPrimitive;
use zerocopy::{AsBytes, U16};

/// Max packet size of the control endpoint, in bytes. Full speed allows
/// (and enumeration speed strongly favors) the maximum of 64.
pub const EP0_BUF_SIZE: u16 = 64;

/// Max packet size of the interrupt-IN report endpoint.
pub const HID_EP_BUF_SIZE: u16 = 64;

/// Address of the report endpoint: endpoint 1, IN direction.
pub const HID_EP_ADDR: u8 = 0x81;

/// Types of USB descriptor understood by the control pipe.
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive, AsBytes)]
#[repr(u8)]
pub enum UsbDescType {
    Device = 0x01,
    Config = 0x02,
    String = 0x03,
    Interface = 0x04,
    Endpoint = 0x05,
    DeviceQualifier = 0x06,
    Hid = 0x21,
    HidReport = 0x22,
}

/// The 18-byte device descriptor, the first thing the host asks for.
#[repr(C)]
#[derive(Debug, AsBytes)]
pub struct UsbDeviceDescriptor {
    length: u8,
    descriptor_type: UsbDescType,
    /// USB protocol version, binary-coded decimal.
    bcd_usb: U16<LittleEndian>,
    device_class: u8,
    device_subclass: u8,
    device_protocol: u8,
    /// Max packet size of endpoint 0.
    max_packet_size0: u8,
    vendor: U16<LittleEndian>,
    product: U16<LittleEndian>,
    /// Device release number, BCD again.
    bcd_device: U16<LittleEndian>,
    manufacturer_s: u8,
    product_s: u8,
    serial_s: u8,
    num_configurations: u8,
}

/// The 10-byte device-qualifier descriptor. A full-speed-only device has
/// no "other speed", but hosts ask anyway and an unanswered request slows
/// enumeration down.
#[repr(C)]
#[derive(Debug, AsBytes)]
pub struct UsbDeviceQualifierDescriptor {
    length: u8,
    descriptor_type: UsbDescType,
    bcd_usb: U16<LittleEndian>,
    device_class: u8,
    device_subclass: u8,
    device_protocol: u8,
    max_packet_size0: u8,
    num_configurations: u8,
    reserved: u8,
}

/// Configuration descriptor header.
#[repr(C)]
#[derive(Debug, AsBytes)]
pub struct UsbConfigurationDescriptor {
    length: u8,
    descriptor_type: UsbDescType,
    /// Length of the whole configuration tree, this header included.
    total_length: U16<LittleEndian>,
    num_interfaces: u8,
    configuration_value: u8,
    configuration_s: u8,
    attributes: u8,
    /// Units of 2 mA.
    max_power: u8,
}

#[repr(C)]
#[derive(Debug, AsBytes)]
pub struct UsbInterfaceDescriptor {
    length: u8,
    descriptor_type: UsbDescType,
    interface_number: u8,
    alternate_setting: u8,
    num_endpoints: u8,
    interface_class: u8,
    interface_subclass: u8,
    interface_protocol: u8,
    interface_s: u8,
}

/// The class-specific HID descriptor embedded in the configuration tree.
#[repr(C)]
#[derive(Debug, AsBytes)]
pub struct UsbHidDescriptor {
    length: u8,
    descriptor_type: UsbDescType,
    /// HID specification release, BCD.
    bcd_hid: U16<LittleEndian>,
    country_code: u8,
    num_descriptors: u8,
    /// Type of the one subordinate descriptor (report).
    report_type: UsbDescType,
    report_length: U16<LittleEndian>,
}

#[repr(C)]
#[derive(Debug, AsBytes)]
pub struct UsbEndpointDescriptor {
    length: u8,
    descriptor_type: UsbDescType,
    endpoint_address: u8,
    attributes: u8,
    max_packet_size: U16<LittleEndian>,
    /// Polling interval in milliseconds.
    interval: u8,
}

/// The configuration tree served as one blob: configuration header,
/// interface, HID descriptor, report endpoint. All members are
/// padding-free, so the struct image is the concatenation.
#[repr(C)]
#[derive(Debug, AsBytes)]
pub struct UsbConfigurationTree {
    config: UsbConfigurationDescriptor,
    interface: UsbInterfaceDescriptor,
    hid: UsbHidDescriptor,
    endpoint: UsbEndpointDescriptor,
}

pub static DEVICE_DESCRIPTOR: UsbDeviceDescriptor = UsbDeviceDescriptor {
    length: core::mem::size_of::<UsbDeviceDescriptor>() as u8,
    descriptor_type: UsbDescType::Device,
    bcd_usb: U16::from_bytes(u16::to_le_bytes(0x0200)),
    device_class: 0,
    device_subclass: 0,
    device_protocol: 0,
    max_packet_size0: EP0_BUF_SIZE as u8,
    vendor: U16::from_bytes(u16::to_le_bytes(0x045E)),
    product: U16::from_bytes(u16::to_le_bytes(0x005C)),
    bcd_device: U16::from_bytes(u16::to_le_bytes(0x0200)),
    manufacturer_s: 1,
    product_s: 2,
    serial_s: 3,
    num_configurations: 1,
};

pub static DEVICE_QUALIFIER_DESCRIPTOR: UsbDeviceQualifierDescriptor =
    UsbDeviceQualifierDescriptor {
        length: core::mem::size_of::<UsbDeviceQualifierDescriptor>() as u8,
        descriptor_type: UsbDescType::DeviceQualifier,
        bcd_usb: U16::from_bytes(u16::to_le_bytes(0x0200)),
        device_class: 0,
        device_subclass: 0,
        device_protocol: 0,
        max_packet_size0: EP0_BUF_SIZE as u8,
        num_configurations: 1,
        reserved: 0,
    };

pub static CONFIGURATION_TREE: UsbConfigurationTree = UsbConfigurationTree {
    config: UsbConfigurationDescriptor {
        length: core::mem::size_of::<UsbConfigurationDescriptor>() as u8,
        descriptor_type: UsbDescType::Config,
        total_length: U16::from_bytes(u16::to_le_bytes(
            core::mem::size_of::<UsbConfigurationTree>() as u16,
        )),
        num_interfaces: 1,
        configuration_value: 1,
        configuration_s: 0,
        attributes: 0xA0, // bus powered, remote wakeup
        max_power: 0x32,  // 100 mA
    },
    interface: UsbInterfaceDescriptor {
        length: core::mem::size_of::<UsbInterfaceDescriptor>() as u8,
        descriptor_type: UsbDescType::Interface,
        interface_number: 0,
        alternate_setting: 0,
        num_endpoints: 1,
        interface_class: 0x03,    // HID
        interface_subclass: 0x01, // boot
        interface_protocol: 0x01, // keyboard
        interface_s: 0,
    },
    hid: UsbHidDescriptor {
        length: core::mem::size_of::<UsbHidDescriptor>() as u8,
        descriptor_type: UsbDescType::Hid,
        bcd_hid: U16::from_bytes(u16::to_le_bytes(0x0110)),
        country_code: 0,
        num_descriptors: 1,
        report_type: UsbDescType::HidReport,
        report_length: U16::from_bytes(u16::to_le_bytes(HID_REPORT_LEN as u16)),
    },
    endpoint: UsbEndpointDescriptor {
        length: core::mem::size_of::<UsbEndpointDescriptor>() as u8,
        descriptor_type: UsbDescType::Endpoint,
        endpoint_address: HID_EP_ADDR,
        attributes: 0x03, // interrupt
        max_packet_size: U16::from_bytes(u16::to_le_bytes(HID_EP_BUF_SIZE)),
        interval: 1,
    },
};

/// Length of [`HID_REPORT_DESCRIPTOR`], also embedded in the
/// configuration tree as `wDescriptorLength`.
pub const HID_REPORT_LEN: usize = 115;

/// Report descriptor for a composite mouse (report ID 1) plus boot
/// keyboard (report ID 2).
pub static HID_REPORT_DESCRIPTOR: [u8; HID_REPORT_LEN] = [
    0x05, 0x01, // Usage Page (Generic Desktop)
    0x09, 0x02, // Usage (Mouse)
    0xA1, 0x01, // Collection (Application)
    0x09, 0x01, //   Usage (Pointer)
    0xA1, 0x00, //   Collection (Physical)
    0x85, 0x01, //     Report ID (1)
    0x05, 0x09, //     Usage Page (Buttons)
    0x19, 0x01, //     Usage Minimum (1)
    0x29, 0x03, //     Usage Maximum (3)
    0x15, 0x00, //     Logical Minimum (0)
    0x25, 0x01, //     Logical Maximum (1)
    0x95, 0x03, //     Report Count (3)
    0x75, 0x01, //     Report Size (1)
    0x81, 0x02, //     Input (Data, Variable, Absolute)
    0x95, 0x01, //     Report Count (1)
    0x75, 0x05, //     Report Size (5)
    0x81, 0x01, //     Input (Constant), 5-bit padding
    0x05, 0x01, //     Usage Page (Generic Desktop)
    0x09, 0x30, //     Usage (X)
    0x09, 0x31, //     Usage (Y)
    0x15, 0x81, //     Logical Minimum (-127)
    0x25, 0x7F, //     Logical Maximum (127)
    0x75, 0x08, //     Report Size (8)
    0x95, 0x02, //     Report Count (2)
    0x81, 0x06, //     Input (Data, Variable, Relative)
    0xC0, 0xC0, // End Collection, End Collection
    0x09, 0x06, // Usage (Keyboard)
    0xA1, 0x01, // Collection (Application)
    0x85, 0x02, //   Report ID (2)
    0x05, 0x07, //   Usage Page (Key Codes)
    0x19, 0xE0, //   Usage Minimum (224)
    0x29, 0xE7, //   Usage Maximum (231)
    0x15, 0x00, //   Logical Minimum (0)
    0x25, 0x01, //   Logical Maximum (1)
    0x75, 0x01, //   Report Size (1)
    0x95, 0x08, //   Report Count (8)
    0x81, 0x02, //   Input (Data, Variable, Absolute)
    0x95, 0x01, //   Report Count (1)
    0x75, 0x08, //   Report Size (8)
    0x81, 0x01, //   Input (Constant)
    0x95, 0x05, //   Report Count (5)
    0x75, 0x01, //   Report Size (1)
    0x05, 0x08, //   Usage Page (LEDs)
    0x19, 0x01, //   Usage Minimum (1)
    0x29, 0x05, //   Usage Maximum (5)
    0x91, 0x02, //   Output (Data, Variable, Absolute)
    0x95, 0x01, //   Report Count (1)
    0x75, 0x03, //   Report Size (3)
    0x91, 0x01, //   Output (Constant)
    0x95, 0x06, //   Report Count (6)
    0x75, 0x08, //   Report Size (8)
    0x15, 0x00, //   Logical Minimum (0)
    0x25, 0x65, //   Logical Maximum (101)
    0x05, 0x07, //   Usage Page (Key Codes)
    0x19, 0x00, //   Usage Minimum (0)
    0x29, 0x65, //   Usage Maximum (101)
    0x81, 0x00, //   Input (Data, Array)
    0xC0, //       End Collection
];

// String descriptors: {bLength, 0x03, UTF-16LE code units...}.
pub static STRING_LANG: [u8; 4] = [4, 0x03, 0x09, 0x04]; // en-US
pub static STRING_MANUFACTURER: [u8; 16] = [
    16, 0x03, b'S', 0, b'A', 0, b'O', 0, b' ', 0, b'R', 0, b'A', 0, b'S', 0,
];
pub static STRING_PRODUCT: [u8; 38] = [
    38, 0x03, b'H', 0, b'I', 0, b'D', 0, b' ', 0, b'm', 0, b'o', 0, b'u', 0,
    b's', 0, b'e', 0, b'+', 0, b'k', 0, b'e', 0, b'y', 0, b'b', 0, b'o', 0,
    b'a', 0, b'r', 0, b'd', 0,
];
pub static STRING_SERIAL: [u8; 4] = [4, 0x03, b'0', 0];

/// Serve the blob for a descriptor type + index. The caller truncates to
/// the host's requested length; unknown combinations yield `None` and the
/// control pipe falls through to its acknowledge path.
pub fn lookup(ty: UsbDescType, index: u8) -> Option<&'static [u8]> {
    match (ty, index) {
        (UsbDescType::Device, 0) => Some(DEVICE_DESCRIPTOR.as_bytes()),
        (UsbDescType::Config, 0) => Some(CONFIGURATION_TREE.as_bytes()),
        (UsbDescType::String, 0) => Some(&STRING_LANG),
        (UsbDescType::String, 1) => Some(&STRING_MANUFACTURER),
        (UsbDescType::String, 2) => Some(&STRING_PRODUCT),
        (UsbDescType::String, 3) => Some(&STRING_SERIAL),
        (UsbDescType::DeviceQualifier, 0) => {
            Some(DEVICE_QUALIFIER_DESCRIPTOR.as_bytes())
        }
        (UsbDescType::HidReport, _) => Some(&HID_REPORT_DESCRIPTOR),
        _ => None,
    }
}
