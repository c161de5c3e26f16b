// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device-side USB full-speed stack for BTABLE-style packet-buffer
//! peripherals (the STM32 F0/F1 USB device block and its clones).
//!
//! The peripheral exposes per-endpoint EPnR control registers with
//! write-1-to-toggle status fields and a buffer descriptor table (BTABLE)
//! at the base of dedicated packet memory. This crate owns everything
//! between that register interface and the application: buffer-table
//! allocation, the endpoint-0 control state machine (enumeration,
//! descriptor service, deferred address assignment), and the top-half
//! dispatcher that normalizes endpoint registers after every transaction.
//! The shipped descriptors present a HID boot keyboard + mouse with one
//! interrupt-IN report endpoint.
//!
//! The application consumes the stack through a small surface: it calls
//! [`UsbDevice::interrupt`] from the USB interrupt handler, registers
//! handlers for its endpoints via [`UsbDevice::allocate`], and moves data
//! with [`UsbDevice::write`] / [`UsbDevice::read`] while polling
//! [`UsbDevice::state`] for enumeration progress.
//!
//! Hardware access goes through the [`bus::UsbBus`] trait. On a real
//! target, [`bus::mmio::UsbMmio`] implements it with volatile register
//! accesses; the test suite drives the stack against a software model of
//! the peripheral instead, toggle-write semantics included.
//!
//! Everything runs in the single interrupt context; there are no blocking
//! waits. Descriptors longer than one packet (the HID report descriptor)
//! are streamed through a resumable cursor, one packet per
//! transaction-complete event.

#![cfg_attr(not(test), no_std)]

pub mod bus;
pub mod control;
pub mod descriptors;
pub mod endpoint;
pub mod epr;
pub mod pma;

mod device;

pub use control::{DeviceState, SetupPacket};
pub use device::{AllocError, UsbDevice, NUM_ENDPOINTS};
pub use endpoint::{Endpoint, EndpointHandler, EpType, InterruptIn};
pub use epr::{Epr, Stat};
