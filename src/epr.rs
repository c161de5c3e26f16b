// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Pure algebra over the 16-bit per-endpoint control register (EPnR).
//!
//! The peripheral uses three different write conventions in the same
//! register, which makes naive read-modify-write cycles destructive:
//!
//! - STAT and DTOG fields are *toggle* bits: writing 1 flips the bit,
//!   writing 0 leaves it alone.
//! - CTR completion flags are rc_w0: writing 0 clears, writing 1 is a
//!   no-op.
//! - EA/EP_TYPE/EP_KIND are plain read-write.
//!
//! Everything here is a pure transform from the as-read register value to
//! the image that must be written back to achieve a desired effect. The
//! transforms compose by sequential application and are order-independent
//! for disjoint bit groups; a STAT setter must be applied at most once per
//! composition (it assumes the field still holds the as-read value).
//! The composed image is committed with a single register write so the
//! hardware never observes an intermediate state.

/// RX transaction complete (rc_w0).
pub const CTR_RX: u16 = 1 << 15;
/// RX data toggle (toggle-on-write-1).
pub const DTOG_RX: u16 = 1 << 14;
/// RX status field, two toggle bits.
pub const STAT_RX: u16 = 0b11 << 12;
pub const STAT_RX_0: u16 = 0b01 << 12;
pub const STAT_RX_1: u16 = 0b10 << 12;
/// Last completed OUT transaction carried a SETUP token (read-only).
pub const SETUP: u16 = 1 << 11;
/// Endpoint type field (read-write).
pub const EP_TYPE: u16 = 0b11 << 9;
/// Endpoint kind modifier (read-write).
pub const EP_KIND: u16 = 1 << 8;
/// TX transaction complete (rc_w0).
pub const CTR_TX: u16 = 1 << 7;
/// TX data toggle (toggle-on-write-1).
pub const DTOG_TX: u16 = 1 << 6;
/// TX status field, two toggle bits.
pub const STAT_TX: u16 = 0b11 << 4;
pub const STAT_TX_0: u16 = 0b01 << 4;
pub const STAT_TX_1: u16 = 0b10 << 4;
/// Endpoint address field (read-write).
pub const EA: u16 = 0xF;

const STAT_RX_SHIFT: u16 = 12;
const STAT_TX_SHIFT: u16 = 4;

/// Handshake state of one direction of an endpoint, as encoded in the
/// STAT_RX/STAT_TX fields.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Stat {
    /// Direction ignores all traffic.
    Disabled = 0b00,
    /// Requests are answered with STALL.
    Stall = 0b01,
    /// Requests are answered with NAK.
    Nak = 0b10,
    /// Direction is armed for a transaction.
    Valid = 0b11,
}

impl Stat {
    fn from_bits(bits: u16) -> Self {
        match bits & 0b11 {
            0b00 => Stat::Disabled,
            0b01 => Stat::Stall,
            0b10 => Stat::Nak,
            _ => Stat::Valid,
        }
    }
}

/// An EPnR value, either as read from the peripheral or as the write image
/// being assembled for it.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Epr(pub u16);

impl Epr {
    /// Request the given RX handshake state. XORing the field with the
    /// desired value makes the hardware toggle exactly the bits that
    /// differ, so the field lands on `stat` whatever it held before.
    #[must_use]
    pub fn set_stat_rx(self, stat: Stat) -> Self {
        Epr(self.0 ^ ((stat as u16) << STAT_RX_SHIFT))
    }

    /// Request the given TX handshake state.
    #[must_use]
    pub fn set_stat_tx(self, stat: Stat) -> Self {
        Epr(self.0 ^ ((stat as u16) << STAT_TX_SHIFT))
    }

    /// Leave the RX handshake state untouched (write zeros to the field).
    #[must_use]
    pub fn keep_stat_rx(self) -> Self {
        Epr(self.0 & !STAT_RX)
    }

    /// Leave the TX handshake state untouched.
    #[must_use]
    pub fn keep_stat_tx(self) -> Self {
        Epr(self.0 & !STAT_TX)
    }

    /// Leave the RX data toggle untouched.
    #[must_use]
    pub fn keep_dtog_rx(self) -> Self {
        Epr(self.0 & !DTOG_RX)
    }

    /// Leave the TX data toggle untouched.
    #[must_use]
    pub fn keep_dtog_tx(self) -> Self {
        Epr(self.0 & !DTOG_TX)
    }

    /// Force the RX data toggle to zero. The as-read bit stays in the
    /// image: writing a set toggle bit flips it to zero, writing a clear
    /// one does nothing.
    #[must_use]
    pub fn clear_dtog_rx(self) -> Self {
        self
    }

    /// Force the TX data toggle to zero.
    #[must_use]
    pub fn clear_dtog_tx(self) -> Self {
        self
    }

    /// Clear the RX completion flag (rc_w0: write zero to clear).
    #[must_use]
    pub fn clear_ctr_rx(self) -> Self {
        Epr(self.0 & !CTR_RX)
    }

    /// Clear the TX completion flag.
    #[must_use]
    pub fn clear_ctr_tx(self) -> Self {
        Epr(self.0 & !CTR_TX)
    }

    pub fn ctr_rx(self) -> bool {
        self.0 & CTR_RX != 0
    }

    pub fn ctr_tx(self) -> bool {
        self.0 & CTR_TX != 0
    }

    pub fn setup(self) -> bool {
        self.0 & SETUP != 0
    }

    pub fn stat_rx(self) -> Stat {
        Stat::from_bits(self.0 >> STAT_RX_SHIFT)
    }

    pub fn stat_tx(self) -> Stat {
        Stat::from_bits(self.0 >> STAT_TX_SHIFT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Model of the hardware's reaction to a write: toggle bits XOR,
    /// rc_w0 bits AND, SETUP is read-only, the rest is taken from the
    /// written image.
    fn commit(current: u16, image: u16) -> u16 {
        const TOGGLE: u16 = STAT_RX | STAT_TX | DTOG_RX | DTOG_TX;
        const RC_W0: u16 = CTR_RX | CTR_TX;
        const RW: u16 = EP_TYPE | EP_KIND | EA;
        (current ^ image) & TOGGLE
            | current & image & RC_W0
            | current & SETUP
            | image & RW
    }

    #[test]
    fn stat_setter_lands_for_any_prior_state() {
        for cur in 0..=u16::MAX {
            let image = Epr(cur)
                .set_stat_rx(Stat::Valid)
                .set_stat_tx(Stat::Nak)
                .keep_dtog_rx()
                .keep_dtog_tx()
                .clear_ctr_rx()
                .clear_ctr_tx();
            let after = Epr(commit(cur, image.0));
            assert_eq!(after.stat_rx(), Stat::Valid);
            assert_eq!(after.stat_tx(), Stat::Nak);
            // toggles untouched
            assert_eq!(after.0 & DTOG_RX, cur & DTOG_RX);
            assert_eq!(after.0 & DTOG_TX, cur & DTOG_TX);
            // completion flags gone
            assert!(!after.ctr_rx());
            assert!(!after.ctr_tx());
        }
    }

    #[test]
    fn disjoint_transforms_commute() {
        for cur in 0..=u16::MAX {
            let a = Epr(cur).set_stat_tx(Stat::Valid).keep_dtog_tx();
            let b = Epr(cur).keep_dtog_tx().set_stat_tx(Stat::Valid);
            assert_eq!(a, b);

            let a = Epr(cur).set_stat_rx(Stat::Nak).clear_ctr_tx();
            let b = Epr(cur).clear_ctr_tx().set_stat_rx(Stat::Nak);
            assert_eq!(a, b);
        }
    }

    #[test]
    fn clear_dtog_zeroes_the_toggle() {
        for cur in [0u16, DTOG_RX, DTOG_TX, DTOG_RX | DTOG_TX] {
            let image = Epr(cur).clear_dtog_rx().clear_dtog_tx();
            let after = commit(cur, image.0);
            assert_eq!(after & (DTOG_RX | DTOG_TX), 0);
        }
    }

    #[test]
    fn keep_stat_is_a_no_op_on_commit() {
        for cur in 0..=u16::MAX {
            let image = Epr(cur).keep_stat_rx().keep_stat_tx();
            let after = Epr(commit(cur, image.0));
            assert_eq!(after.stat_rx(), Epr(cur).stat_rx());
            assert_eq!(after.stat_tx(), Epr(cur).stat_tx());
        }
    }
}
