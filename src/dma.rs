// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! Configuration surface of the external DMA engine.
//!
//! Peripheral drivers do not own or drive the DMA engine; they only describe
//! the transfers it should run on their behalf — which register data moves
//! through, how wide one cell is, and which interrupt sources start or abort
//! a transfer. The engine implementing [`DmaChannel`] lives outside this
//! crate.

/// A hardware event a DMA channel reacts to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DmaEvent {
    /// Whether the channel reacts to the event at all.
    pub enabled: bool,
    /// Interrupt source number raising the event.
    pub vector: u8,
}

/// One externally owned DMA channel.
///
/// All methods are configuration only; no transfer starts here.
pub trait DmaChannel {
    /// Set the address the channel reads from and how many units each
    /// triggered transfer moves.
    fn configure_source(&self, address: usize, unit_count: usize);

    /// Set the address the channel writes to and how many units each
    /// triggered transfer moves.
    fn configure_destination(&self, address: usize, unit_count: usize);

    /// Set the width in bytes of one transferred cell.
    fn configure_cell_size(&self, bytes: u8);

    /// Set the event that starts a transfer.
    fn configure_start_event(&self, event: DmaEvent);

    /// Set the event that aborts an in-progress transfer.
    fn configure_abort_event(&self, event: DmaEvent);
}
