// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! Serial Peripheral Interface (SPI).
//!
//! Drives the two SPI modules of the PIC32MX. The modules live in a fixed
//! [`SpiChannels`] registry and are handed out one owner at a time: a
//! channel is programmed when it is acquired and goes back to the registry
//! on release. Transmission is blocking and master-mode only; the receive
//! path is not implemented. Instead of per-unit polling, a channel can be
//! wired to the external DMA engine, which then moves data on the module's
//! receive, transmit and fault interrupts.
//!
//! SPI interrupts themselves are never enabled: `configure` masks all three
//! sources and leaves them masked. The per-channel interrupt maps still
//! carry the vector numbers, because the DMA engine is triggered by them.

use core::cell::Cell;

use tock_registers::fields::FieldValue;
use tock_registers::interfaces::{Readable, Writeable};
use tock_registers::registers::{ReadWrite, WriteOnly};
use tock_registers::{register_bitfields, register_structs};

use crate::dma::{DmaChannel, DmaEvent};
use crate::utilities::StaticRef;

register_structs! {
    /// One SPI module. Every configuration register is followed by its
    /// hardware CLR/SET/INV aliases; a masked write to an alias changes
    /// exactly the masked bits in one bus transaction.
    pub(crate) SpiRegisters {
        /// Control register
        (0x000 => con: ReadWrite<u32, CON::Register>),
        (0x004 => conclr: WriteOnly<u32, CON::Register>),
        (0x008 => conset: WriteOnly<u32, CON::Register>),
        (0x00C => coninv: WriteOnly<u32, CON::Register>),
        /// Status register
        (0x010 => stat: ReadWrite<u32, STAT::Register>),
        (0x014 => statclr: WriteOnly<u32, STAT::Register>),
        (0x018 => statset: WriteOnly<u32, STAT::Register>),
        (0x01C => statinv: WriteOnly<u32, STAT::Register>),
        /// Transmit/receive buffer; the FIFO behind it is sized by the
        /// MODE32/MODE16 transfer width
        (0x020 => buf: ReadWrite<u32>),
        (0x024 => _reserved0),
        /// Baud rate generator
        (0x030 => brg: ReadWrite<u32>),
        (0x034 => brgclr: WriteOnly<u32>),
        (0x038 => brgset: WriteOnly<u32>),
        (0x03C => brginv: WriteOnly<u32>),
        /// Audio protocol control register (unused by this driver)
        (0x040 => con2: ReadWrite<u32>),
        (0x044 => con2clr: WriteOnly<u32>),
        (0x048 => con2set: WriteOnly<u32>),
        (0x04C => con2inv: WriteOnly<u32>),
        (0x050 => @END),
    }
}

register_structs! {
    /// One interrupt controller register (an IFSx flag register or an IECx
    /// enable register) together with its CLR/SET/INV aliases.
    pub(crate) IntRegisters {
        (0x000 => reg: ReadWrite<u32>),
        (0x004 => clr: WriteOnly<u32>),
        (0x008 => set: WriteOnly<u32>),
        (0x00C => inv: WriteOnly<u32>),
        (0x010 => @END),
    }
}

register_bitfields![u32,
    pub CON [
        /// Framed SPI support
        FRMEN OFFSET(31) NUMBITS(1) [],
        /// Frame sync pulse direction
        FRMSYNC OFFSET(30) NUMBITS(1) [],
        /// Frame sync polarity
        FRMPOL OFFSET(29) NUMBITS(1) [],
        /// Master mode slave select enable
        MSSEN OFFSET(28) NUMBITS(1) [],
        /// Frame sync pulse width
        FRMSYPW OFFSET(27) NUMBITS(1) [],
        /// Frame sync pulse counter
        FRMCNT OFFSET(24) NUMBITS(3) [],
        /// Master clock select
        MCLKSEL OFFSET(23) NUMBITS(1) [],
        /// Frame sync pulse edge select
        SPIFE OFFSET(17) NUMBITS(1) [],
        /// Enhanced buffer (FIFO) mode
        ENHBUF OFFSET(16) NUMBITS(1) [],
        /// Module on
        ON OFFSET(15) NUMBITS(1) [],
        /// Stop in idle mode
        SIDL OFFSET(13) NUMBITS(1) [],
        /// Disable the SDO pin
        DISSDO OFFSET(12) NUMBITS(1) [],
        /// 32-bit transfer width
        MODE32 OFFSET(11) NUMBITS(1) [],
        /// 16-bit transfer width
        MODE16 OFFSET(10) NUMBITS(1) [],
        /// Input sample phase
        SMP OFFSET(9) NUMBITS(1) [],
        /// Clock edge select
        CKE OFFSET(8) NUMBITS(1) [],
        /// Slave select enable (slave mode)
        SSEN OFFSET(7) NUMBITS(1) [],
        /// Clock polarity
        CKP OFFSET(6) NUMBITS(1) [],
        /// Master mode enable
        MSTEN OFFSET(5) NUMBITS(1) [],
        /// Disable the SDI pin
        DISSDI OFFSET(4) NUMBITS(1) [],
        /// Transmit buffer interrupt condition
        STXISEL OFFSET(2) NUMBITS(2) [
            LAST_SHIFTED = 0,
            EMPTY = 1,
            HALF_EMPTY = 2,
            NOT_FULL = 3
        ],
        /// Receive buffer interrupt condition
        SRXISEL OFFSET(0) NUMBITS(2) [
            EMPTY = 0,
            NOT_EMPTY = 1,
            HALF_FULL = 2,
            FULL = 3
        ]
    ],
    pub STAT [
        /// Receive FIFO fill level
        RXBUFELM OFFSET(24) NUMBITS(5) [],
        /// Transmit FIFO fill level
        TXBUFELM OFFSET(16) NUMBITS(5) [],
        /// Frame error
        FRMERR OFFSET(12) NUMBITS(1) [],
        /// Module busy
        SPIBUSY OFFSET(11) NUMBITS(1) [],
        /// Transmit underrun
        SPITUR OFFSET(8) NUMBITS(1) [],
        /// Shift register empty
        SRMT OFFSET(7) NUMBITS(1) [],
        /// Receive overflow
        SPIROV OFFSET(6) NUMBITS(1) [],
        /// Receive buffer empty
        SPIRBE OFFSET(5) NUMBITS(1) [],
        /// Transmit buffer empty
        SPITBE OFFSET(3) NUMBITS(1) [],
        /// Transmit buffer full
        SPITBF OFFSET(1) NUMBITS(1) [],
        /// Receive buffer full
        SPIRBF OFFSET(0) NUMBITS(1) []
    ]
];

const SPI1_BASE: StaticRef<SpiRegisters> =
    unsafe { StaticRef::new(0xBF80_5800u32 as *const SpiRegisters) };
const SPI2_BASE: StaticRef<SpiRegisters> =
    unsafe { StaticRef::new(0xBF80_5A00u32 as *const SpiRegisters) };

const IFS1_BASE: StaticRef<IntRegisters> =
    unsafe { StaticRef::new(0xBF88_1040u32 as *const IntRegisters) };
const IFS2_BASE: StaticRef<IntRegisters> =
    unsafe { StaticRef::new(0xBF88_1050u32 as *const IntRegisters) };
const IEC1_BASE: StaticRef<IntRegisters> =
    unsafe { StaticRef::new(0xBF88_1070u32 as *const IntRegisters) };
const IEC2_BASE: StaticRef<IntRegisters> =
    unsafe { StaticRef::new(0xBF88_1080u32 as *const IntRegisters) };

// Interrupt controller sources for the SPI modules. The IRQ number of a
// source is 32 * flag-register-index + bit-position.
const SPI1_ERR_IRQ: u8 = 35;
const SPI1_RX_IRQ: u8 = 36;
const SPI1_TX_IRQ: u8 = 37;
const SPI2_ERR_IRQ: u8 = 85;
const SPI2_RX_IRQ: u8 = 86;
const SPI2_TX_IRQ: u8 = 87;

/// Fixed interrupt wiring of one SPI module: its flag/enable register pair,
/// the bit masks of the fault, receive and transmit sources in them, and the
/// IRQ numbers the DMA engine can be triggered by.
pub(crate) struct SpiInterrupts {
    ifs: StaticRef<IntRegisters>,
    iec: StaticRef<IntRegisters>,
    fault_flag: u32,
    receive_flag: u32,
    transmit_flag: u32,
    fault_enable: u32,
    receive_enable: u32,
    transmit_enable: u32,
    fault_irq: u8,
    receive_irq: u8,
    transmit_irq: u8,
}

const SPI1_INTERRUPTS: SpiInterrupts = SpiInterrupts {
    ifs: IFS1_BASE,
    iec: IEC1_BASE,
    fault_flag: 1 << 3,
    receive_flag: 1 << 4,
    transmit_flag: 1 << 5,
    fault_enable: 1 << 3,
    receive_enable: 1 << 4,
    transmit_enable: 1 << 5,
    fault_irq: SPI1_ERR_IRQ,
    receive_irq: SPI1_RX_IRQ,
    transmit_irq: SPI1_TX_IRQ,
};

const SPI2_INTERRUPTS: SpiInterrupts = SpiInterrupts {
    ifs: IFS2_BASE,
    iec: IEC2_BASE,
    fault_flag: 1 << 21,
    receive_flag: 1 << 22,
    transmit_flag: 1 << 23,
    fault_enable: 1 << 21,
    receive_enable: 1 << 22,
    transmit_enable: 1 << 23,
    fault_irq: SPI2_ERR_IRQ,
    receive_irq: SPI2_RX_IRQ,
    transmit_irq: SPI2_TX_IRQ,
};

// FIFO geometry per transfer width: entries the hardware queues, and the
// width of one entry in bytes.
const FIFO_DEPTH_MODE32: u8 = 4;
const FIFO_DEPTH_MODE16: u8 = 8;
const FIFO_DEPTH_MODE8: u8 = 16;
const FIFO_SIZE_MODE32: u8 = 4;
const FIFO_SIZE_MODE16: u8 = 2;
const FIFO_SIZE_MODE8: u8 = 1;

/// Identifies one of the two SPI hardware instances.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SpiChannel {
    Channel1 = 0,
    Channel2 = 1,
}

/// One-shot configuration for an SPI channel. Consumed by
/// [`SpiChannels::acquire`] and [`Spi::configure`], not retained.
#[derive(Clone, Copy)]
pub struct Configuration {
    /// Requested bit clock in Hz. A value of 0 programs divisor 0 (the
    /// fastest rate) instead of dividing by zero.
    pub baud_rate: u32,
    /// Control word written verbatim to the CON register, e.g.
    /// `CON::MSTEN::SET + CON::MODE32::SET + CON::ON::SET`.
    pub control: FieldValue<u32, CON::Register>,
}

impl Default for Configuration {
    fn default() -> Configuration {
        Configuration {
            baud_rate: 1_000_000,
            control: CON::MSTEN::SET,
        }
    }
}

/// One SPI channel descriptor.
///
/// Handles are obtained from [`SpiChannels::acquire`] and stay valid until
/// [`Spi::release`].
pub struct Spi {
    registers: StaticRef<SpiRegisters>,
    interrupts: &'static SpiInterrupts,
    pb_clock: u32,
    fifo_depth: Cell<u8>,
    fifo_size: Cell<u8>,
    assigned: Cell<bool>,
}

impl Spi {
    pub(crate) const fn new(
        registers: StaticRef<SpiRegisters>,
        interrupts: &'static SpiInterrupts,
        pb_clock: u32,
    ) -> Spi {
        Spi {
            registers,
            interrupts,
            pb_clock,
            fifo_depth: Cell::new(FIFO_DEPTH_MODE8),
            fifo_size: Cell::new(FIFO_SIZE_MODE8),
            assigned: Cell::new(false),
        }
    }

    /// Program a new configuration.
    ///
    /// The module is disabled before anything else is touched and is left
    /// in whatever enable state `config.control` carries. All three SPI
    /// interrupt sources are masked and any pending flags discarded;
    /// interrupt-driven operation is not supported.
    pub fn configure(&self, config: Configuration) {
        let regs = self.registers;
        let ints = self.interrupts;

        regs.conclr.write(CON::ON::SET);

        ints.iec
            .clr
            .set(ints.fault_enable | ints.receive_enable | ints.transmit_enable);
        ints.ifs
            .clr
            .set(ints.fault_flag | ints.receive_flag | ints.transmit_flag);

        regs.brg.set(baud_divisor(self.pb_clock, config.baud_rate));
        regs.con.write(config.control);

        let (depth, size) = if regs.con.is_set(CON::MODE32) {
            (FIFO_DEPTH_MODE32, FIFO_SIZE_MODE32)
        } else if regs.con.is_set(CON::MODE16) {
            (FIFO_DEPTH_MODE16, FIFO_SIZE_MODE16)
        } else {
            (FIFO_DEPTH_MODE8, FIFO_SIZE_MODE8)
        };
        self.fifo_depth.set(depth);
        self.fifo_size.set(size);
    }

    /// Turn the module on. Idempotent.
    pub fn enable(&self) {
        self.registers.conset.write(CON::ON::SET);
    }

    /// Turn the module off. Idempotent.
    pub fn disable(&self) {
        self.registers.conclr.write(CON::ON::SET);
    }

    pub fn is_enabled(&self) -> bool {
        self.registers.con.is_set(CON::ON)
    }

    /// Shut the module down and hand the channel back to the registry.
    ///
    /// The handle must not be used after this call; the next owner comes
    /// from [`SpiChannels::acquire`].
    pub fn release(&self) {
        self.disable();
        self.assigned.set(false);
    }

    /// Entries the hardware FIFO holds at the configured transfer width.
    pub fn fifo_depth(&self) -> u8 {
        self.fifo_depth.get()
    }

    /// Width in bytes of one transfer unit at the configured width.
    pub fn fifo_size(&self) -> u8 {
        self.fifo_size.get()
    }

    /// Push every byte of `buffer` through the transmit FIFO.
    ///
    /// The module must already be enabled. Returns `false` without touching
    /// the FIFO if `buffer` is empty or the channel is not in master mode.
    /// Each unit busy-waits for a free FIFO slot; there is no timeout, so a
    /// wedged module blocks the caller indefinitely.
    pub fn transmit(&self, buffer: &[u8]) -> bool {
        debug_assert!(self.registers.con.is_set(CON::ON));

        if buffer.is_empty() || !self.registers.con.is_set(CON::MSTEN) {
            return false;
        }
        for &unit in buffer {
            while self.registers.stat.is_set(STAT::SPITBF) {}
            self.registers.buf.set(unit as u32);
        }
        true
    }

    /// 32-bit variant of [`Spi::transmit`], for MODE32 operation.
    pub fn transmit_words(&self, buffer: &[u32]) -> bool {
        debug_assert!(self.registers.con.is_set(CON::ON));

        if buffer.is_empty() || !self.registers.con.is_set(CON::MSTEN) {
            return false;
        }
        for &unit in buffer {
            while self.registers.stat.is_set(STAT::SPITBF) {}
            self.registers.buf.set(unit);
        }
        true
    }

    /// Wire an externally owned DMA channel to drain this module's receive
    /// FIFO: one FIFO entry read from the buffer register per cell, started
    /// by the receive interrupt, aborted by the fault interrupt.
    ///
    /// Configuration only; the DMA engine owns the transfer itself.
    pub fn configure_dma_source(&self, channel: &dyn DmaChannel) {
        channel.configure_source(self.buffer_address(), 1);
        channel.configure_cell_size(self.fifo_size.get());
        channel.configure_start_event(DmaEvent {
            enabled: true,
            vector: self.interrupts.receive_irq,
        });
        channel.configure_abort_event(DmaEvent {
            enabled: true,
            vector: self.interrupts.fault_irq,
        });
    }

    /// Wire an externally owned DMA channel to feed this module's transmit
    /// FIFO: one FIFO entry written to the buffer register per cell, started
    /// by the transmit interrupt, aborted by the fault interrupt.
    ///
    /// Configuration only; the DMA engine owns the transfer itself.
    pub fn configure_dma_destination(&self, channel: &dyn DmaChannel) {
        channel.configure_destination(self.buffer_address(), 1);
        channel.configure_cell_size(self.fifo_size.get());
        channel.configure_start_event(DmaEvent {
            enabled: true,
            vector: self.interrupts.transmit_irq,
        });
        channel.configure_abort_event(DmaEvent {
            enabled: true,
            vector: self.interrupts.fault_irq,
        });
    }

    // The buffer register is the one address data moves through, for both
    // DMA directions.
    fn buffer_address(&self) -> usize {
        &self.registers.buf as *const ReadWrite<u32> as usize
    }
}

/// Registry of the two SPI hardware instances.
///
/// Boards construct one of these (it is `const`-constructible, so it can
/// live in a `static`) and claim channels through [`SpiChannels::acquire`].
/// The registry is not `Sync`: claims must all come from one context.
pub struct SpiChannels {
    channels: [Spi; 2],
}

impl SpiChannels {
    pub const fn new(pb_clock: u32) -> SpiChannels {
        SpiChannels {
            channels: [
                Spi::new(SPI1_BASE, &SPI1_INTERRUPTS, pb_clock),
                Spi::new(SPI2_BASE, &SPI2_INTERRUPTS, pb_clock),
            ],
        }
    }

    /// Claim a channel and program `config` into it.
    ///
    /// Returns `None` while the channel is held by a previous owner that
    /// has not called [`Spi::release`].
    pub fn acquire(&self, channel: SpiChannel, config: Configuration) -> Option<&Spi> {
        let spi = &self.channels[channel as usize];

        if spi.assigned.get() {
            return None;
        }

        spi.assigned.set(true);
        spi.configure(config);
        Some(spi)
    }
}

// SPIxBRG = Fpb / (2 * baudrate) - 1
fn baud_divisor(pb_clock: u32, baud_rate: u32) -> u32 {
    if baud_rate == 0 {
        return 0;
    }
    (pb_clock as u64 / (2 * baud_rate as u64)).saturating_sub(1) as u32
}
