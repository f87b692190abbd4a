//! Collaborator interfaces consumed by the transfer engine.
//!
//! The engine never touches registers directly. Everything below the
//! byte level (register layout, DMA descriptors, interrupt vectors, cache
//! lines, clocks) is reached through these traits, so a board crate
//! implements them once per chip and tests implement them with a mock.

use bitflags::bitflags;
use fugit::{HertzU32, MillisDurationU32, TimerInstantU32};

use crate::descriptor::Target;

/// Interrupt/clock identifier of a peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PeripheralId(pub u32);

/// One physical bus controller: register base plus its peripheral identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BusInstance {
    base: usize,
    id: PeripheralId,
}

impl BusInstance {
    pub const fn new(base: usize, id: PeripheralId) -> Self {
        Self { base, id }
    }

    pub const fn base(&self) -> usize {
        self.base
    }

    pub const fn id(&self) -> PeripheralId {
        self.id
    }
}

bitflags! {
    /// Controller status bits. The same masks select interrupt sources.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Status: u32 {
        const TXCOMP = 1 << 0;
        const RXRDY = 1 << 1;
        const TXRDY = 1 << 2;
        const NACK = 1 << 8;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Direction {
    Read,
    Write,
}

/// Register-level primitives of a two-wire controller in master mode.
pub trait TwiHardware {
    /// Reverse lookup used when an interrupt fires for an identifier
    /// that has no transfer bound to it.
    fn instance(&self, id: PeripheralId) -> Option<BusInstance>;

    fn enable_clock(&self, id: PeripheralId);

    fn configure_master(&self, bus: BusInstance, frequency: HertzU32);

    /// Depth of the hardware FIFO, `None` when the controller has none.
    fn fifo_depth(&self, _bus: BusInstance) -> Option<u32> {
        None
    }

    fn configure_fifo(&self, _bus: BusInstance, _tx_threshold: u32, _rx_threshold: u32) {}

    /// Issue a start condition and the address phase of a write, with
    /// `first` already staged in the transmit holding register.
    fn start_write(&self, bus: BusInstance, target: &Target, first: u8);

    fn start_read(&self, bus: BusInstance, target: &Target);

    /// Program a transfer of `len` bytes so the controller generates the
    /// start and stop conditions on its own. Used ahead of DMA transfers.
    fn init_transfer(&self, bus: BusInstance, target: &Target, direction: Direction, len: usize);

    fn send_stop(&self, bus: BusInstance);

    fn write_byte(&self, bus: BusInstance, byte: u8);

    fn read_byte(&self, bus: BusInstance) -> u8;

    fn status(&self, bus: BusInstance) -> Status;

    /// Status filtered by the currently enabled interrupt sources.
    fn masked_status(&self, bus: BusInstance) -> Status;

    fn enable_interrupts(&self, bus: BusInstance, mask: Status);

    fn disable_interrupts(&self, bus: BusInstance, mask: Status);

    /// Address of the transmit (`Write`) or receive (`Read`) holding register.
    fn holding_register(&self, bus: BusInstance, direction: Direction) -> usize;

    /// Stream a whole buffer through the FIFO. Returns `false` on NACK or timeout.
    fn write_stream(
        &self,
        _bus: BusInstance,
        _target: &Target,
        _data: &[u8],
        _timeout: MillisDurationU32,
    ) -> bool {
        false
    }

    fn read_stream(
        &self,
        _bus: BusInstance,
        _target: &Target,
        _data: &mut [u8],
        _timeout: MillisDurationU32,
    ) -> bool {
        false
    }
}

pub type Vector = fn();

pub trait InterruptController {
    fn set_source_vector(&self, id: PeripheralId, handler: Vector);

    fn enable(&self, id: PeripheralId);

    fn disable(&self, id: PeripheralId);

    /// Identifier of the interrupt currently being serviced.
    fn current_interrupt(&self) -> PeripheralId;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DmaChannel(pub u8);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DmaEndpoint {
    Memory,
    Peripheral(PeripheralId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Addressing {
    Fixed,
    Incremented,
}

/// Single block, byte wide, one chunk per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DmaTransfer {
    pub src: usize,
    pub dst: usize,
    pub len: usize,
    pub src_addressing: Addressing,
    pub dst_addressing: Addressing,
}

pub type DmaVector = fn(DmaChannel);

pub trait DmaEngine {
    fn allocate_channel(&self, src: DmaEndpoint, dst: DmaEndpoint) -> Option<DmaChannel>;

    fn configure_transfer(&self, channel: DmaChannel, transfer: &DmaTransfer);

    /// The engine calls `handler` with the channel once the block is done.
    fn set_callback(&self, channel: DmaChannel, handler: DmaVector);

    fn start_transfer(&self, channel: DmaChannel);

    fn free_channel(&self, channel: DmaChannel);
}

pub trait CacheMaintenance {
    /// Write dirty lines covering the range back to memory.
    fn clean_region(&self, addr: usize, len: usize);

    /// Drop lines covering the range so the next access refetches.
    fn invalidate_region(&self, addr: usize, len: usize);
}

/// Millisecond monotonic clock.
pub trait Timer {
    fn now(&self) -> TimerInstantU32<1000>;
}

/// Everything the engine needs from the chip.
pub trait Platform:
    TwiHardware + InterruptController + DmaEngine + CacheMaintenance + Timer
{
}

impl<T> Platform for T where
    T: TwiHardware + InterruptController + DmaEngine + CacheMaintenance + Timer
{
}

#[derive(Debug, Clone, Copy)]
pub struct Deadline(TimerInstantU32<1000>);

impl Deadline {
    pub fn start<T: Timer + ?Sized>(timer: &T, budget: MillisDurationU32) -> Self {
        Self(timer.now() + budget)
    }

    pub fn reached<T: Timer + ?Sized>(&self, timer: &T) -> bool {
        timer.now() >= self.0
    }
}
