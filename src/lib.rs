#![cfg_attr(not(test), no_std)]

#[macro_use]
mod fmt;

mod blocking;
mod descriptor;
mod dma;
mod fifo;
pub mod hw;
mod interrupts;
mod lock;
mod polling;
mod slots;
mod twid;

#[cfg(test)]
mod mock;

pub use blocking::I2cMaster;
pub use descriptor::{
    finish_transfer_callback, Callback, Completion, Descriptor, InternalAddress, Region, Settings,
    Target, DEFAULT_FREQUENCY, DEFAULT_TIMEOUT,
};
pub use dma::DMA_THRESHOLD;
pub use hw::{BusInstance, DmaChannel, PeripheralId, Platform, Status};
pub use lock::BusyLock;
pub use slots::MAX_ASYNC_TRANSFERS;
#[cfg(feature = "dump")]
pub use slots::SlotDump;
pub use twid::{Handlers, Twid};

/// How bytes physically move for a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Mode {
    Polling,
    Async,
    Dma,
    Fifo,
}

/// Strategy that actually ran, with the state it left behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Submitted {
    /// Completed synchronously, callback already invoked.
    Polled,
    /// In flight; the interrupt handler owns `slot` until completion.
    Interrupt { slot: usize },
    /// In flight on a DMA channel.
    Dma { channel: DmaChannel },
    /// Completed synchronously through the hardware FIFO.
    Fifo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// The descriptor already has a transfer outstanding.
    Lock,
    /// The slave did not acknowledge.
    Ack,
    Timeout,
    /// DMA transfers need exactly one of receive and transmit buffers.
    Duplex,
    /// Every asynchronous slot is in use.
    NoSlot,
    /// The DMA engine has no free channel.
    NoChannel,
    /// Transaction shape the controller cannot issue in one go.
    Unsupported,
}

impl embedded_hal::i2c::Error for Error {
    fn kind(&self) -> embedded_hal::i2c::ErrorKind {
        match *self {
            Error::Ack => embedded_hal::i2c::ErrorKind::NoAcknowledge(
                embedded_hal::i2c::NoAcknowledgeSource::Unknown,
            ),
            _ => embedded_hal::i2c::ErrorKind::Other,
        }
    }
}
