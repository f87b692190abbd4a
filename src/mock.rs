//! Host-side stand-in for every collaborator, recording what the engine
//! asks of the hardware.

use std::{
    cell::{Cell, RefCell},
    collections::VecDeque,
    vec::Vec,
};

use fugit::{HertzU32, MillisDurationU32, TimerInstantU32};

use crate::{
    descriptor::{Completion, InternalAddress, Target},
    hw::{
        BusInstance, CacheMaintenance, Direction, DmaChannel, DmaEndpoint, DmaEngine,
        DmaTransfer, DmaVector, InterruptController, PeripheralId, Status, Timer, TwiHardware,
        Vector,
    },
    twid::{Handlers, Twid},
    Error,
};

pub const BUS_ID: PeripheralId = PeripheralId(18);
pub const THR_OFFSET: usize = 0x34;
pub const RHR_OFFSET: usize = 0x30;

pub fn bus(id: PeripheralId) -> BusInstance {
    BusInstance::new(0xf802_8000 + id.0 as usize * 0x100, id)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    EnableClock(PeripheralId),
    ConfigureMaster(u32),
    ConfigureFifo(u32, u32),
    StartWrite {
        address: u8,
        internal: Option<InternalAddress>,
        first: u8,
    },
    StartRead {
        address: u8,
        internal: Option<InternalAddress>,
    },
    InitTransfer(Direction, usize),
    Stop,
    WriteByte(u8),
    ReadByte(u8),
    /// Logged only while `MockPlatform::log_status` is set.
    StatusRead,
    EnableIt(Status),
    DisableIt(Status),
    SetVector(PeripheralId),
    IrqEnable(PeripheralId),
    IrqDisable(PeripheralId),
    DmaAllocate(DmaEndpoint, DmaEndpoint),
    DmaConfigure(DmaChannel, DmaTransfer),
    DmaSetCallback(DmaChannel),
    DmaStart(DmaChannel),
    DmaFree(DmaChannel),
    Clean(usize, usize),
    Invalidate(usize, usize),
    WriteStream(Vec<u8>),
    ReadStream(usize),
    Callback(Result<(), Error>, Vec<u8>),
}

thread_local! {
    static LOG: RefCell<Vec<Event>> = RefCell::new(Vec::new());
}

pub fn record(event: Event) {
    LOG.with(|log| log.borrow_mut().push(event));
}

pub fn take_log() -> Vec<Event> {
    LOG.with(|log| log.borrow_mut().drain(..).collect())
}

/// Callback that logs its invocation.
pub fn record_callback(completion: &Completion<'_>, _arg: usize) {
    record(Event::Callback(completion.result(), completion.data().to_vec()));
}

pub fn twi_vector() {}

pub fn dma_vector(_channel: DmaChannel) {}

pub fn twid(platform: &MockPlatform) -> Twid<'_, MockPlatform> {
    Twid::new(
        platform,
        Handlers {
            twi: twi_vector,
            dma: dma_vector,
        },
    )
}

pub struct MockPlatform {
    /// Flags reported by `status` on every read.
    pub status: Cell<Status>,
    /// Report NACK once this many data bytes went over the wire.
    pub nack_after: Cell<Option<usize>>,
    pub bytes: Cell<usize>,
    pub rx: RefCell<VecDeque<u8>>,
    /// Flags reported by `masked_status`, set by tests before firing.
    pub pending: Cell<Status>,
    pub current: Cell<PeripheralId>,
    pub fifo: Cell<Option<u32>>,
    pub stream_ok: Cell<bool>,
    pub log_status: Cell<bool>,
    pub channels_left: Cell<u8>,
    next_channel: Cell<u8>,
    now: Cell<u32>,
}

impl Default for MockPlatform {
    fn default() -> Self {
        let _ = take_log();
        Self {
            status: Cell::new(Status::TXCOMP | Status::RXRDY | Status::TXRDY),
            nack_after: Cell::new(None),
            bytes: Cell::new(0),
            rx: RefCell::new(VecDeque::new()),
            pending: Cell::new(Status::empty()),
            current: Cell::new(BUS_ID),
            fifo: Cell::new(None),
            stream_ok: Cell::new(true),
            log_status: Cell::new(false),
            channels_left: Cell::new(4),
            next_channel: Cell::new(0),
            now: Cell::new(0),
        }
    }
}

impl MockPlatform {
    pub fn with_rx(bytes: &[u8]) -> Self {
        let platform = Self::default();
        platform.rx.borrow_mut().extend(bytes.iter().copied());
        platform
    }

    pub fn fire(&self, twid: &Twid<'_, MockPlatform>, pending: Status) {
        self.pending.set(pending);
        twid.on_interrupt();
    }

    fn count_byte(&self) {
        self.bytes.set(self.bytes.get() + 1);
    }
}

impl TwiHardware for MockPlatform {
    fn instance(&self, id: PeripheralId) -> Option<BusInstance> {
        Some(bus(id))
    }

    fn enable_clock(&self, id: PeripheralId) {
        record(Event::EnableClock(id));
    }

    fn configure_master(&self, _bus: BusInstance, frequency: HertzU32) {
        record(Event::ConfigureMaster(frequency.raw()));
    }

    fn fifo_depth(&self, _bus: BusInstance) -> Option<u32> {
        self.fifo.get()
    }

    fn configure_fifo(&self, _bus: BusInstance, tx_threshold: u32, rx_threshold: u32) {
        record(Event::ConfigureFifo(tx_threshold, rx_threshold));
    }

    fn start_write(&self, _bus: BusInstance, target: &Target, first: u8) {
        self.count_byte();
        record(Event::StartWrite {
            address: target.address,
            internal: target.internal,
            first,
        });
    }

    fn start_read(&self, _bus: BusInstance, target: &Target) {
        record(Event::StartRead {
            address: target.address,
            internal: target.internal,
        });
    }

    fn init_transfer(&self, _bus: BusInstance, _target: &Target, direction: Direction, len: usize) {
        record(Event::InitTransfer(direction, len));
    }

    fn send_stop(&self, _bus: BusInstance) {
        record(Event::Stop);
    }

    fn write_byte(&self, _bus: BusInstance, byte: u8) {
        self.count_byte();
        record(Event::WriteByte(byte));
    }

    fn read_byte(&self, _bus: BusInstance) -> u8 {
        self.count_byte();
        let byte = self.rx.borrow_mut().pop_front().unwrap_or(0);
        record(Event::ReadByte(byte));
        byte
    }

    fn status(&self, _bus: BusInstance) -> Status {
        if self.log_status.get() {
            record(Event::StatusRead);
        }
        let mut status = self.status.get();
        if self
            .nack_after
            .get()
            .is_some_and(|limit| self.bytes.get() >= limit)
        {
            status |= Status::NACK;
        }
        status
    }

    fn masked_status(&self, _bus: BusInstance) -> Status {
        self.pending.get()
    }

    fn enable_interrupts(&self, _bus: BusInstance, mask: Status) {
        record(Event::EnableIt(mask));
    }

    fn disable_interrupts(&self, _bus: BusInstance, mask: Status) {
        record(Event::DisableIt(mask));
    }

    fn holding_register(&self, bus: BusInstance, direction: Direction) -> usize {
        match direction {
            Direction::Write => bus.base() + THR_OFFSET,
            Direction::Read => bus.base() + RHR_OFFSET,
        }
    }

    fn write_stream(
        &self,
        _bus: BusInstance,
        _target: &Target,
        data: &[u8],
        _timeout: MillisDurationU32,
    ) -> bool {
        record(Event::WriteStream(data.to_vec()));
        self.stream_ok.get()
    }

    fn read_stream(
        &self,
        _bus: BusInstance,
        _target: &Target,
        data: &mut [u8],
        _timeout: MillisDurationU32,
    ) -> bool {
        record(Event::ReadStream(data.len()));
        let mut rx = self.rx.borrow_mut();
        for byte in data.iter_mut() {
            *byte = rx.pop_front().unwrap_or(0);
        }
        self.stream_ok.get()
    }
}

impl InterruptController for MockPlatform {
    fn set_source_vector(&self, id: PeripheralId, _handler: Vector) {
        record(Event::SetVector(id));
    }

    fn enable(&self, id: PeripheralId) {
        record(Event::IrqEnable(id));
    }

    fn disable(&self, id: PeripheralId) {
        record(Event::IrqDisable(id));
    }

    fn current_interrupt(&self) -> PeripheralId {
        self.current.get()
    }
}

impl DmaEngine for MockPlatform {
    fn allocate_channel(&self, src: DmaEndpoint, dst: DmaEndpoint) -> Option<DmaChannel> {
        record(Event::DmaAllocate(src, dst));
        let left = self.channels_left.get();
        if left == 0 {
            return None;
        }
        self.channels_left.set(left - 1);
        let channel = self.next_channel.get();
        self.next_channel.set(channel + 1);
        Some(DmaChannel(channel))
    }

    fn configure_transfer(&self, channel: DmaChannel, transfer: &DmaTransfer) {
        record(Event::DmaConfigure(channel, *transfer));
    }

    fn set_callback(&self, channel: DmaChannel, _handler: DmaVector) {
        record(Event::DmaSetCallback(channel));
    }

    fn start_transfer(&self, channel: DmaChannel) {
        record(Event::DmaStart(channel));
    }

    fn free_channel(&self, channel: DmaChannel) {
        self.channels_left.set(self.channels_left.get() + 1);
        record(Event::DmaFree(channel));
    }
}

impl CacheMaintenance for MockPlatform {
    fn clean_region(&self, addr: usize, len: usize) {
        record(Event::Clean(addr, len));
    }

    fn invalidate_region(&self, addr: usize, len: usize) {
        record(Event::Invalidate(addr, len));
    }
}

impl Timer for MockPlatform {
    /// Every query advances the clock by one millisecond.
    fn now(&self) -> TimerInstantU32<1000> {
        let now = self.now.get();
        self.now.set(now.wrapping_add(1));
        TimerInstantU32::from_ticks(now)
    }
}
