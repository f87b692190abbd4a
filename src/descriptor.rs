use core::cell::Cell;

use critical_section::Mutex;
use fugit::{HertzU32, MillisDurationU32};

use crate::{hw::BusInstance, lock::BusyLock, Error, Mode};

/// Timeout applied by `configure` when none was set.
pub const DEFAULT_TIMEOUT: MillisDurationU32 = MillisDurationU32::from_ticks(100);

pub const DEFAULT_FREQUENCY: HertzU32 = HertzU32::from_raw(100_000);

/// Register address sent after the slave address, 1 to 3 bytes wide.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct InternalAddress {
    value: u32,
    len: u8,
}

impl InternalAddress {
    pub const fn new(value: u32, len: u8) -> Option<Self> {
        if len == 0 || len > 3 || value >> (8 * len as u32) != 0 {
            return None;
        }
        Some(Self { value, len })
    }

    pub(crate) fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let value = bytes
            .iter()
            .fold(0u32, |acc, &b| (acc << 8) | u32::from(b));
        Self::new(value, u8::try_from(bytes.len()).ok()?)
    }

    pub const fn value(&self) -> u32 {
        self.value
    }

    pub const fn len(&self) -> u8 {
        self.len
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Target {
    pub address: u8,
    pub internal: Option<InternalAddress>,
}

/// Per-descriptor configuration. Plain data: copied by value into every
/// asynchronous slot at submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settings {
    pub bus: BusInstance,
    pub frequency: HertzU32,
    pub mode: Mode,
    /// Zero means unset; `configure` replaces it with [`DEFAULT_TIMEOUT`].
    pub timeout: MillisDurationU32,
    pub target: Target,
}

impl Settings {
    pub const fn new(bus: BusInstance, address: u8) -> Self {
        Self {
            bus,
            frequency: DEFAULT_FREQUENCY,
            mode: Mode::Polling,
            timeout: MillisDurationU32::from_ticks(0),
            target: Target {
                address,
                internal: None,
            },
        }
    }

    #[must_use]
    pub const fn frequency(mut self, frequency: HertzU32) -> Self {
        self.frequency = frequency;
        self
    }

    #[must_use]
    pub const fn mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub const fn timeout(mut self, timeout: MillisDurationU32) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub const fn internal_address(mut self, internal: InternalAddress) -> Self {
        self.target.internal = Some(internal);
        self
    }
}

/// Memory range currently owned by a DMA transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Region {
    pub start: usize,
    pub len: usize,
}

impl Region {
    pub(crate) fn of(buf: &[u8]) -> Self {
        Self {
            start: buf.as_ptr() as usize,
            len: buf.len(),
        }
    }
}

pub type Callback = fn(&Completion<'_>, usize);

/// Handed to the completion callback. Asynchronous and DMA transfers
/// call it from interrupt context.
pub struct Completion<'c> {
    settings: &'c Settings,
    lock: &'c BusyLock,
    released: Cell<bool>,
    result: Result<(), Error>,
    data: &'c [u8],
}

impl<'c> Completion<'c> {
    pub(crate) fn new(
        settings: &'c Settings,
        lock: &'c BusyLock,
        result: Result<(), Error>,
        data: &'c [u8],
    ) -> Self {
        Self {
            settings,
            lock,
            released: Cell::new(false),
            result,
            data,
        }
    }

    pub fn settings(&self) -> &Settings {
        self.settings
    }

    pub fn result(&self) -> Result<(), Error> {
        self.result
    }

    /// Bytes that went over the wire.
    pub fn data(&self) -> &[u8] {
        self.data
    }

    /// Release the descriptor before the callback returns, so the
    /// callback can submit the next transfer itself. Only the first call
    /// has an effect: the lock may already belong to that next transfer.
    pub fn finish(&self) {
        if !self.released.replace(true) {
            self.lock.unlock();
        }
    }

    fn released(&self) -> bool {
        self.released.get()
    }
}

/// Default callback for callers with no completion logic of their own.
pub fn finish_transfer_callback(completion: &Completion<'_>, _arg: usize) {
    completion.finish()
}

/// Invoke the callback, then release the lock unless the callback already
/// did. Every successful path ends here; so do asynchronous failures.
pub(crate) fn complete(
    settings: &Settings,
    lock: &BusyLock,
    callback: Option<(Callback, usize)>,
    result: Result<(), Error>,
    data: &[u8],
) {
    let completion = Completion::new(settings, lock, result, data);
    if let Some((callback, arg)) = callback {
        callback(&completion, arg);
    }
    if !completion.released() {
        lock.unlock();
    }
}

/// Configuration and state of one logical user of a bus controller.
pub struct Descriptor {
    settings: Mutex<Cell<Settings>>,
    callback: Mutex<Cell<Option<(Callback, usize)>>>,
    region: Mutex<Cell<Option<Region>>>,
    lock: BusyLock,
}

impl Descriptor {
    pub const fn new(settings: Settings) -> Self {
        Self {
            settings: Mutex::new(Cell::new(settings)),
            callback: Mutex::new(Cell::new(None)),
            region: Mutex::new(Cell::new(None)),
            lock: BusyLock::new(),
        }
    }

    /// Snapshot of the current settings. An asynchronous transfer keeps
    /// the copy taken at submission.
    pub fn settings(&self) -> Settings {
        critical_section::with(|cs| self.settings.borrow(cs).get())
    }

    pub fn set_settings(&self, settings: Settings) {
        critical_section::with(|cs| self.settings.borrow(cs).set(settings))
    }

    pub fn is_busy(&self) -> bool {
        self.lock.is_locked()
    }

    /// Spin until the in-flight transfer, if any, has completed.
    pub fn wait_until_idle(&self) {
        self.lock.wait()
    }

    pub async fn idle(&self) {
        self.lock.idle().await
    }

    pub fn finish_transfer(&self) {
        self.lock.unlock()
    }

    /// Range handed to the DMA engine by the transfer in flight.
    pub fn region(&self) -> Option<Region> {
        critical_section::with(|cs| self.region.borrow(cs).get())
    }

    pub(crate) fn busy_lock(&self) -> &BusyLock {
        &self.lock
    }

    pub(crate) fn callback(&self) -> Option<(Callback, usize)> {
        critical_section::with(|cs| self.callback.borrow(cs).get())
    }

    pub(crate) fn set_callback(&self, callback: Option<(Callback, usize)>) {
        critical_section::with(|cs| self.callback.borrow(cs).set(callback))
    }

    pub(crate) fn set_region(&self, region: Option<Region>) {
        critical_section::with(|cs| self.region.borrow(cs).set(region))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw::PeripheralId;

    #[test]
    fn internal_address_width() {
        assert!(InternalAddress::new(0x12, 0).is_none());
        assert!(InternalAddress::new(0x1234, 1).is_none());
        assert!(InternalAddress::new(0x12_3456, 4).is_none());

        let ia = InternalAddress::new(0x12_3456, 3).unwrap();
        assert_eq!(ia.value(), 0x12_3456);
        assert_eq!(ia.len(), 3);

        assert_eq!(
            InternalAddress::from_bytes(&[0x01, 0x02]),
            InternalAddress::new(0x0102, 2)
        );
        assert_eq!(InternalAddress::from_bytes(&[1, 2, 3, 4]), None);
    }

    #[test]
    fn settings_builder() {
        let bus = BusInstance::new(0x4001_8000, PeripheralId(31));
        let settings = Settings::new(bus, 0x50)
            .frequency(HertzU32::from_raw(400_000))
            .mode(Mode::Dma)
            .internal_address(InternalAddress::new(0x10, 1).unwrap());

        assert_eq!(settings.bus, bus);
        assert_eq!(settings.frequency.raw(), 400_000);
        assert_eq!(settings.mode, Mode::Dma);
        assert_eq!(settings.timeout.ticks(), 0);
        assert_eq!(settings.target.address, 0x50);
        assert_eq!(settings.target.internal.map(|ia| ia.value()), Some(0x10));
    }

    static CHAINED: BusyLock = BusyLock::new();

    fn finish_and_relock(completion: &Completion<'_>, _arg: usize) {
        completion.finish();
        assert!(CHAINED.try_lock());
        // A second finish must not release the chained transfer.
        completion.finish();
    }

    #[test]
    fn lock_retaken_by_callback_survives_completion() {
        let settings = Settings::new(BusInstance::new(0, PeripheralId(1)), 0x50);
        assert!(CHAINED.try_lock());

        complete(&settings, &CHAINED, Some((finish_and_relock, 0)), Ok(()), &[]);
        assert!(CHAINED.is_locked());
    }

    #[test]
    fn completion_releases_lock_without_finish() {
        let settings = Settings::new(BusInstance::new(0, PeripheralId(1)), 0x50);
        let lock = BusyLock::new();
        assert!(lock.try_lock());

        complete(&settings, &lock, None, Err(Error::Ack), &[]);
        assert!(!lock.is_locked());
    }

    #[test]
    fn settings_replaced_through_shared_reference() {
        let bus = BusInstance::new(0x4001_8000, PeripheralId(31));
        let desc = Descriptor::new(Settings::new(bus, 0x50));
        let shared = &desc;

        shared.set_settings(Settings::new(bus, 0x51).mode(Mode::Async));
        assert_eq!(desc.settings().target.address, 0x51);
        assert_eq!(desc.settings().mode, Mode::Async);
    }
}
