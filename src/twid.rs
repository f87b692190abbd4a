use core::cell::RefCell;

use critical_section::Mutex;
use heapless::LinearMap;

use crate::{
    descriptor::{complete, Callback, Descriptor, Settings, Target, DEFAULT_TIMEOUT},
    dma::DmaJob,
    hw::{DmaChannel, DmaVector, Platform, Vector},
    lock::BusyLock,
    slots::{SlotTable, MAX_ASYNC_TRANSFERS},
    Error, Mode, Submitted,
};

/// Interrupt trampolines owned by the firmware. Each one forwards to
/// [`Twid::on_interrupt`] or [`Twid::on_dma_complete`] of the static
/// engine instance.
#[derive(Clone, Copy)]
pub struct Handlers {
    pub twi: Vector,
    pub dma: DmaVector,
}

pub(crate) enum Transfer<'b> {
    Read(&'b mut [u8]),
    Write(&'b [u8]),
}

impl<'b> Transfer<'b> {
    pub fn len(&self) -> usize {
        match self {
            Transfer::Read(buf) => buf.len(),
            Transfer::Write(buf) => buf.len(),
        }
    }

    pub fn data(&self) -> &[u8] {
        match self {
            Transfer::Read(buf) => buf,
            Transfer::Write(buf) => buf,
        }
    }
}

/// Master-mode transfer engine shared by every descriptor on the chip.
///
/// Meant to live in a `static`:
///
/// ```ignore
/// static TWID: Twid<'static, Board> = Twid::new(&BOARD, Handlers { twi: twi_irq, dma: dma_irq });
///
/// fn twi_irq() {
///     TWID.on_interrupt();
/// }
///
/// fn dma_irq(channel: DmaChannel) {
///     TWID.on_dma_complete(channel);
/// }
/// ```
pub struct Twid<'a, P, const N: usize = MAX_ASYNC_TRANSFERS> {
    pub(crate) platform: &'a P,
    pub(crate) handlers: Handlers,
    pub(crate) slots: SlotTable<'a, N>,
    pub(crate) dma_jobs: Mutex<RefCell<LinearMap<DmaChannel, DmaJob<'a>, N>>>,
}

impl<'a, P, const N: usize> Twid<'a, P, N> {
    pub const fn new(platform: &'a P, handlers: Handlers) -> Self {
        Self {
            platform,
            handlers,
            slots: SlotTable::new(),
            dma_jobs: Mutex::new(RefCell::new(LinearMap::new())),
        }
    }

    /// Whether asynchronous slot `slot` is bound to a transfer.
    pub fn slot_in_use(&self, slot: usize) -> bool {
        critical_section::with(|cs| !self.slots.is_free(cs, slot))
    }

    #[cfg(feature = "dump")]
    pub fn dump(&self) -> [Option<crate::slots::SlotDump>; N] {
        self.slots.dump()
    }
}

impl<'a, P: Platform, const N: usize> Twid<'a, P, N> {
    /// Apply the default timeout if none is set, then bring the
    /// controller up. Safe to repeat after a failed transfer.
    pub fn configure(&self, desc: &Descriptor) {
        let mut settings = desc.settings();
        if settings.timeout.ticks() == 0 {
            settings.timeout = DEFAULT_TIMEOUT;
            desc.set_settings(settings);
        }
        self.program(&settings);
    }

    pub(crate) fn program(&self, settings: &Settings) {
        let bus = settings.bus;
        self.platform.enable_clock(bus.id());
        self.platform.configure_master(bus, settings.frequency);

        if settings.mode == Mode::Fifo {
            if let Some(depth) = self.platform.fifo_depth(bus) {
                self.platform.configure_fifo(bus, depth / 2, depth / 2);
            }
        }
    }

    /// Start a read (`rx`) or a write (`tx`) on `desc`.
    ///
    /// Polling and FIFO transfers finish before this returns and call
    /// `callback` inline. Asynchronous and DMA transfers return at once;
    /// `callback` then runs from interrupt context. Either way the
    /// descriptor is released after the callback returns.
    pub fn submit(
        &self,
        desc: &'a Descriptor,
        rx: Option<&'a mut [u8]>,
        tx: Option<&'a [u8]>,
        callback: Option<Callback>,
        arg: usize,
    ) -> Result<Submitted, Error> {
        let lock = desc.busy_lock();
        if !lock.try_lock() {
            return Err(Error::Lock);
        }
        desc.set_callback(callback.map(|callback| (callback, arg)));

        let result = self.dispatch(desc, rx, tx);
        if result.is_err() {
            lock.unlock();
        }
        result
    }

    fn dispatch(
        &self,
        desc: &'a Descriptor,
        rx: Option<&'a mut [u8]>,
        tx: Option<&'a [u8]>,
    ) -> Result<Submitted, Error> {
        let settings = desc.settings();
        let rx = rx.filter(|buf| !buf.is_empty());
        let tx = tx.filter(|buf| !buf.is_empty());

        let transfer = match (rx, tx) {
            (Some(_), Some(_)) | (None, None) if settings.mode == Mode::Dma => {
                return Err(Error::Duplex)
            }
            (_, Some(tx)) => Some(Transfer::Write(tx)),
            (Some(rx), None) => Some(Transfer::Read(rx)),
            (None, None) => None,
        };

        let Some(transfer) = transfer else {
            return self
                .run_polled(&settings, desc.busy_lock(), desc.callback(), None)
                .map(|()| Submitted::Polled);
        };

        match settings.mode {
            Mode::Async if transfer.len() == 1 => {
                trace!("twid: single byte, polling instead");
                self.run_polled(&settings, desc.busy_lock(), desc.callback(), Some(transfer))
                    .map(|()| Submitted::Polled)
            }
            Mode::Polling => self
                .run_polled(&settings, desc.busy_lock(), desc.callback(), Some(transfer))
                .map(|()| Submitted::Polled),
            Mode::Async => self.submit_async(desc, transfer),
            Mode::Dma => self.submit_dma(desc, transfer),
            Mode::Fifo => self.submit_fifo(desc, transfer),
        }
    }

    /// Polling transfer on any borrowed buffer, without a callback.
    pub fn transfer_blocking(
        &self,
        desc: &Descriptor,
        rx: Option<&mut [u8]>,
        tx: Option<&[u8]>,
    ) -> Result<(), Error> {
        self.transfer_to(desc, desc.settings().target, rx, tx)
    }

    pub(crate) fn transfer_to(
        &self,
        desc: &Descriptor,
        target: Target,
        rx: Option<&mut [u8]>,
        tx: Option<&[u8]>,
    ) -> Result<(), Error> {
        let lock = desc.busy_lock();
        if !lock.try_lock() {
            return Err(Error::Lock);
        }

        let settings = Settings {
            target,
            ..desc.settings()
        };
        let transfer = match (rx.filter(|buf| !buf.is_empty()), tx) {
            (_, Some(tx)) if !tx.is_empty() => Some(Transfer::Write(tx)),
            (Some(rx), _) => Some(Transfer::Read(rx)),
            _ => None,
        };

        let result = self.run_polled(&settings, lock, None, transfer);
        if result.is_err() {
            lock.unlock();
        }
        result
    }

    /// Runs to completion, then invokes the callback and releases `lock`.
    /// On error the lock stays held for the caller to release.
    pub(crate) fn run_polled(
        &self,
        settings: &Settings,
        lock: &BusyLock,
        callback: Option<(Callback, usize)>,
        transfer: Option<Transfer<'_>>,
    ) -> Result<(), Error> {
        match transfer {
            Some(Transfer::Write(tx)) => {
                self.poll_write(settings, tx)?;
                complete(settings, lock, callback, Ok(()), tx);
            }
            Some(Transfer::Read(rx)) => {
                self.poll_read(settings, rx)?;
                complete(settings, lock, callback, Ok(()), rx);
            }
            None => complete(settings, lock, callback, Ok(()), &[]),
        }
        Ok(())
    }
}
