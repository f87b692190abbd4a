use core::cell::{Cell, RefCell};

use critical_section::{CriticalSection, Mutex};

use crate::{
    descriptor::{Callback, Settings},
    hw::PeripheralId,
    lock::BusyLock,
    Error,
};

/// Default capacity of the asynchronous transfer table.
pub const MAX_ASYNC_TRANSFERS: usize = 8;

pub(crate) enum SlotBuffer<'a> {
    Rx(&'a mut [u8]),
    /// Byte 0 went out with the start condition, so the handler
    /// continues from offset 1.
    Tx(&'a [u8]),
}

/// One in-flight asynchronous transfer. Written by the submitting call,
/// then advanced only by the interrupt handler.
pub(crate) struct Slot<'a> {
    pub settings: Settings,
    pub callback: Option<(Callback, usize)>,
    pub lock: &'a BusyLock,
    pub buffer: SlotBuffer<'a>,
    pub transferred: usize,
    pub size: usize,
    pub id: PeripheralId,
}

impl<'a> Slot<'a> {
    pub fn data(&self) -> &[u8] {
        match &self.buffer {
            SlotBuffer::Rx(buf) => &buf[..self.transferred],
            SlotBuffer::Tx(buf) => &buf[..self.transferred + 1],
        }
    }
}

#[cfg(feature = "dump")]
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SlotDump {
    pub id: PeripheralId,
    pub transferred: usize,
    pub size: usize,
}

/// Fixed-capacity table shared between submitting calls and the
/// interrupt handler. A slot is either empty or bound to exactly one
/// peripheral identifier.
pub(crate) struct SlotTable<'a, const N: usize> {
    slots: [Mutex<RefCell<Option<Slot<'a>>>>; N],
    next: Mutex<Cell<usize>>,
}

impl<'a, const N: usize> SlotTable<'a, N> {
    pub const fn new() -> Self {
        Self {
            slots: [const { Mutex::new(RefCell::new(None)) }; N],
            next: Mutex::new(Cell::new(0)),
        }
    }

    /// Bind `slot` to the next free entry in round-robin order.
    pub fn claim(&self, cs: CriticalSection, slot: Slot<'a>) -> Result<usize, Error> {
        if self.find(cs, slot.id).is_some() {
            warn!("twid: peripheral {} already has a transfer bound", slot.id);
            return Err(Error::Lock);
        }

        let next = self.next.borrow(cs);
        let start = next.get();
        let index = (0..N)
            .map(|step| (start + step) % N)
            .find(|&index| self.slots[index].borrow_ref(cs).is_none())
            .ok_or(Error::NoSlot)?;

        self.slots[index].replace(cs, Some(slot));
        next.set((index + 1) % N);
        Ok(index)
    }

    pub fn find(&self, cs: CriticalSection, id: PeripheralId) -> Option<usize> {
        self.slots.iter().position(|entry| {
            entry
                .borrow_ref(cs)
                .as_ref()
                .is_some_and(|slot| slot.id == id)
        })
    }

    pub fn with<R>(
        &self,
        cs: CriticalSection,
        index: usize,
        f: impl FnOnce(&mut Slot<'a>) -> R,
    ) -> Option<R> {
        self.slots
            .get(index)?
            .borrow_ref_mut(cs)
            .as_mut()
            .map(f)
    }

    pub fn release(&self, cs: CriticalSection, index: usize) -> Option<Slot<'a>> {
        self.slots.get(index)?.take(cs)
    }

    pub fn is_free(&self, cs: CriticalSection, index: usize) -> bool {
        self.slots
            .get(index)
            .map_or(false, |entry| entry.borrow_ref(cs).is_none())
    }

    #[cfg(feature = "dump")]
    pub fn dump(&self) -> [Option<SlotDump>; N] {
        critical_section::with(|cs| {
            core::array::from_fn(|index| {
                self.slots[index].borrow_ref(cs).as_ref().map(|slot| SlotDump {
                    id: slot.id,
                    transferred: slot.transferred,
                    size: slot.size,
                })
            })
        })
    }
}
