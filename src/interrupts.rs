use crate::{
    descriptor::{complete, Descriptor},
    hw::{BusInstance, PeripheralId, Platform, Status},
    slots::{Slot, SlotBuffer},
    twid::{Transfer, Twid},
    Error, Submitted,
};

const ALL_SOURCES: Status = Status::TXCOMP
    .union(Status::RXRDY)
    .union(Status::TXRDY)
    .union(Status::NACK);

impl<'a, P: Platform, const N: usize> Twid<'a, P, N> {
    /// Bind the transfer to a slot and arm the controller. Everything past
    /// the start condition happens in [`Twid::on_interrupt`].
    pub(crate) fn submit_async(
        &self,
        desc: &'a Descriptor,
        transfer: Transfer<'a>,
    ) -> Result<Submitted, Error> {
        let settings = desc.settings();
        let bus = settings.bus;
        let callback = desc.callback();

        let (buffer, size, first) = match transfer {
            Transfer::Write(tx) => {
                let Some((&first, rest)) = tx.split_first() else {
                    return self
                        .run_polled(&settings, desc.busy_lock(), callback, None)
                        .map(|()| Submitted::Polled);
                };
                (SlotBuffer::Tx(tx), rest.len(), Some(first))
            }
            Transfer::Read(rx) => {
                let len = rx.len();
                (SlotBuffer::Rx(rx), len, None)
            }
        };

        let slot = critical_section::with(|cs| {
            self.slots.claim(
                cs,
                Slot {
                    settings,
                    callback,
                    lock: desc.busy_lock(),
                    buffer,
                    transferred: 0,
                    size,
                    id: bus.id(),
                },
            )
        })?;

        self.platform.set_source_vector(bus.id(), self.handlers.twi);
        self.platform.enable(bus.id());

        match first {
            Some(first) => {
                self.platform.start_write(bus, &settings.target, first);
                self.platform
                    .enable_interrupts(bus, Status::TXRDY | Status::NACK);
            }
            None => {
                self.platform
                    .enable_interrupts(bus, Status::RXRDY | Status::NACK);
                self.platform.start_read(bus, &settings.target);
            }
        }

        debug!("twid: slot {} bound to peripheral {}", slot, bus.id());
        Ok(Submitted::Interrupt { slot })
    }

    /// Controller interrupt entry point. Call it from the vector
    /// registered through [`Handlers::twi`](crate::Handlers).
    pub fn on_interrupt(&self) {
        let id = self.platform.current_interrupt();

        let Some(index) = critical_section::with(|cs| self.slots.find(cs, id)) else {
            debug!("twid: interrupt from {} with no transfer bound", id);
            if let Some(bus) = self.platform.instance(id) {
                self.platform
                    .disable_interrupts(bus, Status::RXRDY | Status::TXRDY);
            }
            return;
        };

        let done = critical_section::with(|cs| {
            let result = self.slots.with(cs, index, |slot| self.advance(slot))??;
            self.slots.release(cs, index).map(|slot| (slot, result))
        });

        // Slot is free again before the callback runs, so the callback
        // may queue the next transfer on the same controller.
        if let Some((slot, result)) = done {
            complete(&slot.settings, slot.lock, slot.callback, result, slot.data());
        }
    }

    /// One step of the byte state machine. Returns the outcome once the
    /// transfer is over.
    fn advance(&self, slot: &mut Slot<'a>) -> Option<Result<(), Error>> {
        let bus = slot.settings.bus;
        let status = self.platform.masked_status(bus);

        if status.contains(Status::NACK) {
            error!("twid: NACK from peripheral {}", slot.id);
            self.shutdown(slot.id, bus);
            return Some(Err(Error::Ack));
        }

        if status.contains(Status::RXRDY) {
            if let SlotBuffer::Rx(buf) = &mut slot.buffer {
                let byte = self.platform.read_byte(bus);
                if let Some(dst) = buf.get_mut(slot.transferred) {
                    *dst = byte;
                    slot.transferred += 1;
                }

                if slot.transferred == slot.size {
                    self.platform.disable_interrupts(bus, Status::RXRDY);
                    self.platform.enable_interrupts(bus, Status::TXCOMP);
                } else if slot.transferred + 1 == slot.size {
                    self.platform.send_stop(bus);
                }
            }
        }

        if status.contains(Status::TXRDY) {
            if let SlotBuffer::Tx(buf) = &slot.buffer {
                if slot.transferred == slot.size {
                    self.platform.disable_interrupts(bus, Status::TXRDY);
                    self.platform.enable_interrupts(bus, Status::TXCOMP);
                    self.platform.send_stop(bus);
                } else if let Some(&byte) = buf.get(slot.transferred + 1) {
                    self.platform.write_byte(bus, byte);
                    slot.transferred += 1;
                }
            }
        }

        if status.contains(Status::TXCOMP) {
            self.shutdown(slot.id, bus);
            return Some(Ok(()));
        }

        None
    }

    fn shutdown(&self, id: PeripheralId, bus: BusInstance) {
        self.platform.disable(id);
        self.platform.disable_interrupts(bus, ALL_SOURCES);
    }
}
