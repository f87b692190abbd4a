use crate::{
    descriptor::{complete, Descriptor},
    hw::Platform,
    twid::{Transfer, Twid},
    Error, Submitted,
};

impl<'a, P: Platform, const N: usize> Twid<'a, P, N> {
    /// Push the whole buffer through the controller FIFO in one call,
    /// then wait for completion like a polled transfer.
    pub(crate) fn submit_fifo(
        &self,
        desc: &'a Descriptor,
        mut transfer: Transfer<'a>,
    ) -> Result<Submitted, Error> {
        let settings = desc.settings();
        let bus = settings.bus;

        if self.platform.fifo_depth(bus).is_none() {
            trace!("twid: no FIFO on peripheral {}, polling instead", bus.id());
            return self
                .run_polled(&settings, desc.busy_lock(), desc.callback(), Some(transfer))
                .map(|()| Submitted::Polled);
        }

        let streamed = match &mut transfer {
            Transfer::Write(tx) => {
                self.platform
                    .write_stream(bus, &settings.target, tx, settings.timeout)
            }
            Transfer::Read(rx) => {
                self.platform
                    .read_stream(bus, &settings.target, rx, settings.timeout)
            }
        };
        if !streamed {
            error!("twid: FIFO stream to {} not acknowledged", settings.target.address);
            return Err(Error::Ack);
        }
        self.wait_transfer_complete(&settings)?;

        complete(
            &settings,
            desc.busy_lock(),
            desc.callback(),
            Ok(()),
            transfer.data(),
        );
        Ok(Submitted::Fifo)
    }
}
