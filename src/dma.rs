use crate::{
    descriptor::{complete, Descriptor, Region},
    hw::{Addressing, Direction, DmaChannel, DmaEndpoint, DmaTransfer, Platform},
    twid::{Transfer, Twid},
    Error, Submitted,
};

/// Transfers shorter than this run through polling even in DMA mode.
pub const DMA_THRESHOLD: usize = 16;

/// Buffer and owner of a DMA transfer in flight, keyed by channel. The
/// engine must not touch the buffer until the channel reports completion.
pub(crate) struct DmaJob<'a> {
    desc: &'a Descriptor,
    transfer: Transfer<'a>,
}

impl<'a, P: Platform, const N: usize> Twid<'a, P, N> {
    pub(crate) fn submit_dma(
        &self,
        desc: &'a Descriptor,
        transfer: Transfer<'a>,
    ) -> Result<Submitted, Error> {
        let settings = desc.settings();
        if transfer.len() < DMA_THRESHOLD {
            trace!("twid: {} bytes is below the DMA threshold", transfer.len());
            return self
                .run_polled(&settings, desc.busy_lock(), desc.callback(), Some(transfer))
                .map(|()| Submitted::Polled);
        }

        let bus = settings.bus;
        let id = bus.id();
        let region = Region::of(transfer.data());
        let direction = match transfer {
            Transfer::Write(_) => Direction::Write,
            Transfer::Read(_) => Direction::Read,
        };

        self.platform
            .init_transfer(bus, &settings.target, direction, region.len);
        desc.set_region(Some(region));

        if direction == Direction::Read {
            if let Err(err) = self.check_nack(bus) {
                desc.set_region(None);
                return Err(err);
            }
        }

        let (src, dst) = match direction {
            Direction::Write => (DmaEndpoint::Memory, DmaEndpoint::Peripheral(id)),
            Direction::Read => (DmaEndpoint::Peripheral(id), DmaEndpoint::Memory),
        };
        let Some(channel) = self.platform.allocate_channel(src, dst) else {
            error!("twid: no DMA channel left for peripheral {}", id);
            desc.set_region(None);
            return Err(Error::NoChannel);
        };

        let register = self.platform.holding_register(bus, direction);
        let block = match direction {
            Direction::Write => DmaTransfer {
                src: region.start,
                dst: register,
                len: region.len,
                src_addressing: Addressing::Incremented,
                dst_addressing: Addressing::Fixed,
            },
            Direction::Read => DmaTransfer {
                src: register,
                dst: region.start,
                len: region.len,
                src_addressing: Addressing::Fixed,
                dst_addressing: Addressing::Incremented,
            },
        };
        self.platform.configure_transfer(channel, &block);
        self.platform.set_callback(channel, self.handlers.dma);
        self.platform.clean_region(region.start, region.len);

        let queued = critical_section::with(|cs| {
            self.dma_jobs
                .borrow_ref_mut(cs)
                .insert(channel, DmaJob { desc, transfer })
                .is_ok()
        });
        if !queued {
            self.platform.free_channel(channel);
            desc.set_region(None);
            return Err(Error::NoChannel);
        }

        self.platform.start_transfer(channel);
        debug!("twid: DMA {} started on channel {}", region.len, channel.0);
        Ok(Submitted::Dma { channel })
    }

    /// DMA completion entry point. Call it from the handler registered
    /// through [`Handlers::dma`](crate::Handlers).
    pub fn on_dma_complete(&self, channel: DmaChannel) {
        let job = critical_section::with(|cs| self.dma_jobs.borrow_ref_mut(cs).remove(&channel));
        let Some(job) = job else {
            warn!("twid: completion on idle DMA channel {}", channel.0);
            return;
        };
        debug!("twid: DMA transfer finished on channel {}", channel.0);

        let desc = job.desc;
        if let (Transfer::Read(_), Some(region)) = (&job.transfer, desc.region()) {
            self.platform.invalidate_region(region.start, region.len);
        }
        self.platform.free_channel(channel);
        desc.set_region(None);

        complete(
            &desc.settings(),
            desc.busy_lock(),
            desc.callback(),
            Ok(()),
            job.transfer.data(),
        );
    }
}
