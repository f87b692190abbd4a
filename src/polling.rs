use crate::{
    descriptor::Settings,
    hw::{BusInstance, Deadline, Platform, Status},
    twid::Twid,
    Error,
};

impl<'a, P: Platform, const N: usize> Twid<'a, P, N> {
    pub(crate) fn check_nack(&self, bus: BusInstance) -> Result<(), Error> {
        if self.platform.status(bus).contains(Status::NACK) {
            error!("twid: command NACK");
            Err(Error::Ack)
        } else {
            Ok(())
        }
    }

    fn wait_for(&self, settings: &Settings, flag: Status) -> Result<(), Error> {
        let deadline = Deadline::start(self.platform, settings.timeout);
        while !self.platform.status(settings.bus).contains(flag) {
            if deadline.reached(self.platform) {
                return Err(Error::Timeout);
            }
        }
        Ok(())
    }

    fn wait_byte_received(&self, settings: &Settings) -> Result<(), Error> {
        self.wait_for(settings, Status::RXRDY)
            .inspect_err(|_| error!("twid: device doesn't answer (RX timeout)"))
    }

    fn wait_byte_sent(&self, settings: &Settings) -> Result<(), Error> {
        self.wait_for(settings, Status::TXRDY)
            .inspect_err(|_| error!("twid: device doesn't answer (TX timeout)"))
    }

    /// A controller that never reports completion is reprogrammed from
    /// scratch before the error goes back to the caller.
    pub(crate) fn wait_transfer_complete(&self, settings: &Settings) -> Result<(), Error> {
        if self.wait_for(settings, Status::TXCOMP).is_err() {
            error!("twid: unable to complete transfer");
            self.program(settings);
            return Err(Error::Timeout);
        }
        Ok(())
    }

    pub(crate) fn poll_write(&self, settings: &Settings, data: &[u8]) -> Result<(), Error> {
        let Some((&first, rest)) = data.split_first() else {
            return Ok(());
        };
        let bus = settings.bus;

        self.platform.start_write(bus, &settings.target, first);
        if rest.is_empty() {
            self.platform.send_stop(bus);
        }
        self.check_nack(bus)?;

        for &byte in rest {
            if self.wait_byte_sent(settings).is_err() {
                break;
            }
            self.platform.write_byte(bus, byte);
            self.check_nack(bus)?;
        }

        if !rest.is_empty() {
            self.platform.send_stop(bus);
        }

        self.wait_transfer_complete(settings)
    }

    /// The stop condition has to be requested before the last byte is
    /// clocked in, so it goes out one byte early.
    pub(crate) fn poll_read(&self, settings: &Settings, buf: &mut [u8]) -> Result<(), Error> {
        let Some(last) = buf.len().checked_sub(1) else {
            return Ok(());
        };
        let bus = settings.bus;

        self.platform.start_read(bus, &settings.target);

        let mut index = 0;
        while index < last {
            if self.wait_byte_received(settings).is_err() {
                break;
            }
            buf[index] = self.platform.read_byte(bus);
            self.check_nack(bus)?;
            index += 1;
        }

        self.platform.send_stop(bus);
        self.check_nack(bus)?;

        self.wait_byte_received(settings)?;
        buf[index] = self.platform.read_byte(bus);

        self.wait_transfer_complete(settings)
    }
}
