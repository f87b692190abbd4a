use embedded_hal::i2c::{ErrorType, I2c, Operation, SevenBitAddress};

use crate::{
    descriptor::{Descriptor, InternalAddress, Target},
    hw::Platform,
    slots::MAX_ASYNC_TRANSFERS,
    twid::Twid,
    Error,
};

/// Blocking [`I2c`] view of a descriptor. Every operation runs through the
/// polling engine, whatever mode the descriptor was configured with.
///
/// A write of at most three bytes followed by a read goes out as a single
/// transaction, the written bytes becoming the controller's internal
/// address. Any other multi-operation transaction is rejected with
/// [`Error::Unsupported`].
pub struct I2cMaster<'t, 'a, P, const N: usize = MAX_ASYNC_TRANSFERS> {
    twid: &'t Twid<'a, P, N>,
    desc: &'t Descriptor,
}

impl<'t, 'a, P: Platform, const N: usize> I2cMaster<'t, 'a, P, N> {
    pub fn new(twid: &'t Twid<'a, P, N>, desc: &'t Descriptor) -> Self {
        Self { twid, desc }
    }
}

impl<P: Platform, const N: usize> ErrorType for I2cMaster<'_, '_, P, N> {
    type Error = Error;
}

impl<P: Platform, const N: usize> I2c<SevenBitAddress> for I2cMaster<'_, '_, P, N> {
    fn transaction(
        &mut self,
        address: SevenBitAddress,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        let plain = Target {
            address,
            internal: None,
        };

        match operations {
            [] => Ok(()),
            [Operation::Write(tx)] => self.twid.transfer_to(self.desc, plain, None, Some(*tx)),
            [Operation::Read(rx)] => {
                self.twid
                    .transfer_to(self.desc, plain, Some(&mut **rx), None)
            }
            [Operation::Write(ia), Operation::Read(rx)] => {
                let internal = InternalAddress::from_bytes(ia).ok_or(Error::Unsupported)?;
                let target = Target {
                    address,
                    internal: Some(internal),
                };
                self.twid
                    .transfer_to(self.desc, target, Some(&mut **rx), None)
            }
            _ => {
                warn!("twid: {} operations in one transaction", operations.len());
                Err(Error::Unsupported)
            }
        }
    }
}
