//! [`embedded_hal::i2c`] implementation for [`Ni2cFile`].
//!
//! A transaction becomes a single transmission request, so the driver runs
//! it with repeated STARTs and no other request can interleave. Adjacent
//! operations of the same kind are merged into one message, as the trait
//! requires that no repeated START separates them.
use crate::{
    device::DeviceControl,
    file::Ni2cFile,
    report::Raise,
    txn::{TransferError, Transmission},
};
use embedded_hal::i2c::{self, Operation, SevenBitAddress};

impl<D: DeviceControl> i2c::ErrorType for Ni2cFile<D, Raise> {
    type Error = TransferError;
}

impl<D: DeviceControl> i2c::I2c<SevenBitAddress> for Ni2cFile<D, Raise> {
    #[tracing::instrument(level = "debug", skip(self, operations), fields(ops = operations.len()))]
    fn transaction(
        &mut self,
        address: SevenBitAddress,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        if operations.is_empty() {
            return Ok(());
        }

        let mut txn = Transmission::new();
        let mut ops = operations.iter().peekable();
        while let Some(op) = ops.next() {
            match op {
                Operation::Write(first) => {
                    let mut bytes = first.to_vec();
                    while let Some(Operation::Write(more)) = ops.peek() {
                        bytes.extend_from_slice(more);
                        ops.next();
                    }
                    txn.write(address, &bytes)?;
                }
                Operation::Read(first) => {
                    let mut len = first.len();
                    while let Some(Operation::Read(more)) = ops.peek() {
                        len += more.len();
                        ops.next();
                    }
                    // a read is always followed by a STOP or a repeated
                    // START, so its last byte is never acknowledged.
                    txn.read(address, len)?;
                }
            }
        }

        self.transfer(&mut txn)?;

        let received = txn
            .messages()
            .filter(|msg| msg.is_read())
            .flat_map(|msg| msg.bytes.iter().copied())
            .collect::<Vec<u8>>();
        let expected = operations
            .iter()
            .map(|op| match op {
                Operation::Read(buf) => buf.len(),
                Operation::Write(_) => 0,
            })
            .sum::<usize>();
        if received.len() < expected {
            tracing::warn!(expected, received = received.len(), "driver returned a short read");
            return Err(TransferError::Truncated {
                expected,
                received: received.len(),
            });
        }
        let mut rest = &received[..];
        for op in operations {
            if let Operation::Read(buf) = op {
                let (bytes, tail) = rest.split_at(buf.len());
                buf.copy_from_slice(bytes);
                rest = tail;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        device::{Access, Handle},
        error::ErrorCode,
        ioctl::{self, IoctlCode},
        msg::MsgHeader,
        sim::{Memory, SimBus},
    };
    use embedded_hal::i2c::{Error as _, ErrorKind, I2c, NoAcknowledgeSource};

    fn eeprom() -> (SimBus, Memory) {
        let mem = Memory::new(256);
        let bus = SimBus::default().with_target(0x50, mem.clone());
        (bus, mem)
    }

    #[test]
    fn write_then_read() {
        let (bus, mem) = eeprom();
        let mut file = Ni2cFile::open_with(&bus, "I2C1:", Access::ReadWrite).unwrap();

        file.write(0x50, &[0x10, 0xde, 0xad, 0xbe, 0xef]).unwrap();
        assert_eq!(&mem.contents()[0x10..0x14], &[0xde, 0xad, 0xbe, 0xef]);

        let mut buf = [0; 4];
        file.write_read(0x50, &[0x10], &mut buf).unwrap();
        assert_eq!(buf, [0xde, 0xad, 0xbe, 0xef]);
    }

    #[test]
    fn adjacent_operations_are_merged() {
        let (bus, mem) = eeprom();
        mem.load(0x20, &[1, 2, 3, 4, 5]);
        let mut file = Ni2cFile::open_with(&bus, "I2C1:", Access::ReadWrite).unwrap();

        let (mut a, mut b) = ([0; 2], [0; 3]);
        file.transaction(
            0x50,
            &mut [
                Operation::Write(&[]),
                Operation::Write(&[0x20]),
                Operation::Read(&mut a),
                Operation::Read(&mut b),
            ],
        )
        .unwrap();
        assert_eq!(a, [1, 2]);
        assert_eq!(b, [3, 4, 5]);
    }

    #[test]
    fn missing_device_naks_address() {
        let (bus, _) = eeprom();
        let mut file = Ni2cFile::open_with(&bus, "I2C1:", Access::ReadWrite).unwrap();
        let mut buf = [0; 1];
        let err = file.read(0x51, &mut buf).unwrap_err();
        assert_eq!(
            err.kind(),
            ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address)
        );
    }

    #[test]
    fn short_read_from_the_driver_is_an_error() {
        /// Passes calls through, but shrinks every returned read message.
        struct Shrinking(SimBus);

        impl DeviceControl for Shrinking {
            fn open(&self, name: &str, access: Access) -> Result<Handle, ErrorCode> {
                self.0.open(name, access)
            }

            fn close(&self, handle: Handle) -> Result<(), ErrorCode> {
                self.0.close(handle)
            }

            fn io_control(
                &self,
                handle: Handle,
                code: IoctlCode,
                input: &mut [u8],
                output: &mut [u8],
            ) -> Result<u32, ErrorCode> {
                let n = self.0.io_control(handle, code, input, output)?;
                if code == ioctl::GET_RESULT {
                    for header in input.chunks_exact_mut(MsgHeader::SIZE) {
                        if header[0] & 1 == 1 {
                            header[2..4].copy_from_slice(&0u16.to_le_bytes());
                        }
                    }
                }
                Ok(n)
            }
        }

        let (bus, mem) = eeprom();
        mem.load(0, &[7, 8]);
        let mut file =
            Ni2cFile::open_with(Shrinking(bus), "I2C1:", Access::ReadWrite).unwrap();
        let mut buf = [0xee; 2];
        let err = file.write_read(0x50, &[0], &mut buf).unwrap_err();
        assert!(
            matches!(err, TransferError::Truncated { expected: 2, received: 0 }),
            "{err:?}"
        );
        assert_eq!(err.kind(), ErrorKind::Other);
        assert_eq!(buf, [0xee; 2]);
    }

    #[test]
    fn closed_file_is_an_io_error() {
        let (bus, _) = eeprom();
        let mut file = Ni2cFile::open_with(&bus, "I2C1:", Access::ReadWrite).unwrap();
        file.close().unwrap();
        let err = file.write(0x50, &[0]).unwrap_err();
        assert!(matches!(err, TransferError::Io(_)), "{err:?}");
        assert_eq!(err.kind(), ErrorKind::Other);
    }
}
