//! Building and checking transmission requests.
//!
//! [`Transmission`] keeps a request's headers and its data buffer together,
//! so the data buffer is always exactly as long as the headers say it is.
//!
//! ```
//! # fn main() -> Result<(), ni2c::BuildError> {
//! use ni2c::Transmission;
//!
//! // set the register pointer of an EEPROM at 0x50, then read 4 bytes back
//! let mut txn = Transmission::new();
//! txn.write(0x50, &[0x10])?.read(0x50, 4)?;
//! assert_eq!(txn.len(), 2);
//! assert_eq!(txn.data(), &[0x10, 0, 0, 0, 0]);
//! # Ok(())
//! # }
//! ```
use crate::{
    device::DeviceControl,
    error::Error,
    file::Ni2cFile,
    msg::{Direction, MsgFlags, MsgHeader},
    report::{Raise, Report},
};
use core::fmt;
use embedded_hal::i2c::ErrorKind;

/// A transmission request under construction, or one whose result has been
/// fetched.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Transmission {
    headers: Vec<MsgHeader>,
    data: Vec<u8>,
}

/// One message of a [`Transmission`], with its slice of the data buffer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Message<'txn> {
    pub header: MsgHeader,
    pub bytes: &'txn [u8],
}

/// A request that cannot be expressed in the driver's header format.
#[derive(Copy, Clone, Debug, PartialEq, Eq, thiserror::Error, miette::Diagnostic)]
pub enum BuildError {
    #[error("{0:#04x} is not a 7-bit I2C address")]
    #[diagnostic(code(ni2c::txn::invalid_address))]
    InvalidAddress(u8),

    #[error("a message of {len} bytes exceeds the {} byte limit", u16::MAX)]
    #[diagnostic(code(ni2c::txn::too_long))]
    TooLong { len: usize },
}

/// A message the driver reported as failed.
#[derive(Copy, Clone, Debug, PartialEq, Eq, miette::Diagnostic)]
#[diagnostic(code(ni2c::bus))]
pub struct BusError {
    /// Position of the message in its request.
    pub index: usize,
    /// 7-bit address the message was sent to.
    pub address: u8,
    /// The message's result flags.
    pub flags: MsgFlags,
}

/// Errors returned by [`Ni2cFile::transfer`] and the `embedded-hal`
/// implementation.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error(transparent)]
    Io(#[from] Error),

    #[error(transparent)]
    Bus(#[from] BusError),

    #[error(transparent)]
    Build(#[from] BuildError),

    /// The driver returned fewer received bytes than the transaction asked
    /// for.
    #[error("expected {expected} received bytes, the driver returned {received}")]
    Truncated { expected: usize, received: usize },
}

// Written out instead of derived: `#[diagnostic(transparent)]` forwards with
// `field.code()`, which resolves to the inherent `Error::code` for `Io`.
macro_rules! forward_diagnostic {
    ($self:ident, $method:ident, $truncated:expr) => {
        match $self {
            Self::Io(inner) => miette::Diagnostic::$method(inner),
            Self::Bus(inner) => miette::Diagnostic::$method(inner),
            Self::Build(inner) => miette::Diagnostic::$method(inner),
            Self::Truncated { .. } => $truncated,
        }
    };
}

impl miette::Diagnostic for TransferError {
    fn code<'a>(&'a self) -> Option<Box<dyn fmt::Display + 'a>> {
        forward_diagnostic!(
            self,
            code,
            Some(Box::new("ni2c::txn::truncated"))
        )
    }

    fn severity(&self) -> Option<miette::Severity> {
        forward_diagnostic!(self, severity, None)
    }

    fn help<'a>(&'a self) -> Option<Box<dyn fmt::Display + 'a>> {
        forward_diagnostic!(self, help, None)
    }

    fn url<'a>(&'a self) -> Option<Box<dyn fmt::Display + 'a>> {
        forward_diagnostic!(self, url, None)
    }

    fn source_code(&self) -> Option<&dyn miette::SourceCode> {
        forward_diagnostic!(self, source_code, None)
    }

    fn labels(&self) -> Option<Box<dyn Iterator<Item = miette::LabeledSpan> + '_>> {
        forward_diagnostic!(self, labels, None)
    }

    fn related<'a>(&'a self) -> Option<Box<dyn Iterator<Item = &'a dyn miette::Diagnostic> + 'a>> {
        forward_diagnostic!(self, related, None)
    }

    fn diagnostic_source(&self) -> Option<&dyn miette::Diagnostic> {
        forward_diagnostic!(self, diagnostic_source, None)
    }
}

// === impl Transmission ===

impl Transmission {
    pub const fn new() -> Self {
        Self {
            headers: Vec::new(),
            data: Vec::new(),
        }
    }

    /// Appends a message sending `bytes` to the device at `address`.
    pub fn write(&mut self, address: u8, bytes: &[u8]) -> Result<&mut Self, BuildError> {
        let header = MsgHeader::write(check_address(address)?, check_len(bytes.len())?);
        self.headers.push(header);
        self.data.extend_from_slice(bytes);
        Ok(self)
    }

    /// Appends a message receiving `len` bytes from the device at `address`.
    ///
    /// The last received byte is not acknowledged, which tells the device
    /// the read is over.
    pub fn read(&mut self, address: u8, len: usize) -> Result<&mut Self, BuildError> {
        let header = MsgHeader::read(check_address(address)?, check_len(len)?);
        self.push_read(header, len);
        Ok(self)
    }

    /// Appends a message receiving `len` bytes from the device at `address`,
    /// acknowledging the last byte so the device keeps sending in the next
    /// message.
    pub fn read_ack(&mut self, address: u8, len: usize) -> Result<&mut Self, BuildError> {
        let header = MsgHeader::read(check_address(address)?, check_len(len)?).ack_last();
        self.push_read(header, len);
        Ok(self)
    }

    fn push_read(&mut self, header: MsgHeader, len: usize) {
        self.headers.push(header);
        self.data.resize(self.data.len() + len, 0);
    }

    pub fn headers(&self) -> &[MsgHeader] {
        &self.headers
    }

    /// The concatenated payload of every message.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Number of messages.
    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    /// Iterates over the messages in bus order.
    ///
    /// Iteration stops at the first message whose length runs past the end
    /// of the data buffer, which only happens if a driver returned headers
    /// that no longer match the request.
    pub fn messages(&self) -> impl Iterator<Item = Message<'_>> + '_ {
        let mut rest = &self.data[..];
        self.headers.iter().map_while(move |&header| {
            let len = usize::from(header.len);
            if len > rest.len() {
                return None;
            }
            let (bytes, tail) = rest.split_at(len);
            rest = tail;
            Some(Message { header, bytes })
        })
    }

    /// Returns the first message whose flags report a failure.
    pub fn check(&self) -> Result<(), BusError> {
        match self
            .headers
            .iter()
            .enumerate()
            .find(|(_, header)| header.flags.is_failure())
        {
            Some((index, header)) => Err(BusError {
                index,
                address: header.address(),
                flags: header.flags,
            }),
            None => Ok(()),
        }
    }

    /// Removes every message.
    pub fn clear(&mut self) {
        self.headers.clear();
        self.data.clear();
    }
}

fn check_address(address: u8) -> Result<u8, BuildError> {
    if address > 0x7f {
        return Err(BuildError::InvalidAddress(address));
    }
    Ok(address)
}

fn check_len(len: usize) -> Result<u16, BuildError> {
    u16::try_from(len).map_err(|_| BuildError::TooLong { len })
}

// === impl Message ===

impl Message<'_> {
    pub fn is_read(&self) -> bool {
        self.header.direction() == Direction::Read
    }
}

// === impl BusError ===

impl BusError {
    pub fn kind(&self) -> ErrorKind {
        self.flags.error_kind().unwrap_or(ErrorKind::Other)
    }
}

impl fmt::Display for BusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "message {} to {:#04x} failed: {}",
            self.index,
            self.address,
            self.kind()
        )
    }
}

impl std::error::Error for BusError {}

// === impl TransferError ===

impl embedded_hal::i2c::Error for TransferError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Bus(error) => error.kind(),
            Self::Io(_) | Self::Build(_) | Self::Truncated { .. } => ErrorKind::Other,
        }
    }
}

// === impl Ni2cFile ===

impl<D: DeviceControl, M: Report> Ni2cFile<D, M> {
    /// Schedules `txn` as one transmission request.
    pub fn schedule_transmission(&self, txn: &Transmission) -> M::Output<()> {
        self.schedule(&txn.headers, &txn.data)
    }

    /// Fetches the oldest result into `txn`, which must have the shape of
    /// the request it belongs to.
    pub fn get_transmission(&self, txn: &mut Transmission) -> M::Output<()> {
        let Transmission { headers, data } = txn;
        self.get_result(headers, data)
    }
}

impl<D: DeviceControl> Ni2cFile<D, Raise> {
    /// Runs `txn` to completion: schedules it, waits for its result and
    /// checks every message's flags.
    ///
    /// The result fetched is the oldest one queued on the device, so this
    /// only returns `txn`'s own result if nothing else was scheduled before
    /// it and not yet fetched.
    pub fn transfer(&self, txn: &mut Transmission) -> Result<(), TransferError> {
        self.schedule_transmission(txn)?;
        self.get_transmission(txn)?;
        txn.check()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_hal::i2c::{Error as _, NoAcknowledgeSource};

    #[test]
    fn builders_keep_data_in_step() {
        let mut txn = Transmission::new();
        txn.write(0x20, &[1, 2, 3])
            .unwrap()
            .read_ack(0x20, 2)
            .unwrap()
            .read(0x21, 1)
            .unwrap();

        assert_eq!(txn.len(), 3);
        assert_eq!(txn.data().len(), MsgHeader::payload_len(txn.headers()));
        assert_eq!(txn.headers()[0].to_bytes(), [0x40, 0x00, 3, 0]);
        assert_eq!(txn.headers()[1].to_bytes(), [0x41, 0x01, 2, 0]);
        assert_eq!(txn.headers()[2].to_bytes(), [0x43, 0x00, 1, 0]);

        let msgs = txn.messages().collect::<Vec<_>>();
        assert_eq!(msgs[0].bytes, &[1, 2, 3]);
        assert!(!msgs[0].is_read());
        assert_eq!(msgs[1].bytes, &[0, 0]);
        assert!(msgs[2].is_read());
    }

    #[test]
    fn builders_reject_bad_messages() {
        let mut txn = Transmission::new();
        assert_eq!(
            txn.write(0x80, &[0]).unwrap_err(),
            BuildError::InvalidAddress(0x80)
        );
        assert_eq!(
            txn.read(0x50, 0x1_0000).unwrap_err(),
            BuildError::TooLong { len: 0x1_0000 }
        );
        assert!(txn.is_empty());
        assert!(txn.data().is_empty());
    }

    #[test]
    fn check_finds_first_failure() {
        let mut txn = Transmission::new();
        txn.write(0x20, &[0]).unwrap().read(0x21, 1).unwrap();
        assert_eq!(txn.check(), Ok(()));

        txn.headers[1].flags = MsgFlags::from_bits(0x02);
        txn.headers[0].flags = MsgFlags::from_bits(0x01);
        let err = txn.check().unwrap_err();
        assert_eq!(err.index, 1);
        assert_eq!(err.address, 0x21);
        assert_eq!(err.kind(), ErrorKind::NoAcknowledge(NoAcknowledgeSource::Data));

        let err = TransferError::from(err);
        assert_eq!(
            err.kind(),
            ErrorKind::NoAcknowledge(NoAcknowledgeSource::Data)
        );
    }

    #[test]
    fn messages_stop_at_a_header_past_the_data() {
        let mut txn = Transmission::new();
        txn.write(0x20, &[1]).unwrap().read(0x20, 2).unwrap().read(0x21, 1).unwrap();

        // a driver that grew the second message
        txn.headers[1].len = 8;
        let msgs = txn.messages().collect::<Vec<_>>();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].bytes, &[1]);
    }

    #[test]
    fn clear_allows_reuse() {
        let mut txn = Transmission::new();
        txn.write(0x20, &[1, 2]).unwrap().read(0x20, 3).unwrap();
        txn.clear();
        assert!(txn.is_empty());
        assert_eq!(txn.len(), 0);
        assert!(txn.data().is_empty());
        assert_eq!(txn.messages().count(), 0);
        assert_eq!(txn, Transmission::new());

        txn.read(0x21, 1).unwrap();
        assert_eq!(txn.headers(), &[MsgHeader::read(0x21, 1)]);
        assert_eq!(txn.data(), &[0]);
    }
}
