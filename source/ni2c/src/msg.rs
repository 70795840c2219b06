//! Message headers, the fixed-layout records exchanged with the driver.
//!
//! A transmission request is an array of [`MsgHeader`]s plus one byte buffer
//! holding the concatenated payload of every message. Each header occupies
//! exactly four bytes on the wire, with no padding:
//!
//! | byte | contents                                             |
//! |------|------------------------------------------------------|
//! | 0    | [`AddrByte`]: 7-bit device address and direction bit |
//! | 1    | [`MsgFlags`]                                         |
//! | 2..4 | payload length, `u16` little-endian                  |
use embedded_hal::i2c::{ErrorKind, NoAcknowledgeSource};
use mycelium_bitfield::{bitfield, enum_from_bits};

enum_from_bits! {
    /// Transfer direction, the lowest bit of the address byte.
    #[derive(Debug, Eq, PartialEq)]
    pub enum Direction<u8> {
        /// Send bytes to the device.
        Write = 0,
        /// Receive bytes from the device.
        Read = 1,
    }
}

bitfield! {
    /// Address byte of a message header.
    ///
    /// This is the first byte that goes out on the bus: a device at 7-bit
    /// address `0x20` is written with `0x40` and read with `0x41`.
    #[derive(PartialEq, Eq, Hash)]
    pub struct AddrByte<u8> {
        /// Direction of the message.
        pub const DIRECTION: Direction;
        /// 7-bit device address.
        pub const ADDRESS = 7;
    }
}

bitfield! {
    /// Per-message flags.
    ///
    /// [`LAST_BYTE_ACK`](Self::LAST_BYTE_ACK) is an input for receive
    /// messages and an output for send messages; the remaining flags are
    /// filled in by the driver when the result is fetched.
    #[derive(PartialEq, Eq, Hash)]
    pub struct MsgFlags<u8> {
        /// Receive: ACK the last received byte. Send: the last byte was ACKed.
        pub const LAST_BYTE_ACK: bool;
        /// A data byte was not acknowledged.
        pub const DATA_NAK: bool;
        /// The device address was not acknowledged.
        pub const DEVICE_NAK: bool;
        /// Bus arbitration was lost to another controller.
        pub const ARBITRATION_LOST: bool;
        const _RESERVED = 3;
        /// The bus timed out.
        pub const TIMEOUT: bool;
    }
}

impl MsgFlags {
    const FAILURES: u8 = 0x02 | 0x04 | 0x08 | 0x80;

    /// Returns `true` if any failure flag is set.
    pub fn is_failure(&self) -> bool {
        self.bits() & Self::FAILURES != 0
    }

    /// Maps the failure flags to an [`ErrorKind`], or `None` if the message
    /// went through.
    ///
    /// When several flags are set, the one that ends a transfer earliest on
    /// the bus wins: a device NAK, then a data NAK, then lost arbitration,
    /// then a timeout.
    pub fn error_kind(&self) -> Option<ErrorKind> {
        if self.get(Self::DEVICE_NAK) {
            Some(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address))
        } else if self.get(Self::DATA_NAK) {
            Some(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Data))
        } else if self.get(Self::ARBITRATION_LOST) {
            Some(ErrorKind::ArbitrationLoss)
        } else if self.get(Self::TIMEOUT) {
            Some(ErrorKind::Other)
        } else {
            None
        }
    }
}

/// Header of one message inside a transmission request.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct MsgHeader {
    pub addr: AddrByte,
    pub flags: MsgFlags,
    pub len: u16,
}

impl MsgHeader {
    /// Size of one encoded header.
    pub const SIZE: usize = 4;

    /// Builds a header from its raw wire fields.
    pub fn from_raw(dev_addr: u8, flags: u8, len: u16) -> Self {
        Self {
            addr: AddrByte::from_bits(dev_addr),
            flags: MsgFlags::from_bits(flags),
            len,
        }
    }

    /// A message sending `len` bytes to the device at `address`.
    ///
    /// Only the low seven bits of `address` are used.
    pub fn write(address: u8, len: u16) -> Self {
        Self::with_direction(address, Direction::Write, len)
    }

    /// A message receiving `len` bytes from the device at `address`, without
    /// acknowledging the last byte.
    ///
    /// Only the low seven bits of `address` are used.
    pub fn read(address: u8, len: u16) -> Self {
        Self::with_direction(address, Direction::Read, len)
    }

    /// Sets [`MsgFlags::LAST_BYTE_ACK`] on a receive message.
    pub fn ack_last(self) -> Self {
        Self {
            flags: self.flags.with(MsgFlags::LAST_BYTE_ACK, true),
            ..self
        }
    }

    fn with_direction(address: u8, dir: Direction, len: u16) -> Self {
        let addr = AddrByte::new()
            .with(AddrByte::ADDRESS, address & 0x7f)
            .with(AddrByte::DIRECTION, dir);
        Self {
            addr,
            flags: MsgFlags::new(),
            len,
        }
    }

    /// The 7-bit device address.
    pub fn address(&self) -> u8 {
        self.addr.get(AddrByte::ADDRESS)
    }

    pub fn direction(&self) -> Direction {
        self.addr.get(AddrByte::DIRECTION)
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let [lo, hi] = self.len.to_le_bytes();
        [self.addr.bits(), self.flags.bits(), lo, hi]
    }

    pub fn from_bytes(bytes: [u8; Self::SIZE]) -> Self {
        let [addr, flags, lo, hi] = bytes;
        Self::from_raw(addr, flags, u16::from_le_bytes([lo, hi]))
    }

    /// Encodes a header array into the driver's input buffer layout.
    pub fn encode_all(headers: &[MsgHeader]) -> Vec<u8> {
        headers.iter().flat_map(MsgHeader::to_bytes).collect()
    }

    /// Decodes a driver buffer back into headers.
    ///
    /// Returns `None` if `bytes` is not a whole number of headers.
    pub fn decode_all(bytes: &[u8]) -> Option<Vec<MsgHeader>> {
        if bytes.len() % Self::SIZE != 0 {
            return None;
        }
        let headers = bytes
            .chunks_exact(Self::SIZE)
            .map(|chunk| Self::from_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();
        Some(headers)
    }

    /// Sum of the payload lengths of `headers`, i.e. the size the data
    /// buffer of a well-formed request must have.
    pub fn payload_len(headers: &[MsgHeader]) -> usize {
        headers.iter().map(|h| usize::from(h.len)).sum()
    }
}
