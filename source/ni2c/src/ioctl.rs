//! NI2C device-control codes.
//!
//! Each control code is built the same way as the `CTL_CODE` macro in the
//! Windows DDK: a device type in the upper half-word, the required access,
//! a function number, and a buffer transfer method in the lowest two bits.
//!
//! ```text
//!  31             16 15 14 13           2 1  0
//! +-----------------+-----+--------------+----+
//! |   device type   | acc |   function   | mt |
//! +-----------------+-----+--------------+----+
//! ```
//!
//! The five NI2C codes all use [`DEVICE_NI2C`], [`RequiredAccess::Any`] and
//! [`TransferMethod::Buffered`]; only the function number differs. They are
//! part of the driver ABI and must match it bit for bit.
use mycelium_bitfield::{bitfield, enum_from_bits};

/// Device type identifier of the NI2C driver.
pub const DEVICE_NI2C: u16 = 0x8037;

/// Schedule a transmission request.
pub const SCHEDULE: IoctlCode = IoctlCode::ni2c(0x800);
/// Fetch the result of the oldest scheduled request.
pub const GET_RESULT: IoctlCode = IoctlCode::ni2c(0x801);
/// Discard the result of the oldest scheduled request.
pub const SKIP_RESULT: IoctlCode = IoctlCode::ni2c(0x802);
/// Ask whether at least one result is available.
pub const CHECK_RESULT: IoctlCode = IoctlCode::ni2c(0x803);
/// Read the bus clock frequency in Hz.
pub const GET_CLKFREQ: IoctlCode = IoctlCode::ni2c(0x804);

enum_from_bits! {
    /// How the I/O manager passes buffers to the driver.
    #[derive(Debug, Eq, PartialEq)]
    pub enum TransferMethod<u8> {
        Buffered = 0,
        InDirect = 1,
        OutDirect = 2,
        Neither = 3,
    }
}

enum_from_bits! {
    /// Access rights the caller's handle needs to issue a control code.
    #[derive(Debug, Eq, PartialEq)]
    pub enum RequiredAccess<u8> {
        Any = 0,
        Read = 1,
        Write = 2,
        ReadWrite = 3,
    }
}

bitfield! {
    /// A 32-bit device-control code.
    #[derive(PartialEq, Eq, Hash)]
    pub struct IoctlCode<u32> {
        /// Buffer transfer method.
        pub const METHOD: TransferMethod;
        /// Function number. Values `0x800` and up are vendor-defined.
        pub const FUNCTION = 12;
        /// Access required on the handle.
        pub const ACCESS: RequiredAccess;
        /// Device type the code is addressed to.
        pub const DEVICE_TYPE: u16;
    }
}

impl IoctlCode {
    /// Equivalent of the DDK `CTL_CODE` macro.
    pub const fn ctl_code(
        device_type: u16,
        function: u16,
        method: TransferMethod,
        access: RequiredAccess,
    ) -> Self {
        Self::from_bits(
            ((device_type as u32) << 16)
                | ((access as u32) << 14)
                | (((function as u32) & 0xfff) << 2)
                | (method as u32),
        )
    }

    const fn ni2c(function: u16) -> Self {
        Self::ctl_code(
            DEVICE_NI2C,
            function,
            TransferMethod::Buffered,
            RequiredAccess::Any,
        )
    }
}
