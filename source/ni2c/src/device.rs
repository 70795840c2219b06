//! The seam between the binding and the native driver.
//!
//! [`DeviceControl`] is the whole surface the binding needs from the OS:
//! open a device node, close it, and issue one device-control call. The
//! [`Win32`](crate::win32::Win32) backend implements it with the Windows
//! file API; [`SimBus`](crate::sim::SimBus) implements it in memory.
use crate::{error::ErrorCode, ioctl::IoctlCode};
use core::fmt;

/// An OS handle to an open device node.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct Handle(isize);

impl Handle {
    /// The invalid-handle sentinel (`INVALID_HANDLE_VALUE`).
    pub const INVALID: Self = Self(-1);

    pub const fn from_raw(raw: isize) -> Self {
        Self(raw)
    }

    pub const fn as_raw(self) -> isize {
        self.0
    }

    pub const fn is_valid(self) -> bool {
        self.0 != Self::INVALID.0
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "Handle({:#x})", self.0)
        } else {
            f.write_str("Handle(INVALID)")
        }
    }
}

/// Access requested when opening a device node.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum Access {
    /// Query device attributes only.
    Query,
    Write,
    Read,
    #[default]
    ReadWrite,
}

impl Access {
    const GENERIC_WRITE: u32 = 0x4000_0000;
    const GENERIC_READ: u32 = 0x8000_0000;

    /// The `dwDesiredAccess` bits for this access mode.
    pub const fn bits(self) -> u32 {
        match self {
            Self::Query => 0,
            Self::Write => Self::GENERIC_WRITE,
            Self::Read => Self::GENERIC_READ,
            Self::ReadWrite => Self::GENERIC_READ | Self::GENERIC_WRITE,
        }
    }

    /// Parses `dwDesiredAccess` bits. Bits other than the generic read and
    /// write flags are ignored.
    pub const fn from_bits(bits: u32) -> Self {
        match (bits & Self::GENERIC_READ != 0, bits & Self::GENERIC_WRITE != 0) {
            (false, false) => Self::Query,
            (false, true) => Self::Write,
            (true, false) => Self::Read,
            (true, true) => Self::ReadWrite,
        }
    }
}

/// Native device access.
///
/// Each method is a single OS call. Implementations must not retry, queue
/// or reorder calls; the driver behind them owns all of that.
pub trait DeviceControl {
    /// Opens the existing device node `name` for exclusive use.
    fn open(&self, name: &str, access: Access) -> Result<Handle, ErrorCode>;

    /// Releases `handle`.
    fn close(&self, handle: Handle) -> Result<(), ErrorCode>;

    /// Issues one device-control call.
    ///
    /// `input` and `output` are the call's input and output buffers; the
    /// driver may write to both. Returns the call's return value, or the
    /// platform error code recorded for a failed call.
    fn io_control(
        &self,
        handle: Handle,
        code: IoctlCode,
        input: &mut [u8],
        output: &mut [u8],
    ) -> Result<u32, ErrorCode>;
}

impl<D: DeviceControl + ?Sized> DeviceControl for &D {
    fn open(&self, name: &str, access: Access) -> Result<Handle, ErrorCode> {
        (**self).open(name, access)
    }

    fn close(&self, handle: Handle) -> Result<(), ErrorCode> {
        (**self).close(handle)
    }

    fn io_control(
        &self,
        handle: Handle,
        code: IoctlCode,
        input: &mut [u8],
        output: &mut [u8],
    ) -> Result<u32, ErrorCode> {
        (**self).io_control(handle, code, input, output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_bits() {
        assert_eq!(Access::Query.bits(), 0);
        assert_eq!(Access::Write.bits(), 0x4000_0000);
        assert_eq!(Access::Read.bits(), 0x8000_0000);
        assert_eq!(Access::ReadWrite.bits(), 0xC000_0000);
        for access in [Access::Query, Access::Write, Access::Read, Access::ReadWrite] {
            assert_eq!(Access::from_bits(access.bits()), access);
        }
    }

    #[test]
    fn invalid_handle_sentinel() {
        assert!(!Handle::INVALID.is_valid());
        assert!(Handle::from_raw(0x40).is_valid());
        assert_eq!(format!("{:?}", Handle::INVALID), "Handle(INVALID)");
    }
}
