//! # ni2c
//!
//! Bindings for the NI2C I<sup>2</sup>C bus driver.
//!
//! The driver exposes each bus as a device node (`I2C1:`, `I2C2:`, ...)
//! operated through five device-control calls: schedule a transmission
//! request, fetch its result, skip a result, check whether a result is
//! available, and read the bus clock frequency. [`Ni2cFile`] owns an open
//! device node and maps each call to a method:
//!
//! | control call              | method                            |
//! |---------------------------|-----------------------------------|
//! | `IOCTL_NI2C_SCHEDULE`     | [`Ni2cFile::schedule`]            |
//! | `IOCTL_NI2C_GET_RESULT`   | [`Ni2cFile::get_result`]          |
//! | `IOCTL_NI2C_SKIP_RESULT`  | [`Ni2cFile::skip_result`]         |
//! | `IOCTL_NI2C_CHECK_RESULT` | [`Ni2cFile::check_result`]        |
//! | `IOCTL_NI2C_GET_CLKFREQ`  | [`Ni2cFile::get_clock_frequency`] |
//!
//! The binding itself adds no queueing, locking or retries: every method is
//! exactly one call into the driver. [`Transmission`] and the
//! [`embedded_hal::i2c::I2c`] implementation are conveniences on top.
//!
//! The native backend is only available on Windows. [`sim::SimBus`] is a
//! simulated driver that works everywhere.
//!
//! ```
//! use ni2c::{sim::{Memory, SimBus}, Access, Ni2cFile, Transmission};
//!
//! # fn main() -> miette::Result<()> {
//! let bus = SimBus::default().with_target(0x50, Memory::with_contents(*b"hello world"));
//! let file = Ni2cFile::open_with(bus, "I2C1:", Access::ReadWrite)?;
//!
//! let mut txn = Transmission::new();
//! txn.write(0x50, &[6])?.read(0x50, 5)?;
//! file.transfer(&mut txn)?;
//! assert_eq!(&txn.data()[1..], b"world");
//! # Ok(())
//! # }
//! ```
pub mod device;
pub mod error;
mod file;
mod hal;
pub mod ioctl;
pub mod msg;
pub mod report;
pub mod sim;
pub mod txn;
#[cfg(windows)]
pub mod win32;

pub use self::{
    device::{Access, DeviceControl, Handle},
    error::{Error, ErrorCode, Op},
    file::Ni2cFile,
    msg::{Direction, MsgFlags, MsgHeader},
    report::{Raise, Report, ReturnCode},
    txn::{BuildError, BusError, TransferError, Transmission},
};
