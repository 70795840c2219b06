//! The NI2C device file.
use crate::{
    device::{Access, DeviceControl, Handle},
    error::{Error, ErrorCode, Op},
    ioctl::{self, IoctlCode},
    msg::MsgHeader,
    report::{Raise, Report, ReturnCode},
};
use core::{fmt, marker::PhantomData, mem};

/// An open NI2C bus device, such as `I2C1:`.
///
/// The device handle is acquired when the file is opened and released
/// exactly once, either by [`close`](Self::close) or when the file is
/// dropped. Once closed, every operation fails with
/// [`Error::InvalidHandle`] without calling into the driver.
///
/// `D` is the native backend and `M` the [error-reporting mode](crate::report).
///
/// # Transmission requests
///
/// A request is an array of [`MsgHeader`]s plus one data buffer holding the
/// bytes of every message back to back; receive messages reserve as many
/// placeholder bytes as they expect. The driver runs all messages of a
/// request as one bus transaction, with a repeated START between messages,
/// so no other request can interleave. That also means a long request holds
/// the bus for its whole duration.
///
/// [`schedule`](Self::schedule) queues a request in the driver and returns
/// immediately. [`get_result`](Self::get_result), called with buffers of the
/// same sizes, later returns the per-message flags and the received bytes.
/// Several requests may be scheduled before fetching; results come back in
/// the order the requests were scheduled.
pub struct Ni2cFile<D: DeviceControl, M: Report = Raise> {
    handle: OwnedHandle<D>,
    _mode: PhantomData<fn() -> M>,
}

/// Owns the raw handle and releases it on drop.
struct OwnedHandle<D: DeviceControl> {
    driver: D,
    raw: Handle,
    name: String,
}

// === impl Ni2cFile ===

impl<D: DeviceControl> Ni2cFile<D, Raise> {
    /// Opens the existing device node `name` through `driver`.
    ///
    /// The file starts out in [`Raise`] mode; use
    /// [`report_codes`](Self::report_codes) to switch.
    #[tracing::instrument(level = "debug", name = "Open", skip(driver))]
    pub fn open_with(driver: D, name: &str, access: Access) -> Result<Self, Error> {
        let raw = driver.open(name, access).map_err(|code| {
            tracing::debug!(%code, "could not open NI2C device");
            Error::DeviceOpen {
                name: name.to_owned(),
                code,
            }
        })?;
        tracing::debug!(handle = ?raw, "NI2C device opened");
        Ok(Self {
            handle: OwnedHandle {
                driver,
                raw,
                name: name.to_owned(),
            },
            _mode: PhantomData,
        })
    }
}

#[cfg(windows)]
impl Ni2cFile<crate::win32::Win32, Raise> {
    /// Opens the native device node `name`, e.g. `"I2C1:"`.
    pub fn open(name: &str, access: Access) -> Result<Self, Error> {
        Self::open_with(crate::win32::Win32, name, access)
    }
}

impl<D: DeviceControl, M: Report> Ni2cFile<D, M> {
    /// Switches to reporting failures as raw [`ErrorCode`]s.
    pub fn report_codes(self) -> Ni2cFile<D, ReturnCode> {
        Ni2cFile {
            handle: self.handle,
            _mode: PhantomData,
        }
    }

    /// Switches to reporting failures as [`Error`]s.
    pub fn raise_errors(self) -> Ni2cFile<D, Raise> {
        Ni2cFile {
            handle: self.handle,
            _mode: PhantomData,
        }
    }

    /// The device node name this file was opened with.
    pub fn name(&self) -> &str {
        &self.handle.name
    }

    /// Returns `true` until the file is closed.
    pub fn is_open(&self) -> bool {
        self.handle.raw.is_valid()
    }

    pub fn driver(&self) -> &D {
        &self.handle.driver
    }

    /// Closes the device.
    ///
    /// Closing an already closed file does nothing and succeeds.
    pub fn close(&mut self) -> M::Output<()> {
        let result = self.handle.release().map_err(|code| Error::Driver {
            op: Op::Close,
            code,
        });
        self.finish(result)
    }

    /// Schedules a transmission request.
    ///
    /// Returns as soon as the driver has queued the request; the transfer
    /// itself runs asynchronously. Fetch the outcome with
    /// [`get_result`](Self::get_result) or drop it with
    /// [`skip_result`](Self::skip_result).
    ///
    /// `data` must be exactly as long as the sum of the header lengths. This
    /// is **not** checked here: a mismatched request is logged and handed to
    /// the driver unchanged, which decides whether to reject it. Build
    /// requests with [`Transmission`](crate::Transmission) to rule this out.
    #[tracing::instrument(
        level = "debug",
        name = "Schedule",
        skip_all,
        fields(device = %self.handle.name, msgs = msgs.len(), bytes = data.len()),
    )]
    pub fn schedule(&self, msgs: &[MsgHeader], data: &[u8]) -> M::Output<()> {
        self.finish(self.schedule_request(msgs, data))
    }

    /// Fetches the result of the oldest scheduled request, blocking until
    /// the driver has finished it.
    ///
    /// `msgs` and `data` must have the sizes used when scheduling that
    /// request. On success the header flags report the outcome of each
    /// message and the receive slots of `data` hold the received bytes. On
    /// failure neither buffer is modified.
    #[tracing::instrument(
        level = "debug",
        name = "GetResult",
        skip_all,
        fields(device = %self.handle.name, msgs = msgs.len(), bytes = data.len()),
    )]
    pub fn get_result(&self, msgs: &mut [MsgHeader], data: &mut [u8]) -> M::Output<()> {
        self.finish(self.fetch_result(msgs, data))
    }

    /// Discards the result of the oldest scheduled request, blocking until
    /// the driver has finished it.
    #[tracing::instrument(
        level = "debug",
        name = "SkipResult",
        skip_all,
        fields(device = %self.handle.name),
    )]
    pub fn skip_result(&self) -> M::Output<()> {
        let result = self
            .control(Op::SkipResult, ioctl::SKIP_RESULT, &mut [], &mut [])
            .map(drop);
        self.finish(result)
    }

    /// Returns `true` if at least one result is ready to be fetched.
    ///
    /// Never blocks and never consumes a result.
    #[tracing::instrument(
        level = "debug",
        name = "CheckResult",
        skip_all,
        fields(device = %self.handle.name),
    )]
    pub fn check_result(&self) -> M::Output<bool> {
        let result = self
            .control(Op::CheckResult, ioctl::CHECK_RESULT, &mut [], &mut [])
            .map(|available| available != 0);
        self.finish(result)
    }

    /// Returns the bus clock frequency in Hz.
    #[tracing::instrument(
        level = "debug",
        name = "GetClockFreq",
        skip_all,
        fields(device = %self.handle.name),
    )]
    pub fn get_clock_frequency(&self) -> M::Output<u32> {
        let result = self.control(Op::GetClockFreq, ioctl::GET_CLKFREQ, &mut [], &mut []);
        self.finish(result)
    }

    fn schedule_request(&self, msgs: &[MsgHeader], data: &[u8]) -> Result<(), Error> {
        let raw = self.live(Op::Schedule)?;
        let expected = MsgHeader::payload_len(msgs);
        if msgs.is_empty() || expected != data.len() {
            tracing::warn!(
                handle = ?raw,
                expected,
                actual = data.len(),
                "request data does not match its message headers, passing it on unchanged"
            );
        }

        let mut headers = MsgHeader::encode_all(msgs);
        let mut bytes = data.to_vec();
        self.control(Op::Schedule, ioctl::SCHEDULE, &mut headers, &mut bytes)
            .map(drop)
    }

    fn fetch_result(&self, msgs: &mut [MsgHeader], data: &mut [u8]) -> Result<(), Error> {
        // the driver fills scratch copies, so a failed call leaves the
        // caller's buffers as they were.
        let mut headers = MsgHeader::encode_all(msgs);
        let mut bytes = data.to_vec();
        self.control(Op::GetResult, ioctl::GET_RESULT, &mut headers, &mut bytes)
            .map_err(|error| match error {
                Error::Driver {
                    code: ErrorCode::INVALID_PARAMETER,
                    ..
                } => Error::SizeMismatch {
                    code: ErrorCode::INVALID_PARAMETER,
                },
                error => error,
            })?;

        for (msg, chunk) in msgs.iter_mut().zip(headers.chunks_exact(MsgHeader::SIZE)) {
            *msg = MsgHeader::from_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        data.copy_from_slice(&bytes);
        Ok(())
    }

    fn live(&self, op: Op) -> Result<Handle, Error> {
        let raw = self.handle.raw;
        if raw.is_valid() {
            Ok(raw)
        } else {
            Err(Error::InvalidHandle { op })
        }
    }

    fn control(
        &self,
        op: Op,
        code: IoctlCode,
        input: &mut [u8],
        output: &mut [u8],
    ) -> Result<u32, Error> {
        let raw = self.live(op)?;
        tracing::trace!(
            handle = ?raw,
            ioctl = ?format_args!("{:#010x}", code.bits()),
            input = input.len(),
            output = output.len(),
            "{op}"
        );
        self.handle
            .driver
            .io_control(raw, code, input, output)
            .map_err(|code| Error::Driver { op, code })
    }

    /// Every operation's outcome passes through here on its way out.
    fn finish<T>(&self, result: Result<T, Error>) -> M::Output<T> {
        if let Err(ref error) = result {
            tracing::debug!(
                device = %self.handle.name,
                op = %error.op(),
                code = error.code().raw(),
                %error,
                "NI2C operation failed"
            );
        }
        M::report(result)
    }
}

impl<D: DeviceControl, M: Report> fmt::Debug for Ni2cFile<D, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = core::any::type_name::<M>();
        f.debug_struct("Ni2cFile")
            .field("name", &self.handle.name)
            .field("handle", &self.handle.raw)
            .field("mode", &mode.rsplit("::").next().unwrap_or(mode))
            .finish()
    }
}

// === impl OwnedHandle ===

impl<D: DeviceControl> OwnedHandle<D> {
    fn release(&mut self) -> Result<(), ErrorCode> {
        let raw = mem::replace(&mut self.raw, Handle::INVALID);
        if !raw.is_valid() {
            return Ok(());
        }
        tracing::debug!(device = %self.name, handle = ?raw, "closing NI2C device");
        self.driver.close(raw)
    }
}

impl<D: DeviceControl> Drop for OwnedHandle<D> {
    fn drop(&mut self) {
        if let Err(code) = self.release() {
            tracing::warn!(device = %self.name, %code, "failed to close NI2C device");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimBus;

    #[test]
    fn clock_frequency_passthrough() {
        let bus = SimBus::new("I2C1:").clock_hz(400_000);
        let file = Ni2cFile::open_with(&bus, "I2C1:", Access::ReadWrite).unwrap();
        assert_eq!(file.get_clock_frequency().unwrap(), 400_000);
    }

    #[test]
    fn debug_names_the_mode() {
        let bus = SimBus::new("I2C2:");
        let file = Ni2cFile::open_with(&bus, "I2C2:", Access::Query).unwrap();
        let dbg = format!("{file:?}");
        assert!(dbg.contains("I2C2:"), "{dbg}");
        assert!(dbg.contains("Raise"), "{dbg}");
        let dbg = format!("{:?}", file.report_codes());
        assert!(dbg.contains("ReturnCode"), "{dbg}");
    }

    #[test]
    fn close_failure_is_reported_once() {
        let bus = SimBus::new("I2C1:");
        let mut file = Ni2cFile::open_with(&bus, "I2C1:", Access::ReadWrite).unwrap();
        bus.fail_next(ErrorCode::WRITE_FAULT);
        let err = file.close().unwrap_err();
        assert_eq!(err.op(), Op::Close);
        assert_eq!(err.code(), ErrorCode::WRITE_FAULT);
        // the handle is gone either way; a second close is a no-op
        assert!(!file.is_open());
        file.close().unwrap();
    }
}
