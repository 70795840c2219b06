use core::fmt;

/// A platform error code, as returned by `GetLastError` after a failed call.
///
/// Codes are passed through exactly as the OS reported them. The associated
/// constants name the codes the NI2C driver and the file API are known to
/// produce, so callers can match on them.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ErrorCode(pub u32);

impl ErrorCode {
    /// The device node does not exist.
    pub const FILE_NOT_FOUND: Self = Self(2);
    /// Access denied, or the device is already held exclusively.
    pub const ACCESS_DENIED: Self = Self(5);
    pub const INVALID_HANDLE: Self = Self(6);
    pub const NOT_READY: Self = Self(21);
    /// The Win32 write fault. Older NI2C driver listings give this as 27,
    /// which is [`SECTOR_NOT_FOUND`](Self::SECTOR_NOT_FOUND) on Win32; both
    /// are named so either one displays readably.
    pub const WRITE_FAULT: Self = Self(29);
    pub const SECTOR_NOT_FOUND: Self = Self(27);
    pub const DEV_NOT_EXIST: Self = Self(55);
    /// Bad parameters; also what the driver reports when result buffers do
    /// not match the scheduled request.
    pub const INVALID_PARAMETER: Self = Self(87);
    /// Malformed device name.
    pub const INVALID_NAME: Self = Self(123);

    pub const fn raw(self) -> u32 {
        self.0
    }

    /// The symbolic name of a well-known code.
    pub fn name(self) -> Option<&'static str> {
        Some(match self {
            Self::FILE_NOT_FOUND => "ERROR_FILE_NOT_FOUND",
            Self::ACCESS_DENIED => "ERROR_ACCESS_DENIED",
            Self::INVALID_HANDLE => "ERROR_INVALID_HANDLE",
            Self::NOT_READY => "ERROR_NOT_READY",
            Self::SECTOR_NOT_FOUND => "ERROR_SECTOR_NOT_FOUND",
            Self::WRITE_FAULT => "ERROR_WRITE_FAULT",
            Self::DEV_NOT_EXIST => "ERROR_DEV_NOT_EXIST",
            Self::INVALID_PARAMETER => "ERROR_INVALID_PARAMETER",
            Self::INVALID_NAME => "ERROR_INVALID_NAME",
            _ => return None,
        })
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "error code {} ({name})", self.0),
            None => write!(f, "error code {}", self.0),
        }
    }
}

impl fmt::Debug for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "ErrorCode({}: {name})", self.0),
            None => write!(f, "ErrorCode({})", self.0),
        }
    }
}

impl From<ErrorCode> for u32 {
    fn from(code: ErrorCode) -> Self {
        code.0
    }
}

/// The operation an [`Error`] came from.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Op {
    Open,
    Close,
    Schedule,
    GetResult,
    SkipResult,
    CheckResult,
    GetClockFreq,
}

impl Op {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "Open()",
            Self::Close => "Close()",
            Self::Schedule => "Schedule()",
            Self::GetResult => "GetResult()",
            Self::SkipResult => "SkipResult()",
            Self::CheckResult => "CheckResult()",
            Self::GetClockFreq => "GetClockFreq()",
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors returned by [`Ni2cFile`](crate::Ni2cFile) operations.
///
/// Every variant carries (or implies) the platform [`ErrorCode`], available
/// through [`Error::code`].
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum Error {
    /// The device node could not be opened.
    #[error("could not open NI2C device `{name}`: {code}")]
    #[diagnostic(
        code(ni2c::device_open),
        help("NI2C device names look like `I2C1:`; check that the driver is loaded and no other process holds the device")
    )]
    DeviceOpen { name: String, code: ErrorCode },

    /// A device-control call failed.
    #[error("{op} failed: {code}")]
    #[diagnostic(code(ni2c::driver))]
    Driver { op: Op, code: ErrorCode },

    /// The driver rejected a result fetch whose buffers do not have the sizes
    /// of the request being fetched.
    #[error("GetResult() failed: message or data buffer size differs from the scheduled request ({code})")]
    #[diagnostic(
        code(ni2c::size_mismatch),
        help("results come back in schedule order; pass buffers sized like the oldest pending request")
    )]
    SizeMismatch { code: ErrorCode },

    /// The operation was attempted after the handle was closed.
    #[error("{op} failed: the NI2C device has been closed")]
    #[diagnostic(code(ni2c::invalid_handle))]
    InvalidHandle { op: Op },
}

impl Error {
    /// The platform error code behind this error.
    pub fn code(&self) -> ErrorCode {
        match *self {
            Self::DeviceOpen { code, .. } => code,
            Self::Driver { code, .. } => code,
            Self::SizeMismatch { code } => code,
            Self::InvalidHandle { .. } => ErrorCode::INVALID_HANDLE,
        }
    }

    /// The operation that failed.
    pub fn op(&self) -> Op {
        match *self {
            Self::DeviceOpen { .. } => Op::Open,
            Self::Driver { op, .. } => op,
            Self::SizeMismatch { .. } => Op::GetResult,
            Self::InvalidHandle { op } => op,
        }
    }
}
