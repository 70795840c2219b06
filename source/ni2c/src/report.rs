//! Error-reporting modes.
//!
//! An [`Ni2cFile`](crate::Ni2cFile) reports failures in one of two ways,
//! picked by its `M` type parameter:
//!
//! - [`Raise`] (the default): operations return [`Result<T, Error>`], with
//!   the failed operation and the platform code in a diagnostic error.
//! - [`ReturnCode`]: operations return [`Result<T, ErrorCode>`], the bare
//!   platform code, for callers that dispatch on numeric codes.
//!
//! The mode never changes what is attempted, only how the outcome is handed
//! back. Switch between modes with
//! [`Ni2cFile::report_codes`](crate::Ni2cFile::report_codes) and
//! [`Ni2cFile::raise_errors`](crate::Ni2cFile::raise_errors).
use crate::error::{Error, ErrorCode};

/// An error-reporting mode.
///
/// This trait is sealed; the two modes are [`Raise`] and [`ReturnCode`].
pub trait Report: sealed::Sealed {
    /// What an operation producing a `T` returns in this mode.
    type Output<T>;

    /// Converts the outcome of an operation into this mode's output.
    fn report<T>(result: Result<T, Error>) -> Self::Output<T>;
}

/// Report failures as [`Error`]s.
#[derive(Debug)]
pub enum Raise {}

/// Report failures as raw [`ErrorCode`]s.
#[derive(Debug)]
pub enum ReturnCode {}

impl Report for Raise {
    type Output<T> = Result<T, Error>;

    #[inline]
    fn report<T>(result: Result<T, Error>) -> Self::Output<T> {
        result
    }
}

impl Report for ReturnCode {
    type Output<T> = Result<T, ErrorCode>;

    #[inline]
    fn report<T>(result: Result<T, Error>) -> Self::Output<T> {
        result.map_err(|error| error.code())
    }
}

mod sealed {
    pub trait Sealed {}
    impl Sealed for super::Raise {}
    impl Sealed for super::ReturnCode {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Op;

    #[test]
    fn modes_carry_the_same_code() {
        let failure = || -> Result<(), Error> {
            Err(Error::Driver {
                op: Op::SkipResult,
                code: ErrorCode::NOT_READY,
            })
        };

        let raised = Raise::report(failure()).unwrap_err();
        assert_eq!(raised.code(), ErrorCode::NOT_READY);
        assert_eq!(raised.op(), Op::SkipResult);

        let code = ReturnCode::report(failure()).unwrap_err();
        assert_eq!(code, ErrorCode::NOT_READY);
        assert_ne!(code.raw(), 0);

        assert_eq!(ReturnCode::report(Ok::<_, Error>(7u32)), Ok(7));
    }
}
