//! The native backend, on top of the Windows file API.
use crate::{
    device::{Access, DeviceControl, Handle},
    error::ErrorCode,
    ioctl::IoctlCode,
};
use core::{ffi::c_void, iter, ptr};
use windows_sys::Win32::{
    Foundation::{CloseHandle, GetLastError, SetLastError, HANDLE, INVALID_HANDLE_VALUE},
    Storage::FileSystem::{CreateFileW, OPEN_EXISTING},
    System::IO::DeviceIoControl,
};

/// Opens device nodes with `CreateFileW` and talks to them with
/// `DeviceIoControl`.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Win32;

impl DeviceControl for Win32 {
    fn open(&self, name: &str, access: Access) -> Result<Handle, ErrorCode> {
        let wide = name.encode_utf16().chain(iter::once(0)).collect::<Vec<u16>>();
        // SAFETY: `wide` is NUL-terminated and lives across the call; the
        // security attributes and template handle are optional.
        let raw = unsafe {
            CreateFileW(
                wide.as_ptr(),
                access.bits(),
                // no sharing: the bus is held exclusively
                0,
                ptr::null(),
                OPEN_EXISTING,
                0,
                ptr::null_mut(),
            )
        };
        if raw == INVALID_HANDLE_VALUE {
            return Err(last_error());
        }
        Ok(Handle::from_raw(raw as isize))
    }

    fn close(&self, handle: Handle) -> Result<(), ErrorCode> {
        // SAFETY: the caller owns `handle` and never uses it again.
        if unsafe { CloseHandle(raw_handle(handle)) } == 0 {
            return Err(last_error());
        }
        Ok(())
    }

    fn io_control(
        &self,
        handle: Handle,
        code: IoctlCode,
        input: &mut [u8],
        output: &mut [u8],
    ) -> Result<u32, ErrorCode> {
        let (in_ptr, in_len) = buffer(input)?;
        let (out_ptr, out_len) = buffer(output)?;
        let mut returned = 0u32;
        // SAFETY: both buffers are valid for their stated lengths for the
        // duration of the call, which is synchronous (no OVERLAPPED).
        let ret = unsafe {
            SetLastError(0);
            DeviceIoControl(
                raw_handle(handle),
                code.bits(),
                in_ptr,
                in_len,
                out_ptr,
                out_len,
                &mut returned,
                ptr::null_mut(),
            )
        };
        // the driver passes its own return value through, so zero is only
        // a failure if it also recorded an error
        if ret == 0 {
            let error = last_error();
            if error.raw() != 0 {
                return Err(error);
            }
        }
        tracing::trace!(ret, returned, "DeviceIoControl");
        Ok(ret as u32)
    }
}

fn raw_handle(handle: Handle) -> HANDLE {
    handle.as_raw() as HANDLE
}

fn buffer(buf: &mut [u8]) -> Result<(*mut c_void, u32), ErrorCode> {
    if buf.is_empty() {
        return Ok((ptr::null_mut(), 0));
    }
    let len = u32::try_from(buf.len()).map_err(|_| ErrorCode::INVALID_PARAMETER)?;
    Ok((buf.as_mut_ptr().cast(), len))
}

fn last_error() -> ErrorCode {
    // SAFETY: reads thread-local state only.
    ErrorCode(unsafe { GetLastError() })
}
