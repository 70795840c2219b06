//! A simulated NI2C driver.
//!
//! [`SimBus`] behaves like the native driver for a single bus node: it
//! queues scheduled requests, runs them against simulated [`Target`]
//! devices, and hands out results in schedule order. It lets the binding be
//! used and tested on hosts without the hardware.
//!
//! By default a request completes as soon as it is scheduled. With
//! [`SimBus::manual_completion`] requests stay pending until
//! [`SimBus::complete_next`] or [`SimBus::complete_all`] is called, so the
//! transition of `CheckResult()` from `false` to `true` and a blocking
//! `GetResult()` can be observed.
use crate::{
    device::{Access, DeviceControl, Handle},
    error::ErrorCode,
    ioctl::{self, IoctlCode},
    msg::{Direction, MsgFlags, MsgHeader},
};
use std::{
    collections::{BTreeMap, VecDeque},
    fmt, mem,
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
};

/// A simulated I2C device.
pub trait Target: Send {
    /// Receives the payload of a write message and returns how many bytes
    /// were acknowledged. Returning less than `bytes.len()` NAKs the byte
    /// after the last acknowledged one.
    fn write(&mut self, bytes: &[u8]) -> usize;

    /// Fills the payload of a read message.
    fn read(&mut self, buf: &mut [u8]);
}

/// A simulated register-file device, like a small EEPROM.
///
/// The first byte of every write sets the register pointer; remaining bytes
/// are stored starting at the pointer. Reads return bytes from the pointer.
/// The pointer advances with every byte and wraps at the end.
///
/// Clones share the same storage, so a test can keep one to inspect the
/// contents after attaching another to a [`SimBus`].
#[derive(Clone)]
pub struct Memory {
    inner: Arc<Mutex<MemoryInner>>,
}

struct MemoryInner {
    cells: Vec<u8>,
    pointer: usize,
}

/// A simulated NI2C bus node.
///
/// Clones refer to the same node.
#[derive(Clone)]
pub struct SimBus {
    inner: Arc<Inner>,
}

struct Inner {
    name: String,
    state: Mutex<State>,
    completed: Condvar,
}

struct State {
    clock_hz: u32,
    manual: bool,
    open: Option<Handle>,
    next_handle: isize,
    fault: Option<ErrorCode>,
    targets: BTreeMap<u8, Box<dyn Target>>,
    /// Scheduled, not yet run.
    pending: VecDeque<Request>,
    /// Run, waiting to be fetched.
    done: VecDeque<Request>,
}

struct Request {
    headers: Vec<MsgHeader>,
    data: Vec<u8>,
}

// === impl SimBus ===

impl SimBus {
    pub const DEFAULT_NAME: &'static str = "I2C1:";
    pub const DEFAULT_CLOCK_HZ: u32 = 100_000;

    /// Returns a bus node called `name` with no devices on it.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                state: Mutex::new(State {
                    clock_hz: Self::DEFAULT_CLOCK_HZ,
                    manual: false,
                    open: None,
                    next_handle: 0x40,
                    fault: None,
                    targets: BTreeMap::new(),
                    pending: VecDeque::new(),
                    done: VecDeque::new(),
                }),
                completed: Condvar::new(),
            }),
        }
    }

    /// Sets the clock frequency reported by `GetClockFreq()`.
    pub fn clock_hz(self, hz: u32) -> Self {
        self.state().clock_hz = hz;
        self
    }

    /// Attaches `target` at the 7-bit `address`, replacing any device that
    /// was there.
    pub fn with_target(self, address: u8, target: impl Target + 'static) -> Self {
        self.state().targets.insert(address & 0x7f, Box::new(target));
        self
    }

    /// Keeps scheduled requests pending until they are completed explicitly.
    pub fn manual_completion(self) -> Self {
        self.state().manual = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Returns `true` while a handle to the node is open.
    pub fn is_open(&self) -> bool {
        self.state().open.is_some()
    }

    /// Number of requests scheduled but not yet completed.
    pub fn pending(&self) -> usize {
        self.state().pending.len()
    }

    /// Number of completed requests waiting to be fetched.
    pub fn ready(&self) -> usize {
        self.state().done.len()
    }

    /// Makes the next call into the driver fail with `code`.
    pub fn fail_next(&self, code: ErrorCode) {
        self.state().fault = Some(code);
    }

    /// Runs the oldest pending request. Returns `false` if nothing was
    /// pending.
    pub fn complete_next(&self) -> bool {
        let mut state = self.state();
        let completed = state.complete_next();
        drop(state);
        if completed {
            self.inner.completed.notify_all();
        }
        completed
    }

    /// Runs every pending request and returns how many there were.
    pub fn complete_all(&self) -> usize {
        let mut state = self.state();
        let mut n = 0;
        while state.complete_next() {
            n += 1;
        }
        drop(state);
        if n > 0 {
            self.inner.completed.notify_all();
        }
        n
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Waits until the oldest outstanding request has completed.
    fn wait_for_result(&self) -> Result<MutexGuard<'_, State>, ErrorCode> {
        let state = self.state();
        if state.done.is_empty() && state.pending.is_empty() {
            return Err(ErrorCode::NOT_READY);
        }
        let state = self
            .inner
            .completed
            .wait_while(state, |state| state.done.is_empty())
            .unwrap_or_else(PoisonError::into_inner);
        Ok(state)
    }

    fn schedule(&self, input: &[u8], output: &[u8]) -> Result<u32, ErrorCode> {
        let headers = MsgHeader::decode_all(input)
            .filter(|headers| !headers.is_empty())
            .ok_or(ErrorCode::INVALID_PARAMETER)?;
        if MsgHeader::payload_len(&headers) != output.len() {
            tracing::debug!(
                expected = MsgHeader::payload_len(&headers),
                actual = output.len(),
                "sim: rejecting request with mismatched data buffer"
            );
            return Err(ErrorCode::INVALID_PARAMETER);
        }

        let request = Request {
            headers,
            data: output.to_vec(),
        };
        let mut state = self.state();
        state.pending.push_back(request);
        if !state.manual {
            state.complete_next();
            drop(state);
            self.inner.completed.notify_all();
        }
        Ok(1)
    }

    fn get_result(&self, input: &mut [u8], output: &mut [u8]) -> Result<u32, ErrorCode> {
        let mut state = self.wait_for_result()?;
        let Some(request) = state.done.front() else {
            return Err(ErrorCode::NOT_READY);
        };
        if request.headers.len() * MsgHeader::SIZE != input.len()
            || request.data.len() != output.len()
        {
            // the result stays queued for a correctly sized fetch
            return Err(ErrorCode::INVALID_PARAMETER);
        }
        if let Some(request) = state.done.pop_front() {
            input.copy_from_slice(&MsgHeader::encode_all(&request.headers));
            output.copy_from_slice(&request.data);
        }
        Ok(1)
    }

    fn skip_result(&self) -> Result<u32, ErrorCode> {
        let mut state = self.wait_for_result()?;
        state.done.pop_front();
        Ok(1)
    }
}

impl Default for SimBus {
    fn default() -> Self {
        Self::new(Self::DEFAULT_NAME)
    }
}

impl fmt::Debug for SimBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("SimBus")
            .field("name", &self.inner.name)
            .field("clock_hz", &state.clock_hz)
            .field("open", &state.open)
            .field("targets", &state.targets.keys().collect::<Vec<_>>())
            .field("pending", &state.pending.len())
            .field("ready", &state.done.len())
            .finish()
    }
}

impl DeviceControl for SimBus {
    fn open(&self, name: &str, access: Access) -> Result<Handle, ErrorCode> {
        let mut state = self.state();
        state.take_fault()?;
        if name.is_empty() || !name.ends_with(':') {
            return Err(ErrorCode::INVALID_NAME);
        }
        if name != self.inner.name {
            return Err(ErrorCode::FILE_NOT_FOUND);
        }
        if state.open.is_some() {
            return Err(ErrorCode::ACCESS_DENIED);
        }

        let handle = Handle::from_raw(state.next_handle);
        state.next_handle += 4;
        state.open = Some(handle);
        tracing::trace!(name, ?access, ?handle, "sim: opened");
        Ok(handle)
    }

    fn close(&self, handle: Handle) -> Result<(), ErrorCode> {
        let mut state = self.state();
        state.check_handle(handle)?;
        state.open = None;
        tracing::trace!(?handle, "sim: closed");
        state.take_fault()
    }

    fn io_control(
        &self,
        handle: Handle,
        code: IoctlCode,
        input: &mut [u8],
        output: &mut [u8],
    ) -> Result<u32, ErrorCode> {
        {
            let mut state = self.state();
            state.take_fault()?;
            state.check_handle(handle)?;
        }

        if code == ioctl::SCHEDULE {
            self.schedule(input, output)
        } else if code == ioctl::GET_RESULT {
            self.get_result(input, output)
        } else if code == ioctl::SKIP_RESULT {
            self.skip_result()
        } else if code == ioctl::CHECK_RESULT {
            Ok(u32::from(!self.state().done.is_empty()))
        } else if code == ioctl::GET_CLKFREQ {
            Ok(self.state().clock_hz)
        } else {
            tracing::debug!(
                code = ?format_args!("{:#010x}", code.bits()),
                "sim: unknown control code"
            );
            Err(ErrorCode::INVALID_PARAMETER)
        }
    }
}

// === impl State ===

impl State {
    fn take_fault(&mut self) -> Result<(), ErrorCode> {
        match self.fault.take() {
            Some(code) => Err(code),
            None => Ok(()),
        }
    }

    fn check_handle(&self, handle: Handle) -> Result<(), ErrorCode> {
        if self.open == Some(handle) {
            Ok(())
        } else {
            Err(ErrorCode::INVALID_HANDLE)
        }
    }

    fn complete_next(&mut self) -> bool {
        let Some(mut request) = self.pending.pop_front() else {
            return false;
        };
        request.run(&mut self.targets);
        self.done.push_back(request);
        true
    }
}

// === impl Request ===

impl Request {
    /// Runs every message in order, stopping at the first NAK.
    fn run(&mut self, targets: &mut BTreeMap<u8, Box<dyn Target>>) {
        let mut rest = &mut self.data[..];
        let mut stopped = false;
        for (index, header) in self.headers.iter_mut().enumerate() {
            let (bytes, tail) = mem::take(&mut rest).split_at_mut(usize::from(header.len));
            rest = tail;
            let flags = if stopped {
                MsgFlags::new()
            } else {
                run_message(targets, header, bytes)
            };
            if flags.is_failure() {
                tracing::debug!(index, address = header.address(), ?flags, "sim: message failed");
                stopped = true;
            }
            header.flags = flags;
        }
    }
}

fn run_message(
    targets: &mut BTreeMap<u8, Box<dyn Target>>,
    header: &MsgHeader,
    bytes: &mut [u8],
) -> MsgFlags {
    let ack_last = header.flags.get(MsgFlags::LAST_BYTE_ACK);
    let Some(target) = targets.get_mut(&header.address()) else {
        return MsgFlags::new().with(MsgFlags::DEVICE_NAK, true);
    };
    match header.direction() {
        Direction::Write => {
            if target.write(bytes) < bytes.len() {
                MsgFlags::new().with(MsgFlags::DATA_NAK, true)
            } else {
                MsgFlags::new().with(MsgFlags::LAST_BYTE_ACK, true)
            }
        }
        Direction::Read => {
            target.read(bytes);
            MsgFlags::new().with(MsgFlags::LAST_BYTE_ACK, ack_last)
        }
    }
}

// === impl Memory ===

impl Memory {
    /// Returns a zero-filled device of `size` bytes.
    pub fn new(size: usize) -> Self {
        Self::with_contents(vec![0; size])
    }

    pub fn with_contents(cells: impl Into<Vec<u8>>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MemoryInner {
                cells: cells.into(),
                pointer: 0,
            })),
        }
    }

    /// Returns a copy of the stored bytes.
    pub fn contents(&self) -> Vec<u8> {
        self.lock().cells.clone()
    }

    /// Overwrites the bytes at `offset`, without going through the bus.
    ///
    /// # Panics
    ///
    /// If the bytes do not fit.
    pub fn load(&self, offset: usize, bytes: &[u8]) {
        self.lock().cells[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    fn lock(&self) -> MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Target for Memory {
    fn write(&mut self, bytes: &[u8]) -> usize {
        let mut mem = self.lock();
        let size = mem.cells.len();
        let Some((&pointer, data)) = bytes.split_first() else {
            return 0;
        };
        if size == 0 {
            return 0;
        }
        mem.pointer = usize::from(pointer) % size;
        for &byte in data {
            let at = mem.pointer;
            mem.cells[at] = byte;
            mem.pointer = (at + 1) % size;
        }
        bytes.len()
    }

    fn read(&mut self, buf: &mut [u8]) {
        let mut mem = self.lock();
        let size = mem.cells.len();
        for byte in buf {
            *byte = match size {
                0 => 0xff,
                _ => {
                    let at = mem.pointer;
                    mem.pointer = (at + 1) % size;
                    mem.cells[at]
                }
            };
        }
    }
}

impl fmt::Debug for Memory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mem = self.lock();
        f.debug_struct("Memory")
            .field("size", &mem.cells.len())
            .field("pointer", &mem.pointer)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schedule(
        bus: &SimBus,
        handle: Handle,
        headers: &[MsgHeader],
        data: &mut [u8],
    ) -> Result<u32, ErrorCode> {
        let mut input = MsgHeader::encode_all(headers);
        bus.io_control(handle, ioctl::SCHEDULE, &mut input, data)
    }

    #[test]
    fn open_rules() {
        let bus = SimBus::default();
        assert_eq!(bus.open("", Access::ReadWrite), Err(ErrorCode::INVALID_NAME));
        assert_eq!(bus.open("I2C1", Access::ReadWrite), Err(ErrorCode::INVALID_NAME));
        assert_eq!(bus.open("I2C9:", Access::ReadWrite), Err(ErrorCode::FILE_NOT_FOUND));

        let handle = bus.open("I2C1:", Access::ReadWrite).unwrap();
        assert_eq!(bus.open("I2C1:", Access::Read), Err(ErrorCode::ACCESS_DENIED));
        bus.close(handle).unwrap();
        assert_eq!(bus.close(handle), Err(ErrorCode::INVALID_HANDLE));

        let again = bus.open("I2C1:", Access::Query).unwrap();
        assert_ne!(again, handle);
        assert_eq!(
            bus.io_control(handle, ioctl::GET_CLKFREQ, &mut [], &mut []),
            Err(ErrorCode::INVALID_HANDLE)
        );
    }

    #[test]
    fn schedule_validates_request() {
        let bus = SimBus::default().with_target(0x20, Memory::new(16));
        let handle = bus.open("I2C1:", Access::ReadWrite).unwrap();

        assert_eq!(schedule(&bus, handle, &[], &mut []), Err(ErrorCode::INVALID_PARAMETER));
        assert_eq!(
            schedule(&bus, handle, &[MsgHeader::write(0x20, 2)], &mut [0; 3]),
            Err(ErrorCode::INVALID_PARAMETER)
        );
        assert_eq!(
            bus.io_control(handle, ioctl::SCHEDULE, &mut [0x40, 0, 1], &mut [0]),
            Err(ErrorCode::INVALID_PARAMETER)
        );
        assert_eq!(bus.ready(), 0);
        assert_eq!(schedule(&bus, handle, &[MsgHeader::write(0x20, 2)], &mut [0; 2]), Ok(1));
        assert_eq!(bus.ready(), 1);
    }

    #[test]
    fn nak_stops_the_request() {
        struct Picky;
        impl Target for Picky {
            fn write(&mut self, bytes: &[u8]) -> usize {
                bytes.len().min(1)
            }
            fn read(&mut self, buf: &mut [u8]) {
                buf.fill(0xaa);
            }
        }

        let bus = SimBus::default().with_target(0x30, Picky);
        let handle = bus.open("I2C1:", Access::ReadWrite).unwrap();
        let headers = [
            MsgHeader::write(0x30, 1),
            MsgHeader::write(0x30, 2),
            MsgHeader::read(0x30, 1),
        ];
        schedule(&bus, handle, &headers, &mut [0; 4]).unwrap();

        let mut input = MsgHeader::encode_all(&headers);
        let mut output = [0; 4];
        bus.io_control(handle, ioctl::GET_RESULT, &mut input, &mut output)
            .unwrap();
        let results = MsgHeader::decode_all(&input).unwrap();
        assert!(results[0].flags.get(MsgFlags::LAST_BYTE_ACK));
        assert!(results[1].flags.get(MsgFlags::DATA_NAK));
        // not run after the NAK
        assert!(!results[2].flags.is_failure());
        assert_eq!(output[3], 0);
    }

    #[test]
    fn fault_injection_hits_one_call() {
        let bus = SimBus::default();
        let handle = bus.open("I2C1:", Access::ReadWrite).unwrap();
        bus.fail_next(ErrorCode::DEV_NOT_EXIST);
        assert_eq!(
            bus.io_control(handle, ioctl::GET_CLKFREQ, &mut [], &mut []),
            Err(ErrorCode::DEV_NOT_EXIST)
        );
        assert_eq!(
            bus.io_control(handle, ioctl::GET_CLKFREQ, &mut [], &mut []),
            Ok(SimBus::DEFAULT_CLOCK_HZ)
        );
    }

    #[test]
    fn memory_pointer_wraps() {
        let mut mem = Memory::new(4);
        assert_eq!(mem.write(&[3, 0xa, 0xb]), 3);
        assert_eq!(mem.contents(), [0xb, 0, 0, 0xa]);
        let mut buf = [0; 2];
        mem.write(&[3]);
        mem.read(&mut buf);
        assert_eq!(buf, [0xa, 0xb]);
    }
}
