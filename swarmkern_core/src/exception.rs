//! Device error reporting.
//!
//! A kernel cannot unwind or return an error: thousands of threads run to
//! completion regardless of what any one of them hits. Instead every launch
//! shares one [`DeviceExceptionBuffer`]. A failing thread bumps its counter;
//! the thread that saw the counter at 0 owns the buffer and records where it
//! failed plus a printf-style message with its raw arguments. After the
//! launch the host calls [`DeviceExceptionBuffer::drain`], which expands the
//! message and turns a nonzero count into a [`DeviceError`].
//!
//! Device code reports through the [`dthrow!`](crate::dthrow) macro:
//!
//! ```ignore
//! dthrow!(thread, "Index %u is out of bounds (%u >= %u)", index, index, length);
//! ```

use crate::format::format_device_message;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::OnceLock;
use thiserror::Error;
use swarmkern_env::ThreadIdx;

/// Maximum number of captured arguments.
pub const MAX_ARGS: usize = 20;
/// Capacity of the argument byte buffer.
pub const ARG_BUFF_LEN: usize = 4096;
/// Capacity of the format string.
pub const FORMAT_BUFF_LEN: usize = 4096;
/// Capacity of an expanded message; also bounds field width and precision.
pub const OUT_STRING_LEN: usize = FORMAT_BUFF_LEN * 2;
/// Capacity of the source file path.
pub const FILE_BUFF_LEN: usize = 1024;

/// Reports a device-side error from kernel code.
///
/// `$thread` is the [`DeviceThread`] of the caller. Arguments may be any
/// [`DeviceArg`]. Expands to nothing observable when the `seatbelts`
/// feature is disabled.
#[macro_export]
macro_rules! dthrow {
    ($thread:expr, $fmt:expr $(, $arg:expr)* $(,)?) => {
        if $crate::SEATBELTS {
            $crate::exception::DeviceException::create(&$thread, file!(), line!())
                .set_message($fmt, &[$(&$arg as &dyn $crate::exception::DeviceArg),*]);
        }
    };
}

/// The per-thread handle used by device code to reach the launch's exception buffer.
#[derive(Debug, Clone, Copy)]
pub struct DeviceThread<'a> {
    idx: ThreadIdx,
    exceptions: &'a DeviceExceptionBuffer,
}

impl<'a> DeviceThread<'a> {
    /// Binds a thread identity to an exception buffer.
    pub fn new(idx: ThreadIdx, exceptions: &'a DeviceExceptionBuffer) -> Self {
        Self { idx, exceptions }
    }

    /// Flattened thread index, which is also the agent's logical index.
    #[inline]
    pub fn index(&self) -> u32 {
        self.idx.global_index()
    }

    /// Block/thread coordinates.
    pub fn idx(&self) -> ThreadIdx {
        self.idx
    }

    /// The launch's exception buffer.
    pub fn exceptions(&self) -> &'a DeviceExceptionBuffer {
        self.exceptions
    }
}

/// Lifecycle of an exception buffer within one launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReporterState {
    /// No thread has failed
    Clean,
    /// A thread owns the buffer but has not written its message yet
    Claimed,
    /// The owner's detail is recorded
    Reported,
}

/// Everything the owning thread recorded about its failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionDetail {
    /// Source file of the report (truncated to `FILE_BUFF_LEN` bytes)
    pub file_path: String,

    /// Source line of the report
    pub line_no: u32,

    /// Block coordinate of the owning thread
    pub block_id: [u32; 3],

    /// Thread coordinate of the owning thread
    pub thread_id: [u32; 3],

    /// Unexpanded printf-style format (truncated to `FORMAT_BUFF_LEN` bytes)
    pub format_string: String,

    /// Byte size of each captured argument
    pub format_args_sizes: Vec<u32>,

    /// Captured arguments, packed back to back
    pub format_args: Vec<u8>,
}

impl ExceptionDetail {
    /// Number of captured arguments.
    pub fn arg_count(&self) -> usize {
        self.format_args_sizes.len()
    }

    /// Expands the format string with the captured arguments.
    pub fn message(&self) -> String {
        format_device_message(&self.format_string, &self.format_args_sizes, &self.format_args)
    }
}

/// Shared error buffer of one launch.
#[derive(Debug, Default)]
pub struct DeviceExceptionBuffer {
    /// Number of threads that reported an error
    error_count: AtomicU32,

    /// Detail written once by the first reporting thread
    detail: OnceLock<ExceptionDetail>,
}

impl DeviceExceptionBuffer {
    /// Creates a clean buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of errors reported since the last reset.
    pub fn error_count(&self) -> u32 {
        self.error_count.load(Ordering::Acquire)
    }

    /// Current reporter state.
    pub fn state(&self) -> ReporterState {
        if self.detail.get().is_some() {
            ReporterState::Reported
        } else if self.error_count() > 0 {
            ReporterState::Claimed
        } else {
            ReporterState::Clean
        }
    }

    /// The recorded detail, if the owner has written it.
    pub fn detail(&self) -> Option<&ExceptionDetail> {
        self.detail.get()
    }

    /// Host side: returns the buffer to `Clean`.
    pub fn reset(&mut self) {
        *self.error_count.get_mut() = 0;
        self.detail.take();
    }

    /// Host side: checks the buffer after a guarded launch and resets it.
    ///
    /// Zero errors is success. Otherwise the captured detail (if any) is
    /// returned inside a [`DeviceError`].
    pub fn drain(&mut self) -> Result<(), DeviceError> {
        let error_count = *self.error_count.get_mut();
        if error_count == 0 {
            return Ok(());
        }
        let detail = self.detail.take();
        self.reset();
        Err(DeviceError { error_count, detail })
    }

    /// Counts one failure; true if the caller is the first and owns the buffer.
    fn claim(&self) -> bool {
        self.error_count.fetch_add(1, Ordering::AcqRel) == 0
    }
}

/// Location recorded by the owning thread at creation time.
#[derive(Debug, Clone, Copy)]
struct Claim {
    file: &'static str,
    line: u32,
    block_id: [u32; 3],
    thread_id: [u32; 3],
}

/// A device-side error report in progress.
///
/// Use through [`dthrow!`](crate::dthrow).
pub struct DeviceException<'a> {
    buffer: &'a DeviceExceptionBuffer,
    claim: Option<Claim>,
}

impl<'a> DeviceException<'a> {
    /// Counts the error and, if this thread is first, captures its location.
    pub fn create(thread: &DeviceThread<'a>, file: &'static str, line: u32) -> Self {
        let buffer = thread.exceptions();
        let claim = buffer.claim().then(|| Claim {
            file,
            line,
            block_id: thread.idx().block_idx.to_array(),
            thread_id: thread.idx().thread_idx.to_array(),
        });
        Self { buffer, claim }
    }

    /// True if this thread won the race to report.
    pub fn has_error(&self) -> bool {
        self.claim.is_some()
    }

    /// Records the message and its arguments, if this thread owns the buffer.
    ///
    /// No format validation happens here; the format is expanded host-side.
    pub fn set_message(self, format: &str, args: &[&dyn DeviceArg]) {
        let Some(claim) = self.claim else {
            return;
        };
        // Only output once
        if self.buffer.detail.get().is_some() {
            return;
        }
        let mut writer = ArgWriter::default();
        for arg in args {
            arg.encode(&mut writer);
        }
        let (format_args_sizes, format_args) = writer.into_parts();
        let detail = ExceptionDetail {
            file_path: truncate(claim.file, FILE_BUFF_LEN).to_string(),
            line_no: claim.line,
            block_id: claim.block_id,
            thread_id: claim.thread_id,
            format_string: truncate(format, FORMAT_BUFF_LEN).to_string(),
            format_args_sizes,
            format_args,
        };
        let _ = self.buffer.detail.set(detail);
    }
}

/// Fixed-capacity sink for captured arguments.
#[derive(Debug, Default)]
pub struct ArgWriter {
    sizes: Vec<u32>,
    bytes: Vec<u8>,
}

impl ArgWriter {
    /// Appends one argument's raw bytes.
    ///
    /// Arguments beyond `MAX_ARGS`, or that would overflow `ARG_BUFF_LEN`,
    /// are dropped.
    pub fn push(&mut self, raw: &[u8]) {
        if self.sizes.len() >= MAX_ARGS || self.bytes.len() + raw.len() > ARG_BUFF_LEN {
            return;
        }
        self.sizes.push(raw.len() as u32);
        self.bytes.extend_from_slice(raw);
    }

    /// Splits into (sizes, packed bytes).
    pub fn into_parts(self) -> (Vec<u32>, Vec<u8>) {
        (self.sizes, self.bytes)
    }
}

/// A value that can be captured as an error message argument.
pub trait DeviceArg {
    /// Writes this value's raw bytes.
    fn encode(&self, out: &mut ArgWriter);
}

macro_rules! impl_device_arg_pod {
    ($($t:ty),*) => {
        $(
            impl DeviceArg for $t {
                fn encode(&self, out: &mut ArgWriter) {
                    out.push(bytemuck::bytes_of(self));
                }
            }
        )*
    };
}

impl_device_arg_pod!(u8, u16, u32, u64, i8, i16, i32, i64, f32, f64);

impl DeviceArg for usize {
    fn encode(&self, out: &mut ArgWriter) {
        (*self as u64).encode(out);
    }
}

impl DeviceArg for isize {
    fn encode(&self, out: &mut ArgWriter) {
        (*self as i64).encode(out);
    }
}

impl DeviceArg for bool {
    fn encode(&self, out: &mut ArgWriter) {
        (*self as u8).encode(out);
    }
}

impl DeviceArg for char {
    fn encode(&self, out: &mut ArgWriter) {
        (*self as u32).encode(out);
    }
}

impl DeviceArg for &str {
    fn encode(&self, out: &mut ArgWriter) {
        out.push(self.as_bytes());
    }
}

impl DeviceArg for String {
    fn encode(&self, out: &mut ArgWriter) {
        out.push(self.as_bytes());
    }
}

/// Error surfaced by the host after a guarded launch reported failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Device function reported {error_count} error(s){}", first_error_block(.detail))]
pub struct DeviceError {
    /// Number of threads that reported an error
    pub error_count: u32,

    /// Detail of the first report, if its owner got to write it
    pub detail: Option<ExceptionDetail>,
}

impl DeviceError {
    /// The expanded message of the first report.
    pub fn message(&self) -> Option<String> {
        self.detail.as_ref().map(ExceptionDetail::message)
    }
}

/// `file(line)[block][thread]:` header plus message, or nothing without a detail.
fn first_error_block(detail: &Option<ExceptionDetail>) -> String {
    match detail {
        Some(detail) => format!(
            ".\nFirst error:\n{}({})[{}, {}, {}][{}, {}, {}]:\n{}",
            detail.file_path,
            detail.line_no,
            detail.block_id[0],
            detail.block_id[1],
            detail.block_id[2],
            detail.thread_id[0],
            detail.thread_id[1],
            detail.thread_id[2],
            detail.message()
        ),
        None => String::new(),
    }
}

/// Longest prefix of `s` within `max` bytes, cut on a char boundary.
fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use swarmkern_env::{DeviceContext, RayonDevice};

    fn thread(index: u32, buffer: &DeviceExceptionBuffer) -> DeviceThread<'_> {
        DeviceThread::new(ThreadIdx::from_global(index, 32), buffer)
    }

    #[test]
    fn test_clean_buffer_drains_ok() {
        let mut buffer = DeviceExceptionBuffer::new();
        assert_eq!(buffer.state(), ReporterState::Clean);
        assert!(buffer.drain().is_ok());
    }

    #[cfg(feature = "seatbelts")]
    #[test]
    fn test_first_claimant_records_detail() {
        let mut buffer = DeviceExceptionBuffer::new();
        {
            let t = thread(70, &buffer);
            crate::dthrow!(t, "Index %u out of range (length %d)", 12u32, -3i32);
            let t2 = thread(3, &buffer);
            crate::dthrow!(t2, "ignored %u", 1u32);
        }

        assert_eq!(buffer.state(), ReporterState::Reported);
        let detail = buffer.detail().unwrap().clone();
        assert_eq!(detail.block_id, [2, 0, 0]);
        assert_eq!(detail.thread_id, [6, 0, 0]);
        assert_eq!(detail.arg_count(), 2);
        assert!(detail.file_path.ends_with("exception.rs"));

        let err = buffer.drain().unwrap_err();
        assert_eq!(err.error_count, 2);
        assert_eq!(err.message().unwrap(), "Index 12 out of range (length -3)");
        assert!(err.to_string().contains("[2, 0, 0][6, 0, 0]"));

        // Drained buffer is clean again
        assert_eq!(buffer.state(), ReporterState::Clean);
        assert!(buffer.drain().is_ok());
    }

    #[test]
    fn test_claim_without_message_is_counted() {
        let mut buffer = DeviceExceptionBuffer::new();
        let exception = DeviceException::create(&thread(0, &buffer), "kernel.rs", 9);
        assert!(exception.has_error());
        assert_eq!(buffer.state(), ReporterState::Claimed);

        let err = buffer.drain().unwrap_err();
        assert_eq!(err.error_count, 1);
        assert!(err.detail.is_none());
        assert_eq!(err.to_string(), "Device function reported 1 error(s)");
        let source: &dyn std::error::Error = &err;
        assert!(source.source().is_none());
    }

    #[test]
    fn test_second_message_from_owner_is_ignored() {
        let buffer = DeviceExceptionBuffer::new();
        let t = thread(0, &buffer);
        DeviceException::create(&t, "a.rs", 1).set_message("first", &[]);
        // A second owner cannot overwrite the recorded detail
        let late = DeviceException {
            buffer: &buffer,
            claim: Some(Claim { file: "b.rs", line: 2, block_id: [0; 3], thread_id: [0; 3] }),
        };
        late.set_message("second", &[]);
        assert_eq!(buffer.detail().unwrap().format_string, "first");
    }

    #[test]
    fn test_argument_capacity_limits() {
        let mut writer = ArgWriter::default();
        for i in 0..(MAX_ARGS as u32 + 5) {
            i.encode(&mut writer);
        }
        assert_eq!(writer.sizes.len(), MAX_ARGS);

        let mut writer = ArgWriter::default();
        writer.push(&[0u8; ARG_BUFF_LEN - 2]);
        writer.push(&[1u8; 4]);
        assert_eq!(writer.sizes, vec![(ARG_BUFF_LEN - 2) as u32]);
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("abc", 10), "abc");
        assert_eq!(truncate("héllo", 2), "h");
    }

    #[cfg(feature = "seatbelts")]
    #[test]
    fn test_many_failing_threads_one_detail() {
        let device = RayonDevice::new(0);
        let mut buffer = DeviceExceptionBuffer::new();
        let failing = 500u32;

        {
            let shared = &buffer;
            device
                .launch_threads(2048, |t| {
                    let thread = DeviceThread::new(t, shared);
                    if thread.index() % 4 == 0 && thread.index() < failing * 4 {
                        crate::dthrow!(thread, "thread %u failed", thread.index());
                    }
                })
                .unwrap();
        }

        let err = buffer.drain().unwrap_err();
        assert_eq!(err.error_count, failing);
        let detail = err.detail.clone().expect("owner records detail");
        let owner = detail.block_id[0] * device.block_dim() + detail.thread_id[0];
        assert_eq!(owner % 4, 0);
        assert_eq!(err.message().unwrap(), format!("thread {owner} failed"));
        assert!(err.to_string().contains("failed"));
    }
}
