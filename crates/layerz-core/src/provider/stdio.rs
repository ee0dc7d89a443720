// Layerz Stdio Provider
// Raw input_event records over a pipe, for chaining behind an
// interception tool and in front of a uinput writer.

use std::io;
use std::os::unix::io::RawFd;

use super::{EventProvider, ProviderError, ProviderResult};
use crate::event::{Event, EVENT_SIZE};

/// Reads kernel `input_event` records from one fd and writes them to
/// another. `new()` wires up stdin/stdout, the canonical pipeline mode.
#[derive(Debug)]
pub struct StdioProvider {
    input_fd: RawFd,
    output_fd: RawFd,
}

impl StdioProvider {
    pub fn new() -> Self {
        Self::from_fds(libc::STDIN_FILENO, libc::STDOUT_FILENO)
    }

    /// Provider over arbitrary fds; the caller keeps ownership of them.
    pub fn from_fds(input_fd: RawFd, output_fd: RawFd) -> Self {
        Self {
            input_fd,
            output_fd,
        }
    }

    /// Wait for readability. Ok(true) means data is ready; Ok(false) means
    /// the timeout elapsed or the wait was interrupted by a signal.
    fn poll_readable(&self, timeout_ms: u32) -> ProviderResult<bool> {
        let mut fds = libc::pollfd {
            fd: self.input_fd,
            events: libc::POLLIN,
            revents: 0,
        };
        let timeout = if timeout_ms == 0 { -1 } else { timeout_ms as i32 };

        let rc = unsafe { libc::poll(&mut fds, 1, timeout) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EINTR) {
                return Ok(false);
            }
            return Err(err.into());
        }
        if rc == 0 {
            return Ok(false);
        }
        // POLLHUP with no pending data reads as zero bytes below, which is
        // the normal end-of-stream path.
        Ok(fds.revents & (libc::POLLIN | libc::POLLHUP) != 0)
    }

    /// Read exactly one record. A zero-byte read at a record boundary is
    /// end-of-stream; a partial record means the stream is corrupt.
    fn read_record(&self) -> ProviderResult<Option<Event>> {
        let mut buf = [0u8; EVENT_SIZE];
        let mut filled = 0usize;

        while filled < EVENT_SIZE {
            let n = unsafe {
                libc::read(
                    self.input_fd,
                    buf[filled..].as_mut_ptr().cast(),
                    EVENT_SIZE - filled,
                )
            };
            if n < 0 {
                let err = io::Error::last_os_error();
                if err.raw_os_error() == Some(libc::EINTR) {
                    if filled == 0 {
                        // Interrupted between records: shutdown signal.
                        return Ok(None);
                    }
                    continue;
                }
                return Err(err.into());
            }
            if n == 0 {
                if filled == 0 {
                    return Ok(None);
                }
                return Err(ProviderError::ShortRead {
                    got: filled,
                    want: EVENT_SIZE,
                });
            }
            filled += n as usize;
        }

        let event = unsafe { std::ptr::read_unaligned(buf.as_ptr().cast::<Event>()) };
        Ok(Some(event))
    }
}

impl Default for StdioProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl EventProvider for StdioProvider {
    fn read_event(&mut self, timeout_ms: u32) -> ProviderResult<Option<Event>> {
        if !self.poll_readable(timeout_ms)? {
            return Ok(None);
        }
        self.read_record()
    }

    fn write_event(&mut self, event: Event) -> ProviderResult<()> {
        let bytes = unsafe {
            std::slice::from_raw_parts((&event as *const Event).cast::<u8>(), EVENT_SIZE)
        };
        let mut sent = 0usize;

        while sent < EVENT_SIZE {
            let n = unsafe {
                libc::write(
                    self.output_fd,
                    bytes[sent..].as_ptr().cast(),
                    EVENT_SIZE - sent,
                )
            };
            if n < 0 {
                let err = io::Error::last_os_error();
                if err.raw_os_error() == Some(libc::EINTR) {
                    continue;
                }
                return Err(err.into());
            }
            sent += n as usize;
        }
        Ok(())
    }
}
