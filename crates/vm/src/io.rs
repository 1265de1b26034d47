//! Output streams for the Pyro virtual machine.
//!
//! The VM writes program output (`echo`, `$print`) to an output stream and
//! diagnostics (panic reports, stack traces) to an error stream. Both
//! default to the process's standard streams and can be swapped out, which
//! is how the test suites capture output.

use std::cell::RefCell;
use std::io::{self, Write};
use std::rc::Rc;

/// A swappable output stream.
pub enum OutputStream {
    /// The process's standard output.
    Stdout,

    /// The process's standard error.
    Stderr,

    /// An in-memory capture buffer, shared with the owner of the handle.
    Capture(Rc<RefCell<Vec<u8>>>),
}

impl OutputStream {
    /// Writes raw bytes to the stream.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> io::Result<()> {
        match self {
            OutputStream::Stdout => io::stdout().write_all(bytes),
            OutputStream::Stderr => io::stderr().write_all(bytes),
            OutputStream::Capture(buffer) => {
                buffer.borrow_mut().extend_from_slice(bytes);
                Ok(())
            }
        }
    }

    /// Writes formatted text to the stream.
    pub fn write_fmt(&mut self, args: std::fmt::Arguments<'_>) -> io::Result<()> {
        match self {
            OutputStream::Stdout => io::stdout().write_fmt(args),
            OutputStream::Stderr => io::stderr().write_fmt(args),
            OutputStream::Capture(buffer) => {
                let mut buffer = buffer.borrow_mut();
                Write::write_fmt(&mut *buffer, args)
            }
        }
    }

    /// Flushes the stream.
    pub fn flush(&mut self) -> io::Result<()> {
        match self {
            OutputStream::Stdout => io::stdout().flush(),
            OutputStream::Stderr => io::stderr().flush(),
            OutputStream::Capture(_) => Ok(()),
        }
    }
}

/// A shared capture buffer for tests: hand one clone to the VM as its
/// output stream and read the accumulated bytes from the other.
#[derive(Clone, Default)]
pub struct CaptureBuffer {
    buffer: Rc<RefCell<Vec<u8>>>,
}

impl CaptureBuffer {
    /// Creates an empty capture buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns an output stream writing into this buffer.
    pub fn stream(&self) -> OutputStream {
        OutputStream::Capture(Rc::clone(&self.buffer))
    }

    /// Returns the captured bytes as lossy UTF-8 text.
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.buffer.borrow()).into_owned()
    }

    /// Clears the captured bytes.
    pub fn clear(&self) {
        self.buffer.borrow_mut().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_round_trip() {
        let capture = CaptureBuffer::new();
        let mut stream = capture.stream();
        stream.write_bytes(b"hello ").unwrap();
        stream.write_fmt(format_args!("{}", 42)).unwrap();
        assert_eq!(capture.contents(), "hello 42");
        capture.clear();
        assert_eq!(capture.contents(), "");
    }
}
