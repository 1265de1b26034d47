//! File objects.

use std::fs;
use std::io::{self, BufRead, BufReader, Write};

use bitflags::bitflags;

bitflags! {
    /// File open modes, parsed from fopen-style mode strings.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FileMode: u8 {
        const READ = 0b001;
        const WRITE = 0b010;
        const APPEND = 0b100;
    }
}

impl FileMode {
    /// Parses an fopen-style mode string: `r`, `w`, `a`, with an optional
    /// `+` making the stream read-write.
    pub fn parse(mode: &str) -> Option<FileMode> {
        match mode {
            "r" => Some(FileMode::READ),
            "w" => Some(FileMode::WRITE),
            "a" => Some(FileMode::APPEND),
            "r+" => Some(FileMode::READ | FileMode::WRITE),
            "w+" => Some(FileMode::READ | FileMode::WRITE),
            "a+" => Some(FileMode::READ | FileMode::APPEND),
            _ => None,
        }
    }
}

/// The stream a file object wraps.
#[derive(Debug)]
pub enum FileHandle {
    /// The process's standard input.
    Stdin,

    /// The process's standard output. Never closed on finalization.
    Stdout,

    /// The process's standard error. Never closed on finalization.
    Stderr,

    /// A readable file, buffered for line reads.
    Read(BufReader<fs::File>),

    /// A writable or appendable file.
    Write(fs::File),
}

/// Wraps an OS stream handle. The handle is owned: it is closed when the
/// file object is finalized by the collector, when `close()` is called, or
/// at VM teardown — except for the three standard streams, which are only
/// flushed.
#[derive(Debug)]
pub struct PyroFile {
    /// The stream, or `None` once closed.
    pub stream: Option<FileHandle>,
}

impl PyroFile {
    /// Wraps an open stream.
    pub fn new(handle: FileHandle) -> Self {
        Self {
            stream: Some(handle),
        }
    }

    /// Returns true if the file has been closed.
    pub fn is_closed(&self) -> bool {
        self.stream.is_none()
    }

    /// Reads the next line, stripping the terminating LF or CRLF. Returns
    /// `None` at end of file.
    pub fn read_line_bytes(&mut self) -> io::Result<Option<Vec<u8>>> {
        let mut buf = Vec::new();
        let count = match &mut self.stream {
            Some(FileHandle::Read(reader)) => reader.read_until(b'\n', &mut buf)?,
            Some(FileHandle::Stdin) => io::stdin().lock().read_until(b'\n', &mut buf)?,
            _ => {
                return Err(io::Error::new(
                    io::ErrorKind::Unsupported,
                    "stream is not readable",
                ))
            }
        };
        if count == 0 {
            return Ok(None);
        }
        if buf.ends_with(b"\n") {
            buf.pop();
            if buf.ends_with(b"\r") {
                buf.pop();
            }
        }
        Ok(Some(buf))
    }

    /// Reads the remainder of the stream.
    pub fn read_to_end_bytes(&mut self) -> io::Result<Vec<u8>> {
        use std::io::Read;
        let mut buf = Vec::new();
        match &mut self.stream {
            Some(FileHandle::Read(reader)) => {
                reader.read_to_end(&mut buf)?;
            }
            Some(FileHandle::Stdin) => {
                io::stdin().lock().read_to_end(&mut buf)?;
            }
            _ => {
                return Err(io::Error::new(
                    io::ErrorKind::Unsupported,
                    "stream is not readable",
                ))
            }
        }
        Ok(buf)
    }

    /// Writes bytes to the stream.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> io::Result<()> {
        match &mut self.stream {
            Some(FileHandle::Write(file)) => file.write_all(bytes),
            Some(FileHandle::Stdout) => io::stdout().write_all(bytes),
            Some(FileHandle::Stderr) => io::stderr().write_all(bytes),
            _ => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "stream is not writable",
            )),
        }
    }

    /// Closes the stream. Standard streams are flushed, not closed.
    pub fn close(&mut self) {
        match self.stream.take() {
            Some(FileHandle::Write(mut file)) => {
                let _ = file.flush();
            }
            Some(FileHandle::Stdout) => {
                let _ = std::io::stdout().flush();
            }
            Some(FileHandle::Stderr) => {
                let _ = std::io::stderr().flush();
            }
            _ => {}
        }
    }
}
