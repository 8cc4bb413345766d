//! Byte stream abstraction
//!
//! Every file operation in this crate goes through [`ByteStream`]: a
//! synchronous, byte-addressable, random-access stream. The production
//! implementation wraps a [`std::fs::File`]; tests use [`MemStream`] to
//! exercise the whole engine without touching the filesystem.
//!
//! The stream is deliberately dumb. It knows nothing about charts, symbols,
//! or conversion; it moves bytes and reports positions. Record framing
//! (newline-terminated ASCII lines interleaved with binary payloads) lives
//! in the default helper methods so each implementation only supplies the
//! five primitive operations.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::error::{PdbError, PdbResult};

/// A synchronous random-access byte stream.
pub trait ByteStream {
    /// Move the read/write position to an absolute byte offset.
    fn seek_to(&mut self, addr: u64) -> PdbResult<()>;

    /// Move to the end of the stream and return the resulting position.
    fn seek_end(&mut self) -> PdbResult<u64>;

    /// Current position.
    fn tell(&mut self) -> PdbResult<u64>;

    /// Fill `buf` completely from the current position.
    fn read_exact_bytes(&mut self, buf: &mut [u8]) -> PdbResult<()>;

    /// Write all of `buf` at the current position.
    fn write_all_bytes(&mut self, buf: &[u8]) -> PdbResult<()>;

    fn flush_stream(&mut self) -> PdbResult<()>;

    /// Read up to and including the next `\n`, returning the line without
    /// the terminator. `Ok(None)` means the stream ended before any byte
    /// was read.
    fn read_line(&mut self) -> PdbResult<Option<Vec<u8>>> {
        let mut line = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            match self.read_exact_bytes(&mut byte) {
                Ok(()) => {
                    if byte[0] == b'\n' {
                        return Ok(Some(line));
                    }
                    line.push(byte[0]);
                }
                Err(PdbError::Stream(ref e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    if line.is_empty() {
                        return Ok(None);
                    }
                    return Ok(Some(line));
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Read a line that must exist, as UTF-8.
    fn require_line(&mut self, what: &str) -> PdbResult<String> {
        match self.read_line()? {
            Some(bytes) => String::from_utf8(bytes)
                .map_err(|_| PdbError::format(format!("{} is not ASCII", what))),
            None => Err(PdbError::format(format!("unexpected end of file reading {}", what))),
        }
    }

    fn write_str(&mut self, s: &str) -> PdbResult<()> {
        self.write_all_bytes(s.as_bytes())
    }
}

/// [`ByteStream`] over an on-disk file.
pub struct FileStream {
    file: File,
}

impl FileStream {
    /// Create (truncating) a file open for read and write.
    pub fn create(path: &Path) -> PdbResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Ok(FileStream { file })
    }

    /// Open an existing file for read and write.
    pub fn open(path: &Path) -> PdbResult<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(FileStream { file })
    }

    /// Open an existing file read-only.
    pub fn open_read(path: &Path) -> PdbResult<Self> {
        let file = OpenOptions::new().read(true).open(path)?;
        Ok(FileStream { file })
    }
}

impl ByteStream for FileStream {
    fn seek_to(&mut self, addr: u64) -> PdbResult<()> {
        self.file.seek(SeekFrom::Start(addr))?;
        Ok(())
    }

    fn seek_end(&mut self) -> PdbResult<u64> {
        Ok(self.file.seek(SeekFrom::End(0))?)
    }

    fn tell(&mut self) -> PdbResult<u64> {
        Ok(self.file.stream_position()?)
    }

    fn read_exact_bytes(&mut self, buf: &mut [u8]) -> PdbResult<()> {
        self.file.read_exact(buf)?;
        Ok(())
    }

    fn write_all_bytes(&mut self, buf: &[u8]) -> PdbResult<()> {
        self.file.write_all(buf)?;
        Ok(())
    }

    fn flush_stream(&mut self) -> PdbResult<()> {
        self.file.flush()?;
        Ok(())
    }
}

/// In-memory [`ByteStream`], primarily for tests.
#[derive(Default)]
pub struct MemStream {
    data: Vec<u8>,
    pos: usize,
}

impl MemStream {
    pub fn new() -> Self {
        MemStream::default()
    }

    pub fn from_bytes(data: Vec<u8>) -> Self {
        MemStream { data, pos: 0 }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

impl ByteStream for MemStream {
    fn seek_to(&mut self, addr: u64) -> PdbResult<()> {
        // Seeking past the end is legal; the gap fills with zeros on write.
        self.pos = addr as usize;
        Ok(())
    }

    fn seek_end(&mut self) -> PdbResult<u64> {
        self.pos = self.data.len();
        Ok(self.pos as u64)
    }

    fn tell(&mut self) -> PdbResult<u64> {
        Ok(self.pos as u64)
    }

    fn read_exact_bytes(&mut self, buf: &mut [u8]) -> PdbResult<()> {
        if self.pos + buf.len() > self.data.len() {
            return Err(PdbError::Stream(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "read past end of stream",
            )));
        }
        buf.copy_from_slice(&self.data[self.pos..self.pos + buf.len()]);
        self.pos += buf.len();
        Ok(())
    }

    fn write_all_bytes(&mut self, buf: &[u8]) -> PdbResult<()> {
        if self.pos > self.data.len() {
            self.data.resize(self.pos, 0);
        }
        let end = self.pos + buf.len();
        if end > self.data.len() {
            self.data.resize(end, 0);
        }
        self.data[self.pos..end].copy_from_slice(buf);
        self.pos = end;
        Ok(())
    }

    fn flush_stream(&mut self) -> PdbResult<()> {
        Ok(())
    }
}
