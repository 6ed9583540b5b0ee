//! Serial line framing.
//!
//! [`LineReader`] splits the incoming byte stream into newline-terminated
//! command lines, [`write_line`] puts responses on the wire. The protocol is
//! plain text both ways.

use core::fmt::Write as _;

use embedded_hal_nb::serial::{Read, Write};

use scanrs_message::Response;

/// Accumulates serial bytes and hands out complete lines.
///
/// Lines end on `\n`, an optional `\r` before it is stripped. A line longer
/// than `N` bytes is dropped up to its terminating newline.
pub struct LineReader<const N: usize> {
    buffer: [u8; N],
    index: usize,
    discarding: bool,
}

impl<const N: usize> LineReader<N> {
    pub const fn new() -> Self {
        Self {
            buffer: [0; N],
            index: 0,
            discarding: false,
        }
    }

    /// Read everything the reader has to offer and invoke `callback` for
    /// every complete line.
    pub fn consume<R: Read<u8>>(&mut self, reader: &mut R, callback: impl FnMut(&str)) {
        // first exhaust the reader, then split the buffer into lines
        loop {
            match reader.read() {
                Ok(byte) => {
                    if self.discarding {
                        if byte == b'\n' {
                            self.discarding = false;
                        }
                        continue;
                    }
                    self.buffer[self.index] = byte;
                    self.index += 1;
                    if self.index >= self.buffer.len() {
                        // full, split off complete lines before reading on
                        break;
                    }
                }
                Err(nb::Error::WouldBlock) => break,
                // a read error ends this round, the next poll starts over
                Err(nb::Error::Other(_)) => break,
            }
        }

        self.process_buffer(callback);

        if self.index >= self.buffer.len() {
            // no newline within a whole buffer, drop the oversized line
            self.index = 0;
            self.discarding = true;
        }
    }

    fn process_buffer(&mut self, mut callback: impl FnMut(&str)) {
        loop {
            let mut found = false;

            for i in 0..self.index {
                if self.buffer[i] == b'\n' {
                    let mut end = i;
                    if end > 0 && self.buffer[end - 1] == b'\r' {
                        end -= 1;
                    }
                    if let Ok(line) = core::str::from_utf8(&self.buffer[..end]) {
                        if !line.is_empty() {
                            callback(line);
                        }
                    }

                    // move the remaining bytes to the front
                    let first_other_byte = i + 1;
                    self.buffer.copy_within(first_other_byte..self.index, 0);
                    self.index -= first_other_byte;

                    found = true;
                    break;
                }
            }

            if !found {
                break;
            }
        }
    }
}

/// Adapts a serial writer to `core::fmt::Write` so responses can be
/// formatted straight onto the wire.
struct SerialSink<'a, W: Write<u8>> {
    tx: &'a mut W,
    error: Option<W::Error>,
}

impl<W: Write<u8>> core::fmt::Write for SerialSink<'_, W> {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        for &byte in s.as_bytes() {
            if let Err(error) = nb::block!(self.tx.write(byte)) {
                self.error = Some(error);
                return Err(core::fmt::Error);
            }
        }
        Ok(())
    }
}

/// Send one response line, terminated with `\r\n`.
pub fn write_line<W: Write<u8>>(tx: &mut W, response: &Response<'_>) -> Result<(), W::Error> {
    let mut sink = SerialSink { tx, error: None };
    // formatting only fails when the sink does, and the sink records why
    let _ = write!(sink, "{}\r\n", response);
    if let Some(error) = sink.error {
        return Err(error);
    }
    nb::block!(tx.flush())
}

/// Fixed-size text buffer implementing `core::fmt::Write`.
///
/// Writes that do not fit entirely are rejected, so the content is always
/// the concatenation of complete UTF-8 chunks.
pub struct FmtBuffer<const N: usize> {
    buffer: [u8; N],
    len: usize,
}

impl<const N: usize> FmtBuffer<N> {
    pub const fn new() -> Self {
        Self {
            buffer: [0; N],
            len: 0,
        }
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }

    pub fn as_str(&self) -> &str {
        core::str::from_utf8(&self.buffer[..self.len]).unwrap_or("")
    }
}

impl<const N: usize> core::fmt::Write for FmtBuffer<N> {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        let bytes = s.as_bytes();
        let end = self.len + bytes.len();
        if end > N {
            return Err(core::fmt::Error);
        }
        self.buffer[self.len..end].copy_from_slice(bytes);
        self.len = end;
        Ok(())
    }
}
