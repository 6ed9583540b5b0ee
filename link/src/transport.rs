use std::{io, path::Path, time::Duration};

use serial2::SerialPort;

/// Byte pipe to the scanner. Implemented by a real serial port and by the
/// simulator's loopback channel. Reads are expected to time out regularly so
/// the owning thread can observe its shutdown flag.
pub trait Transport: io::Read + io::Write + Send {}

impl<T: io::Read + io::Write + Send> Transport for T {}

/// Opens a serial port with a read timeout short enough for the connection
/// thread to stay responsive.
pub fn open_serial(path: &Path, baud: u32) -> anyhow::Result<SerialPort> {
    let mut port = SerialPort::open(path, baud)?;
    port.set_read_timeout(Duration::from_millis(100))?;
    Ok(port)
}

const MAX_LINE: usize = 1024;

/// Reassembles the scanner's newline-terminated lines from arbitrary read
/// chunks. A line that outgrows the buffer without a terminator can only be
/// binary garbage and is discarded up to the next newline.
#[derive(Default)]
pub struct LineSplitter {
    buffer: Vec<u8>,
    discarding: bool,
}

impl LineSplitter {
    pub fn push(&mut self, bytes: &[u8], mut handle: impl FnMut(&str)) {
        for &byte in bytes {
            if byte == b'\n' {
                if !self.discarding {
                    if let Ok(line) = std::str::from_utf8(&self.buffer) {
                        let line = line.trim_end_matches('\r');
                        if !line.is_empty() {
                            handle(line);
                        }
                    }
                }
                self.discarding = false;
                self.buffer.clear();
            } else if self.discarding {
                // swallow until the terminator
            } else if self.buffer.len() < MAX_LINE {
                self.buffer.push(byte);
            } else {
                self.discarding = true;
                self.buffer.clear();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(splitter: &mut LineSplitter, bytes: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        splitter.push(bytes, |line| lines.push(line.to_owned()));
        lines
    }

    #[test]
    fn lines_survive_arbitrary_chunking() {
        let mut splitter = LineSplitter::default();
        assert!(collect(&mut splitter, b"SCAN_ST").is_empty());
        assert_eq!(collect(&mut splitter, b"ART\r\n0,1,12.50,1.8\r\n"), [
            "SCAN_START",
            "0,1,12.50,1.8"
        ]);
    }

    #[test]
    fn blank_lines_are_skipped() {
        let mut splitter = LineSplitter::default();
        assert_eq!(collect(&mut splitter, b"\r\n\n9999\r\n"), ["9999"]);
    }

    #[test]
    fn an_unterminated_flood_is_discarded_to_the_next_newline() {
        let mut splitter = LineSplitter::default();
        let flood = vec![b'x'; MAX_LINE + 50];
        assert!(collect(&mut splitter, &flood).is_empty());
        // the tail of the flood must not leak into the next real line
        assert_eq!(collect(&mut splitter, b"tail\nHOME_COMPLETE\n"), [
            "HOME_COMPLETE"
        ]);
    }
}
