//! In-memory duplex wire between the firmware thread and the link thread.
//!
//! The firmware end speaks the non-blocking serial traits the scanner polls.
//! The host end behaves like a serial port with a read timeout, so the link
//! reader loop runs against it unchanged.

use std::{
    collections::VecDeque,
    convert::Infallible,
    io,
    sync::{Arc, Condvar, Mutex},
    time::Duration,
};

use embedded_hal_nb::serial::{ErrorType, Read, Write};

/// Matches the timeout on real serial ports, so the link loop keeps
/// checking its shutdown flag while the wire is idle.
const READ_TIMEOUT: Duration = Duration::from_millis(100);

#[derive(Default)]
struct Pipe {
    bytes: Mutex<VecDeque<u8>>,
    readable: Condvar,
}

impl Pipe {
    fn push(&self, byte: u8) {
        self.bytes.lock().unwrap().push_back(byte);
        self.readable.notify_one();
    }

    fn push_all(&self, bytes: &[u8]) {
        self.bytes.lock().unwrap().extend(bytes.iter().copied());
        self.readable.notify_one();
    }
}

/// Create the two ends of a virtual serial cable.
pub fn loopback() -> (FirmwareRx, FirmwareTx, HostPort) {
    let to_firmware = Arc::new(Pipe::default());
    let to_host = Arc::new(Pipe::default());
    (
        FirmwareRx {
            pipe: to_firmware.clone(),
        },
        FirmwareTx {
            pipe: to_host.clone(),
        },
        HostPort {
            incoming: to_host,
            outgoing: to_firmware,
        },
    )
}

/// Firmware end of the host-to-firmware line.
pub struct FirmwareRx {
    pipe: Arc<Pipe>,
}

impl ErrorType for FirmwareRx {
    type Error = Infallible;
}

impl Read<u8> for FirmwareRx {
    fn read(&mut self) -> nb::Result<u8, Infallible> {
        self.pipe
            .bytes
            .lock()
            .unwrap()
            .pop_front()
            .ok_or(nb::Error::WouldBlock)
    }
}

/// Firmware end of the firmware-to-host line.
pub struct FirmwareTx {
    pipe: Arc<Pipe>,
}

impl ErrorType for FirmwareTx {
    type Error = Infallible;
}

impl Write<u8> for FirmwareTx {
    fn write(&mut self, word: u8) -> nb::Result<(), Infallible> {
        self.pipe.push(word);
        Ok(())
    }

    fn flush(&mut self) -> nb::Result<(), Infallible> {
        Ok(())
    }
}

/// Host end of the cable. Reads park on a condvar for up to
/// [`READ_TIMEOUT`], writes land in the firmware receive queue immediately.
pub struct HostPort {
    incoming: Arc<Pipe>,
    outgoing: Arc<Pipe>,
}

impl io::Read for HostPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut bytes = self.incoming.bytes.lock().unwrap();
        if bytes.is_empty() {
            bytes = self
                .incoming
                .readable
                .wait_timeout(bytes, READ_TIMEOUT)
                .unwrap()
                .0;
            if bytes.is_empty() {
                return Err(io::Error::from(io::ErrorKind::TimedOut));
            }
        }
        let n = buf.len().min(bytes.len());
        for (slot, byte) in buf.iter_mut().zip(bytes.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl io::Write for HostPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.outgoing.push_all(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read as _, Write as _};
    use std::thread;

    #[test]
    fn bytes_cross_the_cable_both_ways() {
        let (mut fw_rx, mut fw_tx, mut host) = loopback();

        host.write_all(b"GET_CONFIG\r\n").unwrap();
        let mut received = Vec::new();
        while let Ok(byte) = fw_rx.read() {
            received.push(byte);
        }
        assert_eq!(received, b"GET_CONFIG\r\n");
        assert_eq!(fw_rx.read(), Err(nb::Error::WouldBlock));

        for &byte in b"OK\r\n" {
            fw_tx.write(byte).unwrap();
        }
        let mut buf = [0u8; 16];
        let n = host.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"OK\r\n");
    }

    #[test]
    fn an_idle_host_read_times_out() {
        let (_fw_rx, _fw_tx, mut host) = loopback();

        let mut buf = [0u8; 4];
        let err = host.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[test]
    fn a_parked_reader_wakes_when_the_firmware_speaks() {
        let (_fw_rx, mut fw_tx, mut host) = loopback();

        let writer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            fw_tx.write(b'!').unwrap();
        });

        let mut buf = [0u8; 1];
        let n = host.read(&mut buf).unwrap();
        assert_eq!((n, buf[0]), (1, b'!'));
        writer.join().unwrap();
    }
}
