//! Serial link to the scanner and the session tooling around it: the
//! connection node that owns the port, the driver that paces host-stepped
//! scans, and recorder/replay for working without the hardware.

mod connection;
mod driver;
mod recorder;
mod replay;
mod transport;

pub use connection::{ConnectionHandle, ConnectionNode, SerialConnectionNodeConfig};
pub use driver::{ScanDriverNode, ScanDriverNodeConfig};
pub use recorder::{RecorderNode, RecorderNodeConfig};
pub use replay::{ReplayNode, ReplayNodeConfig};
pub use transport::{open_serial, LineSplitter, Transport};
