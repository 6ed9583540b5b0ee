use scanrs_message::ScanParams;

/// Lifecycle events decoded from the scanner's response lines, fanned out on a
/// pubsub topic so every interested node sees the same session.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanEvent {
    Started,
    Paused,
    Resumed,
    /// A full revolution finished. The layer index counts from the start of
    /// the scan, the wire marker itself does not carry one.
    LayerFinished(u32),
    Completed,
    HomeComplete,
    MoveToTopComplete,
    /// The configuration the device reports as in effect, either as the reply
    /// to `CONFIG` or to `GET_CONFIG`.
    ConfigAccepted(ScanParams),
    ConfigRejected(String),
    DeviceError(String),
    /// Informational and unparsed lines from the device.
    Info(String),
}

/// One projected measurement in the cloud frame, millimeters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CloudPoint {
    pub x_mm: f32,
    pub y_mm: f32,
    pub z_mm: f32,
    pub layer: u32,
    pub angle_deg: f32,
}
