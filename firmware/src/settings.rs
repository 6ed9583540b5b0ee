//! Persistent scan parameters.
//!
//! The parameters live in non-volatile memory as a version byte, a packed
//! little-endian image and a trailing checksum. Anything that fails to verify
//! at boot falls back to the defaults.

use scanrs_message::ScanParams;

/// Bumped whenever the stored layout changes.
pub const SETTINGS_VERSION: u8 = 1;

const VERSION_ADDR: u16 = 0;
const IMAGE_ADDR: u16 = 1;
const IMAGE_LEN: usize = 16;

/// Byte-addressed non-volatile memory, EEPROM on the real rig.
pub trait NvMemory {
    fn read_byte(&mut self, address: u16) -> u8;
    fn write_byte(&mut self, address: u16, value: u8);
}

/// Write `params` to non-volatile memory.
pub fn store<NV: NvMemory>(nv: &mut NV, params: &ScanParams) {
    let image = encode(params);
    nv.write_byte(VERSION_ADDR, SETTINGS_VERSION);
    for (i, &byte) in image.iter().enumerate() {
        nv.write_byte(IMAGE_ADDR + i as u16, byte);
    }
    nv.write_byte(IMAGE_ADDR + IMAGE_LEN as u16, checksum(&image));
}

/// Read the stored parameters, falling back to [`ScanParams::default`] when
/// the version, checksum or values do not check out.
pub fn load<NV: NvMemory>(nv: &mut NV) -> ScanParams {
    read_params(nv).unwrap_or_default()
}

fn read_params<NV: NvMemory>(nv: &mut NV) -> Option<ScanParams> {
    if nv.read_byte(VERSION_ADDR) != SETTINGS_VERSION {
        return None;
    }
    let mut image = [0u8; IMAGE_LEN];
    for (i, byte) in image.iter_mut().enumerate() {
        *byte = nv.read_byte(IMAGE_ADDR + i as u16);
    }
    if nv.read_byte(IMAGE_ADDR + IMAGE_LEN as u16) != checksum(&image) {
        return None;
    }
    let params = decode(&image);
    params.validate().ok()?;
    Some(params)
}

fn encode(params: &ScanParams) -> [u8; IMAGE_LEN] {
    let mut image = [0u8; IMAGE_LEN];
    image[0..2].copy_from_slice(&params.theta_steps_per_rev.to_le_bytes());
    image[2..4].copy_from_slice(&params.z_travel_mm.to_le_bytes());
    image[4..6].copy_from_slice(&params.z_steps_per_mm.to_le_bytes());
    image[6..8].copy_from_slice(&params.z_steps_per_layer.to_le_bytes());
    image[8..10].copy_from_slice(&params.scan_delay_ms.to_le_bytes());
    image[10..14].copy_from_slice(&params.center_distance_cm.to_le_bytes());
    image[14..16].copy_from_slice(&params.steps_per_rev.to_le_bytes());
    image
}

fn decode(image: &[u8; IMAGE_LEN]) -> ScanParams {
    ScanParams {
        theta_steps_per_rev: u16::from_le_bytes([image[0], image[1]]),
        z_travel_mm: u16::from_le_bytes([image[2], image[3]]),
        z_steps_per_mm: u16::from_le_bytes([image[4], image[5]]),
        z_steps_per_layer: u16::from_le_bytes([image[6], image[7]]),
        scan_delay_ms: u16::from_le_bytes([image[8], image[9]]),
        center_distance_cm: f32::from_le_bytes([image[10], image[11], image[12], image[13]]),
        steps_per_rev: u16::from_le_bytes([image[14], image[15]]),
    }
}

fn checksum(data: &[u8]) -> u8 {
    data.iter()
        .fold(0u8, |acc, &byte| acc.rotate_left(1).wrapping_add(byte))
}
