//! CRC-8 (polynomial `0x07`, init `0x00`, no reflection, no final XOR).
//!
//! Appending the running CRC to a message makes the CRC over the whole span
//! zero, which is how receivers validate a frame.

const CRC8_POLY: u8 = 0x07;

/// Folds one byte into a running CRC-8.
pub fn crc8_update(crc: u8, data: u8) -> u8 {
    let mut crc = crc ^ data;
    for _ in 0..8 {
        crc = if crc & 0x80 != 0 {
            (crc << 1) ^ CRC8_POLY
        } else {
            crc << 1
        };
    }
    crc
}

/// CRC-8 over a whole slice.
pub fn crc8(data: &[u8]) -> u8 {
    data.iter().fold(0, |crc, &b| crc8_update(crc, b))
}
