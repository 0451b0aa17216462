//! CRC-16/MCRF4XX (the "X.25" checksum used by MAVLink).

/// Initial accumulator value.
pub const CRC_INIT: u16 = 0xFFFF;

/// Fold one byte into a running checksum.
#[must_use]
pub fn crc_accumulate(byte: u8, crc: u16) -> u16 {
    let mut tmp = byte ^ (crc & 0xFF) as u8;
    tmp ^= tmp << 4;
    let tmp = u16::from(tmp);
    (crc >> 8) ^ (tmp << 8) ^ (tmp << 3) ^ (tmp >> 4)
}

/// Checksum over a byte slice, starting from [`CRC_INIT`].
#[must_use]
pub fn crc16_mcrf4xx(data: &[u8]) -> u16 {
    data.iter()
        .fold(CRC_INIT, |crc, &b| crc_accumulate(b, crc))
}
