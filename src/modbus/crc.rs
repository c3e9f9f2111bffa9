/// Reflected form of the 0x8005 polynomial.
const POLY: u16 = 0xA001;

/// CRC-16/MODBUS over `data`. Appended to frames low byte first.
pub fn crc16_modbus(data: &[u8]) -> u16 {
    data.iter().fold(0xFFFF, |crc, &byte| {
        (0..8).fold(crc ^ u16::from(byte), |crc, _| {
            let shifted = crc >> 1;
            if crc & 1 == 1 {
                shifted ^ POLY
            } else {
                shifted
            }
        })
    })
}
