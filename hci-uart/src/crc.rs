/// CRC-CCITT polynomial (`x^16 + x^12 + x^5 + 1`), bit-reflected.
pub const CRC_POLY: u16 = 0x8408;

/// Initial value of the CRC register.
pub const CRC_PRESET: u16 = 0xFFFF;

/// Performs the BCSP data integrity check computation over header and payload.
///
/// The UART sends bytes LSB first, so the register is shifted right. The returned value is already
/// bit-reversed into on-wire order and must be appended most significant byte first.
pub fn bcsp_crc(data: &[u8]) -> u16 {
    let mut crc = CRC_PRESET;

    for byte in data {
        crc ^= u16::from(*byte);

        for _ in 0..8 {
            let lsb = crc & 0x0001 != 0;
            crc >>= 1;

            if lsb {
                crc ^= CRC_POLY;
            }
        }
    }

    crc.reverse_bits()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_value() {
        assert_eq!(bcsp_crc(b"123456789"), 0x89F6);
    }

    #[test]
    fn detects_single_bit_errors() {
        let mut data = *b"\x40\x21\x00\x9e\x03\x0c\x00";
        let good = bcsp_crc(&data);
        for i in 0..data.len() * 8 {
            data[i / 8] ^= 1 << (i % 8);
            assert_ne!(bcsp_crc(&data), good, "bit {} flip undetected", i);
            data[i / 8] ^= 1 << (i % 8);
        }
    }
}
