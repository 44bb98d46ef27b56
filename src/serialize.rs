use std::fmt::Write;

use byteorder::{ByteOrder, LittleEndian};

/// Number of bytes per row of a `dump` listing.
const DUMP_ROW: usize = 16;

/// Appends the little-endian bytes of a 32-bit value.
pub fn push_i32(bytes: &mut Vec<u8>, value: i32) {
    let mut buffer = [0u8; 4];
    LittleEndian::write_i32(&mut buffer, value);
    bytes.extend(&buffer);
}

/// Appends the little-endian bytes of a 64-bit value.
pub fn push_u64(bytes: &mut Vec<u8>, value: u64) {
    let mut buffer = [0u8; 8];
    LittleEndian::write_u64(&mut buffer, value);
    bytes.extend(&buffer);
}

/// Overwrites four bytes at `position` with a little-endian 32-bit value.
pub fn write_i32_at(bytes: &mut [u8], position: usize, value: i32) {
    LittleEndian::write_i32(&mut bytes[position..position + 4], value);
}

/// Overwrites eight bytes at `position` with a little-endian 64-bit value.
pub fn write_u64_at(bytes: &mut [u8], position: usize, value: u64) {
    LittleEndian::write_u64(&mut bytes[position..position + 8], value);
}

pub fn read_i32_at(bytes: &[u8], position: usize) -> i32 {
    LittleEndian::read_i32(&bytes[position..position + 4])
}

/// Renders `bytes` as rows of upper-case hex, each prefixed by its offset.
///
/// ```text
/// 0000: 55 48 89 E5 5D C3
/// ```
pub fn dump(bytes: &[u8]) -> String {
    let mut out = String::new();
    for (row, chunk) in bytes.chunks(DUMP_ROW).enumerate() {
        // writing into a String cannot fail
        let _ = write!(out, "{:04X}:", row * DUMP_ROW);
        for byte in chunk {
            let _ = write!(out, " {:02X}", byte);
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn little_endian_order() {
        let mut bytes = Vec::new();
        push_i32(&mut bytes, 0x1234_5678);
        assert_eq!(bytes, [0x78, 0x56, 0x34, 0x12]);

        push_i32(&mut bytes, -2);
        assert_eq!(&bytes[4..], &[0xFE, 0xFF, 0xFF, 0xFF]);
        assert_eq!(read_i32_at(&bytes, 4), -2);
    }

    #[test]
    fn patch_in_place() {
        let mut bytes = vec![0x0F, 0x84, 0, 0, 0, 0, 0x90];
        write_i32_at(&mut bytes, 2, 1);
        assert_eq!(bytes, [0x0F, 0x84, 1, 0, 0, 0, 0x90]);
    }

    #[test]
    fn quad_words() {
        let mut bytes = Vec::new();
        push_u64(&mut bytes, 0x0102_0304_0506_0708);
        assert_eq!(bytes, [8, 7, 6, 5, 4, 3, 2, 1]);
        write_u64_at(&mut bytes, 0, 0xFF);
        assert_eq!(bytes, [0xFF, 0, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn dump_rows() {
        let bytes: Vec<u8> = (0..18).collect();
        assert_eq!(
            dump(&bytes),
            "0000: 00 01 02 03 04 05 06 07 08 09 0A 0B 0C 0D 0E 0F\n0010: 10 11\n"
        );
        assert_eq!(dump(&[]), "");
    }
}
