// ABC primitive decoders
// Every read advances the cursor by exactly the bytes consumed

use log::warn;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReadError {
    #[error("Truncated input reading {wanted} at offset {offset}")]
    TruncatedInput { offset: usize, wanted: &'static str },
}

pub type ReadResult<T> = Result<T, ReadError>;

/// Byte cursor over one ABC blob
#[derive(Debug, Clone)]
pub struct AbcReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> AbcReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn at(data: &'a [u8], pos: usize) -> Self {
        Self { data, pos }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn truncated(&self, wanted: &'static str) -> ReadError {
        ReadError::TruncatedInput {
            offset: self.pos,
            wanted,
        }
    }

    pub fn read_u8(&mut self) -> ReadResult<u8> {
        let byte = *self.data.get(self.pos).ok_or_else(|| self.truncated("u8"))?;
        self.pos += 1;
        Ok(byte)
    }

    pub fn read_u16(&mut self) -> ReadResult<u16> {
        let bytes = self.read_array::<2>("u16")?;
        Ok(u16::from_le_bytes(bytes))
    }

    /// Three bytes, little-endian, sign-extended from bit 23
    pub fn read_s24(&mut self) -> ReadResult<i32> {
        let [b0, b1, b2] = self.read_array::<3>("s24")?;
        let raw = (b0 as u32) | ((b1 as u32) << 8) | ((b2 as u32) << 16);
        Ok(((raw << 8) as i32) >> 8)
    }

    /// Variable-length unsigned integer. Stops after five groups even when
    /// the continuation bit of the fifth byte is still set.
    pub fn read_u32(&mut self) -> ReadResult<u32> {
        let mut result: u32 = 0;
        for group in 0..5 {
            let byte = *self
                .data
                .get(self.pos)
                .ok_or_else(|| self.truncated("variable-length integer"))?;
            self.pos += 1;
            result |= ((byte & 0x7f) as u32).wrapping_shl(7 * group);
            if byte & 0x80 == 0 {
                break;
            }
        }
        Ok(result)
    }

    /// u30 shares the u32 encoding; the upper bits are not checked
    pub fn read_u30(&mut self) -> ReadResult<u32> {
        self.read_u32()
    }

    pub fn read_s32(&mut self) -> ReadResult<i32> {
        Ok(self.read_u32()? as i32)
    }

    pub fn read_d64(&mut self) -> ReadResult<f64> {
        let bytes = self.read_array::<8>("d64")?;
        Ok(f64::from_le_bytes(bytes))
    }

    pub fn read_bytes(&mut self, len: usize) -> ReadResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| self.truncated("byte range"))?;
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    /// Byte-length prefixed string. Content is not validated; invalid
    /// sequences are replaced and logged.
    pub fn read_string(&mut self) -> ReadResult<String> {
        let len = self.read_u30()? as usize;
        let bytes = self.read_bytes(len)?;
        match std::str::from_utf8(bytes) {
            Ok(s) => Ok(s.to_string()),
            Err(_) => {
                warn!(
                    "Non UTF-8 string data at offset {} not implemented, decoding lossily",
                    self.pos - len
                );
                Ok(String::from_utf8_lossy(bytes).into_owned())
            }
        }
    }

    fn read_array<const N: usize>(&mut self, wanted: &'static str) -> ReadResult<[u8; N]> {
        let slice = self
            .data
            .get(self.pos..self.pos + N)
            .ok_or_else(|| self.truncated(wanted))?;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        self.pos += N;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abc::writer::AbcWriter;

    #[test]
    fn test_u30_single_byte() {
        let mut r = AbcReader::new(&[0x7f]);
        assert_eq!(r.read_u30().unwrap(), 127);
        assert_eq!(r.position(), 1);
    }

    #[test]
    fn test_u30_multi_byte() {
        // 300 = 0b1_0010_1100
        let mut r = AbcReader::new(&[0xac, 0x02]);
        assert_eq!(r.read_u30().unwrap(), 300);
        assert!(r.is_empty());
    }

    #[test]
    fn test_u32_stops_after_five_groups() {
        let data = [0xff, 0xff, 0xff, 0xff, 0xff, 0x01];
        let mut r = AbcReader::new(&data);
        let value = r.read_u32().unwrap();
        assert_eq!(value, u32::MAX);
        assert_eq!(r.position(), 5);
        assert_eq!(r.read_u8().unwrap(), 0x01);
    }

    #[test]
    fn test_truncated_u30() {
        let mut r = AbcReader::new(&[0x80, 0x80]);
        let err = r.read_u30().unwrap_err();
        assert_eq!(
            err,
            ReadError::TruncatedInput {
                offset: 2,
                wanted: "variable-length integer"
            }
        );
    }

    #[test]
    fn test_s24_sign_extension() {
        let mut r = AbcReader::new(&[0xff, 0xff, 0xff, 0x00, 0x00, 0x80, 0x10, 0x00, 0x00]);
        assert_eq!(r.read_s24().unwrap(), -1);
        assert_eq!(r.read_s24().unwrap(), -8_388_608);
        assert_eq!(r.read_s24().unwrap(), 16);
    }

    #[test]
    fn test_s32_negative() {
        let mut w = AbcWriter::new();
        w.write_s32(-42);
        let bytes = w.into_bytes();
        assert_eq!(bytes.len(), 5);
        assert_eq!(AbcReader::new(&bytes).read_s32().unwrap(), -42);
    }

    #[test]
    fn test_u16_and_d64_little_endian() {
        let mut data = vec![0x10, 0x00];
        data.extend_from_slice(&1.5f64.to_le_bytes());
        let mut r = AbcReader::new(&data);
        assert_eq!(r.read_u16().unwrap(), 16);
        assert_eq!(r.read_d64().unwrap(), 1.5);
    }

    #[test]
    fn test_string_lossy() {
        let mut r = AbcReader::new(&[0x03, b'a', 0xff, b'b']);
        let s = r.read_string().unwrap();
        assert_eq!(s, "a\u{fffd}b");
        assert!(r.is_empty());
    }

    #[test]
    fn test_string_truncated() {
        let mut r = AbcReader::new(&[0x05, b'a', b'b']);
        assert!(r.read_string().is_err());
    }

    #[test]
    fn test_variable_length_round_trip() {
        for value in [0u32, 1, 127, 128, 16_383, 16_384, 2_097_151, 268_435_455, u32::MAX] {
            let mut w = AbcWriter::new();
            w.write_u32(value);
            let bytes = w.into_bytes();
            let mut r = AbcReader::new(&bytes);
            assert_eq!(r.read_u32().unwrap(), value);
            assert!(r.is_empty());

            // Decoding then re-encoding gives the same minimal bytes
            let mut again = AbcWriter::new();
            again.write_u32(value);
            assert_eq!(again.into_bytes(), bytes);
        }
    }

    #[test]
    fn test_s24_round_trip() {
        for value in [-8_388_608, -65_536, -1, 0, 1, 255, 8_388_607] {
            let mut w = AbcWriter::new();
            w.write_s24(value);
            let bytes = w.into_bytes();
            assert_eq!(bytes.len(), 3);
            assert_eq!(AbcReader::new(&bytes).read_s24().unwrap(), value);
        }
    }
}
