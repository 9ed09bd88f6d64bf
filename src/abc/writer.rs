// ABC primitive encoders
// Variable-length integers are always emitted in their minimal form

#[derive(Debug, Default, Clone)]
pub struct AbcWriter {
    out: Vec<u8>,
}

impl AbcWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.out.len()
    }

    pub fn is_empty(&self) -> bool {
        self.out.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.out
    }

    pub fn write_u8(&mut self, value: u8) {
        self.out.push(value);
    }

    pub fn write_u16(&mut self, value: u16) {
        self.out.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_s24(&mut self, value: i32) {
        let bytes = value.to_le_bytes();
        self.out.extend_from_slice(&bytes[..3]);
    }

    pub fn write_u32(&mut self, mut value: u32) {
        loop {
            let byte = (value & 0x7f) as u8;
            value >>= 7;
            if value == 0 {
                self.out.push(byte);
                break;
            }
            self.out.push(byte | 0x80);
        }
    }

    pub fn write_u30(&mut self, value: u32) {
        self.write_u32(value & 0x3fff_ffff);
    }

    pub fn write_s32(&mut self, value: i32) {
        self.write_u32(value as u32);
    }

    pub fn write_d64(&mut self, value: f64) {
        self.out.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.out.extend_from_slice(bytes);
    }

    pub fn write_string(&mut self, s: &str) {
        self.write_u30(s.len() as u32);
        self.out.extend_from_slice(s.as_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_lengths() {
        let cases: [(u32, usize); 6] = [
            (0, 1),
            (127, 1),
            (128, 2),
            (16_384, 3),
            (1 << 21, 4),
            (1 << 28, 5),
        ];
        for (value, len) in cases {
            let mut w = AbcWriter::new();
            w.write_u32(value);
            assert_eq!(w.len(), len, "value {}", value);
        }
    }

    #[test]
    fn test_string_prefix_is_byte_count() {
        let mut w = AbcWriter::new();
        w.write_string("é");
        assert_eq!(w.into_bytes(), vec![2, 0xc3, 0xa9]);
    }
}
