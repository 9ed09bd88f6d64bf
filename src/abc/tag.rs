// DoABC tag framing
// Splits a SWF tag record into flags, name and the ABC byte range

use super::reader::AbcReader;
use crate::error::{corrupt, unsupported, VmResult};

pub const TAG_DO_ABC: u16 = 82;
pub const TAG_DO_ABC_RAW: u16 = 72;

/// Defer script initialization until a definition is first used
pub const FLAG_LAZY_INITIALIZE: u32 = 0x1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DoAbcTag<'a> {
    pub flags: u32,
    pub name: String,
    pub abc: &'a [u8],
}

impl<'a> DoAbcTag<'a> {
    pub fn lazy(&self) -> bool {
        self.flags & FLAG_LAZY_INITIALIZE != 0
    }

    /// Parse the body of a DoABC (82) tag
    pub fn parse_body(body: &'a [u8]) -> VmResult<Self> {
        let mut r = AbcReader::new(body);
        let flags = u32::from_le_bytes([r.read_u8()?, r.read_u8()?, r.read_u8()?, r.read_u8()?]);
        let rest = &body[r.position()..];
        let nul = rest
            .iter()
            .position(|b| *b == 0)
            .ok_or_else(|| corrupt("DoABC name is not terminated"))?;
        let name = String::from_utf8_lossy(&rest[..nul]).into_owned();
        Ok(DoAbcTag {
            flags,
            name,
            abc: &rest[nul + 1..],
        })
    }

    /// Parse a complete tag record (header included). The record must span
    /// exactly the given bytes.
    pub fn parse_record(record: &'a [u8]) -> VmResult<Self> {
        let mut r = AbcReader::new(record);
        let code_and_length = r.read_u16()?;
        let code = code_and_length >> 6;
        let mut length = (code_and_length & 0x3f) as usize;
        if length == 0x3f {
            let bytes = [r.read_u8()?, r.read_u8()?, r.read_u8()?, r.read_u8()?];
            length = u32::from_le_bytes(bytes) as usize;
        }
        let available = r.remaining();
        if available < length {
            return Err(corrupt(format!(
                "Tag declares {} bytes but only {} are present",
                length, available
            )));
        }
        if available > length {
            return Err(corrupt(format!(
                "{} trailing bytes after tag of {} bytes",
                available - length,
                length
            )));
        }
        let body = r.read_bytes(length)?;
        match code {
            TAG_DO_ABC => Self::parse_body(body),
            TAG_DO_ABC_RAW => Ok(DoAbcTag {
                flags: 0,
                name: String::new(),
                abc: body,
            }),
            other => Err(unsupported(format!("Tag {} does not carry ABC", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn record(code: u16, body: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&((code << 6) | 0x3f).to_le_bytes());
        out.extend_from_slice(&(body.len() as u32).to_le_bytes());
        out.extend_from_slice(body);
        out
    }

    #[test]
    fn test_parse_body() {
        let body = [1, 0, 0, 0, b'f', b'r', b'a', b'm', b'e', 0, 0x10, 0x00];
        let tag = DoAbcTag::parse_body(&body).unwrap();
        assert!(tag.lazy());
        assert_eq!(tag.name, "frame");
        assert_eq!(tag.abc, &[0x10, 0x00]);
    }

    #[test]
    fn test_unterminated_name() {
        let err = DoAbcTag::parse_body(&[0, 0, 0, 0, b'x']).unwrap_err();
        assert_eq!(err.kind, ErrorKind::CorruptAbc);
    }

    #[test]
    fn test_record_length_checks() {
        let body = [0, 0, 0, 0, 0, 0xaa];
        let full = record(TAG_DO_ABC, &body);
        assert_eq!(DoAbcTag::parse_record(&full).unwrap().abc, &[0xaa]);

        let short = &full[..full.len() - 1];
        assert!(DoAbcTag::parse_record(short).is_err());

        let mut long = full.clone();
        long.push(0);
        let err = DoAbcTag::parse_record(&long).unwrap_err();
        assert!(err.message.contains("trailing"));
    }

    #[test]
    fn test_raw_and_foreign_tags() {
        let raw = record(TAG_DO_ABC_RAW, &[1, 2]);
        let tag = DoAbcTag::parse_record(&raw).unwrap();
        assert_eq!(tag.abc, &[1, 2]);
        assert_eq!(tag.name, "");

        let other = record(1, &[]);
        let err = DoAbcTag::parse_record(&other).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unsupported);
    }
}
