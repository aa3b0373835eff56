//! Protobuf wire format primitives.
//!
//! `WireReader` is a bounds-checked cursor over a byte slice: every length
//! prefix is validated against the remaining input before anything is
//! sliced or allocated. `WireWriter` is the matching append-only encoder.

use protocache_core::error::WireError;

/// Largest field number protobuf allows (2^29 - 1).
pub const MAX_FIELD_NUMBER: u32 = 536_870_911;

/// Maximum nesting of groups while skipping unknown fields, and of nested
/// message declarations in a descriptor set.
pub(crate) const MAX_NESTING_DEPTH: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WireType {
    Varint,
    Fixed64,
    Len,
    StartGroup,
    EndGroup,
    Fixed32,
}

impl WireType {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Varint),
            1 => Some(Self::Fixed64),
            2 => Some(Self::Len),
            3 => Some(Self::StartGroup),
            4 => Some(Self::EndGroup),
            5 => Some(Self::Fixed32),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            Self::Varint => 0,
            Self::Fixed64 => 1,
            Self::Len => 2,
            Self::StartGroup => 3,
            Self::EndGroup => 4,
            Self::Fixed32 => 5,
        }
    }
}

pub fn encode_zigzag32(v: i32) -> u32 {
    ((v << 1) ^ (v >> 31)) as u32
}

pub fn decode_zigzag32(v: u32) -> i32 {
    ((v >> 1) as i32) ^ -((v & 1) as i32)
}

pub fn encode_zigzag64(v: i64) -> u64 {
    ((v << 1) ^ (v >> 63)) as u64
}

pub fn decode_zigzag64(v: u64) -> i64 {
    ((v >> 1) as i64) ^ -((v & 1) as i64)
}

/// Bounds-checked reader over a protobuf-encoded buffer.
#[derive(Debug, Clone)]
pub struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
    /// Offset of `buf[0]` within the outermost buffer, for error reporting.
    base: usize,
}

impl<'a> WireReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0, base: 0 }
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    /// Absolute offset of the cursor.
    pub fn offset(&self) -> usize {
        self.base + self.pos
    }

    pub fn read_varint(&mut self) -> Result<u64, WireError> {
        let start = self.offset();
        let mut value: u64 = 0;
        for i in 0..10 {
            let byte = *self
                .buf
                .get(self.pos)
                .ok_or(WireError::Truncated { offset: self.offset() })?;
            self.pos += 1;
            // The tenth byte may only contribute the single top bit.
            if i == 9 && byte > 1 {
                return Err(WireError::VarintOverflow { offset: start });
            }
            value |= u64::from(byte & 0x7f) << (7 * i);
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(WireError::VarintOverflow { offset: start })
    }

    /// Read a field tag, rejecting field number 0, out-of-range numbers and
    /// the reserved wire types 6 and 7.
    pub fn read_tag(&mut self) -> Result<(u32, WireType), WireError> {
        let offset = self.offset();
        let key = self.read_varint()?;
        let number = key >> 3;
        if number == 0 || number > u64::from(MAX_FIELD_NUMBER) {
            return Err(WireError::InvalidFieldNumber { number, offset });
        }
        let raw = (key & 0x7) as u8;
        let wire_type =
            WireType::from_u8(raw).ok_or(WireError::InvalidWireType { wire_type: raw, offset })?;
        Ok((number as u32, wire_type))
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        if n > self.remaining() {
            return Err(WireError::Truncated {
                offset: self.base + self.buf.len(),
            });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn read_fixed32(&mut self) -> Result<u32, WireError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_fixed64(&mut self) -> Result<u64, WireError> {
        let b = self.take(8)?;
        Ok(u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
    }

    /// Read a length-delimited payload. The claimed length is checked
    /// against the remaining input before slicing.
    pub fn read_bytes(&mut self) -> Result<&'a [u8], WireError> {
        let len = self.read_varint()?;
        let remaining = self.remaining();
        if len > remaining as u64 {
            return Err(WireError::LengthOutOfBounds { len, remaining });
        }
        self.take(len as usize)
    }

    pub fn read_str(&mut self) -> Result<&'a str, WireError> {
        let offset = self.offset();
        let bytes = self.read_bytes()?;
        std::str::from_utf8(bytes).map_err(|_| WireError::InvalidUtf8 { offset })
    }

    /// Reader over the next length-delimited payload, keeping absolute
    /// offsets for error messages.
    pub fn read_nested(&mut self) -> Result<WireReader<'a>, WireError> {
        let len = self.read_varint()?;
        let remaining = self.remaining();
        if len > remaining as u64 {
            return Err(WireError::LengthOutOfBounds { len, remaining });
        }
        let base = self.offset();
        let buf = self.take(len as usize)?;
        Ok(WireReader { buf, pos: 0, base })
    }

    /// Skip the value of a field whose tag was just read and return the raw
    /// value bytes (including the length prefix or the closing group tag).
    pub fn skip_field(&mut self, number: u32, wire_type: WireType) -> Result<&'a [u8], WireError> {
        self.skip_field_at_depth(number, wire_type, 0)
    }

    fn skip_field_at_depth(
        &mut self,
        number: u32,
        wire_type: WireType,
        depth: usize,
    ) -> Result<&'a [u8], WireError> {
        let start = self.pos;
        match wire_type {
            WireType::Varint => {
                self.read_varint()?;
            }
            WireType::Fixed64 => {
                self.take(8)?;
            }
            WireType::Len => {
                self.read_bytes()?;
            }
            WireType::Fixed32 => {
                self.take(4)?;
            }
            WireType::StartGroup => {
                if depth >= MAX_NESTING_DEPTH {
                    return Err(WireError::NestingTooDeep {
                        limit: MAX_NESTING_DEPTH,
                    });
                }
                loop {
                    if self.is_empty() {
                        return Err(WireError::UnterminatedGroup { field: number });
                    }
                    let (inner, wt) = self.read_tag()?;
                    if wt == WireType::EndGroup {
                        if inner != number {
                            return Err(WireError::UnexpectedEndGroup { field: inner });
                        }
                        break;
                    }
                    self.skip_field_at_depth(inner, wt, depth + 1)?;
                }
            }
            WireType::EndGroup => return Err(WireError::UnexpectedEndGroup { field: number }),
        }
        Ok(&self.buf[start..self.pos])
    }
}

/// Append-only protobuf encoder.
#[derive(Debug, Default, Clone)]
pub struct WireWriter {
    buf: Vec<u8>,
}

impl WireWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn write_varint(&mut self, mut v: u64) {
        while v >= 0x80 {
            self.buf.push((v as u8) | 0x80);
            v >>= 7;
        }
        self.buf.push(v as u8);
    }

    pub fn write_tag(&mut self, number: u32, wire_type: WireType) {
        self.write_varint((u64::from(number) << 3) | u64::from(wire_type.as_u8()));
    }

    pub fn write_fixed32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_fixed64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    /// Length-prefixed payload (no tag).
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.write_varint(bytes.len() as u64);
        self.buf.extend_from_slice(bytes);
    }

    pub fn write_raw(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn write_varint_field(&mut self, number: u32, v: u64) {
        self.write_tag(number, WireType::Varint);
        self.write_varint(v);
    }

    pub fn write_bytes_field(&mut self, number: u32, bytes: &[u8]) {
        self.write_tag(number, WireType::Len);
        self.write_bytes(bytes);
    }

    pub fn write_str_field(&mut self, number: u32, s: &str) {
        self.write_bytes_field(number, s.as_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn varint_boundaries() {
        for v in [0u64, 1, 127, 128, 300, u32::MAX as u64, u64::MAX] {
            let mut w = WireWriter::new();
            w.write_varint(v);
            let bytes = w.into_inner();
            let mut r = WireReader::new(&bytes);
            assert_eq!(r.read_varint().unwrap(), v);
            assert!(r.is_empty());
        }
    }

    #[test]
    fn varint_too_long_is_rejected() {
        let bytes = [0xffu8; 11];
        let err = WireReader::new(&bytes).read_varint().unwrap_err();
        assert_eq!(err, WireError::VarintOverflow { offset: 0 });
    }

    #[test]
    fn truncated_varint() {
        let err = WireReader::new(&[0x80, 0x80]).read_varint().unwrap_err();
        assert_eq!(err, WireError::Truncated { offset: 2 });
    }

    #[test]
    fn oversized_length_prefix_fails_before_slicing() {
        // Claims 2^32 bytes with only two available.
        let mut w = WireWriter::new();
        w.write_varint(1 << 32);
        w.write_raw(&[1, 2]);
        let bytes = w.into_inner();
        let err = WireReader::new(&bytes).read_bytes().unwrap_err();
        assert_eq!(
            err,
            WireError::LengthOutOfBounds {
                len: 1 << 32,
                remaining: 2
            }
        );
    }

    #[test]
    fn tag_rejects_field_zero_and_reserved_wire_types() {
        assert!(matches!(
            WireReader::new(&[0x02]).read_tag(),
            Err(WireError::InvalidFieldNumber { number: 0, .. })
        ));
        assert!(matches!(
            WireReader::new(&[0x0e]).read_tag(),
            Err(WireError::InvalidWireType { wire_type: 6, .. })
        ));
    }

    #[test]
    fn zigzag() {
        assert_eq!(encode_zigzag32(-1), 1);
        assert_eq!(encode_zigzag32(1), 2);
        assert_eq!(decode_zigzag32(3), -2);
        assert_eq!(decode_zigzag64(encode_zigzag64(i64::MIN)), i64::MIN);
    }

    #[test]
    fn skip_group_returns_raw_bytes_through_end_tag() {
        let mut w = WireWriter::new();
        w.write_tag(5, WireType::StartGroup);
        w.write_varint_field(1, 42);
        w.write_tag(5, WireType::EndGroup);
        w.write_varint_field(2, 7);
        let bytes = w.into_inner();

        let mut r = WireReader::new(&bytes);
        let (n, wt) = r.read_tag().unwrap();
        let raw = r.skip_field(n, wt).unwrap();
        assert_eq!(raw, &[0x08, 42, 0x2c]);
        assert_eq!(r.read_tag().unwrap(), (2, WireType::Varint));
    }

    #[test]
    fn unterminated_group() {
        let mut w = WireWriter::new();
        w.write_tag(5, WireType::StartGroup);
        w.write_varint_field(1, 42);
        let bytes = w.into_inner();
        let mut r = WireReader::new(&bytes);
        let (n, wt) = r.read_tag().unwrap();
        assert_eq!(
            r.skip_field(n, wt).unwrap_err(),
            WireError::UnterminatedGroup { field: 5 }
        );
    }

    #[test]
    fn nested_reader_reports_absolute_offsets() {
        let mut w = WireWriter::new();
        w.write_bytes(&[0x80]);
        let bytes = w.into_inner();
        let mut outer = WireReader::new(&bytes);
        let mut inner = outer.read_nested().unwrap();
        assert_eq!(
            inner.read_varint().unwrap_err(),
            WireError::Truncated { offset: 2 }
        );
    }
}
