use super::{Result, TlvError, MAX_RECORD_LEN};

/// A single decoded record header plus its raw payload slice.
pub struct RawRecord<'a> {
    pub tag: u16,
    pub payload: &'a [u8],
}

/// Cursor-based reader over a TLV byte buffer. `read_record` consumes one
/// `<tag, length, payload>` triple at a time; callers iterate until the
/// cursor reaches the end of the bounding slice they were handed (the
/// enclosing composite's declared length, or the whole buffer at the top
/// level).
pub struct TlvReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> TlvReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        TlvReader { buf, pos: 0 }
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Reads the next `<tag, length, payload>` triple. Fails with
    /// `TlvTruncated` if fewer than 6 bytes remain for the header, or the
    /// declared length runs past the end of the buffer this reader was
    /// constructed over; fails with `TlvBadLength` if the declared length
    /// exceeds `MAX_RECORD_LEN`.
    pub fn read_record(&mut self) -> Result<RawRecord<'a>> {
        if self.remaining() < 6 {
            return Err(TlvError::TlvTruncated { tag: 0 });
        }
        let tag = u16::from_be_bytes([self.buf[self.pos], self.buf[self.pos + 1]]);
        let len = u32::from_be_bytes([
            self.buf[self.pos + 2],
            self.buf[self.pos + 3],
            self.buf[self.pos + 4],
            self.buf[self.pos + 5],
        ]);
        if len > MAX_RECORD_LEN {
            return Err(TlvError::TlvBadLength {
                len,
                max: MAX_RECORD_LEN,
            });
        }
        let payload_start = self.pos + 6;
        let payload_end = payload_start
            .checked_add(len as usize)
            .ok_or(TlvError::TlvTruncated { tag })?;
        if payload_end > self.buf.len() {
            return Err(TlvError::TlvTruncated { tag });
        }
        let payload = &self.buf[payload_start..payload_end];
        self.pos = payload_end;
        Ok(RawRecord { tag, payload })
    }

    /// Reads the next record and asserts its tag matches `expected`.
    pub fn read_tagged(&mut self, expected: u16) -> Result<RawRecord<'a>> {
        let rec = self.read_record()?;
        if rec.tag != expected {
            return Err(TlvError::TlvUnexpectedTag {
                expected,
                found: rec.tag,
            });
        }
        Ok(rec)
    }
}

/// Parses a `u32` primitive record's payload (fixed 4-byte big-endian).
pub fn parse_u32(payload: &[u8]) -> Result<u32> {
    if payload.len() != 4 {
        return Err(TlvError::TlvTruncated { tag: 0 });
    }
    Ok(u32::from_be_bytes(payload.try_into().unwrap()))
}

/// Parses an `i64` primitive record's payload (fixed 8-byte big-endian).
pub fn parse_i64(payload: &[u8]) -> Result<i64> {
    if payload.len() != 8 {
        return Err(TlvError::TlvTruncated { tag: 0 });
    }
    Ok(i64::from_be_bytes(payload.try_into().unwrap()))
}

/// Parses a length-prefixed, NUL-terminated string record payload.
pub fn parse_string(payload: &[u8]) -> Result<String> {
    if payload.is_empty() || payload[payload.len() - 1] != 0 {
        return Err(TlvError::TlvBadString);
    }
    let bytes = &payload[..payload.len() - 1];
    String::from_utf8(bytes.to_vec()).map_err(|_| TlvError::TlvBadString)
}

/// Parses a composite "sequence of length-prefixed strings" payload —
/// each child is itself a record whose tag is ignored (strings inside a
/// string-vector composite don't need distinct tags since their order is
/// the only thing that matters).
pub fn parse_string_vec(payload: &[u8]) -> Result<Vec<String>> {
    let mut reader = TlvReader::new(payload);
    let mut out = Vec::new();
    while !reader.is_empty() {
        let rec = reader.read_record()?;
        out.push(parse_string(rec.payload)?);
    }
    Ok(out)
}
