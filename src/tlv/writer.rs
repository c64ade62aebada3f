use super::{Result, TlvError, MAX_RECORD_LEN};

/// Appends length-tagged records to an in-memory buffer.
///
/// `begin_composite`/`end_composite` bracket a sequence of child records;
/// the composite's own length prefix is back-patched once the children
/// have been written, mirroring the fixed-size-header-then-patch pattern
/// used for wire packets elsewhere in this crate's lineage.
pub struct TlvWriter {
    buf: Vec<u8>,
    composite_starts: Vec<usize>,
}

impl TlvWriter {
    pub fn new() -> Self {
        TlvWriter {
            buf: Vec::new(),
            composite_starts: Vec::new(),
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        debug_assert!(self.composite_starts.is_empty());
        self.buf
    }

    /// Begin a composite record: writes the tag and a placeholder length.
    pub fn begin_composite(&mut self, tag: u16) {
        self.buf.extend_from_slice(&tag.to_be_bytes());
        self.composite_starts.push(self.buf.len());
        self.buf.extend_from_slice(&0u32.to_be_bytes());
    }

    /// Close the most recently opened composite, patching its length.
    pub fn end_composite(&mut self) -> Result<()> {
        let len_pos = self
            .composite_starts
            .pop()
            .expect("end_composite without matching begin_composite");
        let payload_len = (self.buf.len() - len_pos - 4) as u64;
        if payload_len > MAX_RECORD_LEN as u64 {
            return Err(TlvError::TlvBadLength {
                len: payload_len as u32,
                max: MAX_RECORD_LEN,
            });
        }
        let len_bytes = (payload_len as u32).to_be_bytes();
        self.buf[len_pos..len_pos + 4].copy_from_slice(&len_bytes);
        Ok(())
    }

    pub fn write_u32(&mut self, tag: u16, value: u32) {
        self.buf.extend_from_slice(&tag.to_be_bytes());
        self.buf.extend_from_slice(&4u32.to_be_bytes());
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_i64(&mut self, tag: u16, value: i64) {
        self.buf.extend_from_slice(&tag.to_be_bytes());
        self.buf.extend_from_slice(&8u32.to_be_bytes());
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    /// Writes a string payload as `[len: u32][bytes][0x00]`.
    pub fn write_string(&mut self, tag: u16, value: &str) {
        let mut payload = Vec::with_capacity(value.len() + 1);
        payload.extend_from_slice(value.as_bytes());
        payload.push(0);
        self.buf.extend_from_slice(&tag.to_be_bytes());
        self.buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        self.buf.extend_from_slice(&payload);
    }

    /// Writes a length-prefixed sequence of length-prefixed strings as one
    /// record's payload (used for `managers`, `friends`,
    /// `shared_user_id_hashes`).
    pub fn write_string_vec(&mut self, tag: u16, values: &[String]) {
        self.begin_composite(tag);
        for v in values {
            self.write_string(0, v);
        }
        self.end_composite().expect("string vec within max length");
    }

    pub fn write_bytes(&mut self, tag: u16, value: &[u8]) {
        self.buf.extend_from_slice(&tag.to_be_bytes());
        self.buf.extend_from_slice(&(value.len() as u32).to_be_bytes());
        self.buf.extend_from_slice(value);
    }
}

impl Default for TlvWriter {
    fn default() -> Self {
        Self::new()
    }
}
