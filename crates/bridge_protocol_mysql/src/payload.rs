//! Packet payload read/write cursor.
//!
//! All multi-byte integers are little-endian, unsigned. Length-encoded
//! integers use the standard 1/3/4/9-byte forms with 0xFC/0xFD/0xFE
//! prefixes. Decode underrun is always reported as `Truncated`; malformed
//! input is never silently repaired.

use bytes::{BufMut, BytesMut};

use bridge_common::error::ProtocolError;

type Result<T> = std::result::Result<T, ProtocolError>;

/// An ordered byte buffer with a read cursor and an append-only write end.
/// Payloads are transient: one per wire message, owned by the connection
/// that produced or is consuming it.
#[derive(Debug, Default)]
pub struct PacketPayload {
    buf: BytesMut,
    read_pos: usize,
}

impl PacketPayload {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            buf: BytesMut::from(bytes),
            read_pos: 0,
        }
    }

    /// Bytes not yet consumed by the read cursor.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.read_pos
    }

    /// The full encoded payload, independent of the read cursor.
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.buf.to_vec()
    }

    fn ensure(&self, need: usize) -> Result<()> {
        if self.remaining() < need {
            return Err(ProtocolError::Truncated {
                expected: need,
                actual: self.remaining(),
            });
        }
        Ok(())
    }

    fn take(&mut self, n: usize) -> &[u8] {
        let out = &self.buf[self.read_pos..self.read_pos + n];
        self.read_pos += n;
        out
    }

    // ── Fixed-width integers ─────────────────────────────────────────────

    pub fn read_int1(&mut self) -> Result<u8> {
        self.ensure(1)?;
        Ok(self.take(1)[0])
    }

    pub fn read_int2(&mut self) -> Result<u16> {
        self.ensure(2)?;
        let b = self.take(2);
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn read_int3(&mut self) -> Result<u32> {
        self.ensure(3)?;
        let b = self.take(3);
        Ok(u32::from_le_bytes([b[0], b[1], b[2], 0]))
    }

    pub fn read_int4(&mut self) -> Result<u32> {
        self.ensure(4)?;
        let b = self.take(4);
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_int6(&mut self) -> Result<u64> {
        self.ensure(6)?;
        let b = self.take(6);
        Ok(u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], 0, 0]))
    }

    pub fn read_int8(&mut self) -> Result<u64> {
        self.ensure(8)?;
        let b = self.take(8);
        let mut arr = [0u8; 8];
        arr.copy_from_slice(b);
        Ok(u64::from_le_bytes(arr))
    }

    pub fn write_int1(&mut self, v: u8) {
        self.buf.put_u8(v);
    }

    pub fn write_int2(&mut self, v: u16) {
        self.buf.put_u16_le(v);
    }

    pub fn write_int3(&mut self, v: u32) {
        debug_assert!(v < (1 << 24));
        self.buf.put_slice(&v.to_le_bytes()[..3]);
    }

    pub fn write_int4(&mut self, v: u32) {
        self.buf.put_u32_le(v);
    }

    pub fn write_int6(&mut self, v: u64) {
        debug_assert!(v < (1 << 48));
        self.buf.put_slice(&v.to_le_bytes()[..6]);
    }

    pub fn write_int8(&mut self, v: u64) {
        self.buf.put_u64_le(v);
    }

    // ── Length-encoded integers ──────────────────────────────────────────

    pub fn read_int_lenenc(&mut self) -> Result<u64> {
        let first = self.read_int1()?;
        match first {
            0xFC => Ok(self.read_int2()? as u64),
            0xFD => Ok(self.read_int3()? as u64),
            0xFE => self.read_int8(),
            0xFB | 0xFF => Err(ProtocolError::Malformed(format!(
                "invalid length-encoded integer prefix: 0x{first:02x}"
            ))),
            v => Ok(v as u64),
        }
    }

    pub fn write_int_lenenc(&mut self, v: u64) {
        if v < 0xFB {
            self.write_int1(v as u8);
        } else if v < (1 << 16) {
            self.write_int1(0xFC);
            self.write_int2(v as u16);
        } else if v < (1 << 24) {
            self.write_int1(0xFD);
            self.write_int3(v as u32);
        } else {
            self.write_int1(0xFE);
            self.write_int8(v);
        }
    }

    // ── Strings ──────────────────────────────────────────────────────────

    pub fn read_bytes_fix(&mut self, n: usize) -> Result<Vec<u8>> {
        self.ensure(n)?;
        Ok(self.take(n).to_vec())
    }

    pub fn read_string_fix(&mut self, n: usize, field: &'static str) -> Result<String> {
        let bytes = self.read_bytes_fix(n)?;
        String::from_utf8(bytes).map_err(|source| ProtocolError::InvalidUtf8 { field, source })
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.put_slice(bytes);
    }

    /// Read a NUL-terminated byte string; the terminator is consumed and
    /// excluded from the result. A missing terminator is an error, never a
    /// best-effort read to end of buffer.
    pub fn read_bytes_nul(&mut self) -> Result<Vec<u8>> {
        let rest = &self.buf[self.read_pos..];
        let nul = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or(ProtocolError::UnterminatedString)?;
        let out = rest[..nul].to_vec();
        self.read_pos += nul + 1;
        Ok(out)
    }

    pub fn read_string_nul(&mut self, field: &'static str) -> Result<String> {
        let bytes = self.read_bytes_nul()?;
        String::from_utf8(bytes).map_err(|source| ProtocolError::InvalidUtf8 { field, source })
    }

    /// Write a NUL-terminated byte string. An embedded NUL in the payload is
    /// an input-validation error, not a silent truncation.
    pub fn write_bytes_nul(&mut self, bytes: &[u8], field: &'static str) -> Result<()> {
        if bytes.contains(&0) {
            return Err(ProtocolError::EmbeddedNul { field });
        }
        self.buf.put_slice(bytes);
        self.buf.put_u8(0);
        Ok(())
    }

    pub fn write_string_nul(&mut self, s: &str, field: &'static str) -> Result<()> {
        self.write_bytes_nul(s.as_bytes(), field)
    }

    /// Read all remaining bytes (rest-of-packet encoding).
    pub fn read_bytes_eof(&mut self) -> Vec<u8> {
        let n = self.remaining();
        self.take(n).to_vec()
    }
}
