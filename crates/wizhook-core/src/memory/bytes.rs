//! Position-tracking reader over a block of bytes copied out of the target.
//!
//! Errors carry the target address the failing byte would have come from, so a
//! truncated structure read reports the same address a direct read would.

use crate::error::{Error, Result};

pub struct ByteBuffer<'a> {
    data: &'a [u8],
    base: u64,
    pos: usize,
}

impl<'a> ByteBuffer<'a> {
    /// Wrap bytes that were read from `base` in the target.
    pub fn at(data: &'a [u8], base: u64) -> Self {
        Self { data, base, pos: 0 }
    }

    pub fn new(data: &'a [u8]) -> Self {
        Self::at(data, 0)
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    pub fn set_position(&mut self, pos: usize) -> Result<()> {
        if pos > self.data.len() {
            return Err(Error::read(
                self.base + pos as u64,
                format!("position {} exceeds buffer length {}", pos, self.data.len()),
            ));
        }
        self.pos = pos;
        Ok(())
    }

    pub fn skip(&mut self, count: usize) -> Result<()> {
        self.set_position(self.pos.saturating_add(count))
    }

    /// Bytes at `offset` without moving the cursor.
    pub fn slice_at(&self, offset: usize, len: usize) -> Result<&'a [u8]> {
        let end = offset
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| {
                Error::read(
                    self.base + offset as u64,
                    format!(
                        "range {}..{} exceeds buffer length {}",
                        offset,
                        offset.saturating_add(len),
                        self.data.len()
                    ),
                )
            })?;
        Ok(&self.data[offset..end])
    }

    pub fn read_bytes(&mut self, count: usize) -> Result<&'a [u8]> {
        let bytes = self.slice_at(self.pos, count)?;
        self.pos += count;
        Ok(bytes)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let bytes = self.read_bytes(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    fn array_at<const N: usize>(&self, offset: usize) -> Result<[u8; N]> {
        let bytes = self.slice_at(offset, N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.array::<1>()?[0])
    }

    pub fn read_i8(&mut self) -> Result<i8> {
        Ok(self.read_u8()? as i8)
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_i16(&mut self) -> Result<i16> {
        Ok(i16::from_le_bytes(self.array()?))
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.array()?))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.array()?))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        Ok(f32::from_le_bytes(self.array()?))
    }

    pub fn read_f64(&mut self) -> Result<f64> {
        Ok(f64::from_le_bytes(self.array()?))
    }

    pub fn read_i32_at(&self, offset: usize) -> Result<i32> {
        Ok(i32::from_le_bytes(self.array_at(offset)?))
    }

    pub fn read_u32_at(&self, offset: usize) -> Result<u32> {
        Ok(u32::from_le_bytes(self.array_at(offset)?))
    }

    pub fn read_u64_at(&self, offset: usize) -> Result<u64> {
        Ok(u64::from_le_bytes(self.array_at(offset)?))
    }
}
