//! Safe, typed access to the target's memory.
//!
//! Every call checks liveness first. Once the process is seen to be gone, either
//! by that check or after a backend failure, the latch closes and every later
//! call fails with `ProcessClosed` without touching the backend again.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::scan::{MAX_READ_SIZE, MAX_USER_ADDRESS};
use crate::config::traversal::MAX_STRING_LEN;
use crate::error::{Error, Result};
use crate::memory::value::{MSVC_STRING_SIZE, StringRule, TextEncoding};
use crate::memory::{ByteBuffer, FieldRule, ScratchPool, StructLayout, Value, ValueKind};
use crate::process::{MemoryRegion, ModuleInfo, ProcessMemory};

/// Bytes requested per step while looking for a string terminator.
const TEXT_STEP: usize = 64;

/// A position or direction vector as stored by the client.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Xyz {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

pub struct MemoryAccessor<P: ProcessMemory> {
    process: Arc<P>,
    closed: AtomicBool,
    scratch: Mutex<ScratchPool>,
}

impl<P: ProcessMemory> MemoryAccessor<P> {
    pub fn new(process: Arc<P>) -> Self {
        Self {
            process,
            closed: AtomicBool::new(false),
            scratch: Mutex::new(ScratchPool::new()),
        }
    }

    pub fn process(&self) -> &Arc<P> {
        &self.process
    }

    pub fn pid(&self) -> u32 {
        self.process.pid()
    }

    /// Whether memory operations may still be issued.
    pub fn is_alive(&self) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            return false;
        }
        if !self.process.is_alive() {
            self.mark_closed();
            return false;
        }
        true
    }

    /// Close the liveness latch. Idempotent.
    pub fn mark_closed(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!("PID {}: memory access closed", self.process.pid());
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_alive() {
            Ok(())
        } else {
            Err(Error::ProcessClosed)
        }
    }

    /// Translate a backend failure, closing the latch if the process is gone.
    fn backend_failure(&self, err: Error) -> Error {
        if matches!(err, Error::ProcessClosed) || !self.process.is_alive() {
            if !self.closed.load(Ordering::SeqCst) {
                warn!("PID {}: process exited ({})", self.process.pid(), err);
            }
            self.mark_closed();
            Error::ProcessClosed
        } else {
            err
        }
    }

    fn scratch(&self) -> MutexGuard<'_, ScratchPool> {
        self.scratch.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_range(address: u64, len: usize) -> std::result::Result<(), String> {
        if address == 0 {
            return Err("null address".to_string());
        }
        if len == 0 {
            return Err("zero-length access".to_string());
        }
        if len > MAX_READ_SIZE {
            return Err(format!("length {} exceeds limit {}", len, MAX_READ_SIZE));
        }
        match address.checked_add(len as u64) {
            Some(end) if end <= MAX_USER_ADDRESS + 1 => Ok(()),
            _ => Err(format!("range of {} bytes leaves user address space", len)),
        }
    }

    /// Read up to `len` bytes; the result is shorter when the readable range
    /// ends first.
    fn read_available(&self, address: u64, len: usize) -> Result<Vec<u8>> {
        self.ensure_open()?;
        Self::check_range(address, len).map_err(|msg| Error::read(address, msg))?;

        let data = self
            .process
            .read_bytes(address, len)
            .map_err(|e| self.backend_failure(e))?;
        if data.is_empty() {
            return Err(Error::read(address, "nothing readable"));
        }
        Ok(data)
    }

    pub fn read_bytes(&self, address: u64, len: usize) -> Result<Vec<u8>> {
        let data = self.read_available(address, len)?;
        if data.len() != len {
            return Err(Error::read(
                address,
                format!("partial read: {} of {} bytes", data.len(), len),
            ));
        }
        Ok(data)
    }

    pub fn write_bytes(&self, address: u64, data: &[u8]) -> Result<()> {
        self.ensure_open()?;
        Self::check_range(address, data.len()).map_err(|msg| Error::write(address, msg))?;

        let written = self
            .process
            .write_bytes(address, data)
            .map_err(|e| self.backend_failure(e))?;
        if written != data.len() {
            return Err(Error::write(
                address,
                format!("partial write: {} of {} bytes", written, data.len()),
            ));
        }
        Ok(())
    }

    pub fn regions(&self) -> Result<Vec<MemoryRegion>> {
        self.ensure_open()?;
        let mut regions = self
            .process
            .regions()
            .map_err(|e| self.backend_failure(e))?;
        regions.sort_by_key(|r| r.start);
        Ok(regions)
    }

    pub fn modules(&self) -> Result<Vec<ModuleInfo>> {
        self.ensure_open()?;
        self.process.modules().map_err(|e| self.backend_failure(e))
    }

    pub fn module(&self, name: &str) -> Result<ModuleInfo> {
        self.modules()?
            .into_iter()
            .find(|m| m.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| Error::read(0, format!("module {} is not loaded", name)))
    }

    fn read_array<const N: usize>(&self, address: u64) -> Result<[u8; N]> {
        let bytes = self.read_bytes(address, N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(&bytes);
        Ok(out)
    }

    pub fn read_u8(&self, address: u64) -> Result<u8> {
        Ok(self.read_array::<1>(address)?[0])
    }

    pub fn read_bool(&self, address: u64) -> Result<bool> {
        Ok(self.read_u8(address)? != 0)
    }

    pub fn read_i32(&self, address: u64) -> Result<i32> {
        Ok(i32::from_le_bytes(self.read_array(address)?))
    }

    pub fn read_u32(&self, address: u64) -> Result<u32> {
        Ok(u32::from_le_bytes(self.read_array(address)?))
    }

    pub fn read_u64(&self, address: u64) -> Result<u64> {
        Ok(u64::from_le_bytes(self.read_array(address)?))
    }

    pub fn read_f32(&self, address: u64) -> Result<f32> {
        Ok(f32::from_le_bytes(self.read_array(address)?))
    }

    /// Read a pointer; null is `None`.
    pub fn read_pointer(&self, address: u64) -> Result<Option<u64>> {
        Ok(Some(self.read_u64(address)?).filter(|&p| p != 0))
    }

    pub fn write_i32(&self, address: u64, value: i32) -> Result<()> {
        self.write_bytes(address, &value.to_le_bytes())
    }

    pub fn write_u64(&self, address: u64, value: u64) -> Result<()> {
        self.write_bytes(address, &value.to_le_bytes())
    }

    pub fn read_value(&self, address: u64, kind: &ValueKind) -> Result<Value> {
        match kind {
            ValueKind::Text { encoding, rule } => {
                self.read_text(address, *encoding, rule).map(Value::Text)
            }
            primitive => {
                let size = primitive.size().unwrap_or(0);
                let bytes = self.read_bytes(address, size)?;
                primitive.decode(&mut ByteBuffer::at(&bytes, address))
            }
        }
    }

    pub fn write_value(&self, address: u64, kind: &ValueKind, value: &Value) -> Result<()> {
        match kind {
            ValueKind::Text { encoding, rule } => {
                let text = value.as_str().ok_or_else(|| {
                    Error::InvalidLayout(format!("cannot store {} as text", value))
                })?;
                self.write_text(address, *encoding, rule, text)
            }
            primitive => self.write_bytes(address, &primitive.encode(value)?),
        }
    }

    /// Read the field described by `rule` relative to `base`.
    pub fn read_typed(&self, base: u64, rule: &FieldRule) -> Result<Value> {
        self.read_value(field_address(base, rule)?, &rule.kind)
    }

    pub fn write_typed(&self, base: u64, rule: &FieldRule, value: &Value) -> Result<()> {
        self.write_value(field_address(base, rule)?, &rule.kind, value)
    }

    pub fn read_field(&self, base: u64, layout: &StructLayout, name: &str) -> Result<Value> {
        self.read_typed(base, layout.field(name)?)
    }

    pub fn write_field(
        &self,
        base: u64,
        layout: &StructLayout,
        name: &str,
        value: &Value,
    ) -> Result<()> {
        self.write_typed(base, layout.field(name)?, value)
    }

    /// Read every field of `layout` at `base`.
    ///
    /// The fixed part of the structure is copied in a single read so the fields
    /// come from one moment in time; only heap string buffers need extra reads.
    pub fn read_record(&self, base: u64, layout: &StructLayout) -> Result<BTreeMap<String, Value>> {
        let span = layout.span();
        let mut fields = BTreeMap::new();
        if span == 0 {
            return Ok(fields);
        }

        let block = self.read_bytes(base, span)?;
        let buf = ByteBuffer::at(&block, base);
        for (name, rule) in &layout.fields {
            let offset = rule.offset as usize;
            let value = match &rule.kind {
                ValueKind::Text { encoding, rule } => {
                    let address = base + offset as u64;
                    Value::Text(match *rule {
                        StringRule::MsvcString { sso } => self.decode_msvc(
                            address,
                            buf.slice_at(offset, MSVC_STRING_SIZE)?,
                            *encoding,
                            sso,
                        )?,
                        StringRule::NullTerminated { max_len } => {
                            let bytes = buf.slice_at(offset, max_len)?;
                            let len = encoding.terminated_len(bytes).ok_or_else(|| {
                                Error::EncodingError(format!(
                                    "no terminator within {} bytes at {:#x}",
                                    max_len, address
                                ))
                            })?;
                            encoding.decode(&bytes[..len])?
                        }
                        StringRule::Fixed { len } => {
                            let bytes = buf.slice_at(offset, len)?;
                            let end = encoding.terminated_len(bytes).unwrap_or(len);
                            encoding.decode(&bytes[..end])?
                        }
                    })
                }
                primitive => {
                    let size = primitive.size().unwrap_or(0);
                    let mut field = ByteBuffer::at(buf.slice_at(offset, size)?, base + offset as u64);
                    primitive.decode(&mut field)?
                }
            };
            fields.insert(name.clone(), value);
        }
        Ok(fields)
    }

    /// Read `count` consecutive primitives.
    pub fn read_vector(&self, address: u64, kind: &ValueKind, count: usize) -> Result<Vec<Value>> {
        let size = kind
            .size()
            .ok_or_else(|| Error::InvalidLayout("vectors hold primitives only".to_string()))?;
        if count == 0 {
            return Ok(Vec::new());
        }
        let bytes = self.read_bytes(address, size * count)?;
        let mut buf = ByteBuffer::at(&bytes, address);
        (0..count).map(|_| kind.decode(&mut buf)).collect()
    }

    pub fn write_vector(&self, address: u64, kind: &ValueKind, values: &[Value]) -> Result<()> {
        if kind.size().is_none() {
            return Err(Error::InvalidLayout("vectors hold primitives only".to_string()));
        }
        if values.is_empty() {
            return Ok(());
        }
        let mut bytes = Vec::new();
        for value in values {
            bytes.extend_from_slice(&kind.encode(value)?);
        }
        self.write_bytes(address, &bytes)
    }

    pub fn read_xyz(&self, address: u64) -> Result<Xyz> {
        let values = self.read_vector(address, &ValueKind::F32, 3)?;
        let f = |i: usize| values[i].as_f64().unwrap_or_default() as f32;
        Ok(Xyz {
            x: f(0),
            y: f(1),
            z: f(2),
        })
    }

    pub fn write_xyz(&self, address: u64, xyz: Xyz) -> Result<()> {
        self.write_vector(
            address,
            &ValueKind::F32,
            &[Value::F32(xyz.x), Value::F32(xyz.y), Value::F32(xyz.z)],
        )
    }

    /// Read an `i32` discriminant and map it through `from_repr`.
    pub fn read_enum<T>(
        &self,
        address: u64,
        type_name: &'static str,
        from_repr: impl FnOnce(i32) -> Option<T>,
    ) -> Result<T> {
        let raw = self.read_i32(address)?;
        from_repr(raw).ok_or(Error::InvalidEnum {
            type_name,
            value: raw as i64,
        })
    }

    pub fn read_text(&self, address: u64, encoding: TextEncoding, rule: &StringRule) -> Result<String> {
        match *rule {
            StringRule::NullTerminated { max_len } => {
                let unit = encoding.unit();
                let mut bytes = Vec::new();
                while bytes.len() < max_len {
                    let step = TEXT_STEP.min(max_len - bytes.len());
                    let chunk = self.read_available(address + bytes.len() as u64, step)?;
                    let short = chunk.len() < step;
                    bytes.extend_from_slice(&chunk);
                    let whole = bytes.len() - bytes.len() % unit;
                    if let Some(len) = encoding.terminated_len(&bytes[..whole]) {
                        return encoding.decode(&bytes[..len]);
                    }
                    if short {
                        return Err(Error::read(
                            address,
                            format!("string runs past readable memory after {} bytes", bytes.len()),
                        ));
                    }
                }
                Err(Error::EncodingError(format!(
                    "no terminator within {} bytes at {:#x}",
                    max_len, address
                )))
            }
            StringRule::Fixed { len } => {
                let bytes = self.read_bytes(address, len)?;
                let end = encoding.terminated_len(&bytes).unwrap_or(len);
                encoding.decode(&bytes[..end])
            }
            StringRule::MsvcString { sso } => {
                let header = self.read_bytes(address, MSVC_STRING_SIZE)?;
                self.decode_msvc(address, &header, encoding, sso)
            }
        }
    }

    fn decode_msvc(
        &self,
        address: u64,
        header: &[u8],
        encoding: TextEncoding,
        sso: usize,
    ) -> Result<String> {
        let buf = ByteBuffer::at(header, address);
        let count = buf.read_u64_at(16)? as usize;
        if count == 0 {
            return Ok(String::new());
        }
        if count > MAX_STRING_LEN {
            return Err(Error::EncodingError(format!(
                "implausible string length {} at {:#x}",
                count, address
            )));
        }

        let byte_len = count * encoding.unit();
        if byte_len < sso.min(16) {
            return encoding.decode(buf.slice_at(0, byte_len)?);
        }
        let heap = buf
            .read_u64_at(0)
            .ok()
            .filter(|&p| p != 0)
            .ok_or_else(|| Error::read(address, "null string buffer"))?;
        encoding.decode(&self.read_bytes(heap, byte_len)?)
    }

    pub fn write_text(
        &self,
        address: u64,
        encoding: TextEncoding,
        rule: &StringRule,
        text: &str,
    ) -> Result<()> {
        let unit = encoding.unit();
        let mut encoded = encoding.encode(text);
        let too_long = |limit: usize| {
            Error::EncodingError(format!(
                "{} bytes of text do not fit in {} bytes",
                encoded.len(),
                limit
            ))
        };

        match *rule {
            StringRule::NullTerminated { max_len } => {
                if encoded.len() + unit > max_len {
                    return Err(too_long(max_len));
                }
                encoded.resize(encoded.len() + unit, 0);
                self.write_bytes(address, &encoded)
            }
            StringRule::Fixed { len } => {
                if encoded.len() > len {
                    return Err(too_long(len));
                }
                encoded.resize(len, 0);
                self.write_bytes(address, &encoded)
            }
            StringRule::MsvcString { sso } => {
                let count = (encoded.len() / unit) as u64;
                if count as usize > MAX_STRING_LEN {
                    return Err(too_long(MAX_STRING_LEN * unit));
                }
                let sso = sso.min(16);
                let previous = self.scratch_buffer(address, unit, sso)?;
                let mut header = vec![0u8; MSVC_STRING_SIZE];
                let mut staged = None;
                let capacity = if encoded.len() < sso {
                    header[..encoded.len()].copy_from_slice(&encoded);
                    (sso / unit - 1) as u64
                } else {
                    encoded.resize(encoded.len() + unit, 0);
                    let heap = self.allocate(encoded.len())?;
                    staged = Some(heap);
                    header[..8].copy_from_slice(&heap.to_le_bytes());
                    count
                };
                header[16..24].copy_from_slice(&count.to_le_bytes());
                header[24..32].copy_from_slice(&capacity.to_le_bytes());

                let written = match staged {
                    Some(heap) => self
                        .write_bytes(heap, &encoded)
                        .and_then(|()| self.write_bytes(address, &header)),
                    None => self.write_bytes(address, &header),
                };
                if let Err(e) = written {
                    if let Some(heap) = staged
                        && let Err(free_err) = self.scratch().free(heap)
                    {
                        debug!("Failed to return string buffer {:#x}: {}", heap, free_err);
                    }
                    return Err(e);
                }

                // The field no longer points at the old buffer.
                match previous {
                    Some(old) => self.free(old),
                    None => Ok(()),
                }
            }
        }
    }

    /// The heap buffer of the string at `address`, if it came from the scratch
    /// pool.
    fn scratch_buffer(&self, address: u64, unit: usize, sso: usize) -> Result<Option<u64>> {
        let header = self.read_bytes(address, MSVC_STRING_SIZE)?;
        let buf = ByteBuffer::at(&header, address);
        let count = buf.read_u64_at(16)? as usize;
        if count.saturating_mul(unit) < sso {
            return Ok(None);
        }
        let pointer = buf.read_u64_at(0)?;
        Ok(Some(pointer).filter(|&p| self.scratch().is_live(p)))
    }

    /// Allocate a scratch block inside the target.
    pub fn allocate(&self, size: usize) -> Result<u64> {
        self.ensure_open()?;
        self.scratch().allocate(size, |len| {
            self.process
                .allocate_pages(len)
                .map_err(|e| self.backend_failure(e))
        })
    }

    /// Return a scratch block to the pool.
    pub fn free(&self, address: u64) -> Result<()> {
        self.ensure_open()?;
        self.scratch().free(address)
    }

    /// Commit executable pages within rel32 reach of `near`, outside the
    /// scratch pool.
    pub fn allocate_code_near(&self, size: usize, near: u64) -> Result<u64> {
        self.ensure_open()?;
        self.process
            .allocate_pages_near(size, near)
            .map_err(|e| self.backend_failure(e))
    }

    /// Release pages from `allocate_code_near`.
    pub fn free_code(&self, address: u64) -> Result<()> {
        self.ensure_open()?;
        self.process
            .free_pages(address)
            .map_err(|e| self.backend_failure(e))
    }

    pub fn scratch_live_count(&self) -> usize {
        self.scratch().live_count()
    }

    /// Release every scratch page back to the target, bypassing the liveness
    /// latch. Returns the number of pages released.
    pub fn release_scratch(&self) -> usize {
        let pages = self.scratch().drain();
        for &page in &pages {
            if let Err(e) = self.process.free_pages(page) {
                debug!("Failed to free scratch page {:#x}: {}", page, e);
            }
        }
        pages.len()
    }
}

fn field_address(base: u64, rule: &FieldRule) -> Result<u64> {
    base.checked_add(rule.offset)
        .ok_or_else(|| Error::read(base, format!("field offset {:#x} overflows", rule.offset)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::{MockMemoryBuilder, MockProcess};

    fn accessor(mock: MockProcess) -> (Arc<MockProcess>, MemoryAccessor<MockProcess>) {
        let process = Arc::new(mock);
        (Arc::clone(&process), MemoryAccessor::new(process))
    }

    #[test]
    fn test_typed_reads() {
        let (_, memory) = accessor(
            MockMemoryBuilder::new()
                .write_i32(0x1000, -7)
                .write_u64(0x1008, 0xABCD)
                .write_f32(0x1010, 0.5)
                .build(),
        );

        assert_eq!(memory.read_i32(0x1000).unwrap(), -7);
        assert_eq!(memory.read_pointer(0x1008).unwrap(), Some(0xABCD));
        assert_eq!(
            memory.read_value(0x1010, &ValueKind::F32).unwrap(),
            Value::F32(0.5)
        );
    }

    #[test]
    fn test_partial_read_is_error() {
        let (_, memory) = accessor(MockMemoryBuilder::new().region(0x1000, 0x10).build());
        assert!(matches!(
            memory.read_bytes(0x100C, 8),
            Err(Error::MemoryReadError { address: 0x100C, .. })
        ));
    }

    #[test]
    fn test_bounds_are_checked_before_backend() {
        let (mock, memory) = accessor(MockMemoryBuilder::new().region(0x1000, 0x10).build());
        assert!(memory.read_bytes(0, 4).is_err());
        assert!(memory.read_bytes(0x1000, 0).is_err());
        assert!(memory.read_bytes(MAX_USER_ADDRESS, 8).is_err());
        assert!(memory.write_bytes(0, &[1]).is_err());
        assert_eq!(mock.read_count(), 0);
        assert_eq!(mock.write_count(), 0);
    }

    #[test]
    fn test_closed_process_latches() {
        let (mock, memory) = accessor(MockMemoryBuilder::new().region(0x1000, 0x10).build());
        mock.set_alive(false);

        assert!(matches!(memory.read_u32(0x1000), Err(Error::ProcessClosed)));
        // The exit is noticed before the backend is asked.
        let reads = mock.read_count();
        assert_eq!(reads, 0);

        // Even if the backend came back, the latch stays closed.
        mock.set_alive(true);
        assert!(matches!(memory.read_u32(0x1000), Err(Error::ProcessClosed)));
        assert!(matches!(
            memory.write_bytes(0x1000, &[1]),
            Err(Error::ProcessClosed)
        ));
        assert_eq!(mock.read_count(), reads);
        assert!(!memory.is_alive());
    }

    #[test]
    fn test_read_error_on_live_process_is_not_closed() {
        let (_, memory) = accessor(MockMemoryBuilder::new().region(0x1000, 0x10).build());
        assert!(matches!(
            memory.read_u32(0x9000),
            Err(Error::MemoryReadError { .. })
        ));
        assert!(memory.is_alive());
    }

    #[test]
    fn test_read_enum() {
        let (_, memory) = accessor(
            MockMemoryBuilder::new()
                .write_i32(0x1000, 2)
                .write_i32(0x1004, 99)
                .build(),
        );
        let from = |v: i32| (0..=7).contains(&v).then_some(v as u8);
        assert_eq!(memory.read_enum(0x1000, "phase", from).unwrap(), 2);
        assert!(matches!(
            memory.read_enum(0x1004, "phase", from),
            Err(Error::InvalidEnum { value: 99, .. })
        ));
    }

    #[test]
    fn test_msvc_string_inline_and_heap() {
        let long = "Storm Lord of the Tempest";
        let (_, memory) = accessor(
            MockMemoryBuilder::new()
                .region(0x1000, 0x40)
                .write_utf8(0x1000, "Fire Cat")
                .write_u64(0x1010, 8)
                .write_u64(0x1020, 0x2000)
                .write_u64(0x1030, long.len() as u64)
                .write_utf8(0x2000, long)
                .build(),
        );

        let rule = StringRule::msvc();
        assert_eq!(
            memory.read_text(0x1000, TextEncoding::Utf8, &rule).unwrap(),
            "Fire Cat"
        );
        assert_eq!(
            memory.read_text(0x1020, TextEncoding::Utf8, &rule).unwrap(),
            long
        );
    }

    #[test]
    fn test_msvc_wstring_uses_heap_above_seven_chars() {
        let text = "Spellbook";
        let (_, memory) = accessor(
            MockMemoryBuilder::new()
                .region(0x1000, 0x20)
                .write_u64(0x1000, 0x3000)
                .write_u64(0x1010, text.len() as u64)
                .write_bytes(0x3000, &TextEncoding::Utf16Le.encode(text))
                .build(),
        );
        assert_eq!(
            memory
                .read_text(0x1000, TextEncoding::Utf16Le, &StringRule::msvc())
                .unwrap(),
            text
        );
    }

    #[test]
    fn test_invalid_utf8_fails() {
        let (_, memory) = accessor(
            MockMemoryBuilder::new()
                .write_bytes(0x1000, &[0x41, 0xFE, 0x42, 0x00])
                .build(),
        );
        assert!(matches!(
            memory.read_text(
                0x1000,
                TextEncoding::Utf8,
                &StringRule::Fixed { len: 4 }
            ),
            Err(Error::EncodingError(_))
        ));
    }

    #[test]
    fn test_null_terminated_round_trip() {
        let (_, memory) = accessor(MockMemoryBuilder::new().region(0x1000, 0x100).build());
        let rule = StringRule::NullTerminated { max_len: 0x100 };
        memory
            .write_text(0x1000, TextEncoding::Utf16Le, &rule, "Wizard City")
            .unwrap();
        assert_eq!(
            memory.read_text(0x1000, TextEncoding::Utf16Le, &rule).unwrap(),
            "Wizard City"
        );
        assert!(memory
            .write_text(0x1000, TextEncoding::Utf8, &StringRule::NullTerminated { max_len: 4 }, "abcd")
            .is_err());
    }

    #[test]
    fn test_long_msvc_write_uses_scratch() {
        let (mock, memory) = accessor(MockMemoryBuilder::new().region(0x1000, 0x40).build());
        let rule = StringRule::msvc();
        let name = "A name longer than sixteen bytes";

        memory.write_text(0x1000, TextEncoding::Utf8, &rule, name).unwrap();
        assert_eq!(memory.scratch_live_count(), 1);
        assert_eq!(mock.allocation_count(), 1);
        assert_eq!(
            memory.read_text(0x1000, TextEncoding::Utf8, &rule).unwrap(),
            name
        );

        memory.write_text(0x1000, TextEncoding::Utf8, &rule, "short").unwrap();
        assert_eq!(
            memory.read_text(0x1000, TextEncoding::Utf8, &rule).unwrap(),
            "short"
        );
    }

    #[test]
    fn test_rewriting_long_msvc_string_frees_old_buffer() {
        let (mock, memory) = accessor(MockMemoryBuilder::new().region(0x1000, 0x40).build());
        let rule = StringRule::msvc();

        for round in 0..5 {
            let name = format!("Malistaire the Undying, phase {}", round);
            memory.write_text(0x1000, TextEncoding::Utf8, &rule, &name).unwrap();
            assert_eq!(memory.scratch_live_count(), 1);
            assert_eq!(
                memory.read_text(0x1000, TextEncoding::Utf8, &rule).unwrap(),
                name
            );
        }

        // A failed write keeps the old buffer and returns the new one.
        mock.set_fail_writes(true);
        assert!(memory
            .write_text(0x1000, TextEncoding::Utf8, &rule, "Another name that needs the heap")
            .is_err());
        assert_eq!(memory.scratch_live_count(), 1);
        mock.set_fail_writes(false);

        memory.write_text(0x1000, TextEncoding::Utf8, &rule, "Bob").unwrap();
        assert_eq!(memory.scratch_live_count(), 0);
    }

    #[test]
    fn test_null_terminated_near_region_end() {
        let (_, memory) = accessor(
            MockMemoryBuilder::new()
                .region(0x1000, 0x10)
                .write_bytes(0x1008, b"abc\0")
                .write_bytes(0x100C, b"defg")
                .build(),
        );
        let rule = StringRule::NullTerminated { max_len: 256 };
        assert_eq!(
            memory.read_text(0x1008, TextEncoding::Utf8, &rule).unwrap(),
            "abc"
        );
        assert!(matches!(
            memory.read_text(0x100C, TextEncoding::Utf8, &rule),
            Err(Error::MemoryReadError { address: 0x100C, .. })
        ));
    }

    #[test]
    fn test_free_after_close_fails() {
        let (_, memory) = accessor(MockProcess::new(1));
        let block = memory.allocate(64).unwrap();
        memory.mark_closed();
        assert!(matches!(memory.free(block), Err(Error::ProcessClosed)));
    }

    #[test]
    fn test_read_record_single_block() {
        let layout = StructLayout::new("stats")
            .with_field("hp", 0, ValueKind::I32)
            .with_field("mana", 4, ValueKind::I32)
            .with_field("name", 8, ValueKind::msvc_string());
        let (mock, memory) = accessor(
            MockMemoryBuilder::new()
                .region(0x1000, 0x40)
                .write_i32(0x1000, 500)
                .write_i32(0x1004, 30)
                .write_utf8(0x1008, "Malistaire")
                .write_u64(0x1018, 10)
                .build(),
        );

        mock.reset_counters();
        let record = memory.read_record(0x1000, &layout).unwrap();
        assert_eq!(mock.read_count(), 1);
        assert_eq!(record["hp"], Value::I32(500));
        assert_eq!(record["name"], Value::Text("Malistaire".to_string()));
    }

    #[test]
    fn test_vectors_and_xyz() {
        let (_, memory) = accessor(MockMemoryBuilder::new().region(0x1000, 0x20).build());
        let pos = Xyz {
            x: 1.0,
            y: -2.5,
            z: 300.0,
        };
        memory.write_xyz(0x1000, pos).unwrap();
        assert_eq!(memory.read_xyz(0x1000).unwrap(), pos);

        memory
            .write_vector(0x1010, &ValueKind::U8, &[Value::U8(1), Value::I32(2)])
            .unwrap();
        assert_eq!(
            memory.read_vector(0x1010, &ValueKind::U8, 2).unwrap(),
            vec![Value::U8(1), Value::U8(2)]
        );
    }

    #[test]
    fn test_scratch_release_bypasses_latch() {
        let (mock, memory) = accessor(MockProcess::new(1));
        let a = memory.allocate(8).unwrap();
        memory.allocate(PAGE_BYTES).unwrap();
        memory.free(a).unwrap();
        assert!(matches!(memory.free(a), Err(Error::InvalidFree { .. })));

        memory.mark_closed();
        assert!(matches!(memory.allocate(8), Err(Error::ProcessClosed)));
        assert_eq!(memory.release_scratch(), 2);
        assert_eq!(mock.live_allocations(), 0);
    }

    const PAGE_BYTES: usize = crate::config::scratch::PAGE_SIZE;
}
