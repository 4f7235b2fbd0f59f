//! Hessian 1.0 / 2.0 decoder.
//!
//! Decoding is driven entirely by wire tags; no descriptor is needed.

use crate::descriptor::Version;
use crate::error::{HessianError, Result};
use crate::value::{List, Map, Object, Value};
use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use std::sync::Arc;

/// Default limit on composite nesting.
pub const DEFAULT_MAX_DEPTH: usize = 128;

struct ClassDefinition {
    name: String,
    fields: Vec<String>,
}

/// Pull decoder over a borrowed byte slice.
pub struct HessianReader<'a> {
    buf: &'a [u8],
    pos: usize,
    version: Version,
    /// Composites in the order they were opened; `None` while still being read.
    refs: Vec<Option<Value>>,
    types: Vec<String>,
    classes: Vec<ClassDefinition>,
    depth: usize,
    max_depth: usize,
}

impl<'a> HessianReader<'a> {
    pub fn new(buf: &'a [u8], version: Version) -> Self {
        Self {
            buf,
            pos: 0,
            version,
            refs: Vec::new(),
            types: Vec::new(),
            classes: Vec::new(),
            depth: 0,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    /// Caps how deeply lists, maps and objects may nest.
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn version(&self) -> Version {
        self.version
    }

    /// Offset of the next unread byte.
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Reads the next complete value.
    pub fn read_value(&mut self) -> Result<Value> {
        match self.version {
            Version::V1 => self.read_v1(),
            Version::V2 => self.read_v2(),
        }
    }

    fn nested<F>(&mut self, read: F) -> Result<Value>
    where
        F: FnOnce(&mut Self) -> Result<Value>,
    {
        if self.depth >= self.max_depth {
            return Err(HessianError::DepthLimitExceeded(self.max_depth));
        }
        self.depth += 1;
        let value = read(self);
        self.depth -= 1;
        value
    }

    fn eof(&self, needed: usize) -> HessianError {
        HessianError::UnexpectedEof {
            offset: self.pos,
            needed: needed - self.remaining(),
        }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(self.eof(n));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn peek_u8(&self) -> Result<u8> {
        self.buf.get(self.pos).copied().ok_or_else(|| self.eof(1))
    }

    fn read_u8(&mut self) -> Result<u8> {
        let b = self.peek_u8()?;
        self.pos += 1;
        Ok(b)
    }

    fn read_u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn read_i16(&mut self) -> Result<i16> {
        Ok(self.read_u16()? as i16)
    }

    fn read_i32(&mut self) -> Result<i32> {
        let b = self.take(4)?;
        Ok(i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_i64(&mut self) -> Result<i64> {
        let b = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(i64::from_be_bytes(raw))
    }

    fn unknown(&self, tag: u8) -> HessianError {
        HessianError::UnknownTag {
            tag,
            offset: self.pos.saturating_sub(1),
        }
    }

    /// Reads `units` UTF-16 code units of modified UTF-8 into `out`.
    fn read_utf16_units(&mut self, units: usize, out: &mut Vec<u16>) -> Result<()> {
        let start = self.pos;
        let mut read = 0;
        while read < units {
            let b0 = self.read_u8()? as u32;
            let cp = if b0 < 0x80 {
                b0
            } else if b0 & 0xe0 == 0xc0 {
                let b1 = self.read_u8()? as u32;
                ((b0 & 0x1f) << 6) | (b1 & 0x3f)
            } else if b0 & 0xf0 == 0xe0 {
                let b = self.take(2)?;
                ((b0 & 0x0f) << 12) | ((b[0] as u32 & 0x3f) << 6) | (b[1] as u32 & 0x3f)
            } else if b0 & 0xf8 == 0xf0 {
                let b = self.take(3)?;
                ((b0 & 0x07) << 18)
                    | ((b[0] as u32 & 0x3f) << 12)
                    | ((b[1] as u32 & 0x3f) << 6)
                    | (b[2] as u32 & 0x3f)
            } else {
                return Err(HessianError::InvalidUtf8(start));
            };
            if cp > 0xffff {
                let c = char::from_u32(cp).ok_or(HessianError::InvalidUtf8(start))?;
                let mut pair = [0u16; 2];
                out.extend_from_slice(c.encode_utf16(&mut pair));
                read += 2;
            } else {
                out.push(cp as u16);
                read += 1;
            }
        }
        Ok(())
    }

    fn finish_string(&self, units: Vec<u16>, start: usize) -> Result<String> {
        String::from_utf16(&units).map_err(|_| HessianError::InvalidUtf8(start))
    }

    fn open_ref(&mut self) -> usize {
        self.refs.push(None);
        self.refs.len() - 1
    }

    fn close_ref(&mut self, slot: usize, value: Value) -> Value {
        self.refs[slot] = Some(value.clone());
        value
    }

    fn resolve_ref(&self, index: u32) -> Result<Value> {
        match self.refs.get(index as usize) {
            Some(Some(value)) => Ok(value.clone()),
            _ => Err(HessianError::UnresolvedReference(index)),
        }
    }

    fn date_from_millis(&self, millis: i64) -> Result<Value> {
        Utc.timestamp_millis_opt(millis)
            .single()
            .map(Value::Date)
            .ok_or_else(|| HessianError::InvalidDate(millis.to_string()))
    }

    // ---- Hessian 2.0 ----

    fn read_v2(&mut self) -> Result<Value> {
        self.nested(Self::read_v2_tagged)
    }

    fn read_v2_tagged(&mut self) -> Result<Value> {
        let tag = self.read_u8()?;
        match tag {
            b'N' => Ok(Value::Null),
            b'T' => Ok(Value::Bool(true)),
            b'F' => Ok(Value::Bool(false)),

            0x80..=0xbf | 0xc0..=0xcf | 0xd0..=0xd7 | b'I' => {
                self.read_int_body(tag).map(Value::Int)
            }

            0xd8..=0xef => Ok(Value::Long(tag as i64 - 0xe0)),
            0xf0..=0xff => {
                let b0 = self.read_u8()? as i64;
                Ok(Value::Long(((tag as i64 - 0xf8) << 8) + b0))
            }
            0x38..=0x3f => {
                let b = self.take(2)?;
                Ok(Value::Long(
                    ((tag as i64 - 0x3c) << 16) + ((b[0] as i64) << 8) + b[1] as i64,
                ))
            }
            0x59 => Ok(Value::Long(self.read_i32()? as i64)),
            b'L' => Ok(Value::Long(self.read_i64()?)),

            0x5b => Ok(Value::Double(0.0)),
            0x5c => Ok(Value::Double(1.0)),
            0x5d => Ok(Value::Double(self.read_u8()? as i8 as f64)),
            0x5e => Ok(Value::Double(self.read_i16()? as f64)),
            0x5f => Ok(Value::Double(self.read_i32()? as f64 * 0.001)),
            b'D' => Ok(Value::Double(f64::from_bits(self.read_i64()? as u64))),

            0x4a => {
                let millis = self.read_i64()?;
                self.date_from_millis(millis)
            }
            0x4b => {
                let minutes = self.read_i32()? as i64;
                self.date_from_millis(minutes * 60_000)
            }

            0x00..=0x1f | 0x30..=0x33 | b'S' | b'R' => {
                self.read_string_body_v2(tag).map(Value::String)
            }

            0x20..=0x2f | 0x34..=0x37 | b'B' | b'A' => {
                self.read_binary_body_v2(tag).map(Value::Bytes)
            }

            0x55 => {
                let type_name = self.read_type_v2()?;
                self.read_list_until_end(Some(type_name))
            }
            0x57 => self.read_list_until_end(None),
            b'V' => {
                let type_name = self.read_type_v2()?;
                let len = self.read_length()?;
                self.read_list_fixed(Some(type_name), len)
            }
            b'X' => {
                let len = self.read_length()?;
                self.read_list_fixed(None, len)
            }
            0x70..=0x77 => {
                let type_name = self.read_type_v2()?;
                self.read_list_fixed(Some(type_name), (tag - 0x70) as usize)
            }
            0x78..=0x7f => self.read_list_fixed(None, (tag - 0x78) as usize),

            b'M' => {
                let type_name = self.read_type_v2()?;
                self.read_map_v2(Some(type_name))
            }
            b'H' => self.read_map_v2(None),

            b'C' => {
                let name = self.read_string_v2()?;
                let count = self.read_length()?;
                let mut fields = Vec::with_capacity(count.min(64));
                for _ in 0..count {
                    fields.push(self.read_string_v2()?);
                }
                self.classes.push(ClassDefinition { name, fields });
                self.read_v2()
            }
            b'O' => {
                let index = self.read_int_v2()?;
                self.read_instance(index as u32)
            }
            0x60..=0x6f => self.read_instance((tag - 0x60) as u32),

            b'Q' => {
                let index = self.read_int_v2()?;
                self.resolve_ref(index as u32)
            }

            _ => Err(self.unknown(tag)),
        }
    }

    fn read_int_body(&mut self, tag: u8) -> Result<i32> {
        match tag {
            0x80..=0xbf => Ok(tag as i32 - 0x90),
            0xc0..=0xcf => {
                let b0 = self.read_u8()? as i32;
                Ok(((tag as i32 - 0xc8) << 8) + b0)
            }
            0xd0..=0xd7 => {
                let b = self.take(2)?;
                Ok(((tag as i32 - 0xd4) << 16) + ((b[0] as i32) << 8) + b[1] as i32)
            }
            b'I' => self.read_i32(),
            _ => Err(self.unknown(tag)),
        }
    }

    fn read_int_v2(&mut self) -> Result<i32> {
        let tag = self.read_u8()?;
        self.read_int_body(tag)
    }

    fn read_length(&mut self) -> Result<usize> {
        let len = match self.version {
            Version::V1 => self.read_i32()?,
            Version::V2 => self.read_int_v2()?,
        };
        usize::try_from(len).map_err(|_| HessianError::OutOfRange {
            value: len.to_string(),
            target: "length",
        })
    }

    fn read_string_v2(&mut self) -> Result<String> {
        let tag = self.read_u8()?;
        self.read_string_body_v2(tag)
    }

    fn read_string_body_v2(&mut self, first: u8) -> Result<String> {
        let start = self.pos;
        let mut units = Vec::new();
        let mut tag = first;
        loop {
            let (len, last) = match tag {
                0x00..=0x1f => (tag as usize, true),
                0x30..=0x33 => {
                    let b0 = self.read_u8()? as usize;
                    ((((tag - 0x30) as usize) << 8) + b0, true)
                }
                b'S' => (self.read_u16()? as usize, true),
                b'R' => (self.read_u16()? as usize, false),
                _ => return Err(self.unknown(tag)),
            };
            self.read_utf16_units(len, &mut units)?;
            if last {
                break;
            }
            tag = self.read_u8()?;
        }
        self.finish_string(units, start)
    }

    fn read_binary_body_v2(&mut self, first: u8) -> Result<Bytes> {
        let mut out = Vec::new();
        let mut tag = first;
        loop {
            let (len, last) = match tag {
                0x20..=0x2f => ((tag - 0x20) as usize, true),
                0x34..=0x37 => {
                    let b0 = self.read_u8()? as usize;
                    ((((tag - 0x34) as usize) << 8) + b0, true)
                }
                b'B' => (self.read_u16()? as usize, true),
                b'A' => (self.read_u16()? as usize, false),
                _ => return Err(self.unknown(tag)),
            };
            out.extend_from_slice(self.take(len)?);
            if last {
                break;
            }
            tag = self.read_u8()?;
        }
        Ok(Bytes::from(out))
    }

    /// A v2 type is either a new type string or an index into the type table.
    fn read_type_v2(&mut self) -> Result<String> {
        let tag = self.read_u8()?;
        match tag {
            0x00..=0x1f | 0x30..=0x33 | b'S' | b'R' => {
                let name = self.read_string_body_v2(tag)?;
                self.types.push(name.clone());
                Ok(name)
            }
            _ => {
                let index = self.read_int_body(tag)?;
                self.types
                    .get(index as usize)
                    .cloned()
                    .ok_or(HessianError::UnknownTypeReference(index as u32))
            }
        }
    }

    fn end_tag(&self) -> u8 {
        match self.version {
            Version::V1 => b'z',
            Version::V2 => b'Z',
        }
    }

    fn read_list_until_end(&mut self, type_name: Option<String>) -> Result<Value> {
        let slot = self.open_ref();
        let end = self.end_tag();
        let mut items = Vec::new();
        while self.peek_u8()? != end {
            items.push(self.read_value()?);
        }
        self.pos += 1;
        Ok(self.close_ref(slot, list_value(type_name, items)))
    }

    fn read_list_fixed(&mut self, type_name: Option<String>, len: usize) -> Result<Value> {
        let slot = self.open_ref();
        let mut items = Vec::with_capacity(len.min(self.remaining()));
        for _ in 0..len {
            items.push(self.read_value()?);
        }
        Ok(self.close_ref(slot, list_value(type_name, items)))
    }

    fn read_map_v2(&mut self, type_name: Option<String>) -> Result<Value> {
        let slot = self.open_ref();
        let mut entries = Vec::new();
        while self.peek_u8()? != b'Z' {
            let key = self.read_v2()?;
            let value = self.read_v2()?;
            entries.push((key, value));
        }
        self.pos += 1;
        let map = Map {
            type_name: type_name.filter(|t| !t.is_empty()),
            entries,
        };
        Ok(self.close_ref(slot, Value::Map(Arc::new(map))))
    }

    fn read_instance(&mut self, index: u32) -> Result<Value> {
        let (class_name, names) = match self.classes.get(index as usize) {
            Some(def) => (def.name.clone(), def.fields.clone()),
            None => return Err(HessianError::UnknownClassDefinition(index)),
        };
        let slot = self.open_ref();
        let mut fields = Vec::with_capacity(names.len());
        for name in names {
            let value = self.read_v2()?;
            fields.push((name, value));
        }
        let object = Object { class_name, fields };
        Ok(self.close_ref(slot, Value::Object(Arc::new(object))))
    }

    // ---- Hessian 1.0 ----

    fn read_v1(&mut self) -> Result<Value> {
        self.nested(Self::read_v1_tagged)
    }

    fn read_v1_tagged(&mut self) -> Result<Value> {
        let tag = self.read_u8()?;
        match tag {
            b'N' => Ok(Value::Null),
            b'T' => Ok(Value::Bool(true)),
            b'F' => Ok(Value::Bool(false)),
            b'I' => Ok(Value::Int(self.read_i32()?)),
            b'L' => Ok(Value::Long(self.read_i64()?)),
            b'D' => Ok(Value::Double(f64::from_bits(self.read_i64()? as u64))),
            b'd' => {
                let millis = self.read_i64()?;
                self.date_from_millis(millis)
            }
            b'S' | b's' => self.read_string_body_v1(tag).map(Value::String),
            b'B' | b'b' => self.read_binary_body_v1(tag).map(Value::Bytes),
            b'V' => {
                let type_name = self.read_optional_type_v1()?;
                if self.peek_u8()? == b'l' {
                    self.pos += 1;
                    self.read_i32()?;
                }
                self.read_list_until_end(type_name)
            }
            b'M' => {
                let type_name = self.read_optional_type_v1()?;
                self.read_map_v1(type_name)
            }
            b'R' => {
                let index = self.read_i32()?;
                self.resolve_ref(index as u32)
            }
            _ => Err(self.unknown(tag)),
        }
    }

    fn read_string_body_v1(&mut self, first: u8) -> Result<String> {
        let start = self.pos;
        let mut units = Vec::new();
        let mut tag = first;
        loop {
            let len = self.read_u16()? as usize;
            self.read_utf16_units(len, &mut units)?;
            match tag {
                b'S' => break,
                b's' => {}
                _ => return Err(self.unknown(tag)),
            }
            tag = self.read_u8()?;
        }
        self.finish_string(units, start)
    }

    fn read_binary_body_v1(&mut self, first: u8) -> Result<Bytes> {
        let mut out = Vec::new();
        let mut tag = first;
        loop {
            let len = self.read_u16()? as usize;
            out.extend_from_slice(self.take(len)?);
            match tag {
                b'B' => break,
                b'b' => {}
                _ => return Err(self.unknown(tag)),
            }
            tag = self.read_u8()?;
        }
        Ok(Bytes::from(out))
    }

    fn read_optional_type_v1(&mut self) -> Result<Option<String>> {
        if self.peek_u8()? != b't' {
            return Ok(None);
        }
        self.pos += 1;
        let start = self.pos;
        let len = self.read_u16()? as usize;
        let mut units = Vec::with_capacity(len);
        self.read_utf16_units(len, &mut units)?;
        let name = self.finish_string(units, start)?;
        Ok(Some(name).filter(|n| !n.is_empty()))
    }

    /// v1 has no separate object encoding: a typed map whose type is not a
    /// Java map class and whose keys are all strings is read as an object.
    fn read_map_v1(&mut self, type_name: Option<String>) -> Result<Value> {
        let slot = self.open_ref();
        let mut entries = Vec::new();
        while self.peek_u8()? != b'z' {
            let key = self.read_v1()?;
            let value = self.read_v1()?;
            entries.push((key, value));
        }
        self.pos += 1;

        let value = match type_name {
            Some(class_name)
                if !is_map_class(&class_name)
                    && entries.iter().all(|(k, _)| matches!(k, Value::String(_))) =>
            {
                let fields = entries
                    .into_iter()
                    .filter_map(|(k, v)| match k {
                        Value::String(name) => Some((name, v)),
                        _ => None,
                    })
                    .collect();
                Value::Object(Arc::new(Object { class_name, fields }))
            }
            type_name => Value::Map(Arc::new(Map { type_name, entries })),
        };
        Ok(self.close_ref(slot, value))
    }
}

fn list_value(type_name: Option<String>, items: Vec<Value>) -> Value {
    Value::List(Arc::new(List {
        type_name: type_name.filter(|t| !t.is_empty()),
        items,
    }))
}

fn is_map_class(name: &str) -> bool {
    matches!(
        name,
        "java.util.Map"
            | "java.util.HashMap"
            | "java.util.LinkedHashMap"
            | "java.util.TreeMap"
            | "java.util.SortedMap"
            | "java.util.WeakHashMap"
            | "java.util.IdentityHashMap"
            | "java.util.EnumMap"
            | "java.util.concurrent.ConcurrentMap"
            | "java.util.concurrent.ConcurrentHashMap"
            | "java.util.concurrent.ConcurrentSkipListMap"
            | "java.util.Properties"
            | "java.util.Hashtable"
            | "java.util.Dictionary"
    )
}

/// Converts epoch milliseconds into a UTC timestamp.
pub fn millis_to_datetime(millis: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis).single()
}
