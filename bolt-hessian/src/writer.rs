//! Hessian 1.0 / 2.0 encoder.
//!
//! One writer covers one top-level serialization call: its reference table,
//! class-definition table and type table live exactly as long as the writer.

use crate::compiler::SchemaCompiler;
use crate::descriptor::{TypeDescriptor, Version};
use crate::error::{HessianError, Result};
use crate::value::Value;
use bytes::{BufMut, BytesMut};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Largest chunk (in UTF-16 units or bytes) written for strings and binary.
const CHUNK_SIZE: usize = 0x8000;

struct ClassDefinition {
    name: String,
    fields: Vec<String>,
}

/// Streaming Hessian encoder over a caller-owned buffer.
pub struct HessianWriter<'a> {
    buf: &'a mut BytesMut,
    version: Version,
    compiler: &'a SchemaCompiler,
    /// Object identity -> reference index.
    refs: HashMap<usize, u32>,
    next_ref: u32,
    classes: Vec<ClassDefinition>,
    types: HashMap<String, u32>,
}

impl<'a> HessianWriter<'a> {
    pub fn new(buf: &'a mut BytesMut, version: Version, compiler: &'a SchemaCompiler) -> Self {
        Self {
            buf,
            version,
            compiler,
            refs: HashMap::new(),
            next_ref: 0,
            classes: Vec::new(),
            types: HashMap::new(),
        }
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn compiler(&self) -> &'a SchemaCompiler {
        self.compiler
    }

    /// Number of bytes in the underlying buffer.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Encodes `value` as the type described by `descriptor`.
    pub fn write_with(&mut self, descriptor: &TypeDescriptor, value: &Value) -> Result<()> {
        let procedure = self.compiler.compile(descriptor, self.version);
        procedure.encode(self, value)
    }

    /// Encodes `value` using only its own runtime shape.
    pub fn write_value(&mut self, value: &Value) -> Result<()> {
        match value {
            Value::Null => {
                self.write_null();
                Ok(())
            }
            Value::Bool(b) => {
                self.write_bool(*b);
                Ok(())
            }
            Value::Int(v) => {
                self.write_int(*v);
                Ok(())
            }
            Value::Long(v) => {
                self.write_long(*v);
                Ok(())
            }
            Value::Double(v) => {
                self.write_double(*v);
                Ok(())
            }
            Value::String(s) => self.write_string(s),
            Value::Bytes(b) => self.write_binary(b),
            Value::Date(d) => {
                self.write_date(d);
                Ok(())
            }
            Value::List(list) => {
                if self.enter_composite(value.identity()) {
                    return Ok(());
                }
                self.begin_list(list.items.len(), list.type_name.as_deref().unwrap_or(""))?;
                for item in &list.items {
                    self.write_value(item)?;
                }
                self.end_list();
                Ok(())
            }
            Value::Map(map) => {
                if self.enter_composite(value.identity()) {
                    return Ok(());
                }
                self.begin_map(map.type_name.as_deref().unwrap_or(""))?;
                for (k, v) in &map.entries {
                    self.write_value(k)?;
                    self.write_value(v)?;
                }
                self.end_map();
                Ok(())
            }
            Value::Object(obj) => {
                if self.enter_composite(value.identity()) {
                    return Ok(());
                }
                let names: Vec<&str> = obj.fields.iter().map(|(n, _)| n.as_str()).collect();
                self.begin_object(&obj.class_name, &names)?;
                for (name, field) in &obj.fields {
                    self.write_field_name(name)?;
                    self.write_value(field)?;
                }
                self.end_object();
                Ok(())
            }
            Value::Typed(typed) => self.write_with(&typed.descriptor, &typed.value),
        }
    }

    /// Claims a slot in the reference table for a composite about to be
    /// written. If `identity` was already written in this call, a
    /// back-reference is emitted instead and `true` is returned.
    pub fn enter_composite(&mut self, identity: Option<usize>) -> bool {
        if let Some(id) = identity {
            if let Some(&index) = self.refs.get(&id) {
                self.write_ref(index);
                return true;
            }
            self.refs.insert(id, self.next_ref);
        }
        self.next_ref += 1;
        false
    }

    pub fn write_ref(&mut self, index: u32) {
        match self.version {
            Version::V1 => {
                self.buf.put_u8(b'R');
                self.buf.put_u32(index);
            }
            Version::V2 => {
                self.buf.put_u8(b'Q');
                self.write_int(index as i32);
            }
        }
    }

    pub fn write_null(&mut self) {
        self.buf.put_u8(b'N');
    }

    pub fn write_bool(&mut self, value: bool) {
        self.buf.put_u8(if value { b'T' } else { b'F' });
    }

    pub fn write_int(&mut self, value: i32) {
        if self.version == Version::V1 {
            self.buf.put_u8(b'I');
            self.buf.put_i32(value);
            return;
        }
        match value {
            -16..=47 => self.buf.put_u8((0x90 + value) as u8),
            -2048..=2047 => {
                self.buf.put_u8((0xc8 + (value >> 8)) as u8);
                self.buf.put_u8(value as u8);
            }
            -262144..=262143 => {
                self.buf.put_u8((0xd4 + (value >> 16)) as u8);
                self.buf.put_u8((value >> 8) as u8);
                self.buf.put_u8(value as u8);
            }
            _ => {
                self.buf.put_u8(b'I');
                self.buf.put_i32(value);
            }
        }
    }

    pub fn write_long(&mut self, value: i64) {
        if self.version == Version::V1 {
            self.buf.put_u8(b'L');
            self.buf.put_i64(value);
            return;
        }
        match value {
            -8..=15 => self.buf.put_u8((0xe0 + value) as u8),
            -2048..=2047 => {
                self.buf.put_u8((0xf8 + (value >> 8)) as u8);
                self.buf.put_u8(value as u8);
            }
            -262144..=262143 => {
                self.buf.put_u8((0x3c + (value >> 16)) as u8);
                self.buf.put_u8((value >> 8) as u8);
                self.buf.put_u8(value as u8);
            }
            v if v >= i32::MIN as i64 && v <= i32::MAX as i64 => {
                self.buf.put_u8(0x59);
                self.buf.put_i32(v as i32);
            }
            _ => {
                self.buf.put_u8(b'L');
                self.buf.put_i64(value);
            }
        }
    }

    pub fn write_double(&mut self, value: f64) {
        if self.version == Version::V2 && value.fract() == 0.0 && value.is_finite() {
            // Negative zero keeps the full form so the sign survives.
            if value == 0.0 && value.is_sign_positive() {
                self.buf.put_u8(0x5b);
                return;
            }
            if value == 1.0 {
                self.buf.put_u8(0x5c);
                return;
            }
            if (-128.0..=127.0).contains(&value) && value != 0.0 {
                self.buf.put_u8(0x5d);
                self.buf.put_i8(value as i8);
                return;
            }
            if (-32768.0..=32767.0).contains(&value) && value != 0.0 {
                self.buf.put_u8(0x5e);
                self.buf.put_i16(value as i16);
                return;
            }
        }
        self.buf.put_u8(b'D');
        self.buf.put_f64(value);
    }

    pub fn write_date(&mut self, value: &DateTime<Utc>) {
        self.write_date_millis(value.timestamp_millis());
    }

    pub fn write_date_millis(&mut self, millis: i64) {
        match self.version {
            Version::V1 => {
                self.buf.put_u8(b'd');
                self.buf.put_i64(millis);
            }
            Version::V2 => {
                let minutes = millis / 60_000;
                if millis % 60_000 == 0 && i32::try_from(minutes).is_ok() {
                    self.buf.put_u8(0x4b);
                    self.buf.put_i32(minutes as i32);
                } else {
                    self.buf.put_u8(0x4a);
                    self.buf.put_i64(millis);
                }
            }
        }
    }

    pub fn write_string(&mut self, value: &str) -> Result<()> {
        let mut chunk_start = 0;
        let mut units = 0usize;
        for (idx, ch) in value.char_indices() {
            let width = ch.len_utf16();
            if units + width > CHUNK_SIZE {
                self.write_string_chunk(&value[chunk_start..idx], units, false);
                chunk_start = idx;
                units = 0;
            }
            units += width;
        }
        self.write_string_chunk(&value[chunk_start..], units, true);
        Ok(())
    }

    fn write_string_chunk(&mut self, chunk: &str, units: usize, last: bool) {
        match (self.version, last) {
            (Version::V1, false) => {
                self.buf.put_u8(b's');
                self.buf.put_u16(units as u16);
            }
            (Version::V1, true) => {
                self.buf.put_u8(b'S');
                self.buf.put_u16(units as u16);
            }
            (Version::V2, false) => {
                self.buf.put_u8(b'R');
                self.buf.put_u16(units as u16);
            }
            (Version::V2, true) => {
                if units <= 31 {
                    self.buf.put_u8(units as u8);
                } else if units <= 1023 {
                    self.buf.put_u8(0x30 + (units >> 8) as u8);
                    self.buf.put_u8(units as u8);
                } else {
                    self.buf.put_u8(b'S');
                    self.buf.put_u16(units as u16);
                }
            }
        }
        put_java_utf8(self.buf, chunk);
    }

    pub fn write_binary(&mut self, value: &[u8]) -> Result<()> {
        let mut chunks = value.chunks(CHUNK_SIZE).peekable();
        if chunks.peek().is_none() {
            self.write_binary_chunk(&[], true);
            return Ok(());
        }
        while let Some(chunk) = chunks.next() {
            let last = chunks.peek().is_none();
            self.write_binary_chunk(chunk, last);
        }
        Ok(())
    }

    fn write_binary_chunk(&mut self, chunk: &[u8], last: bool) {
        let len = chunk.len();
        match (self.version, last) {
            (Version::V1, false) => {
                self.buf.put_u8(b'b');
                self.buf.put_u16(len as u16);
            }
            (Version::V1, true) => {
                self.buf.put_u8(b'B');
                self.buf.put_u16(len as u16);
            }
            (Version::V2, false) => {
                self.buf.put_u8(b'A');
                self.buf.put_u16(len as u16);
            }
            (Version::V2, true) => {
                if len <= 15 {
                    self.buf.put_u8(0x20 + len as u8);
                } else if len <= 1023 {
                    self.buf.put_u8(0x34 + (len >> 8) as u8);
                    self.buf.put_u8(len as u8);
                } else {
                    self.buf.put_u8(b'B');
                    self.buf.put_u16(len as u16);
                }
            }
        }
        self.buf.put_slice(chunk);
    }

    /// Writes a type name: v1 `t len16 name`, v2 a string or a type-table index.
    fn write_type(&mut self, name: &str) -> Result<()> {
        match self.version {
            Version::V1 => {
                if name.is_empty() {
                    return Ok(());
                }
                let units = name.encode_utf16().count();
                if units > u16::MAX as usize {
                    return Err(HessianError::LengthOverflow(units));
                }
                self.buf.put_u8(b't');
                self.buf.put_u16(units as u16);
                put_java_utf8(self.buf, name);
                Ok(())
            }
            Version::V2 => {
                if let Some(&index) = self.types.get(name) {
                    self.write_int(index as i32);
                    return Ok(());
                }
                let index = self.types.len() as u32;
                self.types.insert(name.to_string(), index);
                self.write_string(name)
            }
        }
    }

    /// Starts a list of known length. An empty `type_name` means untyped.
    pub fn begin_list(&mut self, len: usize, type_name: &str) -> Result<()> {
        let len_i32 = i32::try_from(len).map_err(|_| HessianError::LengthOverflow(len))?;
        match self.version {
            Version::V1 => {
                self.buf.put_u8(b'V');
                self.write_type(type_name)?;
                self.buf.put_u8(b'l');
                self.buf.put_i32(len_i32);
            }
            Version::V2 => match (type_name.is_empty(), len) {
                (true, 0..=7) => self.buf.put_u8(0x78 + len as u8),
                (true, _) => {
                    self.buf.put_u8(b'X');
                    self.write_int(len_i32);
                }
                (false, 0..=7) => {
                    self.buf.put_u8(0x70 + len as u8);
                    self.write_type(type_name)?;
                }
                (false, _) => {
                    self.buf.put_u8(b'V');
                    self.write_type(type_name)?;
                    self.write_int(len_i32);
                }
            },
        }
        Ok(())
    }

    pub fn end_list(&mut self) {
        if self.version == Version::V1 {
            self.buf.put_u8(b'z');
        }
    }

    /// Starts a map. An empty `type_name` means untyped.
    pub fn begin_map(&mut self, type_name: &str) -> Result<()> {
        match self.version {
            Version::V1 => {
                self.buf.put_u8(b'M');
                self.write_type(type_name)
            }
            Version::V2 => {
                if type_name.is_empty() {
                    self.buf.put_u8(b'H');
                    Ok(())
                } else {
                    self.buf.put_u8(b'M');
                    self.write_type(type_name)
                }
            }
        }
    }

    pub fn end_map(&mut self) {
        match self.version {
            Version::V1 => self.buf.put_u8(b'z'),
            Version::V2 => self.buf.put_u8(b'Z'),
        }
    }

    /// Starts an object instance.
    ///
    /// Under v2 the class definition is emitted the first time a
    /// `(class, fields)` shape is seen in this call; later instances only
    /// reference it. Field values must follow in `fields` order, each
    /// preceded by [`write_field_name`](Self::write_field_name).
    pub fn begin_object(&mut self, class_name: &str, fields: &[&str]) -> Result<()> {
        match self.version {
            Version::V1 => {
                if class_name.is_empty() {
                    return Err(HessianError::TypeMismatch {
                        expected: "class name".to_string(),
                        found: "empty string",
                    });
                }
                self.buf.put_u8(b'M');
                self.write_type(class_name)
            }
            Version::V2 => {
                let existing = self.classes.iter().position(|def| {
                    def.name == class_name
                        && def.fields.len() == fields.len()
                        && def.fields.iter().zip(fields).all(|(a, b)| a == b)
                });
                let index = match existing {
                    Some(index) => index,
                    None => {
                        self.buf.put_u8(b'C');
                        self.write_string(class_name)?;
                        self.write_int(fields.len() as i32);
                        for field in fields {
                            self.write_string(field)?;
                        }
                        self.classes.push(ClassDefinition {
                            name: class_name.to_string(),
                            fields: fields.iter().map(|f| f.to_string()).collect(),
                        });
                        self.classes.len() - 1
                    }
                };
                if index <= 15 {
                    self.buf.put_u8(0x60 + index as u8);
                } else {
                    self.buf.put_u8(b'O');
                    self.write_int(index as i32);
                }
                Ok(())
            }
        }
    }

    /// Writes a field name; only v1 objects carry names inline.
    pub fn write_field_name(&mut self, name: &str) -> Result<()> {
        match self.version {
            Version::V1 => self.write_string(name),
            Version::V2 => Ok(()),
        }
    }

    pub fn end_object(&mut self) {
        if self.version == Version::V1 {
            self.buf.put_u8(b'z');
        }
    }
}

/// Writes `s` the way Java's modified UTF-8 string writer does:
/// supplementary characters become two 3-byte surrogate sequences.
fn put_java_utf8(buf: &mut BytesMut, s: &str) {
    if s.is_ascii() {
        buf.put_slice(s.as_bytes());
        return;
    }
    let mut tmp = [0u8; 4];
    let mut pair = [0u16; 2];
    for ch in s.chars() {
        if (ch as u32) <= 0xFFFF {
            buf.put_slice(ch.encode_utf8(&mut tmp).as_bytes());
            continue;
        }
        for unit in ch.encode_utf16(&mut pair).iter() {
            buf.put_u8(0xe0 | (unit >> 12) as u8);
            buf.put_u8(0x80 | ((unit >> 6) & 0x3f) as u8);
            buf.put_u8(0x80 | (unit & 0x3f) as u8);
        }
    }
}
