//! Header key/value block codec.
//!
//! The header block is a flat sequence of entries:
//!
//! ```text
//! +-----------+---------+-----------+---------+
//! | key_len   | key     | val_len   | val     |  ... repeated
//! | i32 (BE)  | UTF-8   | i32 (BE)  | UTF-8   |
//! +-----------+---------+-----------+---------+
//! ```
//!
//! A value length of `-1` marks a null value, `0` an empty string.

use crate::error::ProtocolError;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Ordered string header map. Insertion order is preserved on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderMap {
    entries: Vec<(String, Option<String>)>,
}

impl HeaderMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `key`, replacing an existing entry in place.
    pub fn insert(&mut self, key: impl Into<String>, value: Option<String>) {
        let key = key.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    /// Returns the value for `key`. Null values yield `Some(None)`.
    pub fn get(&self, key: &str) -> Option<Option<&str>> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_deref())
    }

    /// Returns the non-null string value for `key`.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).flatten()
    }

    pub fn remove(&mut self, key: &str) -> Option<Option<String>> {
        let idx = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(idx).1)
    }

    /// Removes and returns every entry whose key starts with `prefix`.
    pub fn drain_prefixed(&mut self, prefix: &str) -> Vec<(String, Option<String>)> {
        let (taken, kept) = std::mem::take(&mut self.entries)
            .into_iter()
            .partition(|(k, _)| k.starts_with(prefix));
        self.entries = kept;
        taken
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_deref()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for HeaderMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = HeaderMap::new();
        for (k, v) in iter {
            map.insert(k, Some(v.into()));
        }
        map
    }
}

/// Encodes and decodes header blocks.
pub struct HeaderCodec;

impl HeaderCodec {
    pub fn encode(headers: &HeaderMap) -> Result<Bytes, ProtocolError> {
        let mut buf = BytesMut::new();
        Self::encode_into(headers, &mut buf)?;
        Ok(buf.freeze())
    }

    pub fn encode_into(headers: &HeaderMap, buf: &mut BytesMut) -> Result<(), ProtocolError> {
        for (key, value) in headers.iter() {
            put_len(buf, key.len(), "header key")?;
            buf.put_slice(key.as_bytes());
            match value {
                None => buf.put_i32(-1),
                Some(v) => {
                    put_len(buf, v.len(), "header value")?;
                    buf.put_slice(v.as_bytes());
                }
            }
        }
        Ok(())
    }

    /// Decodes a header block. Empty input yields `None`.
    pub fn decode(mut data: &[u8]) -> Result<Option<HeaderMap>, ProtocolError> {
        if data.is_empty() {
            return Ok(None);
        }
        let mut headers = HeaderMap::new();
        while data.has_remaining() {
            let key = read_string(&mut data, "header key")?.unwrap_or_default();
            let value = read_string(&mut data, "header value")?;
            headers.insert(key, value);
        }
        Ok(Some(headers))
    }
}

fn put_len(buf: &mut BytesMut, len: usize, field: &'static str) -> Result<(), ProtocolError> {
    let len = i32::try_from(len).map_err(|_| ProtocolError::FrameTooLarge {
        field,
        size: len,
        max: i32::MAX as usize,
    })?;
    buf.put_i32(len);
    Ok(())
}

fn read_string(data: &mut &[u8], field: &'static str) -> Result<Option<String>, ProtocolError> {
    if data.remaining() < 4 {
        return Err(ProtocolError::Truncated {
            needed: 4 - data.remaining(),
        });
    }
    let len = data.get_i32();
    if len < 0 {
        return Ok(None);
    }
    let len = len as usize;
    if data.remaining() < len {
        return Err(ProtocolError::Truncated {
            needed: len - data.remaining(),
        });
    }
    let raw = &data[..len];
    let s = std::str::from_utf8(raw).map_err(|_| ProtocolError::InvalidUtf8(field))?;
    let s = s.to_string();
    data.advance(len);
    Ok(Some(s))
}
