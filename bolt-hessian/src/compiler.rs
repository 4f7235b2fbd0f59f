//! Schema compiler.
//!
//! Turns a [`TypeDescriptor`] into a [`CompiledProcedure`]: an encode
//! strategy selected once per canonical signature and cached. Nested
//! procedures (field types, list elements, map keys/values) are looked up
//! lazily on first use, so self-referential classes such as
//! `java.lang.Throwable.cause` compile without recursion.

use crate::descriptor::{TypeDescriptor, Version};
use crate::error::{HessianError, Result};
use crate::reader::HessianReader;
use crate::registry::SchemaRegistry;
use crate::value::Value;
use crate::writer::HessianWriter;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::borrow::Cow;
use std::sync::{Arc, OnceLock};

/// Compiles descriptors against a registry and caches the result.
pub struct SchemaCompiler {
    registry: Arc<SchemaRegistry>,
    cache: DashMap<String, Arc<CompiledProcedure>>,
    /// Default values, addressed by index from canonical signatures.
    defaults: RwLock<Vec<Value>>,
}

impl SchemaCompiler {
    pub fn new(registry: Arc<SchemaRegistry>) -> Self {
        Self {
            registry,
            cache: DashMap::new(),
            defaults: RwLock::new(Vec::new()),
        }
    }

    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }

    /// Number of cached procedures.
    pub fn cached(&self) -> usize {
        self.cache.len()
    }

    /// Canonical signature: `'[' * depth + type`, `#generic` per parameter,
    /// `#defaultIndex` when a default is set, then `#version`.
    pub fn signature(&self, descriptor: &TypeDescriptor, version: Version) -> String {
        let mut sig = descriptor.shape_key();
        if let Some(default) = &descriptor.default_value {
            sig.push('#');
            sig.push_str(&self.default_index(default).to_string());
        }
        sig.push('#');
        sig.push_str(version.as_str());
        sig
    }

    fn default_index(&self, value: &Value) -> usize {
        if let Some(index) = self.defaults.read().iter().position(|v| v == value) {
            return index;
        }
        let mut defaults = self.defaults.write();
        if let Some(index) = defaults.iter().position(|v| v == value) {
            return index;
        }
        defaults.push(value.clone());
        defaults.len() - 1
    }

    /// Returns the cached procedure for `descriptor`, compiling it on a miss.
    ///
    /// Concurrent compilations of the same signature converge on whichever
    /// entry is stored first.
    pub fn compile(&self, descriptor: &TypeDescriptor, version: Version) -> Arc<CompiledProcedure> {
        let signature = self.signature(descriptor, version);
        if let Some(hit) = self.cache.get(&signature) {
            return Arc::clone(hit.value());
        }

        let strategy = self.select_strategy(descriptor);
        tracing::trace!(%signature, strategy = strategy.name(), "compiled schema");
        let procedure = Arc::new(CompiledProcedure {
            signature: signature.clone(),
            version,
            default: descriptor.default_value.clone(),
            strategy,
        });
        let entry = self.cache.entry(signature).or_insert(procedure);
        Arc::clone(entry.value())
    }

    fn select_strategy(&self, desc: &TypeDescriptor) -> Strategy {
        if desc.is_array {
            if desc.array_depth == 1 && matches!(desc.type_name.as_str(), "byte" | "java.lang.Byte")
            {
                return Strategy::Binary;
            }
            return Strategy::List {
                list_type: desc.array_type_name(),
                element: Some(Child::new(desc.element())),
            };
        }

        if let Some(strategy) = builtin_strategy(desc) {
            return strategy;
        }

        if desc.is_map {
            return Strategy::Map {
                map_type: desc.type_name.clone(),
                key: desc.generic.first().cloned().map(Child::new),
                value: desc.generic.get(1).cloned().map(Child::new),
            };
        }

        if !desc.is_abstract() {
            if let Some(schema) = self.registry.get(&desc.type_name) {
                return Strategy::Object {
                    class_name: schema.name.clone(),
                    fields: schema
                        .fields
                        .iter()
                        .map(|f| (f.name.clone(), Child::new(f.descriptor.clone())))
                        .collect(),
                };
            }
        }

        if desc.is_enum {
            return Strategy::Enum {
                class_name: desc.type_name.clone(),
            };
        }

        Strategy::Fallback {
            type_name: desc.type_name.clone(),
        }
    }
}

fn builtin_strategy(desc: &TypeDescriptor) -> Option<Strategy> {
    let generic = |i: usize| desc.generic.get(i).cloned().map(Child::new);
    let strategy = match desc.type_name.as_str() {
        "boolean" | "bool" => Strategy::Bool { boxed: false },
        "java.lang.Boolean" => Strategy::Bool { boxed: true },
        "int" => Strategy::int(false, i32::MIN as i64, i32::MAX as i64, "int"),
        "short" => Strategy::int(false, i16::MIN as i64, i16::MAX as i64, "short"),
        "byte" => Strategy::int(false, i8::MIN as i64, i8::MAX as i64, "byte"),
        "java.lang.Integer" => Strategy::int(true, i32::MIN as i64, i32::MAX as i64, "int"),
        "java.lang.Short" => Strategy::int(true, i16::MIN as i64, i16::MAX as i64, "short"),
        "java.lang.Byte" => Strategy::int(true, i8::MIN as i64, i8::MAX as i64, "byte"),
        "long" => Strategy::Long { boxed: false },
        "java.lang.Long" => Strategy::Long { boxed: true },
        "double" | "float" => Strategy::Double { boxed: false },
        "java.lang.Double" | "java.lang.Float" => Strategy::Double { boxed: true },
        "char" | "java.lang.Character" | "java.lang.String" => Strategy::String,
        "java.util.Map" | "java.util.HashMap" => Strategy::Map {
            map_type: String::new(),
            key: generic(0),
            value: generic(1),
        },
        "java.util.List" | "java.util.Set" | "java.util.Collection" => Strategy::List {
            list_type: desc.type_name.clone(),
            element: generic(0),
        },
        "java.util.ArrayList" => Strategy::List {
            list_type: String::new(),
            element: generic(0),
        },
        "java.util.Date" => Strategy::Date,
        "java.lang.Class" => Strategy::Class,
        "java.util.Currency" => Strategy::Currency,
        "java.util.Locale" => Strategy::Locale,
        "java.math.BigDecimal" => Strategy::BigDecimal,
        "java.lang.Object" => Strategy::Dynamic,
        _ => return None,
    };
    Some(strategy)
}

/// A nested procedure, compiled on first use.
struct Child {
    descriptor: TypeDescriptor,
    resolved: OnceLock<Arc<CompiledProcedure>>,
}

impl Child {
    fn new(descriptor: TypeDescriptor) -> Self {
        Self {
            descriptor,
            resolved: OnceLock::new(),
        }
    }

    fn get(&self, writer: &HessianWriter<'_>) -> &Arc<CompiledProcedure> {
        self.resolved
            .get_or_init(|| writer.compiler().compile(&self.descriptor, writer.version()))
    }

    fn encode(&self, writer: &mut HessianWriter<'_>, value: &Value) -> Result<()> {
        let procedure = Arc::clone(self.get(writer));
        procedure.encode(writer, value)
    }
}

enum Strategy {
    Binary,
    Bool {
        boxed: bool,
    },
    Int {
        boxed: bool,
        min: i64,
        max: i64,
        target: &'static str,
    },
    Long {
        boxed: bool,
    },
    Double {
        boxed: bool,
    },
    String,
    Date,
    Class,
    Currency,
    Locale,
    BigDecimal,
    List {
        list_type: String,
        element: Option<Child>,
    },
    Map {
        map_type: String,
        key: Option<Child>,
        value: Option<Child>,
    },
    Object {
        class_name: String,
        fields: Vec<(String, Child)>,
    },
    Enum {
        class_name: String,
    },
    Dynamic,
    Fallback {
        type_name: String,
    },
}

impl Strategy {
    fn int(boxed: bool, min: i64, max: i64, target: &'static str) -> Self {
        Strategy::Int {
            boxed,
            min,
            max,
            target,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Strategy::Binary => "binary",
            Strategy::Bool { .. } => "bool",
            Strategy::Int { .. } => "int",
            Strategy::Long { .. } => "long",
            Strategy::Double { .. } => "double",
            Strategy::String => "string",
            Strategy::Date => "date",
            Strategy::Class => "class",
            Strategy::Currency => "currency",
            Strategy::Locale => "locale",
            Strategy::BigDecimal => "big_decimal",
            Strategy::List { .. } => "list",
            Strategy::Map { .. } => "map",
            Strategy::Object { .. } => "object",
            Strategy::Enum { .. } => "enum",
            Strategy::Dynamic => "dynamic",
            Strategy::Fallback { .. } => "fallback",
        }
    }
}

/// Cached encode/decode pair for one canonical signature.
pub struct CompiledProcedure {
    signature: String,
    version: Version,
    default: Option<Value>,
    strategy: Strategy,
}

impl std::fmt::Debug for CompiledProcedure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledProcedure")
            .field("signature", &self.signature)
            .field("strategy", &self.strategy.name())
            .finish()
    }
}

fn mismatch(expected: &str, found: &Value) -> HessianError {
    HessianError::TypeMismatch {
        expected: expected.to_string(),
        found: found.kind(),
    }
}

/// Accepts ints, longs and integral doubles.
fn integral(value: &Value) -> Option<i64> {
    match value {
        Value::Int(v) => Some(*v as i64),
        Value::Long(v) => Some(*v),
        Value::Double(v) if v.fract() == 0.0 && v.abs() < 9.2e18 => Some(*v as i64),
        _ => None,
    }
}

impl CompiledProcedure {
    pub fn signature(&self) -> &str {
        &self.signature
    }

    pub fn version(&self) -> Version {
        self.version
    }

    /// Reads one value. Decoding follows wire tags, so every procedure
    /// reads the same way.
    pub fn decode(&self, reader: &mut HessianReader<'_>) -> Result<Value> {
        reader.read_value()
    }

    /// Writes `value` as this procedure's type.
    pub fn encode(&self, writer: &mut HessianWriter<'_>, value: &Value) -> Result<()> {
        if let Value::Typed(typed) = value {
            return writer.write_with(&typed.descriptor, &typed.value);
        }
        let value = match (&self.default, value) {
            (Some(default), Value::Null) => default,
            _ => value,
        };

        match &self.strategy {
            Strategy::Binary => match value {
                Value::Null => {
                    writer.write_null();
                    Ok(())
                }
                Value::Bytes(bytes) => writer.write_binary(bytes),
                Value::List(list) => {
                    let mut bytes = Vec::with_capacity(list.items.len());
                    for item in &list.items {
                        match integral(item) {
                            Some(b @ -128..=255) => bytes.push(b as u8),
                            Some(b) => {
                                return Err(HessianError::OutOfRange {
                                    value: b.to_string(),
                                    target: "byte",
                                })
                            }
                            None => return Err(mismatch("byte", item)),
                        }
                    }
                    writer.write_binary(&bytes)
                }
                other => Err(mismatch("byte[]", other)),
            },

            Strategy::Bool { boxed } => match value {
                Value::Bool(b) => {
                    writer.write_bool(*b);
                    Ok(())
                }
                Value::Null if *boxed => {
                    writer.write_null();
                    Ok(())
                }
                Value::Null => {
                    writer.write_bool(false);
                    Ok(())
                }
                other => Err(mismatch("boolean", other)),
            },

            Strategy::Int {
                boxed,
                min,
                max,
                target,
            } => match value {
                Value::Null if *boxed => {
                    writer.write_null();
                    Ok(())
                }
                Value::Null => {
                    writer.write_int(0);
                    Ok(())
                }
                other => {
                    let v = integral(other).ok_or_else(|| mismatch(target, other))?;
                    if v < *min || v > *max {
                        return Err(HessianError::OutOfRange {
                            value: v.to_string(),
                            target: *target,
                        });
                    }
                    writer.write_int(v as i32);
                    Ok(())
                }
            },

            Strategy::Long { boxed } => match value {
                Value::Null if *boxed => {
                    writer.write_null();
                    Ok(())
                }
                Value::Null => {
                    writer.write_long(0);
                    Ok(())
                }
                other => {
                    let v = integral(other).ok_or_else(|| mismatch("long", other))?;
                    writer.write_long(v);
                    Ok(())
                }
            },

            Strategy::Double { boxed } => match value {
                Value::Null if *boxed => {
                    writer.write_null();
                    Ok(())
                }
                Value::Null => {
                    writer.write_double(0.0);
                    Ok(())
                }
                Value::Int(v) => {
                    writer.write_double(*v as f64);
                    Ok(())
                }
                Value::Long(v) => {
                    writer.write_double(*v as f64);
                    Ok(())
                }
                Value::Double(v) => {
                    writer.write_double(*v);
                    Ok(())
                }
                other => Err(mismatch("double", other)),
            },

            Strategy::String => match value {
                Value::Null => {
                    writer.write_null();
                    Ok(())
                }
                Value::String(s) => writer.write_string(s),
                other => Err(mismatch("java.lang.String", other)),
            },

            Strategy::Date => match value {
                Value::Null => {
                    writer.write_null();
                    Ok(())
                }
                Value::Date(date) => {
                    writer.write_date(date);
                    Ok(())
                }
                Value::Int(_) | Value::Long(_) => {
                    writer.write_date_millis(value.as_i64().unwrap_or_default());
                    Ok(())
                }
                Value::String(s) => {
                    let date = DateTime::parse_from_rfc3339(s)
                        .map_err(|_| HessianError::InvalidDate(s.clone()))?
                        .with_timezone(&Utc);
                    writer.write_date(&date);
                    Ok(())
                }
                other => Err(mismatch("java.util.Date", other)),
            },

            Strategy::Class => {
                let name = single_field(value, "name", "java.lang.Class")?;
                write_single_field_object(
                    writer,
                    value,
                    "java.lang.Class",
                    "name",
                    name.map(normalize_class_name),
                )
            }
            Strategy::Currency => {
                let code = single_field(value, "currencyCode", "java.util.Currency")?;
                write_single_field_object(writer, value, "java.util.Currency", "currencyCode", code)
            }
            Strategy::Locale => {
                let locale = single_field(value, "value", "java.util.Locale")?;
                write_single_field_object(
                    writer,
                    value,
                    "com.caucho.hessian.io.LocaleHandle",
                    "value",
                    locale,
                )
            }
            Strategy::BigDecimal => {
                let decimal = match value {
                    Value::Int(v) => Some(Cow::Owned(v.to_string())),
                    Value::Long(v) => Some(Cow::Owned(v.to_string())),
                    Value::Double(v) => Some(Cow::Owned(v.to_string())),
                    other => single_field(other, "value", "java.math.BigDecimal")?,
                };
                write_single_field_object(writer, value, "java.math.BigDecimal", "value", decimal)
            }

            Strategy::List { list_type, element } => match value {
                Value::Null => {
                    writer.write_null();
                    Ok(())
                }
                Value::List(list) => {
                    if writer.enter_composite(value.identity()) {
                        return Ok(());
                    }
                    writer.begin_list(list.items.len(), list_type)?;
                    for item in &list.items {
                        match element {
                            Some(child) => child.encode(writer, item)?,
                            None => writer.write_value(item)?,
                        }
                    }
                    writer.end_list();
                    Ok(())
                }
                other => Err(mismatch(
                    if list_type.is_empty() {
                        "java.util.ArrayList"
                    } else {
                        list_type
                    },
                    other,
                )),
            },

            Strategy::Map {
                map_type,
                key,
                value: value_child,
            } => {
                let entries: Vec<(Cow<'_, Value>, &Value)> = match value {
                    Value::Null => {
                        writer.write_null();
                        return Ok(());
                    }
                    Value::Map(map) => map.entries.iter().map(|(k, v)| (Cow::Borrowed(k), v)).collect(),
                    Value::Object(obj) => obj
                        .fields
                        .iter()
                        .map(|(k, v)| (Cow::Owned(Value::String(k.clone())), v))
                        .collect(),
                    other => return Err(mismatch("java.util.Map", other)),
                };
                if writer.enter_composite(value.identity()) {
                    return Ok(());
                }
                writer.begin_map(map_type)?;
                for (k, v) in entries {
                    match key {
                        Some(child) => {
                            let procedure = Arc::clone(child.get(writer));
                            let k = procedure.coerce_key(&k);
                            procedure.encode(writer, &k)?;
                        }
                        None => writer.write_value(&k)?,
                    }
                    match value_child {
                        Some(child) => child.encode(writer, v)?,
                        None => writer.write_value(v)?,
                    }
                }
                writer.end_map();
                Ok(())
            }

            Strategy::Object { class_name, fields } => {
                match value {
                    Value::Null => {
                        writer.write_null();
                        return Ok(());
                    }
                    Value::Object(_) | Value::Map(_) => {}
                    other => return Err(mismatch(class_name, other)),
                }
                if writer.enter_composite(value.identity()) {
                    return Ok(());
                }
                let names: Vec<&str> = fields.iter().map(|(n, _)| n.as_str()).collect();
                writer.begin_object(class_name, &names)?;
                for (name, child) in fields {
                    writer.write_field_name(name)?;
                    let field = match value {
                        Value::Object(obj) => obj.get(name),
                        Value::Map(map) => map.get(name),
                        _ => None,
                    };
                    child.encode(writer, field.unwrap_or(&Value::Null))?;
                }
                writer.end_object();
                Ok(())
            }

            Strategy::Enum { class_name } => {
                let name = single_field(value, "name", class_name)?;
                write_single_field_object(writer, value, class_name, "name", name)
            }

            Strategy::Dynamic => writer.write_value(value),

            Strategy::Fallback { type_name } => match value {
                _ if type_name.is_empty() => writer.write_value(value),
                Value::Map(map)
                    if map.type_name.is_none()
                        && map.entries.iter().all(|(k, _)| matches!(k, Value::String(_))) =>
                {
                    if writer.enter_composite(value.identity()) {
                        return Ok(());
                    }
                    let names: Vec<&str> = map
                        .entries
                        .iter()
                        .filter_map(|(k, _)| k.as_str())
                        .collect();
                    writer.begin_object(type_name, &names)?;
                    for (k, v) in &map.entries {
                        writer.write_field_name(k.as_str().unwrap_or_default())?;
                        writer.write_value(v)?;
                    }
                    writer.end_object();
                    Ok(())
                }
                Value::List(list) if list.type_name.is_none() => {
                    if writer.enter_composite(value.identity()) {
                        return Ok(());
                    }
                    writer.begin_list(list.items.len(), type_name)?;
                    for item in &list.items {
                        writer.write_value(item)?;
                    }
                    writer.end_list();
                    Ok(())
                }
                other => writer.write_value(other),
            },
        }
    }

    /// Numeric map keys may arrive as strings.
    fn coerce_key<'v>(&self, key: &'v Value) -> Cow<'v, Value> {
        let Value::String(s) = key else {
            return Cow::Borrowed(key);
        };
        let parsed = match self.strategy {
            Strategy::Int { .. } | Strategy::Long { .. } => s.parse::<i64>().ok().map(Value::Long),
            Strategy::Double { .. } => s.parse::<f64>().ok().map(Value::Double),
            _ => None,
        };
        parsed.map_or(Cow::Borrowed(key), Cow::Owned)
    }
}

/// Extracts the single string field of a one-field wrapper class; accepts
/// either the bare string or an object/map carrying `field`.
fn single_field<'v>(value: &'v Value, field: &str, expected: &str) -> Result<Option<Cow<'v, str>>> {
    let inner = match value {
        Value::Null => return Ok(None),
        Value::String(s) => return Ok(Some(Cow::Borrowed(s.as_str()))),
        Value::Object(obj) => obj.get(field),
        Value::Map(map) => map.get(field),
        other => return Err(mismatch(expected, other)),
    };
    match inner {
        Some(Value::String(s)) => Ok(Some(Cow::Borrowed(s.as_str()))),
        Some(Value::Null) | None => Ok(None),
        Some(other) => Err(mismatch(expected, other)),
    }
}

fn write_single_field_object(
    writer: &mut HessianWriter<'_>,
    original: &Value,
    class_name: &str,
    field: &str,
    content: Option<Cow<'_, str>>,
) -> Result<()> {
    if original.is_null() {
        writer.write_null();
        return Ok(());
    }
    if writer.enter_composite(original.identity()) {
        return Ok(());
    }
    writer.begin_object(class_name, &[field])?;
    writer.write_field_name(field)?;
    match content {
        Some(s) => writer.write_string(&s)?,
        None => writer.write_null(),
    }
    writer.end_object();
    Ok(())
}

/// `java.lang.Class` names for arrays are normalized to `[L<element>;`.
fn normalize_class_name(name: Cow<'_, str>) -> Cow<'_, str> {
    if !name.contains('[') {
        return name;
    }
    let element = name.replace("[L", "").replace(['[', ';'], "");
    Cow::Owned(format!("[L{element};"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ClassSchema;
    use bytes::BytesMut;

    fn compiler() -> SchemaCompiler {
        let registry = SchemaRegistry::with_builtins();
        registry.register(
            ClassSchema::new("com.foo.User")
                .field("name", "java.lang.String")
                .field("age", "int"),
        );
        SchemaCompiler::new(Arc::new(registry))
    }

    fn encode(
        compiler: &SchemaCompiler,
        version: Version,
        desc: &TypeDescriptor,
        value: &Value,
    ) -> Result<Vec<u8>> {
        let mut buf = BytesMut::new();
        let mut writer = HessianWriter::new(&mut buf, version, compiler);
        writer.write_with(desc, value)?;
        Ok(buf.to_vec())
    }

    #[test]
    fn test_cache_hit_returns_same_instance() {
        let compiler = compiler();
        let a = compiler.compile(&TypeDescriptor::new("com.foo.User"), Version::V2);
        let b = compiler.compile(&TypeDescriptor::new("com.foo.User"), Version::V2);
        assert!(Arc::ptr_eq(&a, &b));

        let v1 = compiler.compile(&TypeDescriptor::new("com.foo.User"), Version::V1);
        assert!(!Arc::ptr_eq(&a, &v1));
        assert_eq!(v1.signature(), "com.foo.User#1.0");
    }

    #[test]
    fn test_signature_includes_generics_and_default() {
        let compiler = compiler();
        let desc = TypeDescriptor::map(
            "java.util.Map",
            TypeDescriptor::new("java.lang.String"),
            TypeDescriptor::new("int"),
        );
        assert_eq!(
            compiler.signature(&desc, Version::V2),
            "java.util.Map#java.lang.String#int#2.0"
        );

        let with_default = TypeDescriptor::new("int").with_default(5);
        let other_default = TypeDescriptor::new("int").with_default(6);
        assert_eq!(compiler.signature(&with_default, Version::V2), "int#0#2.0");
        assert_eq!(compiler.signature(&other_default, Version::V2), "int#1#2.0");
        // same default value reuses its index
        assert_eq!(compiler.signature(&with_default, Version::V2), "int#0#2.0");
    }

    #[test]
    fn test_different_defaults_compile_separately() {
        let compiler = compiler();
        let a = compiler.compile(&TypeDescriptor::new("int").with_default(1), Version::V2);
        let b = compiler.compile(&TypeDescriptor::new("int").with_default(2), Version::V2);
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_default_substitutes_null() {
        let compiler = compiler();
        let desc = TypeDescriptor::new("java.lang.String").with_default("dft");
        let bytes = encode(&compiler, Version::V2, &desc, &Value::Null).unwrap();
        assert_eq!(bytes, [0x03, b'd', b'f', b't']);
    }

    #[test]
    fn test_type_mismatch_errors() {
        let compiler = compiler();
        let err = encode(
            &compiler,
            Version::V2,
            &TypeDescriptor::new("boolean"),
            &Value::from("true"),
        )
        .unwrap_err();
        assert!(matches!(err, HessianError::TypeMismatch { .. }));

        let err = encode(
            &compiler,
            Version::V2,
            &TypeDescriptor::new("java.lang.String"),
            &Value::Bool(true),
        )
        .unwrap_err();
        assert!(matches!(err, HessianError::TypeMismatch { .. }));

        let err = encode(
            &compiler,
            Version::V2,
            &TypeDescriptor::new("int"),
            &Value::Long(1 << 40),
        )
        .unwrap_err();
        assert!(matches!(err, HessianError::OutOfRange { target: "int", .. }));
    }

    #[test]
    fn test_primitive_null_writes_zero() {
        let compiler = compiler();
        let bytes = encode(&compiler, Version::V2, &TypeDescriptor::new("int"), &Value::Null).unwrap();
        assert_eq!(bytes, [0x90]);
        let bytes = encode(
            &compiler,
            Version::V2,
            &TypeDescriptor::new("java.lang.Integer"),
            &Value::Null,
        )
        .unwrap();
        assert_eq!(bytes, [b'N']);
        let bytes = encode(&compiler, Version::V2, &TypeDescriptor::new("boolean"), &Value::Null).unwrap();
        assert_eq!(bytes, [b'F']);
    }

    #[test]
    fn test_byte_array_is_binary() {
        let compiler = compiler();
        let desc = TypeDescriptor::array("byte", 1);
        let bytes = encode(
            &compiler,
            Version::V2,
            &desc,
            &Value::list(vec![Value::Int(1), Value::Int(255)]),
        )
        .unwrap();
        assert_eq!(bytes, [0x22, 0x01, 0xff]);
    }

    #[test]
    fn test_int_array_is_typed_list() {
        let compiler = compiler();
        let desc = TypeDescriptor::array("int", 1);
        let bytes = encode(
            &compiler,
            Version::V2,
            &desc,
            &Value::list(vec![Value::Int(1), Value::Int(2)]),
        )
        .unwrap();
        assert_eq!(bytes, [0x72, 0x04, b'[', b'i', b'n', b't', 0x91, 0x92]);
    }

    #[test]
    fn test_registered_class_orders_fields_by_schema() {
        let compiler = compiler();
        let user = Value::object("ignored", [("age", Value::Int(3)), ("name", Value::from("a"))]);
        let bytes = encode(&compiler, Version::V2, &TypeDescriptor::new("com.foo.User"), &user).unwrap();

        let mut reader = HessianReader::new(&bytes, Version::V2);
        let decoded = reader.read_value().unwrap();
        assert_eq!(
            decoded,
            Value::object("com.foo.User", [("name", Value::from("a")), ("age", Value::Int(3))])
        );
    }

    #[test]
    fn test_enum_writes_name_field() {
        let compiler = compiler();
        let desc = TypeDescriptor::new("com.foo.Color").as_enum();
        let bytes = encode(&compiler, Version::V2, &desc, &Value::from("RED")).unwrap();
        let decoded = HessianReader::new(&bytes, Version::V2).read_value().unwrap();
        assert_eq!(decoded, Value::object("com.foo.Color", [("name", Value::from("RED"))]));
    }

    #[test]
    fn test_locale_and_class_wrappers() {
        let compiler = compiler();
        let bytes = encode(
            &compiler,
            Version::V2,
            &TypeDescriptor::new("java.util.Locale"),
            &Value::from("zh_CN"),
        )
        .unwrap();
        let decoded = HessianReader::new(&bytes, Version::V2).read_value().unwrap();
        assert_eq!(
            decoded,
            Value::object("com.caucho.hessian.io.LocaleHandle", [("value", Value::from("zh_CN"))])
        );

        let bytes = encode(
            &compiler,
            Version::V2,
            &TypeDescriptor::new("java.lang.Class"),
            &Value::from("[java.lang.String"),
        )
        .unwrap();
        let decoded = HessianReader::new(&bytes, Version::V2).read_value().unwrap();
        assert_eq!(
            decoded,
            Value::object("java.lang.Class", [("name", Value::from("[Ljava.lang.String;"))])
        );
    }

    #[test]
    fn test_map_keys_coerced_to_numbers() {
        let compiler = compiler();
        let desc = TypeDescriptor::map(
            "java.util.Map",
            TypeDescriptor::new("java.lang.Long"),
            TypeDescriptor::new("java.lang.String"),
        );
        let value = Value::map(vec![(Value::from("7"), Value::from("x"))]);
        let bytes = encode(&compiler, Version::V2, &desc, &value).unwrap();
        assert_eq!(bytes, [b'H', 0xe7, 0x01, b'x', b'Z']);
    }

    #[test]
    fn test_typed_value_overrides_declared_type() {
        let compiler = compiler();
        let desc = TypeDescriptor::new("java.lang.Object");
        let value = Value::typed(TypeDescriptor::new("long"), Value::Int(1));
        let bytes = encode(&compiler, Version::V2, &desc, &value).unwrap();
        assert_eq!(bytes, [0xe1]);
    }

    #[test]
    fn test_self_referential_class_compiles() {
        let compiler = compiler();
        let cause = Value::object(
            "java.lang.Throwable",
            [("detailMessage", Value::from("inner"))],
        );
        let outer = Value::object(
            "java.lang.Throwable",
            [("detailMessage", Value::from("outer")), ("cause", cause)],
        );
        let bytes = encode(
            &compiler,
            Version::V2,
            &TypeDescriptor::new("java.lang.Throwable"),
            &outer,
        )
        .unwrap();
        let decoded = HessianReader::new(&bytes, Version::V2).read_value().unwrap();
        let cause = decoded.as_object().unwrap().get("cause").unwrap();
        assert_eq!(
            cause.as_object().unwrap().get("detailMessage"),
            Some(&Value::from("inner"))
        );
    }
}
