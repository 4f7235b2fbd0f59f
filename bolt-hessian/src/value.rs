//! Dynamic object graph.
//!
//! Composite values are reference counted. The `Arc` pointer is the object
//! identity: the same `Arc` reachable twice in one graph is written once and
//! then as a back-reference.

use crate::descriptor::TypeDescriptor;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// A node in a Hessian object graph.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i32),
    Long(i64),
    Double(f64),
    String(String),
    Bytes(Bytes),
    Date(DateTime<Utc>),
    List(Arc<List>),
    Map(Arc<Map>),
    Object(Arc<Object>),
    /// A value with an explicit concrete type, overriding the declared type
    /// of the slot it is written into.
    Typed(Arc<Typed>),
}

/// Ordered sequence, optionally carrying a Java collection type.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct List {
    pub type_name: Option<String>,
    pub items: Vec<Value>,
}

/// Ordered key/value pairs, optionally carrying a Java map type.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Map {
    pub type_name: Option<String>,
    pub entries: Vec<(Value, Value)>,
}

impl Map {
    /// Looks up the value stored under a string key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(k, _)| k.as_str() == Some(key))
            .map(|(_, v)| v)
    }
}

/// Instance of a named class with ordered fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Object {
    pub class_name: String,
    pub fields: Vec<(String, Value)>,
}

impl Object {
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, v)| v)
    }
}

/// A value paired with the descriptor it must be encoded with.
#[derive(Debug, Clone, PartialEq)]
pub struct Typed {
    pub descriptor: TypeDescriptor,
    pub value: Value,
}

impl Value {
    /// Untyped list (`java.util.ArrayList` on the Java side).
    pub fn list(items: Vec<Value>) -> Self {
        Value::List(Arc::new(List {
            type_name: None,
            items,
        }))
    }

    pub fn typed_list(type_name: impl Into<String>, items: Vec<Value>) -> Self {
        Value::List(Arc::new(List {
            type_name: Some(type_name.into()),
            items,
        }))
    }

    /// Untyped map (`java.util.HashMap` on the Java side).
    pub fn map(entries: Vec<(Value, Value)>) -> Self {
        Value::Map(Arc::new(Map {
            type_name: None,
            entries,
        }))
    }

    pub fn typed_map(type_name: impl Into<String>, entries: Vec<(Value, Value)>) -> Self {
        Value::Map(Arc::new(Map {
            type_name: Some(type_name.into()),
            entries,
        }))
    }

    pub fn object<N, I>(class_name: impl Into<String>, fields: I) -> Self
    where
        N: Into<String>,
        I: IntoIterator<Item = (N, Value)>,
    {
        Value::Object(Arc::new(Object {
            class_name: class_name.into(),
            fields: fields.into_iter().map(|(n, v)| (n.into(), v)).collect(),
        }))
    }

    /// Wraps a value with an explicit type.
    pub fn typed(descriptor: impl Into<TypeDescriptor>, value: impl Into<Value>) -> Self {
        Value::Typed(Arc::new(Typed {
            descriptor: descriptor.into(),
            value: value.into(),
        }))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v as i64),
            Value::Long(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&List> {
        match self {
            Value::List(list) => Some(list),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&Map> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Value::Object(obj) => Some(obj),
            _ => None,
        }
    }

    /// Short name of the variant, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Long(_) => "long",
            Value::Double(_) => "double",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::Date(_) => "date",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Object(_) => "object",
            Value::Typed(_) => "typed",
        }
    }

    /// Identity of a composite node, if any.
    pub(crate) fn identity(&self) -> Option<usize> {
        match self {
            Value::List(v) => Some(Arc::as_ptr(v) as *const () as usize),
            Value::Map(v) => Some(Arc::as_ptr(v) as *const () as usize),
            Value::Object(v) => Some(Arc::as_ptr(v) as *const () as usize),
            _ => None,
        }
    }

    /// Java class name used in method argument signatures.
    pub fn java_class_name(&self) -> String {
        match self {
            Value::Null => "null".to_string(),
            Value::Bool(_) => "boolean".to_string(),
            Value::Int(_) => "int".to_string(),
            Value::Long(_) => "long".to_string(),
            Value::Double(_) => "double".to_string(),
            Value::String(_) => "java.lang.String".to_string(),
            Value::Bytes(_) => "[B".to_string(),
            Value::Date(_) => "java.util.Date".to_string(),
            Value::List(_) => "java.util.ArrayList".to_string(),
            Value::Map(_) => "java.util.HashMap".to_string(),
            Value::Object(obj) => obj.class_name.clone(),
            Value::Typed(typed) => descriptor_class_name(&typed.descriptor),
        }
    }
}

fn descriptor_class_name(desc: &TypeDescriptor) -> String {
    let name = desc
        .abstract_type_name
        .as_deref()
        .unwrap_or(desc.type_name.as_str());
    if !desc.is_array {
        return name.to_string();
    }
    let element = match name {
        "short" => "S".to_string(),
        "int" => "I".to_string(),
        "boolean" => "Z".to_string(),
        "double" => "D".to_string(),
        "long" => "J".to_string(),
        "float" => "F".to_string(),
        "byte" => "B".to_string(),
        "java.lang.String" => "Ljava.lang.String;".to_string(),
        "java.lang.Object" => "Ljava.lang.Object;".to_string(),
        other => format!("L{other};"),
    };
    format!("{}{}", "[".repeat(desc.array_depth), element)
}

impl Default for Value {
    fn default() -> Self {
        Value::Null
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Long(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Bytes> for Value {
    fn from(v: Bytes) -> Self {
        Value::Bytes(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Date(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}
