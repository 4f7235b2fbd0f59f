//! Declarative type descriptors.
//!
//! A [`TypeDescriptor`] names the static Java type a value is serialized as.
//! Descriptors are immutable once built; two descriptors are treated as the
//! same shape when their canonical signatures are equal (see
//! [`SchemaCompiler::signature`](crate::SchemaCompiler::signature)).

use crate::value::Value;
use std::fmt;

/// Hessian wire version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Version {
    /// Hessian 1.0.
    V1,
    /// Hessian 2.0.
    #[default]
    V2,
}

impl Version {
    /// Returns the version label used in canonical signatures.
    pub fn as_str(&self) -> &'static str {
        match self {
            Version::V1 => "1.0",
            Version::V2 => "2.0",
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static type of a serialized value.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TypeDescriptor {
    /// Java type name, e.g. `java.lang.String` or `com.foo.User`.
    pub type_name: String,
    pub is_array: bool,
    /// Number of array dimensions; only meaningful when `is_array` is set.
    pub array_depth: usize,
    pub is_map: bool,
    pub is_enum: bool,
    /// Generic parameters, e.g. key/value for maps, element for lists.
    pub generic: Vec<TypeDescriptor>,
    /// Substituted when the value is absent (null).
    pub default_value: Option<Value>,
    /// Set when the declared type is abstract; the concrete type must then
    /// come from the value itself.
    pub abstract_type_name: Option<String>,
}

impl TypeDescriptor {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            ..Self::default()
        }
    }

    /// Creates an array descriptor of `depth` dimensions over `type_name`.
    pub fn array(type_name: impl Into<String>, depth: usize) -> Self {
        Self {
            type_name: type_name.into(),
            is_array: true,
            array_depth: depth.max(1),
            ..Self::default()
        }
    }

    /// Creates a map descriptor with key and value parameters.
    pub fn map(type_name: impl Into<String>, key: TypeDescriptor, value: TypeDescriptor) -> Self {
        Self::new(type_name).with_generic(vec![key, value])
    }

    /// Creates a list-like descriptor with an element parameter.
    pub fn list(type_name: impl Into<String>, element: TypeDescriptor) -> Self {
        Self::new(type_name).with_generic(vec![element])
    }

    pub fn with_generic(mut self, generic: Vec<TypeDescriptor>) -> Self {
        self.generic = generic;
        self
    }

    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    /// Marks the descriptor as a map-shaped custom type.
    pub fn as_map(mut self) -> Self {
        self.is_map = true;
        self
    }

    /// Marks the descriptor as a Java enum.
    pub fn as_enum(mut self) -> Self {
        self.is_enum = true;
        self
    }

    /// Declares the type abstract under the given name.
    pub fn as_abstract(mut self, name: impl Into<String>) -> Self {
        self.abstract_type_name = Some(name.into());
        self
    }

    pub fn is_abstract(&self) -> bool {
        self.abstract_type_name.is_some()
    }

    /// Returns the descriptor of one array element, one dimension down.
    pub fn element(&self) -> TypeDescriptor {
        let depth = self.array_depth.saturating_sub(1);
        TypeDescriptor {
            type_name: self.type_name.clone(),
            is_array: depth > 0,
            array_depth: depth,
            is_map: self.is_map,
            is_enum: self.is_enum,
            generic: self.generic.clone(),
            default_value: None,
            abstract_type_name: self.abstract_type_name.clone(),
        }
    }

    /// Signature prefix shared by all versions and defaults:
    /// `'[' * depth + type`, followed by `#generic` per parameter.
    pub(crate) fn shape_key(&self) -> String {
        let mut key = String::with_capacity(self.type_name.len() + 8);
        if self.is_array {
            for _ in 0..self.array_depth {
                key.push('[');
            }
        }
        key.push_str(&self.type_name);
        for generic in &self.generic {
            key.push('#');
            key.push_str(&generic.type_name);
        }
        key
    }

    /// Java type name as written on the wire for typed arrays:
    /// `[` per dimension followed by the element name.
    pub(crate) fn array_type_name(&self) -> String {
        let element = if self.type_name == "java.util.Locale" {
            "com.caucho.hessian.io.LocaleHandle"
        } else {
            self.type_name.as_str()
        };
        let mut name = "[".repeat(self.array_depth);
        name.push_str(element);
        name
    }
}

impl From<&str> for TypeDescriptor {
    fn from(type_name: &str) -> Self {
        TypeDescriptor::new(type_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_key() {
        let desc = TypeDescriptor::map(
            "java.util.Map",
            TypeDescriptor::new("java.lang.String"),
            TypeDescriptor::new("java.lang.Integer"),
        );
        assert_eq!(
            desc.shape_key(),
            "java.util.Map#java.lang.String#java.lang.Integer"
        );

        let arr = TypeDescriptor::array("int", 2);
        assert_eq!(arr.shape_key(), "[[int");
    }

    #[test]
    fn test_element_of_array() {
        let arr = TypeDescriptor::array("java.lang.String", 2);
        let inner = arr.element();
        assert!(inner.is_array);
        assert_eq!(inner.array_depth, 1);

        let leaf = inner.element();
        assert!(!leaf.is_array);
        assert_eq!(leaf.type_name, "java.lang.String");
    }

    #[test]
    fn test_locale_array_type_name() {
        let arr = TypeDescriptor::array("java.util.Locale", 1);
        assert_eq!(arr.array_type_name(), "[com.caucho.hessian.io.LocaleHandle");
    }

    #[test]
    fn test_version_labels() {
        assert_eq!(Version::V1.to_string(), "1.0");
        assert_eq!(Version::V2.to_string(), "2.0");
        assert_eq!(Version::default(), Version::V2);
    }
}
