//! Class schema registry.

use crate::descriptor::TypeDescriptor;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Request envelope class.
pub const SOFA_REQUEST: &str = "com.alipay.sofa.rpc.core.request.SofaRequest";
/// Response envelope class.
pub const SOFA_RESPONSE: &str = "com.alipay.sofa.rpc.core.response.SofaResponse";
/// Payload class of error responses.
pub const RPC_SERVER_EXCEPTION: &str = "com.alipay.remoting.rpc.exception.RpcServerException";

/// One declared field of a class.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSchema {
    pub name: String,
    pub descriptor: TypeDescriptor,
}

/// Ordered field list of a registered class.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassSchema {
    pub name: String,
    pub fields: Vec<FieldSchema>,
}

impl ClassSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    pub fn field(mut self, name: impl Into<String>, descriptor: impl Into<TypeDescriptor>) -> Self {
        self.fields.push(FieldSchema {
            name: name.into(),
            descriptor: descriptor.into(),
        });
        self
    }
}

/// Maps class names to their field schemas.
///
/// Entries are never replaced once registered.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    classes: RwLock<HashMap<String, Arc<ClassSchema>>>,
}

impl SchemaRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry preloaded with the RPC envelope and exception classes.
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        for schema in builtin_classes() {
            registry.register(schema);
        }
        registry
    }

    /// Registers a class. Returns `false` if the name was already taken.
    pub fn register(&self, schema: ClassSchema) -> bool {
        let mut classes = self.classes.write();
        if classes.contains_key(&schema.name) {
            return false;
        }
        classes.insert(schema.name.clone(), Arc::new(schema));
        true
    }

    pub fn get(&self, name: &str) -> Option<Arc<ClassSchema>> {
        self.classes.read().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.classes.read().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.classes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.read().is_empty()
    }
}

fn throwable_fields(name: &str) -> ClassSchema {
    ClassSchema::new(name)
        .field("detailMessage", "java.lang.String")
        .field(
            "stackTrace",
            TypeDescriptor::array("java.lang.StackTraceElement", 1),
        )
        .field("cause", "java.lang.Throwable")
}

fn builtin_classes() -> Vec<ClassSchema> {
    vec![
        ClassSchema::new(SOFA_REQUEST)
            .field("methodName", "java.lang.String")
            .field("methodArgSigs", TypeDescriptor::array("java.lang.String", 1))
            .field("targetServiceUniqueName", "java.lang.String")
            .field("targetAppName", "java.lang.String")
            .field(
                "requestProps",
                TypeDescriptor::map(
                    "java.util.Map",
                    TypeDescriptor::new("java.lang.String"),
                    TypeDescriptor::new("java.lang.Object"),
                ),
            ),
        ClassSchema::new(SOFA_RESPONSE)
            .field("isError", "boolean")
            .field("errorMsg", "java.lang.String")
            .field("appResponse", "java.lang.Object")
            .field(
                "responseProps",
                TypeDescriptor::map(
                    "java.util.Map",
                    TypeDescriptor::new("java.lang.String"),
                    TypeDescriptor::new("java.lang.String"),
                ),
            ),
        throwable_fields("java.lang.Throwable"),
        throwable_fields("java.lang.Exception"),
        throwable_fields(RPC_SERVER_EXCEPTION),
        ClassSchema::new("java.lang.StackTraceElement")
            .field("declaringClass", "java.lang.String")
            .field("methodName", "java.lang.String")
            .field("fileName", "java.lang.String")
            .field("lineNumber", "int"),
    ]
}
