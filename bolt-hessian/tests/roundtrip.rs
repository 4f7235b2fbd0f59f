//! Encode-then-decode checks across descriptor shapes and both wire versions.

use bolt_hessian::{
    ClassSchema, HessianCodec, SchemaRegistry, TypeDescriptor, Value, Version,
};
use bytes::Bytes;
use chrono::{TimeZone, Utc};
use std::sync::Arc;

const VERSIONS: [Version; 2] = [Version::V1, Version::V2];

fn codec() -> HessianCodec {
    let registry = SchemaRegistry::with_builtins();
    registry.register(
        ClassSchema::new("com.test.Order")
            .field("id", "long")
            .field("title", "java.lang.String")
            .field("tags", TypeDescriptor::list("java.util.List", "java.lang.String".into()))
            .field("owner", "com.test.User")
            .field("status", TypeDescriptor::new("com.test.Status").as_enum()),
    );
    registry.register(
        ClassSchema::new("com.test.User")
            .field("name", "java.lang.String")
            .field("vip", "java.lang.Boolean"),
    );
    HessianCodec::new(Arc::new(registry))
}

fn roundtrip(codec: &HessianCodec, desc: &TypeDescriptor, value: &Value, version: Version) -> Value {
    let bytes = codec.encode(value, Some(desc), version).unwrap();
    codec.decode(&bytes, version).unwrap()
}

#[test]
fn test_primitives_roundtrip() {
    let codec = codec();
    let cases = [
        ("boolean", Value::Bool(true)),
        ("java.lang.Boolean", Value::Null),
        ("int", Value::Int(-70000)),
        ("java.lang.Integer", Value::Int(12)),
        ("long", Value::Long(1 << 42)),
        ("java.lang.Long", Value::Long(-3)),
        ("double", Value::Double(3.25)),
        ("java.lang.Double", Value::Double(-1.0)),
        ("java.lang.String", Value::from("hello 世界")),
        ("java.lang.String", Value::from("")),
        ("java.lang.Object", Value::from("dynamic")),
    ];
    for version in VERSIONS {
        for (ty, value) in &cases {
            let decoded = roundtrip(&codec, &TypeDescriptor::new(*ty), value, version);
            assert_eq!(&decoded, value, "{ty} under {version}");
        }
    }
}

#[test]
fn test_date_roundtrip() {
    let codec = codec();
    let date = Utc.timestamp_millis_opt(1_700_000_123_456).single().unwrap();
    let whole_minute = Utc.timestamp_millis_opt(1_700_000_040_000).single().unwrap();
    for version in VERSIONS {
        for d in [date, whole_minute] {
            let decoded = roundtrip(&codec, &TypeDescriptor::new("java.util.Date"), &Value::Date(d), version);
            assert_eq!(decoded, Value::Date(d));
        }
    }
}

#[test]
fn test_long_string_and_binary_roundtrip() {
    let codec = codec();
    let text = "x".repeat(70_000);
    let blob = Bytes::from(vec![7u8; 70_000]);
    for version in VERSIONS {
        let decoded = roundtrip(&codec, &TypeDescriptor::new("java.lang.String"), &Value::from(text.as_str()), version);
        assert_eq!(decoded, Value::from(text.as_str()));

        let decoded = roundtrip(&codec, &TypeDescriptor::array("byte", 1), &Value::Bytes(blob.clone()), version);
        assert_eq!(decoded, Value::Bytes(blob.clone()));
    }
}

#[test]
fn test_arrays_roundtrip() {
    let codec = codec();
    let ints = Value::list(vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
    let nested = Value::list(vec![
        Value::list(vec![Value::from("a")]),
        Value::list(vec![Value::from("b"), Value::from("c")]),
    ]);
    for version in VERSIONS {
        let decoded = roundtrip(&codec, &TypeDescriptor::array("int", 1), &ints, version);
        let list = decoded.as_list().unwrap();
        assert_eq!(list.type_name.as_deref(), Some("[int"));
        assert_eq!(list.items, ints.as_list().unwrap().items);

        let decoded = roundtrip(&codec, &TypeDescriptor::array("java.lang.String", 2), &nested, version);
        let outer = decoded.as_list().unwrap();
        assert_eq!(outer.type_name.as_deref(), Some("[[java.lang.String"));
        let second = outer.items[1].as_list().unwrap();
        assert_eq!(second.type_name.as_deref(), Some("[java.lang.String"));
        assert_eq!(second.items, vec![Value::from("b"), Value::from("c")]);
    }
}

#[test]
fn test_map_and_list_roundtrip() {
    let codec = codec();
    let map_desc = TypeDescriptor::map("java.util.HashMap", "java.lang.String".into(), "int".into());
    let map = Value::map(vec![
        (Value::from("one"), Value::Int(1)),
        (Value::from("two"), Value::Int(2)),
    ]);
    let list_desc = TypeDescriptor::list("java.util.ArrayList", "java.lang.Long".into());
    let list = Value::list(vec![Value::Long(5), Value::Null]);
    for version in VERSIONS {
        assert_eq!(roundtrip(&codec, &map_desc, &map, version), map);
        assert_eq!(roundtrip(&codec, &list_desc, &list, version), list);
    }
}

#[test]
fn test_nested_class_roundtrip() {
    let codec = codec();
    let order = Value::object(
        "com.test.Order",
        [
            ("id", Value::Long(99)),
            ("title", Value::from("books")),
            ("tags", Value::list(vec![Value::from("a"), Value::from("b")])),
            (
                "owner",
                Value::object("com.test.User", [("name", Value::from("ann")), ("vip", Value::Bool(true))]),
            ),
            ("status", Value::from("PAID")),
        ],
    );
    for version in VERSIONS {
        let decoded = roundtrip(&codec, &TypeDescriptor::new("com.test.Order"), &order, version);
        let obj = decoded.as_object().unwrap();
        assert_eq!(obj.class_name, "com.test.Order");
        assert_eq!(obj.get("id"), Some(&Value::Long(99)));
        assert_eq!(obj.get("title"), Some(&Value::from("books")));

        let tags = obj.get("tags").and_then(Value::as_list).unwrap();
        assert_eq!(tags.type_name.as_deref(), Some("java.util.List"));
        assert_eq!(tags.items.len(), 2);

        let owner = obj.get("owner").and_then(Value::as_object).unwrap();
        assert_eq!(owner.get("name"), Some(&Value::from("ann")));
        assert_eq!(owner.get("vip"), Some(&Value::Bool(true)));

        let status = obj.get("status").and_then(Value::as_object).unwrap();
        assert_eq!(status.class_name, "com.test.Status");
        assert_eq!(status.get("name"), Some(&Value::from("PAID")));
    }
}

#[test]
fn test_two_objects_share_one_class_definition() {
    let codec = codec();
    let user = |name: &str| Value::object("com.test.User", [("name", Value::from(name)), ("vip", Value::Null)]);
    let mut buf = bytes::BytesMut::new();
    {
        let mut writer = codec.writer(&mut buf, Version::V2);
        let desc = TypeDescriptor::new("com.test.User");
        writer.write_with(&desc, &user("a")).unwrap();
        writer.write_with(&desc, &user("b")).unwrap();
    }

    let definitions = buf.iter().filter(|&&b| b == b'C').count();
    assert_eq!(definitions, 1);
    let instances = buf.iter().filter(|&&b| b == 0x60).count();
    assert_eq!(instances, 2);

    let mut reader = codec.reader(&buf, Version::V2);
    assert_eq!(reader.read_value().unwrap(), user("a"));
    assert_eq!(reader.read_value().unwrap(), user("b"));
    assert!(reader.is_empty());
}

#[test]
fn test_shared_node_decodes_to_shared_arc() {
    let codec = codec();
    let shared = Value::object("com.test.User", [("name", Value::from("s")), ("vip", Value::Bool(false))]);
    let pair = Value::list(vec![shared.clone(), shared]);
    let desc = TypeDescriptor::list("java.util.ArrayList", "com.test.User".into());
    for version in VERSIONS {
        let decoded = roundtrip(&codec, &desc, &pair, version);
        let items = &decoded.as_list().unwrap().items;
        match (&items[0], &items[1]) {
            (Value::Object(a), Value::Object(b)) => assert!(Arc::ptr_eq(a, b)),
            other => panic!("unexpected items {other:?}"),
        }
    }
}

#[test]
fn test_abstract_field_uses_value_type() {
    let registry = SchemaRegistry::with_builtins();
    registry.register(
        ClassSchema::new("com.test.Holder")
            .field("payload", TypeDescriptor::new("com.test.Shape").as_abstract("com.test.Shape")),
    );
    registry.register(ClassSchema::new("com.test.Circle").field("radius", "int"));
    let codec = HessianCodec::new(Arc::new(registry));

    let holder = Value::object(
        "com.test.Holder",
        [(
            "payload",
            Value::typed(
                "com.test.Circle",
                Value::object("com.test.Circle", [("radius", Value::Int(4))]),
            ),
        )],
    );
    let decoded = roundtrip(&codec, &TypeDescriptor::new("com.test.Holder"), &holder, Version::V2);
    let payload = decoded.as_object().and_then(|o| o.get("payload")).and_then(Value::as_object).unwrap();
    assert_eq!(payload.class_name, "com.test.Circle");
    assert_eq!(payload.get("radius"), Some(&Value::Int(4)));
}

proptest::proptest! {
    #[test]
    fn prop_reader_never_panics(bytes in proptest::collection::vec(proptest::prelude::any::<u8>(), 0..256)) {
        let codec = HessianCodec::default();
        for version in VERSIONS {
            let _ = codec.decode(&bytes, version);
        }
    }

    #[test]
    fn prop_long_compact_forms(n in proptest::prelude::any::<i64>()) {
        let codec = codec();
        let decoded = roundtrip(&codec, &TypeDescriptor::new("long"), &Value::Long(n), Version::V2);
        proptest::prop_assert_eq!(decoded, Value::Long(n));
    }
}
