use ingest_api::{FieldType, RecordSchema, ScalarType, SchemaError};
use prost_reflect::{DescriptorPool, MessageDescriptor};
use prost_types::field_descriptor_proto::{Label, Type};
use prost_types::{DescriptorProto, FieldDescriptorProto, FileDescriptorProto, MessageOptions};

const PACKAGE: &str = "ingest";

/// Build a proto2 message descriptor for `schema` at runtime.
///
/// Layout follows the catalog conventions: field N of the schema gets
/// number N (1-based), nullable scalars are `optional`, non-nullable are
/// `required`, arrays are `repeated`, maps get a nested `<Name>Entry`.
pub fn build_descriptor(message_name: &str, schema: &RecordSchema) -> Result<MessageDescriptor, SchemaError> {
    schema.validate()?;

    let message_name = proto_ident(message_name);
    let mut message = DescriptorProto {
        name: Some(message_name.clone()),
        ..Default::default()
    };

    for (i, field) in schema.fields.iter().enumerate() {
        let number = i32::try_from(i + 1).map_err(|_| SchemaError::Invalid("too many fields".into()))?;
        let name = proto_ident(&field.name);

        let proto_field = match &field.field_type {
            FieldType::Scalar(scalar) => FieldDescriptorProto {
                name: Some(name),
                number: Some(number),
                label: Some((if field.nullable { Label::Optional } else { Label::Required }) as i32),
                r#type: Some(proto_type(*scalar) as i32),
                ..Default::default()
            },
            FieldType::Array(element) => FieldDescriptorProto {
                name: Some(name),
                number: Some(number),
                label: Some(Label::Repeated as i32),
                r#type: Some(proto_type(*element) as i32),
                ..Default::default()
            },
            FieldType::Map(key, value) => {
                let entry_name = proto_ident(&format!("{}Entry", camel_case(&name)));
                message.nested_type.push(map_entry(&entry_name, *key, *value));
                FieldDescriptorProto {
                    name: Some(name),
                    number: Some(number),
                    label: Some(Label::Repeated as i32),
                    r#type: Some(Type::Message as i32),
                    type_name: Some(format!(".{PACKAGE}.{message_name}.{entry_name}")),
                    ..Default::default()
                }
            }
        };
        message.field.push(proto_field);
    }

    let file = FileDescriptorProto {
        name: Some(format!("{}.proto", message_name.to_ascii_lowercase())),
        package: Some(PACKAGE.to_string()),
        message_type: vec![message],
        syntax: Some("proto2".to_string()),
        ..Default::default()
    };

    let mut pool = DescriptorPool::new();
    pool.add_file_descriptor_proto(file)
        .map_err(|e| SchemaError::Invalid(format!("descriptor: {e}")))?;

    let full_name = format!("{PACKAGE}.{message_name}");
    pool.get_message_by_name(&full_name)
        .ok_or_else(|| SchemaError::Invalid(format!("message '{full_name}' missing from descriptor pool")))
}

fn map_entry(name: &str, key: ScalarType, value: ScalarType) -> DescriptorProto {
    let entry_field = |field_name: &str, number: i32, scalar: ScalarType| FieldDescriptorProto {
        name: Some(field_name.to_string()),
        number: Some(number),
        label: Some(Label::Optional as i32),
        r#type: Some(proto_type(scalar) as i32),
        ..Default::default()
    };

    DescriptorProto {
        name: Some(name.to_string()),
        field: vec![entry_field("key", 1, key), entry_field("value", 2, value)],
        options: Some(MessageOptions {
            map_entry: Some(true),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn proto_type(scalar: ScalarType) -> Type {
    match scalar {
        ScalarType::Bool => Type::Bool,
        ScalarType::Int16 | ScalarType::Int32 | ScalarType::Date => Type::Int32,
        ScalarType::Int64 | ScalarType::Timestamp => Type::Int64,
        ScalarType::Float32 => Type::Float,
        ScalarType::Float64 => Type::Double,
        ScalarType::String | ScalarType::Varchar { .. } => Type::String,
        ScalarType::Bytes => Type::Bytes,
    }
}

/// Make `name` a valid protobuf identifier.
fn proto_ident(name: &str) -> String {
    let mut ident: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if ident.is_empty() || ident.starts_with(|c: char| c.is_ascii_digit()) {
        ident.insert(0, '_');
    }
    ident
}

/// `submit_counter` → `SubmitCounter`, the protoc rule for map entry names.
fn camel_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper = true;
    for c in name.chars() {
        if c == '_' {
            upper = true;
        } else if upper {
            out.push(c.to_ascii_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
    }
    out
}
