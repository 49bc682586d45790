//! Decodes a struct body into a schema-driven tree of values without any
//! generated or hand-written `MessageCodec` impl for it — the decoder
//! walks the [`crate::ast::Schema`] directly, the same way the wire
//! format's own rules (§4.3) do, so it works for any type a log's
//! embedded metadata describes. [`Value`] is a closed tree of scalar,
//! array, and nested-struct variants wide enough to hold any schema
//! this format can express.
//!
//! **Variant tolerance.** This walk trusts the schema that was re-parsed
//! from the log's own metadata text, not the hash recorded alongside it —
//! its entire purpose is to keep working across hash drift.

use crate::ast::{ArrayKind, Element, ElementType, PrimType, ResolvedCustom, Schema, StructId};
use crate::errors::CbufError;
use crate::message_buf::MessageBuf;
use crate::wire;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Bool(bool),
    String(String),
    Enum(i32),
    Array(Vec<Value>),
    Struct(StructValue),
}

#[derive(Debug, Clone, PartialEq)]
pub struct StructValue {
    pub type_name: String,
    pub fields: Vec<(String, Value)>,
}

/// Decodes one struct's body from `buf`, dispatching to the packed or net
/// walk per the struct's computed `simple` attribute.
pub fn decode_struct(schema: &Schema, sid: StructId, buf: &mut MessageBuf) -> Result<Value, CbufError> {
    if schema.struct_(sid).simple.unwrap_or(false) {
        decode_packed(schema, sid, buf)
    } else {
        decode_net(schema, sid, buf)
    }
}

fn decode_packed(schema: &Schema, sid: StructId, buf: &mut MessageBuf) -> Result<Value, CbufError> {
    let type_name = schema.struct_qualified_name(sid);
    let mut fields = Vec::new();
    for elem in &schema.struct_(sid).elements {
        let name = schema.symbol_text(elem.name).to_string();
        let value = match elem.array {
            ArrayKind::None => decode_scalar_packed(schema, elem, buf)?,
            ArrayKind::Static(n) => {
                let mut items = Vec::with_capacity(n as usize);
                for _ in 0..n {
                    items.push(decode_scalar_packed(schema, elem, buf)?);
                }
                Value::Array(items)
            }
            ArrayKind::Dynamic | ArrayKind::Compact(_) => {
                return Err(CbufError::Corruption {
                    offset: buf.position(),
                    reason: "a simple struct cannot declare a dynamic or compact array".to_string(),
                })
            }
        };
        fields.push((name, value));
    }
    Ok(Value::Struct(StructValue { type_name, fields }))
}

fn decode_scalar_packed(schema: &Schema, elem: &Element, buf: &mut MessageBuf) -> Result<Value, CbufError> {
    match &elem.type_ {
        ElementType::Prim(p) => decode_prim(*p, buf),
        ElementType::Custom {
            resolved: Some(ResolvedCustom::Enum(_)),
            ..
        } => Ok(Value::Enum(buf.take_i32()?)),
        ElementType::Custom {
            resolved: Some(ResolvedCustom::Struct(inner)),
            ..
        } => decode_packed(schema, *inner, buf),
        ElementType::Custom { resolved: None, .. } => Err(CbufError::Corruption {
            offset: buf.position(),
            reason: "unresolved type in reflective decode".to_string(),
        }),
    }
}

fn decode_net(schema: &Schema, sid: StructId, buf: &mut MessageBuf) -> Result<Value, CbufError> {
    let type_name = schema.struct_qualified_name(sid);
    let elements: Vec<(String, ElementType, ArrayKind)> = schema
        .struct_(sid)
        .elements
        .iter()
        .map(|e| (schema.symbol_text(e.name).to_string(), e.type_.clone(), e.array.clone()))
        .collect();

    let mut fields = Vec::with_capacity(elements.len());
    for (name, type_, array) in elements {
        let value = decode_element_net(schema, &type_, &array, buf)?;
        fields.push((name, value));
    }
    Ok(Value::Struct(StructValue { type_name, fields }))
}

fn decode_element_net(
    schema: &Schema,
    type_: &ElementType,
    array: &ArrayKind,
    buf: &mut MessageBuf,
) -> Result<Value, CbufError> {
    match *array {
        ArrayKind::None => decode_scalar_net(schema, type_, buf),
        ArrayKind::Static(n) => {
            let mut items = Vec::with_capacity(n as usize);
            for _ in 0..n {
                items.push(decode_scalar_net(schema, type_, buf)?);
            }
            Ok(Value::Array(items))
        }
        ArrayKind::Dynamic => {
            let count = buf.take_u32()?;
            let mut items = Vec::with_capacity(count as usize);
            for _ in 0..count {
                items.push(decode_scalar_net(schema, type_, buf)?);
            }
            Ok(Value::Array(items))
        }
        ArrayKind::Compact(capacity) => {
            let count = buf.take_u32()?;
            if u64::from(count) > capacity {
                return Err(CbufError::CompactOverflow {
                    count,
                    capacity: capacity as u32,
                });
            }
            let mut items = Vec::with_capacity(count as usize);
            for _ in 0..count {
                items.push(decode_scalar_net(schema, type_, buf)?);
            }
            Ok(Value::Array(items))
        }
    }
}

fn decode_scalar_net(schema: &Schema, type_: &ElementType, buf: &mut MessageBuf) -> Result<Value, CbufError> {
    match type_ {
        ElementType::Prim(p) => decode_prim(*p, buf),
        ElementType::Custom {
            resolved: Some(ResolvedCustom::Enum(_)),
            ..
        } => Ok(Value::Enum(buf.take_i32()?)),
        ElementType::Custom {
            resolved: Some(ResolvedCustom::Struct(inner)),
            ..
        } => {
            if !schema.struct_(*inner).naked {
                // Nested non-naked structs embed their full framed encoding;
                // the preamble is skipped over (trusted, not re-verified —
                // variant tolerance means we follow the schema's shape, not
                // the inner hash).
                buf.skip(wire::PREAMBLE_LEN)?;
            }
            decode_struct(schema, *inner, buf)
        }
        ElementType::Custom { resolved: None, .. } => Err(CbufError::Corruption {
            offset: buf.position(),
            reason: "unresolved type in reflective decode".to_string(),
        }),
    }
}

fn decode_prim(p: PrimType, buf: &mut MessageBuf) -> Result<Value, CbufError> {
    Ok(match p {
        PrimType::U8 => Value::U8(buf.take_u8()?),
        PrimType::U16 => Value::U16(buf.take_u16()?),
        PrimType::U32 => Value::U32(buf.take_u32()?),
        PrimType::U64 => Value::U64(buf.take_u64()?),
        PrimType::I8 => Value::I8(buf.take_i8()?),
        PrimType::I16 => Value::I16(buf.take_i16()?),
        PrimType::I32 => Value::I32(buf.take_i32()?),
        PrimType::I64 => Value::I64(buf.take_i64()?),
        PrimType::F32 => Value::F32(buf.take_f32()?),
        PrimType::F64 => Value::F64(buf.take_f64()?),
        PrimType::Bool => Value::Bool(buf.take_bool()?),
        PrimType::String => Value::String(buf.take_string()?),
        PrimType::ShortString => Value::String(buf.take_short_string()?),
    })
}

impl Value {
    /// Flattens a struct tree into `/`-joined paths: array elements get
    /// a `.NN`-suffixed path segment, nested structs recurse.
    pub fn flatten(&self) -> Vec<(String, Value)> {
        self.flatten_sub("")
    }

    fn flatten_sub(&self, prefix: &str) -> Vec<(String, Value)> {
        match self {
            Value::Struct(sv) => {
                let mut out = Vec::new();
                for (name, value) in &sv.fields {
                    let path = if prefix.is_empty() {
                        name.clone()
                    } else {
                        format!("{prefix}/{name}")
                    };
                    out.extend(value.flatten_field(&path));
                }
                out
            }
            other => vec![(prefix.to_string(), other.clone())],
        }
    }

    fn flatten_field(&self, path: &str) -> Vec<(String, Value)> {
        match self {
            Value::Array(items) => items
                .iter()
                .enumerate()
                .flat_map(|(i, v)| v.flatten_field(&format!("{path}.{i:02}")))
                .collect(),
            Value::Struct(_) => self.flatten_sub(path),
            other => vec![(path.to_string(), other.clone())],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attrs::compute_all;
    use crate::parser::parse_source;
    use crate::resolver::resolve;

    fn build(src: &str) -> Schema {
        let mut schema = Schema::new();
        parse_source(&mut schema, "t.cbuf", src).unwrap();
        resolve(&mut schema).unwrap();
        compute_all(&mut schema);
        schema
    }

    #[test]
    fn decodes_simple_struct_packed() {
        let schema = build("struct p { u32 a; i16 b; }");
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&7u32.to_ne_bytes());
        bytes.extend_from_slice(&(-3i16).to_ne_bytes());
        let mut buf = MessageBuf::new(bytes);
        let value = decode_struct(&schema, StructId(0), &mut buf).unwrap();
        match value {
            Value::Struct(sv) => {
                assert_eq!(sv.fields[0], ("a".to_string(), Value::U32(7)));
                assert_eq!(sv.fields[1], ("b".to_string(), Value::I16(-3)));
            }
            _ => panic!("expected struct"),
        }
    }

    #[test]
    fn decodes_dynamic_array_net() {
        let schema = build("struct p { u16 xs[]; }");
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&3u32.to_ne_bytes());
        bytes.extend_from_slice(&1u16.to_ne_bytes());
        bytes.extend_from_slice(&2u16.to_ne_bytes());
        bytes.extend_from_slice(&3u16.to_ne_bytes());
        let mut buf = MessageBuf::new(bytes);
        let value = decode_struct(&schema, StructId(0), &mut buf).unwrap();
        match value {
            Value::Struct(sv) => assert_eq!(
                sv.fields[0].1,
                Value::Array(vec![Value::U16(1), Value::U16(2), Value::U16(3)])
            ),
            _ => panic!("expected struct"),
        }
    }

    #[test]
    fn compact_array_over_capacity_is_rejected() {
        let schema = build("struct p { u8 xs[4] @compact; }");
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&5u32.to_ne_bytes());
        let mut buf = MessageBuf::new(bytes);
        assert!(matches!(
            decode_struct(&schema, StructId(0), &mut buf),
            Err(CbufError::CompactOverflow { .. })
        ));
    }

    #[test]
    fn flatten_joins_nested_paths_with_slash() {
        let schema = build("struct inner { u8 x; } struct outer { inner f; u16 ys[2]; }");
        let outer_idx = schema
            .structs
            .iter()
            .position(|s| schema.symbol_text(s.name) == "outer")
            .unwrap();
        let mut bytes = Vec::new();
        bytes.push(9u8); // inner.x
        bytes.extend_from_slice(&1u16.to_ne_bytes());
        bytes.extend_from_slice(&2u16.to_ne_bytes());
        let mut buf = MessageBuf::new(bytes);
        let value = decode_struct(&schema, StructId(outer_idx as u32), &mut buf).unwrap();
        let flat = value.flatten();
        assert_eq!(flat[0], ("f/x".to_string(), Value::U8(9)));
        assert_eq!(flat[1], ("ys.00".to_string(), Value::U16(1)));
        assert_eq!(flat[2], ("ys.01".to_string(), Value::U16(2)));
    }
}
