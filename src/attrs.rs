//! Computes the three attributes that must be deterministic across every
//! implementation of this format: `simple`, `supports_compact`, and
//! `hash_value`. Run once after [`crate::resolver::resolve`] on an
//! already-cycle-free schema, so every computation below is a plain
//! post-order walk, never a true fixed-point iteration.

use crate::ast::{ArrayKind, ElementType, PrimType, ResolvedCustom, Schema, Struct, StructId};

pub fn compute_all(schema: &mut Schema) {
    for idx in 0..schema.structs.len() {
        compute_simple(schema, StructId(idx as u32));
    }
    for idx in 0..schema.structs.len() {
        compute_supports_compact(schema, StructId(idx as u32));
    }
    for idx in 0..schema.structs.len() {
        compute_hash(schema, StructId(idx as u32));
    }
}

fn compute_simple(schema: &mut Schema, sid: StructId) -> bool {
    if let Some(v) = schema.struct_(sid).simple {
        return v;
    }
    // Break potential re-entrancy from a struct visited twice in the walk
    // (not a real cycle, the resolver already rejected those) by seeding
    // `true` before recursing; reassigned below with the real result.
    schema.struct_mut(sid).simple = Some(true);

    let mut simple = true;
    let elem_count = schema.struct_(sid).elements.len();
    for i in 0..elem_count {
        let elem = schema.struct_(sid).elements[i].clone_for_attrs();
        if matches!(elem.array, ArrayKind::Dynamic | ArrayKind::Compact(_)) {
            simple = false;
            continue;
        }
        match elem.type_ {
            ElementType::Prim(PrimType::String) => simple = false,
            ElementType::Prim(_) => {}
            ElementType::Custom {
                resolved: Some(ResolvedCustom::Struct(inner)),
                ..
            } => {
                if !compute_simple(schema, inner) {
                    simple = false;
                }
            }
            ElementType::Custom {
                resolved: Some(ResolvedCustom::Enum(_)),
                ..
            } => {}
            ElementType::Custom { resolved: None, .. } => {
                // Unresolved at this point means resolve() was skipped; treat
                // conservatively as non-simple rather than panicking.
                simple = false;
            }
        }
    }

    schema.struct_mut(sid).simple = Some(simple);
    simple
}

fn compute_supports_compact(schema: &mut Schema, sid: StructId) {
    let has_compact = schema
        .struct_(sid)
        .elements
        .iter()
        .any(|e| matches!(e.array, ArrayKind::Compact(_)));
    schema.struct_mut(sid).supports_compact = Some(has_compact);
}

fn compute_hash(schema: &mut Schema, sid: StructId) -> u64 {
    if let Some(h) = schema.struct_(sid).hash_value {
        return h;
    }
    let text = render_canonical(schema, sid);
    let hash = djb2(text.as_bytes());
    schema.struct_mut(sid).hash_value = Some(hash);
    hash
}

/// Renders the struct exactly as spec'd: `struct ns::name \n` followed by
/// one line per element. This text is also what gets embedded verbatim in
/// metadata frames for the reflective decoder, so formatting here is load
/// bearing, not cosmetic.
pub fn render_canonical(schema: &mut Schema, sid: StructId) -> String {
    let s = schema.struct_(sid);
    let namespace = s.namespace;
    let name = s.name;
    let elements: Vec<_> = s.elements.iter().map(|e| e.clone_for_attrs()).collect();

    let mut out = String::new();
    out.push_str("struct ");
    if let Some(ns_name) = schema.namespace(namespace).name {
        out.push_str(schema.symbol_text(ns_name));
        out.push_str("::");
    }
    out.push_str(schema.symbol_text(name));
    out.push_str(" \n");

    for elem in &elements {
        if let ArrayKind::Static(n) = elem.array {
            out.push_str(&format!("[{n}] "));
        } else if let ArrayKind::Compact(n) = elem.array {
            out.push_str(&format!("[{n}] "));
        }

        match &elem.type_ {
            ElementType::Custom {
                resolved: Some(ResolvedCustom::Enum(eid)),
                ..
            } => {
                let enum_name = schema.symbol_text(schema.enum_(*eid).name).to_string();
                out.push_str(&enum_name);
                out.push(' ');
                out.push_str(schema.symbol_text(elem.name));
                out.push_str(";\n");
            }
            ElementType::Custom {
                resolved: Some(ResolvedCustom::Struct(inner)),
                ..
            } => {
                let inner_hash = compute_hash(schema, *inner);
                out.push_str(&format!("{:X} ", inner_hash));
                out.push_str(schema.symbol_text(elem.name));
                out.push_str(";\n");
            }
            ElementType::Custom { resolved: None, .. } => {
                out.push_str("UNRESOLVED ");
                out.push_str(schema.symbol_text(elem.name));
                out.push_str(";\n");
            }
            ElementType::Prim(p) => {
                out.push_str(p.canonical_name());
                out.push(' ');
                out.push_str(schema.symbol_text(elem.name));
                out.push_str("; \n");
            }
        }
    }

    out
}

fn djb2(bytes: &[u8]) -> u64 {
    let mut h: u64 = 5381;
    for &c in bytes {
        h = h
            .wrapping_shl(5)
            .wrapping_add(h)
            .wrapping_add(c as u64);
    }
    h
}

impl crate::ast::Element {
    fn clone_for_attrs(&self) -> ElementSnapshot {
        ElementSnapshot {
            name: self.name,
            type_: self.type_.clone(),
            array: self.array.clone(),
        }
    }
}

struct ElementSnapshot {
    name: crate::ast::Symbol,
    type_: ElementType,
    array: ArrayKind,
}

#[cfg(test)]
mod tests {
    use super::*;
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
    fn all_primitive_struct_is_simple() {
        let schema = build("struct p { u32 a; u32 b; }");
        assert_eq!(schema.structs[0].simple, Some(true));
    }

    #[test]
    fn string_field_is_not_simple() {
        let schema = build("struct p { string name; }");
        assert_eq!(schema.structs[0].simple, Some(false));
    }

    #[test]
    fn dynamic_array_is_not_simple() {
        let schema = build("struct p { u8 data[]; }");
        assert_eq!(schema.structs[0].simple, Some(false));
    }

    #[test]
    fn nested_non_simple_struct_propagates() {
        let schema = build("struct inner { string name; } struct outer { inner f; }");
        let outer = schema.structs.iter().find(|s| schema.symbol_text(s.name) == "outer").unwrap();
        assert_eq!(outer.simple, Some(false));
    }

    #[test]
    fn compact_array_sets_supports_compact_not_simple() {
        let schema = build("struct p { i32 xs[4] @compact; }");
        assert_eq!(schema.structs[0].supports_compact, Some(true));
        assert_eq!(schema.structs[0].simple, Some(false));
    }

    #[test]
    fn supports_compact_does_not_propagate_through_nesting() {
        let schema = build(
            "struct inner { i32 xs[4] @compact; } struct outer { inner f; }",
        );
        let outer = schema.structs.iter().find(|s| schema.symbol_text(s.name) == "outer").unwrap();
        assert_eq!(outer.supports_compact, Some(false));
    }

    #[test]
    fn adding_trailing_field_changes_hash() {
        let a = build("struct p { u32 a; }");
        let b = build("struct p { u32 a; u32 b; }");
        assert_ne!(a.structs[0].hash_value, b.structs[0].hash_value);
    }

    #[test]
    fn renaming_field_changes_hash() {
        let a = build("struct p { u32 a; }");
        let b = build("struct p { u32 renamed; }");
        assert_ne!(a.structs[0].hash_value, b.structs[0].hash_value);
    }

    #[test]
    fn renaming_nested_struct_contents_changes_outer_hash() {
        let a = build("struct inner { u32 a; } struct outer { inner f; }");
        let b = build("struct inner { u32 renamed; } struct outer { inner f; }");
        let outer_a = a.structs.iter().find(|s| a.symbol_text(s.name) == "outer").unwrap();
        let outer_b = b.structs.iter().find(|s| b.symbol_text(s.name) == "outer").unwrap();
        assert_ne!(outer_a.hash_value, outer_b.hash_value);
    }

    #[test]
    fn djb2_matches_reference_constant() {
        assert_eq!(djb2(b""), 5381);
    }
}
