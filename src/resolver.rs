//! Binds `custom` element typerefs to the struct or enum they name, and
//! checks the two structural invariants that can only be seen once every
//! declaration in a schema (and its imports) has been parsed: no two
//! structs share a name within a namespace, and no struct contains itself
//! through a chain of nested structs.

use std::collections::HashSet;

use crate::ast::{ElementType, ResolvedCustom, Schema, StructId};
use crate::errors::CbufError;

pub fn resolve(schema: &mut Schema) -> Result<(), CbufError> {
    check_duplicate_names(schema)?;
    resolve_typerefs(schema)?;
    check_cycles(schema)?;
    Ok(())
}

fn check_duplicate_names(schema: &Schema) -> Result<(), CbufError> {
    for ns in &schema.namespaces {
        let mut seen = HashSet::new();
        for &sid in &ns.structs {
            let s = schema.struct_(sid);
            if !seen.insert(s.name) {
                return Err(CbufError::DuplicateName {
                    loc: s.loc.clone(),
                    namespace: ns
                        .name
                        .map(|n| schema.symbol_text(n).to_string())
                        .unwrap_or_default(),
                    name: schema.symbol_text(s.name).to_string(),
                });
            }
        }
    }
    Ok(())
}

fn resolve_typerefs(schema: &mut Schema) -> Result<(), CbufError> {
    for sid_idx in 0..schema.structs.len() {
        let sid = StructId(sid_idx as u32);
        let namespace = schema.struct_(sid).namespace;
        let global = schema.global_namespace;

        for elem_idx in 0..schema.struct_(sid).elements.len() {
            let (namespace_name, custom_name, loc) = {
                let elem = &schema.struct_(sid).elements[elem_idx];
                match &elem.type_ {
                    ElementType::Custom {
                        namespace_name,
                        custom_name,
                        ..
                    } => (*namespace_name, *custom_name, elem.loc.clone()),
                    ElementType::Prim(_) => continue,
                }
            };

            let search_namespace = match namespace_name {
                Some(ns_sym) => {
                    let ns_name = schema.symbol_text(ns_sym).to_string();
                    let candidate = schema
                        .namespaces
                        .iter()
                        .position(|n| n.name.map(|s| schema.symbol_text(s) == ns_name.as_str()).unwrap_or(false));
                    match candidate {
                        Some(idx) => crate::ast::NamespaceId(idx as u32),
                        None => {
                            return Err(CbufError::UnresolvedType {
                                loc,
                                name: format!("{}::{}", ns_name, schema.symbol_text(custom_name)),
                            })
                        }
                    }
                }
                None => namespace,
            };

            let resolved = schema
                .find_struct_in(search_namespace, custom_name)
                .map(ResolvedCustom::Struct)
                .or_else(|| schema.find_enum_in(search_namespace, custom_name).map(ResolvedCustom::Enum))
                .or_else(|| {
                    if search_namespace != global {
                        schema
                            .find_struct_in(global, custom_name)
                            .map(ResolvedCustom::Struct)
                            .or_else(|| schema.find_enum_in(global, custom_name).map(ResolvedCustom::Enum))
                    } else {
                        None
                    }
                });

            match resolved {
                Some(r) => {
                    if let ElementType::Custom { resolved, .. } =
                        &mut schema.struct_mut(sid).elements[elem_idx].type_
                    {
                        *resolved = Some(r);
                    }
                }
                None => {
                    return Err(CbufError::UnresolvedType {
                        loc,
                        name: schema.symbol_text(custom_name).to_string(),
                    })
                }
            }
        }
    }
    Ok(())
}

fn check_cycles(schema: &Schema) -> Result<(), CbufError> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Unvisited,
        InProgress,
        Done,
    }
    let mut marks = vec![Mark::Unvisited; schema.structs.len()];

    fn visit(
        schema: &Schema,
        sid: StructId,
        marks: &mut Vec<Mark>,
    ) -> Result<(), CbufError> {
        match marks[sid.0 as usize] {
            Mark::Done => return Ok(()),
            Mark::InProgress => {
                let s = schema.struct_(sid);
                return Err(CbufError::CyclicType {
                    loc: s.loc.clone(),
                    name: schema.struct_qualified_name(sid),
                });
            }
            Mark::Unvisited => {}
        }
        marks[sid.0 as usize] = Mark::InProgress;
        for elem in &schema.struct_(sid).elements {
            if let ElementType::Custom {
                resolved: Some(ResolvedCustom::Struct(inner)),
                ..
            } = &elem.type_
            {
                visit(schema, *inner, marks)?;
            }
        }
        marks[sid.0 as usize] = Mark::Done;
        Ok(())
    }

    for idx in 0..schema.structs.len() {
        visit(schema, StructId(idx as u32), &mut marks)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_source;

    #[test]
    fn resolves_same_namespace_reference() {
        let mut schema = Schema::new();
        parse_source(&mut schema, "t.cbuf", "struct inner { u8 x; } struct outer { inner f; }").unwrap();
        resolve(&mut schema).unwrap();
        let outer = schema.structs.iter().find(|s| schema.symbol_text(s.name) == "outer").unwrap();
        match &outer.elements[0].type_ {
            ElementType::Custom { resolved: Some(ResolvedCustom::Struct(_)), .. } => {}
            other => panic!("expected resolved struct ref, got {other:?}"),
        }
    }

    #[test]
    fn resolves_qualified_namespace_reference() {
        let mut schema = Schema::new();
        parse_source(
            &mut schema,
            "t.cbuf",
            "namespace m { struct inner { u8 x; } } struct outer { m::inner f; }",
        )
        .unwrap();
        resolve(&mut schema).unwrap();
    }

    #[test]
    fn rejects_unresolved_type() {
        let mut schema = Schema::new();
        parse_source(&mut schema, "t.cbuf", "struct outer { missing f; }").unwrap();
        assert!(resolve(&mut schema).is_err());
    }

    #[test]
    fn rejects_duplicate_struct_names() {
        let mut schema = Schema::new();
        parse_source(&mut schema, "t.cbuf", "struct s { u8 x; } struct s { u8 y; }").unwrap();
        assert!(resolve(&mut schema).is_err());
    }

    #[test]
    fn rejects_direct_cycle() {
        let mut schema = Schema::new();
        parse_source(&mut schema, "t.cbuf", "struct a { b f; } struct b { a f; }").unwrap();
        assert!(resolve(&mut schema).is_err());
    }

    #[test]
    fn resolves_enum_reference() {
        let mut schema = Schema::new();
        parse_source(
            &mut schema,
            "t.cbuf",
            "enum Color { RED, GREEN } struct s { Color c; }",
        )
        .unwrap();
        resolve(&mut schema).unwrap();
        let s = &schema.structs[0];
        match &s.elements[0].type_ {
            ElementType::Custom { resolved: Some(ResolvedCustom::Enum(_)), .. } => {}
            other => panic!("expected resolved enum ref, got {other:?}"),
        }
    }
}
