//! Recursive-descent parser for cbuf schema source, building directly into
//! a shared [`Schema`] arena. One call parses one file's tokens; `#import`
//! directives are handed back to the caller as bare filenames to resolve
//! (see `builder::SchemaLoader`), so this module never touches the
//! filesystem.

use crate::ast::{
    ArrayKind, Element, ElementType, Enum, EnumValue, Literal, NamespaceId, PrimType, Schema,
    Struct, SrcLocation, Symbol,
};
use crate::errors::CbufError;
use crate::tokenizer::{tokenize, Token, TokenStream};

/// Result of parsing one schema file: the imports it named, in order.
pub struct ParsedFile {
    pub imports: Vec<String>,
}

pub fn parse_source(schema: &mut Schema, file: &str, source: &str) -> Result<ParsedFile, CbufError> {
    log::trace!("Entering parse_source({file})");
    let tokens = tokenize(file, source)?;
    let eof_loc = SrcLocation {
        file: file.to_string(),
        line: source.lines().count().max(1) as u32,
        column: 1,
    };
    let mut stream = TokenStream::new(tokens, eof_loc);
    let mut imports = Vec::new();

    while !stream.is_empty() {
        match stream.peek() {
            Some(Token::Hash) => {
                imports.push(parse_import(&mut stream)?);
            }
            Some(Token::Keyword(kw)) if kw == "namespace" => {
                parse_namespace(schema, &mut stream)?;
            }
            Some(Token::Keyword(kw)) if kw == "struct" => {
                let ns = schema.global_namespace;
                parse_struct(schema, &mut stream, ns)?;
            }
            Some(Token::Keyword(kw)) if kw == "enum" => {
                let ns = schema.global_namespace;
                parse_enum(schema, &mut stream, ns)?;
            }
            other => {
                return Err(unexpected(
                    &stream,
                    vec!["#import", "namespace", "struct", "enum"],
                    other,
                ));
            }
        }
    }

    log::trace!("Exiting parse_source({file}), {} import(s)", imports.len());
    Ok(ParsedFile { imports })
}

fn unexpected(stream: &TokenStream, expected: Vec<&'static str>, found: Option<&Token>) -> CbufError {
    CbufError::parse(
        stream.peek_loc(),
        expected,
        found.map_or_else(|| "end of file".to_string(), |t| format!("{t:?}")),
    )
}

fn expect_ident(stream: &mut TokenStream) -> Result<(String, SrcLocation), CbufError> {
    let loc = stream.peek_loc();
    match stream.advance() {
        Some(Token::Identifier(name)) => Ok((name, loc)),
        other => Err(CbufError::parse(
            loc,
            vec!["identifier"],
            other.map_or_else(|| "end of file".to_string(), |t| format!("{t:?}")),
        )),
    }
}

fn expect(stream: &mut TokenStream, want: &Token, label: &'static str) -> Result<(), CbufError> {
    let loc = stream.peek_loc();
    match stream.advance() {
        Some(ref t) if t == want => Ok(()),
        other => Err(CbufError::parse(
            loc,
            vec![label],
            other.map_or_else(|| "end of file".to_string(), |t| format!("{t:?}")),
        )),
    }
}

fn parse_import(stream: &mut TokenStream) -> Result<String, CbufError> {
    expect(stream, &Token::Hash, "#")?;
    match stream.advance() {
        Some(Token::Keyword(kw)) if kw == "import" => {}
        other => {
            return Err(CbufError::parse(
                stream.peek_loc(),
                vec!["import"],
                other.map_or_else(|| "end of file".to_string(), |t| format!("{t:?}")),
            ))
        }
    }
    let loc = stream.peek_loc();
    match stream.advance() {
        Some(Token::Str(path)) => Ok(path),
        other => Err(CbufError::parse(
            loc,
            vec!["string literal"],
            other.map_or_else(|| "end of file".to_string(), |t| format!("{t:?}")),
        )),
    }
}

fn parse_namespace(schema: &mut Schema, stream: &mut TokenStream) -> Result<(), CbufError> {
    expect(
        stream,
        &Token::Keyword("namespace".to_string()),
        "namespace",
    )?;
    let (name, _loc) = expect_ident(stream)?;
    let ns = schema.namespace_named(&name);
    expect(stream, &Token::LBrace, "{")?;

    loop {
        match stream.peek() {
            Some(Token::Keyword(kw)) if kw == "struct" => {
                parse_struct(schema, stream, ns)?;
            }
            Some(Token::Keyword(kw)) if kw == "enum" => {
                parse_enum(schema, stream, ns)?;
            }
            Some(Token::RBrace) => {
                stream.advance();
                break;
            }
            other => {
                return Err(unexpected(stream, vec!["struct", "enum", "}"], other));
            }
        }
    }
    Ok(())
}

fn parse_struct(
    schema: &mut Schema,
    stream: &mut TokenStream,
    namespace: NamespaceId,
) -> Result<crate::ast::StructId, CbufError> {
    expect(stream, &Token::Keyword("struct".to_string()), "struct")?;
    let (name, loc) = expect_ident(stream)?;

    let mut naked = false;
    while matches!(stream.peek(), Some(Token::At)) {
        stream.advance();
        let (attr, attr_loc) = expect_ident(stream)?;
        match attr.as_str() {
            "naked" => naked = true,
            other => log::warn!("{attr_loc}: unknown struct attribute `{other}`, ignoring"),
        }
    }

    expect(stream, &Token::LBrace, "{")?;

    let name_sym = schema.intern(&name);
    let mut s = Struct::new(name_sym, namespace, loc);
    s.naked = naked;

    let mut elements = Vec::new();
    loop {
        if matches!(stream.peek(), Some(Token::RBrace)) {
            stream.advance();
            break;
        }
        elements.push(parse_element(schema, stream)?);
    }
    s.elements = elements;

    Ok(schema.add_struct(s))
}

fn parse_enum(
    schema: &mut Schema,
    stream: &mut TokenStream,
    namespace: NamespaceId,
) -> Result<crate::ast::EnumId, CbufError> {
    expect(stream, &Token::Keyword("enum".to_string()), "enum")?;
    let (name, loc) = expect_ident(stream)?;
    expect(stream, &Token::LBrace, "{")?;

    let mut values = Vec::new();
    let mut next_value = 0i32;

    loop {
        if matches!(stream.peek(), Some(Token::RBrace)) {
            stream.advance();
            break;
        }
        let (value_name, _loc) = expect_ident(stream)?;
        let value = if matches!(stream.peek(), Some(Token::Equals)) {
            stream.advance();
            let n = parse_intexpr(stream)?;
            n as i32
        } else {
            next_value
        };
        next_value = value + 1;
        values.push(EnumValue {
            name: schema.intern(&value_name),
            value,
        });

        match stream.peek() {
            Some(Token::Comma) => {
                stream.advance();
            }
            Some(Token::RBrace) => {
                stream.advance();
                break;
            }
            other => return Err(unexpected(stream, vec![",", "}"], other)),
        }
    }

    let name_sym = schema.intern(&name);
    let e = Enum {
        name: name_sym,
        namespace,
        values,
        loc,
    };
    Ok(schema.add_enum(e))
}

fn parse_intexpr(stream: &mut TokenStream) -> Result<i64, CbufError> {
    let loc = stream.peek_loc();
    match stream.advance() {
        Some(Token::Number(n)) => Ok(n),
        other => Err(CbufError::parse(
            loc,
            vec!["integer literal"],
            other.map_or_else(|| "end of file".to_string(), |t| format!("{t:?}")),
        )),
    }
}

fn parse_element(schema: &mut Schema, stream: &mut TokenStream) -> Result<Element, CbufError> {
    let type_loc = stream.peek_loc();
    let type_ = parse_typeref(schema, stream)?;
    let (name, _name_loc) = expect_ident(stream)?;

    let mut array = ArrayKind::None;
    if matches!(stream.peek(), Some(Token::LBracket)) {
        stream.advance();
        if matches!(stream.peek(), Some(Token::RBracket)) {
            stream.advance();
            array = ArrayKind::Dynamic;
        } else {
            let mut product: u64 = 1;
            loop {
                product *= parse_intexpr(stream)? as u64;
                if matches!(stream.peek(), Some(Token::Star)) {
                    stream.advance();
                    continue;
                }
                break;
            }
            expect(stream, &Token::RBracket, "]")?;
            array = ArrayKind::Static(product);
        }
    }

    while matches!(stream.peek(), Some(Token::At)) {
        stream.advance();
        let (attr, attr_loc) = expect_ident(stream)?;
        match attr.as_str() {
            "compact" => match array {
                ArrayKind::Static(n) => array = ArrayKind::Compact(n),
                _ => {
                    return Err(CbufError::parse(
                        attr_loc,
                        vec!["a static array before @compact"],
                        "no preceding array size",
                    ))
                }
            },
            other => log::warn!("{attr_loc}: unknown element attribute `{other}`, ignoring"),
        }
    }

    let mut default = None;
    if matches!(stream.peek(), Some(Token::Equals)) {
        stream.advance();
        let is_struct_type = matches!(type_, ElementType::Custom { .. });
        if is_struct_type {
            return Err(CbufError::parse(
                stream.peek_loc(),
                vec!["no initializer on struct-typed element"],
                "initializer",
            ));
        }
        default = Some(parse_initializer(stream)?);
    }

    expect(stream, &Token::Semicolon, ";")?;

    Ok(Element {
        name: schema.intern(&name),
        type_,
        array,
        default,
        loc: type_loc,
    })
}

fn parse_typeref(schema: &mut Schema, stream: &mut TokenStream) -> Result<ElementType, CbufError> {
    let loc = stream.peek_loc();
    let (first, _) = expect_ident(stream)?;

    if first == "void" {
        return Err(CbufError::parse(
            loc,
            vec!["a non-void element type"],
            "void",
        ));
    }

    if let Some(prim) = PrimType::from_keyword(&first) {
        return Ok(ElementType::Prim(prim));
    }

    if matches!(stream.peek(), Some(Token::ColonColon)) {
        stream.advance();
        let (second, _) = expect_ident(stream)?;
        return Ok(ElementType::Custom {
            namespace_name: Some(schema.intern(&first)),
            custom_name: schema.intern(&second),
            resolved: None,
        });
    }

    Ok(ElementType::Custom {
        namespace_name: None,
        custom_name: schema.intern(&first),
        resolved: None,
    })
}

fn parse_initializer(stream: &mut TokenStream) -> Result<Literal, CbufError> {
    match stream.peek() {
        Some(Token::LBrace) => {
            stream.advance();
            let mut items = Vec::new();
            if !matches!(stream.peek(), Some(Token::RBrace)) {
                loop {
                    items.push(parse_initializer(stream)?);
                    match stream.peek() {
                        Some(Token::Comma) => {
                            stream.advance();
                            if matches!(stream.peek(), Some(Token::RBrace)) {
                                return Err(CbufError::parse(
                                    stream.peek_loc(),
                                    vec!["another initializer (no trailing comma)"],
                                    "}",
                                ));
                            }
                        }
                        Some(Token::RBrace) => break,
                        other => return Err(unexpected(stream, vec![",", "}"], other)),
                    }
                }
            }
            expect(stream, &Token::RBrace, "}")?;
            Ok(Literal::Array(items))
        }
        Some(Token::Number(_)) => Ok(Literal::Int(parse_intexpr(stream)?)),
        Some(Token::Float(_)) => {
            let v = match stream.advance() {
                Some(Token::Float(f)) => f,
                _ => unreachable!(),
            };
            Ok(Literal::Float(v))
        }
        Some(Token::Str(_)) => {
            let v = match stream.advance() {
                Some(Token::Str(s)) => s,
                _ => unreachable!(),
            };
            Ok(Literal::Str(v))
        }
        other => Err(unexpected(
            stream,
            vec!["integer", "float", "string", "{"],
            other,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{ArrayKind, ElementType, PrimType};

    #[test]
    fn parses_simple_struct_in_namespace() {
        let mut schema = Schema::new();
        let src = "namespace m { struct p { u32 a; u32 b; } }";
        let parsed = parse_source(&mut schema, "t.cbuf", src).unwrap();
        assert!(parsed.imports.is_empty());
        assert_eq!(schema.structs.len(), 1);
        let s = &schema.structs[0];
        assert_eq!(schema.symbol_text(s.name), "p");
        assert_eq!(s.elements.len(), 2);
        assert_eq!(s.elements[0].type_, ElementType::Prim(PrimType::U32));
    }

    #[test]
    fn parses_compact_array() {
        let mut schema = Schema::new();
        let src = "struct s { i32 xs[4] @compact; }";
        parse_source(&mut schema, "t.cbuf", src).unwrap();
        let s = &schema.structs[0];
        assert_eq!(s.elements[0].array, ArrayKind::Compact(4));
    }

    #[test]
    fn parses_dynamic_array_and_string() {
        let mut schema = Schema::new();
        let src = "struct s { string name; u8 data[]; }";
        parse_source(&mut schema, "t.cbuf", src).unwrap();
        let s = &schema.structs[0];
        assert_eq!(s.elements[0].type_, ElementType::Prim(PrimType::String));
        assert_eq!(s.elements[1].array, ArrayKind::Dynamic);
    }

    #[test]
    fn parses_bool_element_type() {
        let mut schema = Schema::new();
        let src = "struct s { bool flag; }";
        parse_source(&mut schema, "t.cbuf", src).unwrap();
        let s = &schema.structs[0];
        assert_eq!(s.elements[0].type_, ElementType::Prim(PrimType::Bool));
    }

    #[test]
    fn parses_naked_attribute() {
        let mut schema = Schema::new();
        let src = "struct inner @naked { u8 x; }";
        parse_source(&mut schema, "t.cbuf", src).unwrap();
        assert!(schema.structs[0].naked);
    }

    #[test]
    fn parses_qualified_typeref() {
        let mut schema = Schema::new();
        let src = "namespace a { struct inner { u8 x; } } struct outer { a::inner field; }";
        parse_source(&mut schema, "t.cbuf", src).unwrap();
        let outer = schema
            .structs
            .iter()
            .find(|s| schema.symbol_text(s.name) == "outer")
            .unwrap();
        match &outer.elements[0].type_ {
            ElementType::Custom {
                namespace_name,
                custom_name,
                ..
            } => {
                assert_eq!(schema.symbol_text(namespace_name.unwrap()), "a");
                assert_eq!(schema.symbol_text(*custom_name), "inner");
            }
            other => panic!("expected Custom typeref, got {other:?}"),
        }
    }

    #[test]
    fn parses_enum_with_explicit_values() {
        let mut schema = Schema::new();
        let src = "enum Color { RED = 2, GREEN, BLUE = 10 }";
        parse_source(&mut schema, "t.cbuf", src).unwrap();
        let e = &schema.enums[0];
        assert_eq!(e.values[0].value, 2);
        assert_eq!(e.values[1].value, 3);
        assert_eq!(e.values[2].value, 10);
    }

    #[test]
    fn rejects_trailing_comma_in_initializer() {
        let mut schema = Schema::new();
        let src = "struct s { u8 xs[3] = {1, 2, 3,}; }";
        assert!(parse_source(&mut schema, "t.cbuf", src).is_err());
    }

    #[test]
    fn rejects_initializer_on_struct_typed_element() {
        let mut schema = Schema::new();
        let src = "struct inner { u8 x; } struct outer { inner field = 1; }";
        assert!(parse_source(&mut schema, "t.cbuf", src).is_err());
    }

    #[test]
    fn rejects_void_element_type() {
        let mut schema = Schema::new();
        let src = "struct s { void x; }";
        assert!(parse_source(&mut schema, "t.cbuf", src).is_err());
    }

    #[test]
    fn rejects_nested_namespace() {
        let mut schema = Schema::new();
        let src = "namespace a { namespace b { struct s { u8 x; } } }";
        assert!(parse_source(&mut schema, "t.cbuf", src).is_err());
    }

    #[test]
    fn parses_import_directive() {
        let mut schema = Schema::new();
        let src = "#import \"common.cbuf\"\nstruct s { u8 x; }";
        let parsed = parse_source(&mut schema, "t.cbuf", src).unwrap();
        assert_eq!(parsed.imports, vec!["common.cbuf".to_string()]);
    }
}
