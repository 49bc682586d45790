//! Arena-backed AST for cbuf schemas.
//!
//! The original toolchain links AST nodes with raw pointers
//! (`ast_struct*`, `ast_namespace*`); here every cross-reference is a typed
//! index into a per-kind arena owned by [`Schema`]. This gives trivial cycle
//! detection (no pointer chasing through freed memory), bulk deallocation
//! when a `Schema` is dropped, and a deterministic declaration order for
//! iteration (arenas are `Vec`s, indices are insertion order).

use std::collections::HashMap;
use std::fmt;

pub const GLOBAL_NAMESPACE: &str = "__global_namespace";

/// File, line, and column of a token or AST node, carried for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct SrcLocation {
    pub file: String,
    pub line: u32,
    pub column: u32,
}

impl fmt::Display for SrcLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// An interned identifier. Cheap to copy and compare; resolve back to a
/// `&str` via [`Schema::symbol_text`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol(u32);

#[derive(Default)]
pub struct Interner {
    strings: Vec<String>,
    lookup: HashMap<String, Symbol>,
}

impl Interner {
    pub fn intern(&mut self, s: &str) -> Symbol {
        if let Some(&sym) = self.lookup.get(s) {
            return sym;
        }
        let sym = Symbol(self.strings.len() as u32);
        self.strings.push(s.to_string());
        self.lookup.insert(s.to_string(), sym);
        sym
    }

    pub fn text(&self, sym: Symbol) -> &str {
        &self.strings[sym.0 as usize]
    }
}

macro_rules! def_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u32);
    };
}

def_id!(NamespaceId);
def_id!(StructId);
def_id!(EnumId);
def_id!(ElemId);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimType {
    U8,
    U16,
    U32,
    U64,
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
    Bool,
    String,
    ShortString,
}

impl PrimType {
    /// Fixed wire width in bytes, or `None` for the length-prefixed `string`.
    pub fn fixed_width(self) -> Option<usize> {
        use PrimType::*;
        Some(match self {
            U8 | I8 | Bool => 1,
            U16 | I16 => 2,
            U32 | I32 | F32 => 4,
            U64 | I64 | F64 => 8,
            ShortString => 16,
            String => return None,
        })
    }

    /// The name as it must appear in the canonical hash rendering (§4.2).
    pub fn canonical_name(self) -> &'static str {
        use PrimType::*;
        match self {
            U8 => "u8",
            U16 => "u16",
            U32 => "u32",
            U64 => "u64",
            I8 => "i8",
            I16 => "i16",
            I32 => "i32",
            I64 => "i64",
            F32 => "f32",
            F64 => "f64",
            Bool => "bool",
            String => "string",
            ShortString => "short_string",
        }
    }

    pub fn from_keyword(kw: &str) -> Option<Self> {
        use PrimType::*;
        Some(match kw {
            "u8" | "uint8" => U8,
            "u16" | "uint16" => U16,
            "u32" | "uint32" => U32,
            "u64" | "uint64" => U64,
            "i8" | "int8" | "s8" => I8,
            "i16" | "int16" | "s16" => I16,
            "i32" | "int32" | "s32" | "int" => I32,
            "i64" | "int64" | "s64" => I64,
            "f32" | "float" => F32,
            "f64" | "double" => F64,
            "bool" => Bool,
            "string" => String,
            "short_string" => ShortString,
            _ => return None,
        })
    }
}

/// How an element's array suffix was declared.
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayKind {
    /// Not an array.
    None,
    /// Fixed-size array, `[N]`. The product of all dimensions is stored.
    Static(u64),
    /// Empty brackets, `[]`: length-prefixed at encode time.
    Dynamic,
    /// `@compact` attribute on a fixed-size declaration: capacity `N`,
    /// runtime count written as a u32 prefix and checked against `N`.
    Compact(u64),
}

/// What a `custom` typeref resolves to, filled in by the symbol resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedCustom {
    Struct(StructId),
    Enum(EnumId),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Int(i64),
    Float(f64),
    Str(String),
    Array(Vec<Literal>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ElementType {
    Prim(PrimType),
    /// `custom_name` (optionally `namespace_name::custom_name`), resolved
    /// to a struct or enum by the resolver. `None` until resolved.
    Custom {
        namespace_name: Option<Symbol>,
        custom_name: Symbol,
        resolved: Option<ResolvedCustom>,
    },
}

#[derive(Debug, Clone)]
pub struct Element {
    pub name: Symbol,
    pub type_: ElementType,
    pub array: ArrayKind,
    pub default: Option<Literal>,
    pub loc: SrcLocation,
}

impl Element {
    pub fn is_array(&self) -> bool {
        !matches!(self.array, ArrayKind::None)
    }
}

#[derive(Debug, Clone)]
pub struct Struct {
    pub name: Symbol,
    pub namespace: NamespaceId,
    pub elements: Vec<Element>,
    pub naked: bool,
    pub loc: SrcLocation,

    // Computed by the attribute computer (C4); `None` until computed.
    pub simple: Option<bool>,
    pub supports_compact: Option<bool>,
    pub hash_value: Option<u64>,
}

impl Struct {
    pub fn new(name: Symbol, namespace: NamespaceId, loc: SrcLocation) -> Self {
        Struct {
            name,
            namespace,
            elements: Vec::new(),
            naked: false,
            loc,
            simple: None,
            supports_compact: None,
            hash_value: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EnumValue {
    pub name: Symbol,
    pub value: i32,
}

#[derive(Debug, Clone)]
pub struct Enum {
    pub name: Symbol,
    pub namespace: NamespaceId,
    pub values: Vec<EnumValue>,
    pub loc: SrcLocation,
}

#[derive(Debug, Clone, Default)]
pub struct Namespace {
    pub name: Option<Symbol>, // `None` for the synthetic global namespace
    pub structs: Vec<StructId>,
    pub enums: Vec<EnumId>,
}

/// Owns every AST node produced by parsing one or more `#import`-linked
/// schema files. Dropping a `Schema` frees the whole tree at once.
#[derive(Default)]
pub struct Schema {
    pub interner: Interner,
    pub namespaces: Vec<Namespace>,
    pub structs: Vec<Struct>,
    pub enums: Vec<Enum>,
    pub global_namespace: NamespaceId,
    namespace_by_name: HashMap<Symbol, NamespaceId>,
}

impl Schema {
    pub fn new() -> Self {
        let mut schema = Schema {
            interner: Interner::default(),
            namespaces: Vec::new(),
            structs: Vec::new(),
            enums: Vec::new(),
            global_namespace: NamespaceId(0),
            namespace_by_name: HashMap::new(),
        };
        schema.namespaces.push(Namespace::default());
        schema
    }

    pub fn intern(&mut self, s: &str) -> Symbol {
        self.interner.intern(s)
    }

    pub fn symbol_text(&self, sym: Symbol) -> &str {
        self.interner.text(sym)
    }

    pub fn namespace_named(&mut self, name: &str) -> NamespaceId {
        let sym = self.intern(name);
        if let Some(&id) = self.namespace_by_name.get(&sym) {
            return id;
        }
        let id = NamespaceId(self.namespaces.len() as u32);
        self.namespaces.push(Namespace {
            name: Some(sym),
            structs: Vec::new(),
            enums: Vec::new(),
        });
        self.namespace_by_name.insert(sym, id);
        id
    }

    pub fn namespace(&self, id: NamespaceId) -> &Namespace {
        &self.namespaces[id.0 as usize]
    }

    pub fn namespace_mut(&mut self, id: NamespaceId) -> &mut Namespace {
        &mut self.namespaces[id.0 as usize]
    }

    pub fn add_struct(&mut self, s: Struct) -> StructId {
        let namespace = s.namespace;
        let id = StructId(self.structs.len() as u32);
        self.structs.push(s);
        self.namespace_mut(namespace).structs.push(id);
        id
    }

    pub fn add_enum(&mut self, e: Enum) -> EnumId {
        let namespace = e.namespace;
        let id = EnumId(self.enums.len() as u32);
        self.enums.push(e);
        self.namespace_mut(namespace).enums.push(id);
        id
    }

    pub fn struct_(&self, id: StructId) -> &Struct {
        &self.structs[id.0 as usize]
    }

    pub fn struct_mut(&mut self, id: StructId) -> &mut Struct {
        &mut self.structs[id.0 as usize]
    }

    pub fn enum_(&self, id: EnumId) -> &Enum {
        &self.enums[id.0 as usize]
    }

    /// The struct's fully qualified name, e.g. `"motors::command"` or just
    /// `"command"` for one declared in the global namespace.
    pub fn struct_qualified_name(&self, id: StructId) -> String {
        let s = self.struct_(id);
        match self.namespace(s.namespace).name {
            Some(ns) => format!("{}::{}", self.symbol_text(ns), self.symbol_text(s.name)),
            None => self.symbol_text(s.name).to_string(),
        }
    }

    pub fn find_struct_in(&self, namespace: NamespaceId, name: Symbol) -> Option<StructId> {
        self.namespace(namespace)
            .structs
            .iter()
            .copied()
            .find(|&id| self.struct_(id).name == name)
    }

    pub fn find_enum_in(&self, namespace: NamespaceId, name: Symbol) -> Option<EnumId> {
        self.namespace(namespace)
            .enums
            .iter()
            .copied()
            .find(|&id| self.enum_(id).name == name)
    }
}
