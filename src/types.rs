//! Debug-info type model.
//!
//! Types extracted from debug info form a graph: a vertex is a type
//! declaration and edges are dependencies between types, linked by [`TypeId`]
//! references (the bucket type of a map points back to itself through its
//! overflow pointer, so direct ownership cannot express it). [`TypeRef`]
//! bundles a shared graph with the id of one of its vertices and is the unit
//! the evaluator passes around.

use gimli::DwAte;
use indexmap::IndexMap;
use std::collections::HashMap;
use std::fmt::{self, Debug, Formatter};
use std::mem;
use std::rc::Rc;

/// Type identifier, unique within one [`TypeGraph`].
pub type TypeId = usize;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StructField {
    pub offset: i64,
    pub type_ref: TypeId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StructType {
    pub name: String,
    pub byte_size: i64,
    /// Fields by name, in declaration order.
    pub fields: IndexMap<String, StructField>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TypeDecl {
    Basic {
        name: String,
        byte_size: i64,
        encoding: DwAte,
    },
    Typedef {
        name: String,
        target: Option<TypeId>,
    },
    /// const/volatile wrapper, transparent for the evaluator.
    Qualifier {
        target: Option<TypeId>,
    },
    Pointer {
        name: String,
        target: Option<TypeId>,
    },
    Struct(StructType),
    Array {
        elem: TypeId,
        count: i64,
    },
    /// A slice is a struct `{array, len, cap}` plus the element type.
    Slice {
        repr: StructType,
        elem: TypeId,
    },
    /// A map names its key/element types; `target` is the header
    /// representation the runtime actually stores (a pointer to the map
    /// header struct).
    Map {
        name: String,
        key: TypeId,
        elem: TypeId,
        target: Option<TypeId>,
    },
    Func {
        name: String,
    },
    Interface {
        name: String,
    },
    Chan {
        name: String,
        target: Option<TypeId>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    Basic,
    Pointer,
    Struct,
    Array,
    Slice,
    Map,
    Func,
    Interface,
    Chan,
    Unknown,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TypeGraph {
    types: HashMap<TypeId, TypeDecl>,
    root: TypeId,
}

impl TypeGraph {
    #[inline(always)]
    pub fn root(&self) -> TypeId {
        self.root
    }

    #[inline(always)]
    pub fn decl(&self, id: TypeId) -> Option<&TypeDecl> {
        self.types.get(&id)
    }

    /// Strip typedef and qualifier layers to a fixpoint.
    pub fn resolve_typedef(&self, mut id: TypeId) -> TypeId {
        loop {
            match self.types.get(&id) {
                Some(TypeDecl::Typedef {
                    target: Some(target),
                    ..
                })
                | Some(TypeDecl::Qualifier {
                    target: Some(target),
                }) => id = *target,
                _ => return id,
            }
        }
    }

    /// Kind of a type with typedef layers stripped.
    pub fn kind(&self, id: TypeId) -> TypeKind {
        match self.decl(self.resolve_typedef(id)) {
            Some(TypeDecl::Basic { .. }) => TypeKind::Basic,
            Some(TypeDecl::Pointer { .. }) => TypeKind::Pointer,
            Some(TypeDecl::Struct(_)) => TypeKind::Struct,
            Some(TypeDecl::Array { .. }) => TypeKind::Array,
            Some(TypeDecl::Slice { .. }) => TypeKind::Slice,
            Some(TypeDecl::Map { .. }) => TypeKind::Map,
            Some(TypeDecl::Func { .. }) => TypeKind::Func,
            Some(TypeDecl::Interface { .. }) => TypeKind::Interface,
            Some(TypeDecl::Chan { .. }) => TypeKind::Chan,
            Some(TypeDecl::Typedef { .. }) | Some(TypeDecl::Qualifier { .. }) | None => {
                TypeKind::Unknown
            }
        }
    }

    pub fn byte_size(&self, id: TypeId) -> i64 {
        let ptr_size = mem::size_of::<u64>() as i64;
        match self.decl(id) {
            Some(TypeDecl::Basic { byte_size, .. }) => *byte_size,
            Some(TypeDecl::Struct(s)) => s.byte_size,
            Some(TypeDecl::Slice { repr, .. }) => repr.byte_size,
            Some(TypeDecl::Array { elem, count }) => self.byte_size(*elem) * (*count).max(0),
            Some(TypeDecl::Pointer { .. })
            | Some(TypeDecl::Map { .. })
            | Some(TypeDecl::Func { .. })
            | Some(TypeDecl::Chan { .. }) => ptr_size,
            Some(TypeDecl::Interface { .. }) => ptr_size * 2,
            Some(TypeDecl::Typedef { target, .. }) | Some(TypeDecl::Qualifier { target }) => {
                target.map(|t| self.byte_size(t)).unwrap_or(0)
            }
            None => 0,
        }
    }

    pub fn name(&self, id: TypeId) -> String {
        match self.decl(id) {
            Some(TypeDecl::Basic { name, .. })
            | Some(TypeDecl::Typedef { name, .. })
            | Some(TypeDecl::Pointer { name, .. })
            | Some(TypeDecl::Map { name, .. })
            | Some(TypeDecl::Func { name })
            | Some(TypeDecl::Interface { name })
            | Some(TypeDecl::Chan { name, .. }) => name.clone(),
            Some(TypeDecl::Struct(s)) => s.name.clone(),
            Some(TypeDecl::Slice { repr, .. }) => repr.name.clone(),
            Some(TypeDecl::Array { elem, count }) => {
                format!("[{count}]{}", self.name(*elem))
            }
            Some(TypeDecl::Qualifier { target }) => target
                .map(|t| self.name(t))
                .unwrap_or_else(|| "unknown".to_string()),
            None => "unknown".to_string(),
        }
    }

    fn fresh_id(&self) -> TypeId {
        self.types.keys().max().map(|id| id + 1).unwrap_or(0)
    }
}

/// Shared graph + vertex id, the handle the evaluator and the map decoders
/// operate on.
#[derive(Clone)]
pub struct TypeRef {
    graph: Rc<TypeGraph>,
    id: TypeId,
}

impl TypeRef {
    pub fn new(graph: Rc<TypeGraph>, id: TypeId) -> Self {
        Self { graph, id }
    }

    #[inline(always)]
    pub fn graph(&self) -> &Rc<TypeGraph> {
        &self.graph
    }

    #[inline(always)]
    pub fn id(&self) -> TypeId {
        self.id
    }

    pub fn decl(&self) -> Option<&TypeDecl> {
        self.graph.decl(self.id)
    }

    pub fn name(&self) -> String {
        self.graph.name(self.id)
    }

    pub fn kind(&self) -> TypeKind {
        self.graph.kind(self.id)
    }

    pub fn byte_size(&self) -> i64 {
        self.graph.byte_size(self.id)
    }

    /// Same graph, typedef and qualifier layers stripped.
    pub fn resolved(&self) -> TypeRef {
        TypeRef {
            graph: Rc::clone(&self.graph),
            id: self.graph.resolve_typedef(self.id),
        }
    }

    /// Fields of a struct type (typedefs stripped), `None` otherwise.
    pub fn struct_fields(&self) -> Option<&IndexMap<String, StructField>> {
        match self.graph.decl(self.graph.resolve_typedef(self.id)) {
            Some(TypeDecl::Struct(s)) => Some(&s.fields),
            Some(TypeDecl::Slice { repr, .. }) => Some(&repr.fields),
            _ => None,
        }
    }

    /// Synthesize a pointer to this type in a copy of the graph.
    pub fn pointer_to(&self) -> TypeRef {
        let mut graph = (*self.graph).clone();
        let id = graph.fresh_id();
        let name = format!("*{}", graph.name(self.id));
        graph.types.insert(
            id,
            TypeDecl::Pointer {
                name,
                target: Some(self.id),
            },
        );
        TypeRef {
            graph: Rc::new(graph),
            id,
        }
    }
}

impl Debug for TypeRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "TypeRef({})", self.name())
    }
}

/// Debug info compares types structurally by name, two handles to same-named
/// types are interchangeable for the evaluator.
impl PartialEq for TypeRef {
    fn eq(&self, other: &Self) -> bool {
        self.name() == other.name() && self.kind() == other.kind()
    }
}

/// Incremental [`TypeGraph`] construction, used by resolver implementations
/// and tests.
#[derive(Debug, Default)]
pub struct TypeGraphBuilder {
    types: HashMap<TypeId, TypeDecl>,
    next: TypeId,
}

impl TypeGraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn add(&mut self, decl: TypeDecl) -> TypeId {
        let id = self.next;
        self.next += 1;
        self.types.insert(id, decl);
        id
    }

    fn name_of(&self, id: TypeId) -> String {
        match self.types.get(&id) {
            Some(TypeDecl::Basic { name, .. })
            | Some(TypeDecl::Typedef { name, .. })
            | Some(TypeDecl::Pointer { name, .. })
            | Some(TypeDecl::Map { name, .. })
            | Some(TypeDecl::Func { name })
            | Some(TypeDecl::Interface { name })
            | Some(TypeDecl::Chan { name, .. }) => name.clone(),
            Some(TypeDecl::Struct(s)) => s.name.clone(),
            Some(TypeDecl::Slice { repr, .. }) => repr.name.clone(),
            _ => "unknown".to_string(),
        }
    }

    pub fn basic(&mut self, name: impl ToString, byte_size: i64, encoding: DwAte) -> TypeId {
        self.add(TypeDecl::Basic {
            name: name.to_string(),
            byte_size,
            encoding,
        })
    }

    /// The platform `int` type; created on first use.
    pub fn int_type(&mut self) -> TypeId {
        let found = self.types.iter().find_map(|(id, decl)| {
            matches!(decl, TypeDecl::Basic { name, .. } if name == "int").then_some(*id)
        });
        found.unwrap_or_else(|| self.basic("int", 8, gimli::DW_ATE_signed))
    }

    pub fn typedef(&mut self, name: impl ToString, target: TypeId) -> TypeId {
        self.add(TypeDecl::Typedef {
            name: name.to_string(),
            target: Some(target),
        })
    }

    pub fn pointer(&mut self, target: TypeId) -> TypeId {
        let name = format!("*{}", self.name_of(target));
        self.add(TypeDecl::Pointer {
            name,
            target: Some(target),
        })
    }

    /// An untyped pointer (`unsafe.Pointer`).
    pub fn void_pointer(&mut self) -> TypeId {
        self.add(TypeDecl::Pointer {
            name: "unsafe.Pointer".to_string(),
            target: None,
        })
    }

    /// Reserve an id for a type defined later; needed for mutually
    /// recursive declarations like a bucket pointing to its overflow bucket.
    pub fn reserve(&mut self) -> TypeId {
        self.add(TypeDecl::Qualifier { target: None })
    }

    /// Define a struct at a previously [`TypeGraphBuilder::reserve`]d id.
    pub fn define_struct(
        &mut self,
        id: TypeId,
        name: impl ToString,
        byte_size: i64,
        fields: Vec<(&str, i64, TypeId)>,
    ) {
        let fields = fields
            .into_iter()
            .map(|(name, offset, type_ref)| (name.to_string(), StructField { offset, type_ref }))
            .collect();
        self.types.insert(
            id,
            TypeDecl::Struct(StructType {
                name: name.to_string(),
                byte_size,
                fields,
            }),
        );
    }

    pub fn struct_type(
        &mut self,
        name: impl ToString,
        byte_size: i64,
        fields: Vec<(&str, i64, TypeId)>,
    ) -> TypeId {
        let fields = fields
            .into_iter()
            .map(|(name, offset, type_ref)| (name.to_string(), StructField { offset, type_ref }))
            .collect();
        self.add(TypeDecl::Struct(StructType {
            name: name.to_string(),
            byte_size,
            fields,
        }))
    }

    pub fn array(&mut self, elem: TypeId, count: i64) -> TypeId {
        self.add(TypeDecl::Array { elem, count })
    }

    pub fn slice(&mut self, elem: TypeId) -> TypeId {
        let name = format!("[]{}", self.name_of(elem));
        let data = self.pointer(elem);
        let int = self.int_type();
        let fields = [("array", 0, data), ("len", 8, int), ("cap", 16, int)]
            .into_iter()
            .map(|(name, offset, type_ref)| (name.to_string(), StructField { offset, type_ref }))
            .collect();
        self.add(TypeDecl::Slice {
            repr: StructType {
                name,
                byte_size: 24,
                fields,
            },
            elem,
        })
    }

    pub fn map(
        &mut self,
        name: impl ToString,
        key: TypeId,
        elem: TypeId,
        target: TypeId,
    ) -> TypeId {
        self.add(TypeDecl::Map {
            name: name.to_string(),
            key,
            elem,
            target: Some(target),
        })
    }

    pub fn chan(&mut self, name: impl ToString, target: Option<TypeId>) -> TypeId {
        self.add(TypeDecl::Chan {
            name: name.to_string(),
            target,
        })
    }

    pub fn func(&mut self, name: impl ToString) -> TypeId {
        self.add(TypeDecl::Func {
            name: name.to_string(),
        })
    }

    pub fn interface(&mut self, name: impl ToString) -> TypeId {
        self.add(TypeDecl::Interface {
            name: name.to_string(),
        })
    }

    pub fn build(self, root: TypeId) -> Rc<TypeGraph> {
        Rc::new(TypeGraph {
            types: self.types,
            root,
        })
    }

    pub fn build_ref(self, root: TypeId) -> TypeRef {
        TypeRef::new(self.build(root), root)
    }
}

/// A basic type that exists in every binary even when debug info omits it.
pub fn fake_basic_type(name: &str, bit_size: i64) -> TypeRef {
    let mut b = TypeGraphBuilder::new();
    let id = fake_basic_in(&mut b, name, bit_size);
    b.build_ref(id)
}

/// A slice of a fake basic type, the fallback for `[]byte`/`[]rune` casts.
pub fn fake_slice_type(elem_name: &str, elem_bit_size: i64) -> TypeRef {
    let mut b = TypeGraphBuilder::new();
    let elem = fake_basic_in(&mut b, elem_name, elem_bit_size);
    let id = b.slice(elem);
    b.build_ref(id)
}

fn fake_basic_in(b: &mut TypeGraphBuilder, name: &str, bit_size: i64) -> TypeId {
    let encoding = if name.starts_with('u') {
        gimli::DW_ATE_unsigned
    } else {
        gimli::DW_ATE_signed
    };
    b.basic(format!("{name}{bit_size}"), bit_size / 8, encoding)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_typedef_resolution() {
        let mut b = TypeGraphBuilder::new();
        let int = b.basic("int", 8, gimli::DW_ATE_signed);
        let named = b.typedef("main.MyInt", int);
        let alias = b.typedef("main.Alias", named);
        let graph = b.build(alias);

        assert_eq!(graph.resolve_typedef(alias), int);
        assert_eq!(graph.kind(alias), TypeKind::Basic);
        assert_eq!(graph.byte_size(alias), 8);
    }

    #[test]
    fn test_fake_types() {
        let byte_slice = fake_slice_type("uint", 8);
        assert_eq!(byte_slice.name(), "[]uint8");
        assert_eq!(byte_slice.kind(), TypeKind::Slice);
        assert_eq!(byte_slice.byte_size(), 24);

        let rune_slice = fake_slice_type("int", 32);
        assert_eq!(rune_slice.name(), "[]int32");

        assert_eq!(fake_basic_type("uint", 8).byte_size(), 1);
    }

    #[test]
    fn test_pointer_synthesis() {
        let mut b = TypeGraphBuilder::new();
        let s = b.struct_type("main.Point", 16, vec![]);
        let t = b.build_ref(s);

        let p = t.pointer_to();
        assert_eq!(p.kind(), TypeKind::Pointer);
        assert_eq!(p.name(), "*main.Point");
    }
}
