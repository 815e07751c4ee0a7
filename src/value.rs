//! Typed handles on objects in inferior memory.
//!
//! A [`RemoteValue`] is an address plus a debug-info type; contents are read
//! lazily through the shared [`MemoryReader`]. The map decoders project
//! fields, array elements and pointer targets out of one value without ever
//! copying whole objects out of the inferior.

use crate::memory::MemoryReader;
use crate::types::{StructField, TypeDecl, TypeGraph, TypeId, TypeKind, TypeRef};
use std::fmt::{self, Debug, Formatter};
use std::rc::Rc;

#[derive(Debug, Clone, thiserror::Error)]
pub enum ReadError {
    // --------------------------------- object access ---------------------------------------------
    #[error("field `{0}` not found")]
    FieldNotFound(&'static str),
    #[error("unexpected type for {0}")]
    UnexpectedType(&'static str),
    #[error("index {0} out of range")]
    IndexOutOfRange(i64),
    #[error("error while reading debugee memory: {0}")]
    Memory(Rc<anyhow::Error>),

    // --------------------------------- map layout ------------------------------------------------
    #[error("wrong real type for map")]
    WrongMapType,
    #[error("malformed map type")]
    MalformedMapType,
    #[error("malformed map type: keys, values or tophash of a bucket is not an array")]
    BucketContentsNotArray,
    #[error("malformed map type: inconsistent array length in bucket")]
    BucketContentsInconsistentLen,
    #[error("malformed map type: buckets, oldbuckets or overflow field not a struct")]
    BucketsNotStruct,
    #[error("malformed map type: directory not a slice")]
    DirectoryNotSlice,
    #[error("malformed map type: no type descriptor on a swiss map")]
    NoSwissTypeDescriptor,
    #[error("could not load one of the tables")]
    SwissTableLoad,
    #[error("swiss table type does not have groups field")]
    SwissNoGroups,
    #[error("swiss map type descriptor does not have a Group field")]
    SwissTypeNoGroup,
    #[error("swiss map group type does not have Size_ field")]
    SwissGroupNoSize,
    #[error("unreadable tophash: {0}")]
    Tophash(#[source] Box<ReadError>),
}

impl From<anyhow::Error> for ReadError {
    fn from(err: anyhow::Error) -> Self {
        ReadError::Memory(Rc::new(err))
    }
}

/// A typed object in inferior memory.
#[derive(Clone)]
pub struct RemoteValue {
    pub name: String,
    pub addr: u64,
    /// Logical length: entry count for maps, element count for arrays.
    pub len: i64,
    graph: Rc<TypeGraph>,
    type_id: TypeId,
    real_type: TypeId,
    mem: Rc<dyn MemoryReader>,
    unreadable: Option<ReadError>,
}

impl Debug for RemoteValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteValue")
            .field("name", &self.name)
            .field("addr", &format_args!("{:#x}", self.addr))
            .field("type", &self.graph.name(self.type_id))
            .field("unreadable", &self.unreadable)
            .finish()
    }
}

impl RemoteValue {
    pub fn new(
        name: impl ToString,
        addr: u64,
        graph: Rc<TypeGraph>,
        type_id: TypeId,
        mem: Rc<dyn MemoryReader>,
    ) -> Self {
        let real_type = graph.resolve_typedef(type_id);
        let len = match graph.decl(real_type) {
            Some(TypeDecl::Array { count, .. }) => *count,
            _ => 0,
        };
        RemoteValue {
            name: name.to_string(),
            addr,
            len,
            graph,
            type_id,
            real_type,
            mem,
            unreadable: None,
        }
    }

    /// A value of another type rooted at `addr`, sharing this value's graph
    /// and reader.
    pub fn new_child(&self, name: impl ToString, addr: u64, type_id: TypeId) -> Self {
        RemoteValue::new(name, addr, Rc::clone(&self.graph), type_id, Rc::clone(&self.mem))
    }

    #[inline(always)]
    pub fn graph(&self) -> &Rc<TypeGraph> {
        &self.graph
    }

    #[inline(always)]
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    #[inline(always)]
    pub fn real_type(&self) -> TypeId {
        self.real_type
    }

    pub fn type_ref(&self) -> TypeRef {
        TypeRef::new(Rc::clone(&self.graph), self.type_id)
    }

    pub fn kind(&self) -> TypeKind {
        self.graph.kind(self.real_type)
    }

    pub fn byte_size(&self) -> i64 {
        self.graph.byte_size(self.real_type)
    }

    fn decl(&self) -> Option<&TypeDecl> {
        self.graph.decl(self.real_type)
    }

    /// Decoding failure recorded against this value, if any.
    pub fn unreadable(&self) -> Option<&ReadError> {
        self.unreadable.as_ref()
    }

    /// Record a decoding failure; the first one sticks.
    pub fn set_unreadable(&mut self, err: ReadError) {
        if self.unreadable.is_none() {
            self.unreadable = Some(err);
        }
    }

    /// Retype this value, keeping the address.
    pub(crate) fn retyped(&self, type_id: TypeId) -> Self {
        self.new_child(self.name.clone(), self.addr, type_id)
    }

    /// Hint the reader that this object is about to be decoded field by
    /// field.
    pub fn cache(&self) {
        self.mem.cache_region(self.addr, self.byte_size().max(0) as usize);
    }

    /// Hint the reader about an upcoming scan of an arbitrary region.
    pub(crate) fn cache_range(&self, addr: u64, len: usize) {
        self.mem.cache_region(addr, len);
    }

    /// Raw unsigned read, bypassing this value's own address and type.
    pub(crate) fn read_unsigned_at(&self, addr: u64, size: usize) -> Result<u64, ReadError> {
        Ok(self.mem.read_unsigned(addr, size)?)
    }

    /// Project a struct field out of this value.
    pub fn field(&self, name: &str) -> Option<RemoteValue> {
        let fields = match self.decl()? {
            TypeDecl::Struct(s) => &s.fields,
            TypeDecl::Slice { repr, .. } => &repr.fields,
            _ => return None,
        };
        let StructField { offset, type_ref } = *fields.get(name)?;
        Some(self.new_child(name, self.addr.wrapping_add_signed(offset), type_ref))
    }

    pub fn assume_field(&self, name: &'static str) -> Result<RemoteValue, ReadError> {
        self.field(name).ok_or(ReadError::FieldNotFound(name))
    }

    /// Read this value as an unsigned integer.
    pub fn as_uint(&self) -> Result<u64, ReadError> {
        let size = self.byte_size();
        if !matches!(size, 1 | 2 | 4 | 8) {
            return Err(ReadError::UnexpectedType("unsigned integer"));
        }
        Ok(self.mem.read_unsigned(self.addr, size as usize)?)
    }

    /// Read this value as a signed integer.
    pub fn as_int(&self) -> Result<i64, ReadError> {
        let size = self.byte_size();
        let raw = self.as_uint()?;
        // sign-extend from the value's width
        let shift = 64 - size * 8;
        Ok(((raw as i64) << shift) >> shift)
    }

    /// Read the pointer word stored at this value's address.
    pub fn ptr_value(&self) -> Result<u64, ReadError> {
        if self.kind() != TypeKind::Pointer {
            return Err(ReadError::UnexpectedType("pointer"));
        }
        Ok(self.mem.read_unsigned(self.addr, 8)?)
    }

    /// Follow a pointer: the result is rooted at the pointed-to address and
    /// typed with the pointer's target. Non-pointer values are returned
    /// unchanged.
    pub fn maybe_dereference(&self) -> Result<RemoteValue, ReadError> {
        let Some(TypeDecl::Pointer { target, .. }) = self.decl() else {
            return Ok(self.clone());
        };
        let target = (*target).ok_or(ReadError::UnexpectedType("pointer target"))?;
        let addr = self.mem.read_unsigned(self.addr, 8)?;
        Ok(self.new_child(self.name.clone(), addr, target))
    }

    /// Element type of an array or slice.
    pub fn elem_type(&self) -> Option<TypeId> {
        match self.decl()? {
            TypeDecl::Array { elem, .. } | TypeDecl::Slice { elem, .. } => Some(*elem),
            _ => None,
        }
    }

    /// Number of elements of an array (static) or slice (read from the
    /// inferior).
    pub fn seq_len(&self) -> Result<i64, ReadError> {
        match self.decl() {
            Some(TypeDecl::Array { count, .. }) => Ok(*count),
            Some(TypeDecl::Slice { .. }) => self.assume_field("len")?.as_int(),
            _ => Err(ReadError::UnexpectedType("array or slice")),
        }
    }

    /// Element `idx` of an array or slice.
    pub fn slice_access(&self, idx: i64) -> Result<RemoteValue, ReadError> {
        match self.decl() {
            Some(TypeDecl::Array { elem, count }) => {
                if idx < 0 || idx >= *count {
                    return Err(ReadError::IndexOutOfRange(idx));
                }
                let elem_size = self.graph.byte_size(*elem);
                Ok(self.new_child(
                    format!("[{idx}]"),
                    self.addr.wrapping_add_signed(idx * elem_size),
                    *elem,
                ))
            }
            Some(TypeDecl::Slice { elem, .. }) => {
                let len = self.assume_field("len")?.as_int()?;
                if idx < 0 || idx >= len {
                    return Err(ReadError::IndexOutOfRange(idx));
                }
                let base = self.assume_field("array")?.ptr_value()?;
                let elem_size = self.graph.byte_size(*elem);
                Ok(self.new_child(
                    format!("[{idx}]"),
                    base.wrapping_add_signed(idx * elem_size),
                    *elem,
                ))
            }
            _ => Err(ReadError::UnexpectedType("array or slice")),
        }
    }
}
