//! Decoding of the inferior's runtime map representations.
//!
//! Two layouts exist in the wild: the bucket-chained hashtable and the
//! SwissTable-derived one. Both are decoded purely from debug-info type
//! descriptors and remote memory reads; the header's field names decide
//! which layout a value uses. Decoding failures never abort the enclosing
//! operation: they are recorded on the owning variable and the iterator
//! reports exhaustion.

mod classic;
mod swiss;

use crate::types::{TypeDecl, TypeKind};
use crate::value::{ReadError, RemoteValue};
use classic::ClassicIter;
use fallible_iterator::FallibleIterator;
use swiss::SwissIter;

/// The capability both map layouts expose: advance to the next live entry,
/// then read the entry's key and value.
pub trait MapIter {
    /// Move to the next live entry. `false` means exhaustion, possibly
    /// caused by a decoding failure (see [`MapIter::error`]).
    fn advance(&mut self) -> bool;

    fn key(&self) -> Option<RemoteValue>;

    fn value(&self) -> Option<RemoteValue>;

    /// The decoding failure recorded on the owning variable, if any.
    fn error(&self) -> Option<ReadError>;
}

impl<T: MapIter + ?Sized> MapIter for Box<T> {
    fn advance(&mut self) -> bool {
        (**self).advance()
    }

    fn key(&self) -> Option<RemoteValue> {
        (**self).key()
    }

    fn value(&self) -> Option<RemoteValue> {
        (**self).value()
    }

    fn error(&self) -> Option<ReadError> {
        (**self).error()
    }
}

macro_rules! try_or_unreadable {
    ($v: expr, $res: expr) => {
        match $res {
            Ok(value) => value,
            Err(e) => {
                $v.set_unreadable(e);
                return None;
            }
        }
    };
}

/// Build an iterator over the live entries of the map value `v`.
///
/// `max_num_buckets` caps how many buckets (classic) or groups (Swiss) are
/// visited, 0 means no cap. `producer` is the debug-info producer string of
/// the inferior, used to select the tophash sentinel constants.
///
/// On a decoding failure the unreadable status of `v` is set and `None` is
/// returned; the same applies to failures during iteration, where the
/// iterator additionally reports exhaustion.
pub fn map_iterator<'a>(
    v: &'a mut RemoteValue,
    max_num_buckets: u64,
    producer: &str,
) -> Option<Box<dyn MapIter + 'a>> {
    let (key_type, elem_type, target) = match v.graph().decl(v.real_type()) {
        Some(TypeDecl::Map {
            key, elem, target, ..
        }) => (*key, *elem, *target),
        _ => {
            v.set_unreadable(ReadError::WrongMapType);
            return None;
        }
    };
    let Some(target) = target else {
        v.set_unreadable(ReadError::WrongMapType);
        return None;
    };

    let sv = v.retyped(target);
    let sv = try_or_unreadable!(v, sv.maybe_dereference());

    if sv.kind() != TypeKind::Struct {
        v.set_unreadable(ReadError::WrongMapType);
        return None;
    }

    if sv.addr == 0 {
        // nil map
        return Some(Box::new(ClassicIter::empty(v, max_num_buckets)));
    }

    sv.cache();

    let mut numbuckets = 0u64;
    let mut oldmask = 0u64;
    let mut buckets = None;
    let mut oldbuckets = None;
    let mut directory = None;
    let mut swisstyp = None;

    // Classic header fields
    if let Some(field) = sv.field("count") {
        v.len = try_or_unreadable!(v, field.as_int());
    }
    if let Some(field) = sv.field("B") {
        let b = try_or_unreadable!(v, field.as_uint());
        numbuckets = 1 << b;
        oldmask = if b > 0 { (1 << (b - 1)) - 1 } else { 0 };
    }
    if let Some(field) = sv.field("buckets") {
        buckets = Some(try_or_unreadable!(v, field.maybe_dereference()));
    }
    if let Some(field) = sv.field("oldbuckets") {
        oldbuckets = Some(try_or_unreadable!(v, field.maybe_dereference()));
    }

    // Swiss header fields
    if let Some(field) = sv.field("used") {
        v.len = try_or_unreadable!(v, field.as_uint()) as i64;
    }
    if let Some(field) = sv.field("directory") {
        directory = Some(try_or_unreadable!(v, field.maybe_dereference()));
    }
    if let Some(field) = sv.field("typ") {
        swisstyp = Some(try_or_unreadable!(v, field.maybe_dereference()));
    }

    if buckets.is_none() {
        if let Some(directory) = directory {
            if directory.kind() != TypeKind::Slice {
                v.set_unreadable(ReadError::DirectoryNotSlice);
                return None;
            }
            let Some(swisstyp) = swisstyp else {
                v.set_unreadable(ReadError::NoSwissTypeDescriptor);
                return None;
            };
            let it = SwissIter::new(v, directory, &swisstyp, key_type, elem_type, max_num_buckets);
            return match it {
                Ok(it) => Some(Box::new(it)),
                Err((v, err)) => {
                    v.set_unreadable(err);
                    None
                }
            };
        }
    }

    let (Some(buckets), Some(oldbuckets)) = (buckets, oldbuckets) else {
        v.set_unreadable(ReadError::MalformedMapType);
        return None;
    };
    if buckets.kind() != TypeKind::Struct || oldbuckets.kind() != TypeKind::Struct {
        v.set_unreadable(ReadError::BucketsNotStruct);
        return None;
    }

    let (tophash_empty_one, min_tophash) = classic::sentinels(producer);
    Some(Box::new(ClassicIter::new(
        v,
        numbuckets,
        oldmask,
        buckets,
        oldbuckets,
        max_num_buckets,
        tophash_empty_one,
        min_tophash,
    )))
}

/// Adapter that exposes a map iterator as a fallible iterator over
/// `(key, value)` pairs, surfacing the owning variable's unreadable status
/// as the iteration error.
pub struct Entries<I>(pub I);

impl<I: MapIter> FallibleIterator for Entries<I> {
    type Item = (RemoteValue, RemoteValue);
    type Error = ReadError;

    fn next(&mut self) -> Result<Option<Self::Item>, ReadError> {
        if self.0.advance() {
            match (self.0.key(), self.0.value()) {
                (Some(key), Some(value)) => Ok(Some((key, value))),
                _ => Err(self.0.error().unwrap_or(ReadError::MalformedMapType)),
            }
        } else {
            match self.0.error() {
                Some(err) => Err(err),
                None => Ok(None),
            }
        }
    }
}
