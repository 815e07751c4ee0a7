//! Iterator over the bucket-chained map layout.

use super::MapIter;
use crate::types::TypeKind;
use crate::value::{ReadError, RemoteValue};
use crate::version::ProducerVersion;
use crate::weak_error;

// Tophash sentinels. Runtimes at or after the 1.12 producer keep two "empty
// cell" markers and start live hashes at 5, earlier ones only use zero and
// start at 4.
pub(super) const TOPHASH_EMPTY_ZERO: u64 = 0;
pub(super) const TOPHASH_EMPTY_ONE: u64 = 1;
pub(super) const MIN_TOPHASH_GO111: u64 = 4;
pub(super) const MIN_TOPHASH_GO112: u64 = 5;

/// Select the sentinel pair for the inferior's producer. Chosen once at
/// iterator construction, never per step.
pub(super) fn sentinels(producer: &str) -> (u64, u64) {
    let recent = !producer.is_empty()
        && ProducerVersion::parse(producer).is_some_and(|v| v.after_or_equal(1, 12));
    if recent {
        (TOPHASH_EMPTY_ONE, MIN_TOPHASH_GO112)
    } else {
        (TOPHASH_EMPTY_ZERO, MIN_TOPHASH_GO111)
    }
}

pub(super) struct ClassicIter<'a> {
    v: &'a mut RemoteValue,
    numbuckets: u64,
    oldmask: u64,
    buckets: Option<RemoteValue>,
    oldbuckets: Option<RemoteValue>,

    /// Bucket currently scanned and its decoded internals.
    b: Option<RemoteValue>,
    bidx: u64,
    tophashes: Option<RemoteValue>,
    keys: Option<RemoteValue>,
    values: Option<RemoteValue>,
    overflow: Option<RemoteValue>,

    /// Iteration cap, 0 disables it.
    max_num_buckets: u64,

    idx: i64,

    tophash_empty_one: u64,
    min_tophash: u64,
}

impl<'a> ClassicIter<'a> {
    #[allow(clippy::too_many_arguments)]
    pub(super) fn new(
        v: &'a mut RemoteValue,
        numbuckets: u64,
        oldmask: u64,
        buckets: RemoteValue,
        oldbuckets: RemoteValue,
        max_num_buckets: u64,
        tophash_empty_one: u64,
        min_tophash: u64,
    ) -> Self {
        ClassicIter {
            v,
            numbuckets,
            oldmask,
            buckets: Some(buckets),
            oldbuckets: Some(oldbuckets),
            b: None,
            bidx: 0,
            tophashes: None,
            keys: None,
            values: None,
            overflow: None,
            max_num_buckets,
            idx: 0,
            tophash_empty_one,
            min_tophash,
        }
    }

    /// Iterator over a nil map: yields nothing.
    pub(super) fn empty(v: &'a mut RemoteValue, max_num_buckets: u64) -> Self {
        v.len = 0;
        ClassicIter {
            v,
            numbuckets: 0,
            oldmask: 0,
            buckets: None,
            oldbuckets: None,
            b: None,
            bidx: 0,
            tophashes: None,
            keys: None,
            values: None,
            overflow: None,
            max_num_buckets,
            idx: 0,
            tophash_empty_one: TOPHASH_EMPTY_ZERO,
            min_tophash: MIN_TOPHASH_GO111,
        }
    }

    /// Advance to the next bucket: the pending overflow bucket if there is
    /// one, otherwise the next table slot. Mid-grow, a table slot may be
    /// served by its not-yet-evacuated old bucket, but only through the low
    /// half of the split so no entry is reported twice.
    fn next_bucket(&mut self) -> bool {
        if self.overflow.as_ref().is_some_and(|of| of.addr > 0) {
            self.b = self.overflow.take();
        } else {
            self.b = None;

            if self.max_num_buckets > 0 && self.bidx >= self.max_num_buckets {
                return false;
            }

            while self.bidx < self.numbuckets {
                let Some(buckets) = &self.buckets else {
                    return false;
                };
                let mut cand = buckets.clone();
                cand.addr = buckets
                    .addr
                    .wrapping_add(buckets.byte_size() as u64 * self.bidx);

                let old = match &self.oldbuckets {
                    Some(ob) if ob.addr > 0 => ob,
                    _ => {
                        self.b = Some(cand);
                        break;
                    }
                };

                // The map is in the middle of a grow. If the bucket we are
                // looking at hasn't been filled in yet, iterate its origin
                // bucket instead, once.
                let oldbidx = self.bidx & self.oldmask;
                let mut oldb = old.clone();
                oldb.addr = old.addr.wrapping_add(old.byte_size() as u64 * oldbidx);

                if self.evacuated(&oldb) {
                    self.b = Some(cand);
                    break;
                }

                if oldbidx == self.bidx {
                    self.b = Some(oldb);
                    break;
                }

                // origin not evacuated but already visited through the low
                // half of the split, skip
                self.bidx += 1;
            }

            if self.b.is_none() {
                return false;
            }
            self.bidx += 1;
        }

        let Some(b) = self.b.clone() else {
            return false;
        };
        if b.addr == 0 {
            return false;
        }

        b.cache();

        self.tophashes = None;
        self.keys = None;
        self.values = None;
        self.overflow = None;

        if b.kind() != TypeKind::Struct {
            self.v.set_unreadable(ReadError::MalformedMapType);
            return false;
        }

        self.tophashes = b.field("tophash");
        self.keys = b.field("keys");
        self.values = b.field("values");
        if let Some(of) = b.field("overflow") {
            match of.maybe_dereference() {
                Ok(of) => self.overflow = Some(of),
                Err(err) => {
                    self.v.set_unreadable(err);
                    return false;
                }
            }
        }

        // sanity checks
        let (Some(tophashes), Some(keys), Some(values)) =
            (&self.tophashes, &self.keys, &self.values)
        else {
            self.v.set_unreadable(ReadError::MalformedMapType);
            return false;
        };

        if tophashes.kind() != TypeKind::Array
            || keys.kind() != TypeKind::Array
            || values.kind() != TypeKind::Array
        {
            self.v.set_unreadable(ReadError::BucketContentsNotArray);
            return false;
        }

        if tophashes.len != keys.len {
            self.v.set_unreadable(ReadError::BucketContentsInconsistentLen);
            return false;
        }

        let value_elem_size = values
            .elem_type()
            .map(|t| values.graph().byte_size(t))
            .unwrap_or(0);
        if value_elem_size > 0 && tophashes.len != values.len {
            // a zero-sized element type legitimately yields a zero-length
            // values array
            self.v.set_unreadable(ReadError::BucketContentsInconsistentLen);
            return false;
        }

        if !self.overflow.as_ref().is_some_and(|of| of.kind() == TypeKind::Struct) {
            self.v.set_unreadable(ReadError::BucketsNotStruct);
            return false;
        }

        true
    }

    /// A bucket has been evacuated iff its first tophash byte lies strictly
    /// between the empty sentinels and the minimum live hash.
    fn evacuated(&self, b: &RemoteValue) -> bool {
        if b.addr == 0 {
            return true;
        }
        let Some(tophashes) = b.field("tophash") else {
            return true;
        };
        let Some(h) = weak_error!(tophashes.slice_access(0).and_then(|t| t.as_uint())) else {
            return true;
        };
        h > self.tophash_empty_one && h < self.min_tophash
    }
}

impl MapIter for ClassicIter<'_> {
    fn advance(&mut self) -> bool {
        loop {
            let exhausted = match (&self.b, &self.tophashes) {
                (Some(_), Some(tophashes)) => self.idx >= tophashes.len,
                _ => true,
            };
            if exhausted {
                if !self.next_bucket() {
                    return false;
                }
                self.idx = 0;
            }

            let Some(tophashes) = &self.tophashes else {
                return false;
            };
            let tophash = match tophashes.slice_access(self.idx) {
                Ok(tophash) => tophash,
                Err(err) => {
                    self.v.set_unreadable(err);
                    return false;
                }
            };
            let h = match tophash.as_uint() {
                Ok(h) => h,
                Err(err) => {
                    self.v.set_unreadable(ReadError::Tophash(Box::new(err)));
                    return false;
                }
            };
            self.idx += 1;
            if h != TOPHASH_EMPTY_ZERO && h != self.tophash_empty_one {
                return true;
            }
        }
    }

    fn key(&self) -> Option<RemoteValue> {
        self.keys.as_ref()?.slice_access(self.idx - 1).ok()
    }

    fn value(&self) -> Option<RemoteValue> {
        let values = self.values.as_ref()?;
        let elem = values.elem_type()?;
        if values.graph().byte_size(elem) <= 0 {
            // zero-sized elements all live at the array base
            return Some(values.new_child("", values.addr, elem));
        }
        values.slice_access(self.idx - 1).ok()
    }

    fn error(&self) -> Option<ReadError> {
        self.v.unreadable().cloned()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_sentinel_selection() {
        struct TestCase {
            producer: &'static str,
            expect: (u64, u64),
        }
        let test_cases = [
            TestCase {
                producer: "Go cmd/compile go1.11",
                expect: (TOPHASH_EMPTY_ZERO, MIN_TOPHASH_GO111),
            },
            TestCase {
                producer: "Go cmd/compile go1.12",
                expect: (TOPHASH_EMPTY_ONE, MIN_TOPHASH_GO112),
            },
            TestCase {
                producer: "Go cmd/compile go1.21.3",
                expect: (TOPHASH_EMPTY_ONE, MIN_TOPHASH_GO112),
            },
            TestCase {
                producer: "",
                expect: (TOPHASH_EMPTY_ZERO, MIN_TOPHASH_GO111),
            },
        ];
        for tc in test_cases {
            assert_eq!(sentinels(tc.producer), tc.expect, "{}", tc.producer);
        }
    }
}
