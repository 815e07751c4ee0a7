//! Map decoding round-trips over synthetic memory images.

use anyhow::Context;
use bytes::Bytes;
use fallible_iterator::FallibleIterator;
use gimli::constants::{DW_ATE_signed, DW_ATE_unsigned};
use goeval::mapiter::{map_iterator, Entries, MapIter};
use goeval::memory::MemoryReader;
use goeval::types::{TypeGraph, TypeGraphBuilder, TypeId};
use goeval::value::{ReadError, RemoteValue};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// Fixed memory image standing in for the inferior.
struct FakeMemory {
    image: RefCell<HashMap<u64, u8>>,
}

impl FakeMemory {
    fn new() -> Rc<Self> {
        Rc::new(FakeMemory {
            image: RefCell::new(HashMap::new()),
        })
    }

    fn write(&self, addr: u64, bytes: &[u8]) {
        let mut image = self.image.borrow_mut();
        for (i, b) in bytes.iter().enumerate() {
            image.insert(addr + i as u64, *b);
        }
    }

    fn write_u64(&self, addr: u64, value: u64) {
        self.write(addr, &value.to_le_bytes());
    }

    fn write_i64(&self, addr: u64, value: i64) {
        self.write(addr, &value.to_le_bytes());
    }
}

impl MemoryReader for FakeMemory {
    fn read_bytes(&self, addr: u64, len: usize) -> anyhow::Result<Bytes> {
        let image = self.image.borrow();
        (0..len)
            .map(|i| {
                image
                    .get(&(addr + i as u64))
                    .copied()
                    .with_context(|| format!("unmapped address {:#x}", addr + i as u64))
            })
            .collect::<anyhow::Result<Vec<u8>>>()
            .map(Bytes::from)
    }
}

fn collect_pairs(it: Box<dyn MapIter + '_>) -> Result<Vec<(i64, i64)>, ReadError> {
    Entries(it)
        .map(|(k, v)| Ok((k.as_int()?, v.as_int()?)))
        .collect()
}

fn sorted_keys(pairs: &[(i64, i64)]) -> Vec<i64> {
    let mut keys: Vec<i64> = pairs.iter().map(|&(k, _)| k).collect();
    keys.sort_unstable();
    keys
}

// Classic layout ///////////////////////////////////////////////////////////

const BUCKET_SIZE: u64 = 144;
const MAP_VAR: u64 = 0xf00;
const HDR: u64 = 0x1000;
const BUCKETS: u64 = 0x2000;
const OLDBUCKETS: u64 = 0x3000;

struct ClassicTypes {
    graph: Rc<TypeGraph>,
    map_type: TypeId,
}

/// hmap/bucket layout for a `map[int64]int64`:
/// bucket = [8]uint8 tophash | [8]int64 keys | [8]int64 values | *bucket.
fn classic_types(keys_len: i64) -> ClassicTypes {
    let mut b = TypeGraphBuilder::new();
    let int64 = b.basic("int64", 8, DW_ATE_signed);
    let uint8 = b.basic("uint8", 1, DW_ATE_unsigned);
    let tophash = b.array(uint8, 8);
    let keys = b.array(int64, keys_len);
    let values = b.array(int64, 8);
    let bucket = b.reserve();
    let bucket_ptr = b.pointer(bucket);
    b.define_struct(
        bucket,
        "bmap",
        BUCKET_SIZE as i64,
        vec![
            ("tophash", 0, tophash),
            ("keys", 8, keys),
            ("values", 72, values),
            ("overflow", 136, bucket_ptr),
        ],
    );
    let hmap = b.struct_type(
        "hmap",
        32,
        vec![
            ("count", 0, int64),
            ("B", 8, uint8),
            ("buckets", 16, bucket_ptr),
            ("oldbuckets", 24, bucket_ptr),
        ],
    );
    let hmap_ptr = b.pointer(hmap);
    let map_type = b.map("map[int64]int64", int64, int64, hmap_ptr);
    ClassicTypes {
        graph: b.build(map_type),
        map_type,
    }
}

/// Write one bucket: `entries` fill slots from 0 (tophash byte, key, value).
fn write_bucket(mem: &FakeMemory, addr: u64, entries: &[(u8, i64, i64)], overflow: u64) {
    for slot in 0..8usize {
        let tophash = entries.get(slot).map(|e| e.0).unwrap_or(0);
        mem.write(addr + slot as u64, &[tophash]);
    }
    for (slot, &(_, key, value)) in entries.iter().enumerate() {
        mem.write_i64(addr + 8 + slot as u64 * 8, key);
        mem.write_i64(addr + 72 + slot as u64 * 8, value);
    }
    mem.write_u64(addr + 136, overflow);
}

fn write_classic_header(mem: &FakeMemory, count: i64, b: u8, oldbuckets: u64) {
    mem.write_u64(MAP_VAR, HDR);
    mem.write_i64(HDR, count);
    mem.write(HDR + 8, &[b]);
    mem.write_u64(HDR + 16, BUCKETS);
    mem.write_u64(HDR + 24, oldbuckets);
}

#[test]
fn test_classic_pre_grow() {
    let types = classic_types(8);
    let mem = FakeMemory::new();

    write_classic_header(&mem, 10, 1, 0);
    let b0: Vec<(u8, i64, i64)> = (1..=5).map(|k| (0x10, k, k + 100)).collect();
    let b1: Vec<(u8, i64, i64)> = (6..=10).map(|k| (0x10, k, k + 100)).collect();
    write_bucket(&mem, BUCKETS, &b0, 0);
    write_bucket(&mem, BUCKETS + BUCKET_SIZE, &b1, 0);

    let mut v = RemoteValue::new("m", MAP_VAR, types.graph, types.map_type, mem);
    let it = map_iterator(&mut v, 0, "Go cmd/compile go1.21").expect("iterator");
    let pairs = collect_pairs(it).unwrap();

    assert_eq!(sorted_keys(&pairs), (1..=10).collect::<Vec<i64>>());
    for (k, val) in pairs {
        assert_eq!(val, k + 100);
    }
    assert_eq!(v.len, 10);
    assert!(v.unreadable().is_none());
}

#[test]
fn test_classic_mid_grow() {
    let types = classic_types(8);
    let mem = FakeMemory::new();

    // growing from 2 to 4 buckets: old bucket 0 not yet evacuated, old
    // bucket 1 evacuated
    write_classic_header(&mem, 10, 2, OLDBUCKETS);

    let old0: Vec<(u8, i64, i64)> = (1..=4).map(|k| (0x10, k, k + 100)).collect();
    write_bucket(&mem, OLDBUCKETS, &old0, 0);
    write_bucket(&mem, OLDBUCKETS + BUCKET_SIZE, &[(2, 200, 200)], 0);

    // new buckets 0 and 2 would duplicate old bucket 0; fill them with trap
    // keys that must never surface
    let traps: Vec<(u8, i64, i64)> = (100..=103).map(|k| (0x10, k, k)).collect();
    write_bucket(&mem, BUCKETS, &traps, 0);
    let b1: Vec<(u8, i64, i64)> = (5..=7).map(|k| (0x10, k, k + 100)).collect();
    write_bucket(&mem, BUCKETS + BUCKET_SIZE, &b1, 0);
    write_bucket(&mem, BUCKETS + 2 * BUCKET_SIZE, &traps, 0);
    let b3: Vec<(u8, i64, i64)> = (8..=10).map(|k| (0x10, k, k + 100)).collect();
    write_bucket(&mem, BUCKETS + 3 * BUCKET_SIZE, &b3, 0);

    let mut v = RemoteValue::new("m", MAP_VAR, types.graph, types.map_type, mem);
    let it = map_iterator(&mut v, 0, "Go cmd/compile go1.21").expect("iterator");
    let pairs = collect_pairs(it).unwrap();

    assert_eq!(sorted_keys(&pairs), (1..=10).collect::<Vec<i64>>());
    assert!(v.unreadable().is_none());
}

#[test]
fn test_classic_overflow_chain() {
    let types = classic_types(8);
    let mem = FakeMemory::new();

    write_classic_header(&mem, 10, 0, 0);
    let overflow_at = BUCKETS + 0x400;
    let b0: Vec<(u8, i64, i64)> = (1..=8).map(|k| (0x10, k, k + 100)).collect();
    write_bucket(&mem, BUCKETS, &b0, overflow_at);
    let of: Vec<(u8, i64, i64)> = (9..=10).map(|k| (0x10, k, k + 100)).collect();
    write_bucket(&mem, overflow_at, &of, 0);

    let mut v = RemoteValue::new("m", MAP_VAR, types.graph, types.map_type, mem);
    let it = map_iterator(&mut v, 0, "Go cmd/compile go1.21").expect("iterator");
    let pairs = collect_pairs(it).unwrap();

    assert_eq!(sorted_keys(&pairs), (1..=10).collect::<Vec<i64>>());
}

#[test]
fn test_classic_empty_one_sentinel_gated_by_producer() {
    // tophash byte 1 marks an empty cell only for producers >= 1.12
    let types = classic_types(8);
    let mem = FakeMemory::new();
    write_classic_header(&mem, 1, 0, 0);
    write_bucket(&mem, BUCKETS, &[(1, 41, 41), (0x10, 42, 142)], 0);

    let mut v = RemoteValue::new(
        "m",
        MAP_VAR,
        Rc::clone(&types.graph),
        types.map_type,
        Rc::clone(&mem) as Rc<dyn MemoryReader>,
    );
    let it = map_iterator(&mut v, 0, "Go cmd/compile go1.21").expect("iterator");
    assert_eq!(sorted_keys(&collect_pairs(it).unwrap()), vec![42]);

    let mut v = RemoteValue::new("m", MAP_VAR, types.graph, types.map_type, mem);
    let it = map_iterator(&mut v, 0, "Go cmd/compile go1.11").expect("iterator");
    assert_eq!(sorted_keys(&collect_pairs(it).unwrap()), vec![41, 42]);
}

#[test]
fn test_classic_zero_sized_values() {
    let mut b = TypeGraphBuilder::new();
    let int64 = b.basic("int64", 8, DW_ATE_signed);
    let uint8 = b.basic("uint8", 1, DW_ATE_unsigned);
    let empty = b.struct_type("struct {}", 0, vec![]);
    let tophash = b.array(uint8, 8);
    let keys = b.array(int64, 8);
    let values = b.array(empty, 0);
    let bucket = b.reserve();
    let bucket_ptr = b.pointer(bucket);
    b.define_struct(
        bucket,
        "bmap",
        80,
        vec![
            ("tophash", 0, tophash),
            ("keys", 8, keys),
            ("values", 72, values),
            ("overflow", 72, bucket_ptr),
        ],
    );
    let hmap = b.struct_type(
        "hmap",
        32,
        vec![
            ("count", 0, int64),
            ("B", 8, uint8),
            ("buckets", 16, bucket_ptr),
            ("oldbuckets", 24, bucket_ptr),
        ],
    );
    let hmap_ptr = b.pointer(hmap);
    let map_type = b.map("map[int64]struct {}", int64, empty, hmap_ptr);
    let graph = b.build(map_type);

    let mem = FakeMemory::new();
    mem.write_u64(MAP_VAR, HDR);
    mem.write_i64(HDR, 3);
    mem.write(HDR + 8, &[0]);
    mem.write_u64(HDR + 16, BUCKETS);
    mem.write_u64(HDR + 24, 0);
    for slot in 0..8u64 {
        let tophash = if slot < 3 { 0x10 } else { 0 };
        mem.write(BUCKETS + slot, &[tophash]);
        mem.write_i64(BUCKETS + 8 + slot * 8, slot as i64 + 1);
    }
    mem.write_u64(BUCKETS + 72, 0);

    let mut v = RemoteValue::new("m", MAP_VAR, graph, map_type, mem);
    let mut it = map_iterator(&mut v, 0, "Go cmd/compile go1.21").expect("iterator");

    let mut yields = 0;
    while it.advance() {
        let key = it.key().expect("key");
        let value = it.value().expect("value");
        assert_eq!(key.as_int().unwrap(), yields + 1);
        // every zero-sized value is rooted at the values array base
        assert_eq!(value.addr, BUCKETS + 72);
        yields += 1;
    }
    assert_eq!(yields, 3);
    assert!(it.error().is_none());
}

#[test]
fn test_classic_nil_map() {
    let types = classic_types(8);
    let mem = FakeMemory::new();
    mem.write_u64(MAP_VAR, 0);

    let mut v = RemoteValue::new("m", MAP_VAR, types.graph, types.map_type, mem);
    let mut it = map_iterator(&mut v, 0, "Go cmd/compile go1.21").expect("iterator");
    assert!(!it.advance());
    assert!(it.error().is_none());
    drop(it);
    assert_eq!(v.len, 0);
}

#[test]
fn test_classic_inconsistent_bucket_is_unreadable() {
    // keys array shorter than the tophash array
    let types = classic_types(7);
    let mem = FakeMemory::new();
    write_classic_header(&mem, 1, 0, 0);
    write_bucket(&mem, BUCKETS, &[(0x10, 1, 101)], 0);

    let mut v = RemoteValue::new("m", MAP_VAR, types.graph, types.map_type, mem);
    let mut it = map_iterator(&mut v, 0, "Go cmd/compile go1.21").expect("iterator");
    assert!(!it.advance());
    assert!(matches!(
        it.error(),
        Some(ReadError::BucketContentsInconsistentLen)
    ));
    drop(it);
    assert!(v.unreadable().is_some());
}

// Swiss layout /////////////////////////////////////////////////////////////

const SLOT_SIZE: u64 = 16;
const GROUP_SIZE: u64 = 8 + SLOT_SIZE * 8;
const DIRECTORY: u64 = 0x2000;
const SWISS_TYP: u64 = 0x3000;
const TABLE0: u64 = 0x4000;
const TABLE1: u64 = 0x4100;
const T0_GROUPS: u64 = 0x5000;
const T1_GROUPS: u64 = 0x6000;

struct SwissTypes {
    graph: Rc<TypeGraph>,
    map_type: TypeId,
}

fn swiss_types_default() -> SwissTypes {
    let mut b = TypeGraphBuilder::new();
    let int64 = b.basic("int64", 8, DW_ATE_signed);
    let uint64 = b.basic("uint64", 8, DW_ATE_unsigned);
    let unsafe_ptr = b.void_pointer();
    let groups = b.struct_type(
        "groups",
        16,
        vec![("data", 0, unsafe_ptr), ("lengthMask", 8, uint64)],
    );
    let table = b.struct_type("table", 24, vec![("index", 0, int64), ("groups", 8, groups)]);
    let table_ptr = b.pointer(table);
    let dir = b.slice(table_ptr);
    let group_type = b.struct_type("GroupType", 8, vec![("Size_", 0, uint64)]);
    let smt = b.struct_type(
        "SwissMapType",
        24,
        vec![
            ("SlotSize", 0, uint64),
            ("ElemOff", 8, uint64),
            ("Group", 16, group_type),
        ],
    );
    let smt_ptr = b.pointer(smt);
    let hdr = b.struct_type(
        "Map",
        40,
        vec![("used", 0, uint64), ("directory", 8, dir), ("typ", 32, smt_ptr)],
    );
    let hdr_ptr = b.pointer(hdr);
    let map_type = b.map("map[int64]int64", int64, int64, hdr_ptr);
    SwissTypes {
        graph: b.build(map_type),
        map_type,
    }
}

/// One group: 8 control bytes then 8 slots of (key, value).
fn write_group(mem: &FakeMemory, addr: u64, ctrl: [u8; 8], entries: &[(usize, i64, i64)]) {
    mem.write(addr, &ctrl);
    for &(slot, key, value) in entries {
        mem.write_i64(addr + 8 + slot as u64 * SLOT_SIZE, key);
        mem.write_i64(addr + 8 + slot as u64 * SLOT_SIZE + 8, value);
    }
}

fn write_swiss_image(mem: &FakeMemory, used: u64) {
    mem.write_u64(MAP_VAR, HDR);
    mem.write_u64(HDR, used);
    // directory slice header: 3 entries, the last a duplicate of table 1
    mem.write_u64(HDR + 8, DIRECTORY);
    mem.write_u64(HDR + 16, 3);
    mem.write_u64(HDR + 24, 3);
    mem.write_u64(HDR + 32, SWISS_TYP);

    mem.write_u64(SWISS_TYP, SLOT_SIZE);
    mem.write_u64(SWISS_TYP + 8, 8); // ElemOff
    mem.write_u64(SWISS_TYP + 16, GROUP_SIZE); // Group.Size_

    mem.write_u64(DIRECTORY, TABLE0);
    mem.write_u64(DIRECTORY + 8, TABLE1);
    mem.write_u64(DIRECTORY + 16, TABLE1);

    mem.write_i64(TABLE0, 0);
    mem.write_u64(TABLE0 + 8, T0_GROUPS);
    mem.write_u64(TABLE0 + 16, 1); // lengthMask: two groups

    mem.write_i64(TABLE1, 1);
    mem.write_u64(TABLE1 + 8, T1_GROUPS);
    mem.write_u64(TABLE1 + 16, 0);

    // table 0, group 0: live slots 0 and 3, one empty, one tombstone with a
    // trap key that must not surface
    write_group(
        mem,
        T0_GROUPS,
        [0x05, 0x80, 0xfe, 0x07, 0x80, 0x80, 0x80, 0x80],
        &[(0, 1, 101), (2, 999, 999), (3, 2, 102)],
    );
    // table 0, group 1
    write_group(
        mem,
        T0_GROUPS + GROUP_SIZE,
        [0x11, 0x22, 0x80, 0x80, 0x80, 0x80, 0x80, 0x80],
        &[(0, 3, 103), (1, 4, 104)],
    );
    // table 1, single group
    write_group(
        mem,
        T1_GROUPS,
        [0x80, 0x31, 0x80, 0x80, 0x42, 0x80, 0x80, 0x80],
        &[(1, 5, 105), (4, 6, 106)],
    );
}

#[test]
fn test_swiss_round_trip() {
    let types = swiss_types_default();
    let mem = FakeMemory::new();
    write_swiss_image(&mem, 6);

    let mut v = RemoteValue::new("m", MAP_VAR, types.graph, types.map_type, mem);
    let it = map_iterator(&mut v, 0, "Go cmd/compile go1.24").expect("iterator");
    let pairs = collect_pairs(it).unwrap();

    // duplicate directory entries skipped, tombstones skipped, every live
    // slot yielded exactly once
    assert_eq!(sorted_keys(&pairs), (1..=6).collect::<Vec<i64>>());
    for (k, val) in pairs {
        assert_eq!(val, k + 100);
    }
    assert_eq!(v.len, 6);
    assert!(v.unreadable().is_none());
}

#[test]
fn test_swiss_group_cap() {
    let types = swiss_types_default();
    let mem = FakeMemory::new();
    write_swiss_image(&mem, 6);

    let mut v = RemoteValue::new("m", MAP_VAR, types.graph, types.map_type, mem);
    let it = map_iterator(&mut v, 1, "Go cmd/compile go1.24").expect("iterator");
    let pairs = collect_pairs(it).unwrap();

    // the cap stops iteration after the first group
    assert_eq!(sorted_keys(&pairs), vec![1, 2]);
}

#[test]
fn test_swiss_missing_type_descriptor() {
    let mut b = TypeGraphBuilder::new();
    let int64 = b.basic("int64", 8, DW_ATE_signed);
    let uint64 = b.basic("uint64", 8, DW_ATE_unsigned);
    let table = b.struct_type("table", 24, vec![("index", 0, int64)]);
    let table_ptr = b.pointer(table);
    let dir = b.slice(table_ptr);
    let hdr = b.struct_type("Map", 40, vec![("used", 0, uint64), ("directory", 8, dir)]);
    let hdr_ptr = b.pointer(hdr);
    let map_type = b.map("map[int64]int64", int64, int64, hdr_ptr);
    let graph = b.build(map_type);

    let mem = FakeMemory::new();
    mem.write_u64(MAP_VAR, HDR);
    mem.write_u64(HDR, 0);
    mem.write_u64(HDR + 8, DIRECTORY);
    mem.write_u64(HDR + 16, 0);
    mem.write_u64(HDR + 24, 0);

    let mut v = RemoteValue::new("m", MAP_VAR, graph, map_type, mem);
    assert!(map_iterator(&mut v, 0, "Go cmd/compile go1.24").is_none());
    assert!(matches!(
        v.unreadable(),
        Some(ReadError::NoSwissTypeDescriptor)
    ));
}

#[test]
fn test_map_header_without_known_fields_is_unreadable() {
    let mut b = TypeGraphBuilder::new();
    let int64 = b.basic("int64", 8, DW_ATE_signed);
    let hdr = b.struct_type("Map", 8, vec![("whatever", 0, int64)]);
    let hdr_ptr = b.pointer(hdr);
    let map_type = b.map("map[int64]int64", int64, int64, hdr_ptr);
    let graph = b.build(map_type);

    let mem = FakeMemory::new();
    mem.write_u64(MAP_VAR, HDR);
    mem.write_i64(HDR, 0);

    let mut v = RemoteValue::new("m", MAP_VAR, graph, map_type, mem);
    assert!(map_iterator(&mut v, 0, "Go cmd/compile go1.24").is_none());
    assert!(matches!(v.unreadable(), Some(ReadError::MalformedMapType)));
}
