//! Iterator over the SwissTable-derived map layout.

use super::MapIter;
use crate::types::{TypeId, TypeKind};
use crate::value::{ReadError, RemoteValue};

pub(super) const SWISS_MAP_GROUP_SLOTS: u64 = 8;
/// Control byte of a slot that holds no entry; tombstones share the high
/// bit, so presence is a mask test, not an equality test.
const SWISS_TABLE_CTRL_EMPTY: u64 = 0b1000_0000;
/// The group's 64-bit control word precedes its slots.
const SWISS_TABLE_GROUP_SLOTS_OFFSET: u64 = 8;

fn ctrl_is_empty(n: u64) -> bool {
    n & SWISS_TABLE_CTRL_EMPTY == SWISS_TABLE_CTRL_EMPTY
}

#[derive(Debug, Clone, Copy)]
struct SwissTable {
    index: i64,
    groups_data: u64,
    groups_length_mask: u64,
}

pub(super) struct SwissIter<'a> {
    v: &'a mut RemoteValue,
    directory: RemoteValue,
    directory_len: i64,

    /// Iteration cap, 0 disables it.
    max_num_groups: u64,

    key_type: TypeId,
    elem_type: TypeId,

    // from the map type descriptor in the inferior
    slot_size: u64,
    elem_off: u64,
    group_size: u64,

    dir_idx: i64,
    tab: Option<SwissTable>,
    group_idx: u64,
    /// Current group address, 0 when not loaded.
    group: u64,
    slot_idx: u32,
    /// Groups visited in previous tables.
    group_count: u64,

    cur_key: Option<RemoteValue>,
    cur_value: Option<RemoteValue>,
}

impl<'a> SwissIter<'a> {
    pub(super) fn new(
        v: &'a mut RemoteValue,
        directory: RemoteValue,
        swisstyp: &RemoteValue,
        key_type: TypeId,
        elem_type: TypeId,
        max_num_groups: u64,
    ) -> Result<Self, (&'a mut RemoteValue, ReadError)> {
        let loaded = load_type(swisstyp).and_then(|dims| Ok((dims, directory.seq_len()?)));
        match loaded {
            Ok(((slot_size, elem_off, group_size), directory_len)) => Ok(SwissIter {
                v,
                directory,
                directory_len,
                max_num_groups,
                key_type,
                elem_type,
                slot_size,
                elem_off,
                group_size,
                dir_idx: 0,
                tab: None,
                group_idx: 0,
                group: 0,
                slot_idx: 0,
                group_count: 0,
                cur_key: None,
                cur_value: None,
            }),
            Err(err) => Err((v, err)),
        }
    }

    fn next_table(&mut self) {
        self.dir_idx += 1;
        self.tab = None;
    }

    fn next_group(&mut self) {
        self.group_idx += 1;
        self.group = 0;
    }

    /// Load the table at `dir_idx` into `tab`.
    fn load_current_table(&mut self) {
        let tab = match self
            .directory
            .slice_access(self.dir_idx)
            .and_then(|t| t.maybe_dereference())
        {
            Ok(tab) => tab,
            Err(_) => {
                self.v.set_unreadable(ReadError::SwissTableLoad);
                return;
            }
        };

        if tab.kind() != TypeKind::Struct {
            self.v.set_unreadable(ReadError::UnexpectedType("swiss table"));
            return;
        }

        let index = match tab.field("index").map(|f| f.as_int()) {
            Some(Ok(index)) => index,
            Some(Err(err)) => {
                self.v.set_unreadable(err);
                return;
            }
            None => 0,
        };

        let Some(groups) = tab.field("groups") else {
            self.v.set_unreadable(ReadError::SwissNoGroups);
            return;
        };
        if groups.kind() != TypeKind::Struct {
            self.v
                .set_unreadable(ReadError::UnexpectedType("swiss table groups"));
            return;
        }

        let mut groups_data = 0;
        let mut groups_length_mask = 0;
        if let Some(data) = groups.field("data") {
            groups_data = match data.ptr_value() {
                Ok(addr) => addr,
                Err(err) => {
                    self.v.set_unreadable(err);
                    return;
                }
            };
        }
        if let Some(mask) = groups.field("lengthMask") {
            groups_length_mask = match mask.as_uint() {
                Ok(mask) => mask,
                Err(err) => {
                    self.v.set_unreadable(err);
                    return;
                }
            };
        }

        self.tab = Some(SwissTable {
            index,
            groups_data,
            groups_length_mask,
        });
    }

    fn slot_is_empty(&mut self, k: u32) -> bool {
        match self.v.read_unsigned_at(self.group + k as u64, 1) {
            Ok(n) => ctrl_is_empty(n),
            Err(err) => {
                self.v.set_unreadable(err);
                true
            }
        }
    }

    fn slot_key(&self, k: u32) -> RemoteValue {
        let addr = self.group + SWISS_TABLE_GROUP_SLOTS_OFFSET + k as u64 * self.slot_size;
        self.v.new_child("", addr, self.key_type)
    }

    fn slot_value(&self, k: u32) -> RemoteValue {
        let addr =
            self.group + SWISS_TABLE_GROUP_SLOTS_OFFSET + k as u64 * self.slot_size + self.elem_off;
        self.v.new_child("", addr, self.elem_type)
    }
}

fn load_type(swisstyp: &RemoteValue) -> Result<(u64, u64, u64), ReadError> {
    if swisstyp.kind() != TypeKind::Struct {
        return Err(ReadError::UnexpectedType("swiss map type descriptor"));
    }

    let slot_size = swisstyp.assume_field("SlotSize")?.as_uint()?;
    let elem_off = swisstyp.assume_field("ElemOff")?.as_uint()?;

    let group = swisstyp
        .field("Group")
        .ok_or(ReadError::SwissTypeNoGroup)?;
    let group_size = group
        .field("Size_")
        .ok_or(ReadError::SwissGroupNoSize)?
        .as_uint()?;

    Ok((slot_size, elem_off, group_size))
}

impl MapIter for SwissIter<'_> {
    fn advance(&mut self) -> bool {
        while self.dir_idx < self.directory_len {
            if self.tab.is_none() {
                self.load_current_table();
                let Some(tab) = self.tab else {
                    return false;
                };
                if tab.index != self.dir_idx {
                    // duplicate entry of a canonical table, skip it
                    self.next_table();
                    continue;
                }
            }
            let tab = self.tab.expect("just loaded");

            while self.group_idx <= tab.groups_length_mask {
                if self.max_num_groups > 0
                    && self.group_idx + self.group_count >= self.max_num_groups
                {
                    return false;
                }
                if self.group == 0 {
                    self.group = tab.groups_data + self.group_idx * self.group_size;
                    if self.group == 0 {
                        return false;
                    }
                    self.v.cache_range(self.group, self.group_size as usize);
                }

                while self.slot_idx < SWISS_MAP_GROUP_SLOTS as u32 {
                    if self.slot_is_empty(self.slot_idx) {
                        self.slot_idx += 1;
                        continue;
                    }

                    self.cur_key = Some(self.slot_key(self.slot_idx));
                    self.cur_value = Some(self.slot_value(self.slot_idx));

                    self.slot_idx += 1;
                    if self.slot_idx >= SWISS_MAP_GROUP_SLOTS as u32 {
                        self.next_group();
                        self.slot_idx = 0;
                    }
                    return true;
                }

                self.slot_idx = 0;
                self.next_group();
            }

            self.group_count += self.group_idx;
            self.group_idx = 0;
            self.group = 0;
            self.next_table();
        }
        false
    }

    fn key(&self) -> Option<RemoteValue> {
        self.cur_key.clone()
    }

    fn value(&self) -> Option<RemoteValue> {
        self.cur_value.clone()
    }

    fn error(&self) -> Option<ReadError> {
        self.v.unreadable().cloned()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_ctrl_byte_presence() {
        // presence must be the high-bit test the runtime uses: 0x80 marks an
        // empty slot, 0xFE a tombstone, full slots keep the bit clear
        assert!(ctrl_is_empty(0b1000_0000));
        assert!(ctrl_is_empty(0b1111_1110));
        assert!(!ctrl_is_empty(0));
        assert!(!ctrl_is_empty(0b0101_0101));

        for _ in 0..100 {
            let b = rand::random::<u8>();
            assert_eq!(ctrl_is_empty(b as u64), b & 0x80 != 0, "byte {b:#010b}");
        }
    }
}
