//! Byte-keyed associative store.
//!
//! Open addressing with linear probing over a chain of prime-sized
//! tables. When the newest table passes its load factor a larger table
//! is appended instead of rehashing in place; lookups scan tables
//! newest to oldest. Removal is lazy: entries are flagged and reclaimed
//! by a per-table compaction once enough of them pile up.
//!
//! Iteration requires external coordination with mutation; the `&mut`
//! API makes the borrow checker enforce that within one thread.

/// Prime-modulus table sizes, indexed by growth step.
const TABLE_SIZES: &[usize] = &[
    17, 37, 79, 163, 331, 673, 1_361, 2_729, 5_471, 10_949, 21_911, 43_853, 87_719, 175_447,
    350_899, 701_819, 1_403_641, 2_807_303, 5_614_657,
];

/// Grow the newest table once it is this full, in percent.
const MAX_LOAD_PERCENT: usize = 75;

/// Compact a table once this share of its occupied slots is
/// remove-flagged, in percent.
const MAX_REMOVED_PERCENT: usize = 25;

struct Entry {
    hash: u64,
    key: Box<[u8]>,
    value: Vec<u8>,
    removed: bool,
}

struct Table {
    slots: Vec<Option<Entry>>,
    /// Occupied slots, including remove-flagged ones.
    occupied: usize,
    removed: usize,
}

enum Probe {
    Found(usize),
    Vacant(usize),
    Full,
}

impl Table {
    fn with_size(size: usize) -> Self {
        let mut slots = Vec::new();
        slots.resize_with(size, || None);
        Table {
            slots,
            occupied: 0,
            removed: 0,
        }
    }

    /// Linear probe from `hash mod size`. Stops at the first empty
    /// slot; remove-flagged slots are remembered as insertion
    /// candidates but do not match.
    fn probe(&self, hash: u64, key: &[u8]) -> Probe {
        let size = self.slots.len();
        let mut vacant = None;
        for step in 0..size {
            let index = (hash as usize).wrapping_add(step) % size;
            match &self.slots[index] {
                None => {
                    return Probe::Vacant(vacant.unwrap_or(index));
                }
                Some(entry) => {
                    if entry.removed {
                        if vacant.is_none() {
                            vacant = Some(index);
                        }
                    } else if entry.hash == hash && entry.key.as_ref() == key {
                        return Probe::Found(index);
                    }
                }
            }
        }
        match vacant {
            Some(index) => Probe::Vacant(index),
            None => Probe::Full,
        }
    }

    /// Rebuild the table at the same size, dropping remove-flagged
    /// entries and recomputing probe positions.
    fn compact(&mut self) {
        let size = self.slots.len();
        let mut fresh = Table::with_size(size);
        for slot in self.slots.iter_mut() {
            if let Some(entry) = slot.take() {
                if entry.removed {
                    continue;
                }
                match fresh.probe(entry.hash, &entry.key) {
                    Probe::Vacant(index) => {
                        fresh.slots[index] = Some(entry);
                        fresh.occupied += 1;
                    }
                    // A table never shrinks below its live entries.
                    Probe::Found(_) | Probe::Full => unreachable!("compaction overflow"),
                }
            }
        }
        *self = fresh;
    }
}

/// Hash-backed store with byte-opaque keys and values.
pub struct Dictionary {
    /// Newest table last.
    tables: Vec<Table>,
    next_size_index: usize,
    len: usize,
}

impl Dictionary {
    pub fn new() -> Self {
        Dictionary {
            tables: vec![Table::with_size(TABLE_SIZES[0])],
            next_size_index: 1,
            len: 0,
        }
    }

    /// Insert or replace. An existing entry for `key` in any table has
    /// its value replaced in place; otherwise the entry goes into the
    /// newest table, growing the chain when the load factor trips.
    pub fn put(&mut self, key: &[u8], value: &[u8]) {
        let hash = seahash::hash(key);

        for table in self.tables.iter_mut().rev() {
            if let Probe::Found(index) = table.probe(hash, key) {
                let entry = table.slots[index].as_mut().unwrap();
                entry.value.clear();
                entry.value.extend_from_slice(value);
                return;
            }
        }

        let newest = self.tables.last().unwrap();
        let size = newest.slots.len();
        if (newest.occupied - newest.removed + 1) * 100 > size * MAX_LOAD_PERCENT {
            let index = self.next_size_index.min(TABLE_SIZES.len() - 1);
            self.tables.push(Table::with_size(TABLE_SIZES[index]));
            self.next_size_index += 1;
        }

        let newest = self.tables.last_mut().unwrap();
        match newest.probe(hash, key) {
            Probe::Vacant(index) => {
                let reusing_removed = newest.slots[index].is_some();
                newest.slots[index] = Some(Entry {
                    hash,
                    key: key.to_vec().into_boxed_slice(),
                    value: value.to_vec(),
                    removed: false,
                });
                if reusing_removed {
                    newest.removed -= 1;
                } else {
                    newest.occupied += 1;
                }
                self.len += 1;
            }
            Probe::Found(_) | Probe::Full => unreachable!("insert into grown table"),
        }
    }

    pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
        let hash = seahash::hash(key);
        for table in self.tables.iter().rev() {
            if let Probe::Found(index) = table.probe(hash, key) {
                return table.slots[index].as_ref().map(|entry| entry.value.as_slice());
            }
        }
        None
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        self.get(key).is_some()
    }

    /// Flag the entry for `key` as removed. The slot is reclaimed later
    /// by compaction. Returns whether an entry was present.
    pub fn remove(&mut self, key: &[u8]) -> bool {
        let hash = seahash::hash(key);
        let mut hit = None;
        for (table_index, table) in self.tables.iter_mut().enumerate().rev() {
            if let Probe::Found(index) = table.probe(hash, key) {
                let entry = table.slots[index].as_mut().unwrap();
                entry.removed = true;
                entry.value = Vec::new();
                table.removed += 1;
                self.len -= 1;
                hit = Some(table_index);
                break;
            }
        }
        let Some(table_index) = hit else {
            return false;
        };
        let table = &mut self.tables[table_index];
        if table.occupied > 0 && table.removed * 100 > table.occupied * MAX_REMOVED_PERCENT {
            table.compact();
        }
        true
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn clear(&mut self) {
        self.tables = vec![Table::with_size(TABLE_SIZES[0])];
        self.next_size_index = 1;
        self.len = 0;
    }

    /// Visit every live entry exactly once, newest table first, in no
    /// further specified order.
    pub fn iter(&self) -> impl Iterator<Item = (&[u8], &[u8])> + '_ {
        self.tables.iter().rev().flat_map(|table| {
            table.slots.iter().filter_map(|slot| {
                slot.as_ref().and_then(|entry| {
                    if entry.removed {
                        None
                    } else {
                        Some((entry.key.as_ref(), entry.value.as_slice()))
                    }
                })
            })
        })
    }
}

impl Default for Dictionary {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Dictionary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dictionary")
            .field("len", &self.len)
            .field("tables", &self.tables.len())
            .finish()
    }
}
