//! Named data objects: a type id plus a sparse array of tagged initializer
//! values (spec §3).

use crate::ir::types::TypeId;

/// One tagged initializer value. `Pointer`/`StringPointer` are the two
/// variants symbol-reachability tracing follows (spec §4.2).
#[derive(Debug, Clone, PartialEq)]
pub enum DataValue {
    Undefined,
    Integer(i64),
    Float32(f32),
    Float64(f64),
    LongDouble(u128),
    Complex { real: f64, imag: f64 },
    String(String),
    RawBytes(Vec<u8>),
    Aggregate(Vec<DataValue>),
    BitPattern(u64),
    /// A pointer to another symbol, optionally offset.
    Pointer { symbol: String, offset: i64 },
    /// A pointer to a string-literal symbol (kept distinct from `Pointer`
    /// because string-pointer initializers may be merged/deduplicated by
    /// the code generator independently of ordinary data symbols).
    StringPointer { symbol: String, offset: i64 },
}

impl DataValue {
    /// The symbol name this entry references, if any (used by the
    /// reachability walk in [`crate::ir::compact`]).
    pub fn referenced_symbol(&self) -> Option<&str> {
        match self {
            DataValue::Pointer { symbol, .. } | DataValue::StringPointer { symbol, .. } => {
                Some(symbol)
            }
            _ => None,
        }
    }
}

/// A sparse initializer array: `(byte_offset, value)` pairs, ordered by
/// offset. Gaps are implicitly zero-filled at emission time.
#[derive(Debug, Clone, Default)]
pub struct Initializers {
    entries: Vec<(u64, DataValue)>,
}

impl Initializers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, offset: u64, value: DataValue) {
        match self.entries.binary_search_by_key(&offset, |(o, _)| *o) {
            Ok(i) => self.entries[i].1 = value,
            Err(i) => self.entries.insert(i, (offset, value)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &(u64, DataValue)> {
        self.entries.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct NamedData {
    pub type_id: TypeId,
    pub initializers: Initializers,
}

impl NamedData {
    pub fn new(type_id: TypeId) -> Self {
        Self { type_id, initializers: Initializers::new() }
    }

    /// Every symbol this data object's initializers reference.
    pub fn referenced_symbols(&self) -> impl Iterator<Item = &str> {
        self.initializers.iter().filter_map(|(_, v)| v.referenced_symbol())
    }
}
