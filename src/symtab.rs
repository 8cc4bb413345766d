//! Symbol table
//!
//! Every variable written to a file gets a symbol table entry: its type
//! name, dimensions, total item count, and the list of disk blocks holding
//! its data. A freshly written entry has one block; each append adds
//! another and grows the slowest varying dimension, so an entry's data may
//! be scattered across the file while reads see one contiguous index
//! space.

use rustc_hash::FxHashMap;
use serde::Serialize;

use crate::chart::{comp_num, Dimension};
use crate::error::{PdbError, PdbResult};
use crate::standard::MajorOrder;

/// One contiguous run of an entry's data on disk.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct SymBlock {
    pub addr: i64,
    pub number: u64,
}

/// A variable in the file.
#[derive(Clone, Debug, Serialize)]
pub struct SymbolEntry {
    pub ty: String,
    pub dims: Vec<Dimension>,
    /// Total items across all blocks
    pub number: u64,
    pub blocks: Vec<SymBlock>,
}

impl SymbolEntry {
    pub fn new(ty: &str, dims: Vec<Dimension>, addr: i64) -> SymbolEntry {
        let number = comp_num(&dims);
        SymbolEntry {
            ty: ty.to_string(),
            dims,
            number,
            blocks: vec![SymBlock { addr, number }],
        }
    }

    pub fn addr(&self) -> i64 {
        self.blocks.first().map(|b| b.addr).unwrap_or(-1)
    }

    /// The dimension that grows on append: first under row major order,
    /// last under column major.
    pub fn varying_dim(&self, order: MajorOrder) -> Option<usize> {
        if self.dims.is_empty() {
            return None;
        }
        match order {
            MajorOrder::Row => Some(0),
            MajorOrder::Column => Some(self.dims.len() - 1),
        }
    }

    /// Check that appended dimensions are compatible and grow the entry's
    /// shape. All dimensions but the varying one must match exactly; the
    /// varying one must resume either at the default offset or one past
    /// the current maximum. Returns the item count of the new block.
    pub fn extend_dims(
        &mut self,
        new_dims: &[Dimension],
        order: MajorOrder,
        default_offset: i64,
    ) -> PdbResult<u64> {
        if new_dims.len() != self.dims.len() || new_dims.is_empty() {
            return Err(PdbError::DimensionMismatch {
                reason: format!(
                    "appended shape has {} dimensions, entry has {}",
                    new_dims.len(),
                    self.dims.len()
                ),
            });
        }
        let vd = match self.varying_dim(order) {
            Some(vd) => vd,
            None => {
                return Err(PdbError::DimensionMismatch {
                    reason: "cannot append to a scalar entry".to_string(),
                })
            }
        };
        for (i, (nd, od)) in new_dims.iter().zip(self.dims.iter()).enumerate() {
            if i == vd {
                continue;
            }
            if nd != od {
                return Err(PdbError::DimensionMismatch {
                    reason: format!(
                        "dimension {} is {}:{}, entry has {}:{}",
                        i, nd.index_min, nd.index_max, od.index_min, od.index_max
                    ),
                });
            }
        }

        let nd = new_dims[vd];
        let od = self.dims[vd];
        if nd.index_min != default_offset && nd.index_min != od.index_max + 1 {
            return Err(PdbError::DimensionMismatch {
                reason: format!(
                    "varying dimension resumes at {}, expected {} or {}",
                    nd.index_min,
                    default_offset,
                    od.index_max + 1
                ),
            });
        }

        let added = comp_num(new_dims);
        self.dims[vd].index_max += nd.number() as i64;
        self.number = comp_num(&self.dims);
        Ok(added)
    }

    /// Record a new block of data for this entry.
    pub fn add_block(&mut self, addr: i64, number: u64) {
        self.blocks.push(SymBlock { addr, number });
    }
}

/// Name to entry map with stable insertion order.
#[derive(Default)]
pub struct SymbolTable {
    map: FxHashMap<String, SymbolEntry>,
    names: Vec<String>,
}

impl SymbolTable {
    pub fn new() -> SymbolTable {
        SymbolTable::default()
    }

    pub fn install(&mut self, name: &str, entry: SymbolEntry) {
        if !self.map.contains_key(name) {
            self.names.push(name.to_string());
        }
        self.map.insert(name.to_string(), entry);
    }

    pub fn lookup(&self, name: &str) -> Option<&SymbolEntry> {
        self.map.get(name)
    }

    pub fn lookup_mut(&mut self, name: &str) -> Option<&mut SymbolEntry> {
        self.map.get_mut(name)
    }

    pub fn lookup_required(&self, name: &str) -> PdbResult<&SymbolEntry> {
        self.map
            .get(name)
            .ok_or_else(|| PdbError::UnknownVariable { name: name.to_string() })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.map.contains_key(name)
    }

    /// Entries in installation order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &SymbolEntry)> {
        self.names.iter().filter_map(move |n| self.map.get(n).map(|e| (n, e)))
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// JSON description of every entry, for schema dumps.
    pub fn describe(&self) -> serde_json::Value {
        let entries: Vec<serde_json::Value> = self
            .iter()
            .map(|(n, e)| serde_json::json!({ "name": n, "entry": e }))
            .collect();
        serde_json::json!({ "symbols": entries })
    }
}
