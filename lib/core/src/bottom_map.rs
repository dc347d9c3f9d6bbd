//! Per-parent-task mapping from address to the last child access
//! registered there, used to chain sibling accesses into a sequence.

use std::collections::HashMap;
use std::sync::Arc;

use crate::access::AccessState;
use crate::reduction::ReductionInfo;

#[derive(Clone)]
pub struct BottomMapEntry {
    pub last_child: Arc<AccessState>,
    pub open_reduction: Option<Arc<ReductionInfo>>,
}

pub struct BottomMap {
    entries: HashMap<usize, BottomMapEntry>,
}

impl BottomMap {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    pub fn get(&self, address: usize) -> Option<&BottomMapEntry> {
        self.entries.get(&address)
    }

    pub fn set(&mut self, address: usize, access: Arc<AccessState>, reduction: Option<Arc<ReductionInfo>>) {
        self.entries.insert(
            address,
            BottomMapEntry {
                last_child: access,
                open_reduction: reduction,
            },
        );
    }

    pub fn clear_reduction(&mut self, address: usize) {
        if let Some(entry) = self.entries.get_mut(&address) {
            entry.open_reduction = None;
        }
    }

    pub fn addresses(&self) -> impl Iterator<Item = usize> + '_ {
        self.entries.keys().copied()
    }

    pub fn open_reductions(&self) -> impl Iterator<Item = (usize, &Arc<ReductionInfo>)> {
        self.entries
            .iter()
            .filter_map(|(addr, entry)| entry.open_reduction.as_ref().map(|r| (*addr, r)))
    }

    pub fn remove(&mut self, address: usize) {
        self.entries.remove(&address);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for BottomMap {
    fn default() -> Self {
        Self::new()
    }
}
