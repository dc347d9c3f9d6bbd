//! Small per-task mapping from address to [`AccessState`].
//!
//! Below [`ACCESS_LINEAR_CUTOFF`] entries the map is a pair of parallel
//! vectors scanned linearly — cheaper than hashing for the common case of
//! a handful of declared accesses per task. Above the cutoff it switches to
//! a `HashMap`. Iteration order is unspecified in either regime; nothing in
//! the dependency algorithm depends on it.

use std::collections::HashMap;
use std::sync::Arc;

use crate::access::AccessState;

/// Entries at or below this count use the linear array; beyond it, the
/// map promotes to hashed storage.
pub const ACCESS_LINEAR_CUTOFF: usize = 20;

enum Storage {
    Linear {
        addresses: Vec<usize>,
        accesses: Vec<Arc<AccessState>>,
    },
    Hashed(HashMap<usize, Arc<AccessState>>),
}

pub struct AccessMap {
    storage: Storage,
}

impl AccessMap {
    pub fn new() -> Self {
        Self {
            storage: Storage::Linear {
                addresses: Vec::new(),
                accesses: Vec::new(),
            },
        }
    }

    pub fn get(&self, address: usize) -> Option<&Arc<AccessState>> {
        match &self.storage {
            Storage::Linear { addresses, accesses } => addresses
                .iter()
                .position(|&a| a == address)
                .map(|i| &accesses[i]),
            Storage::Hashed(map) => map.get(&address),
        }
    }

    /// Inserts a new entry. Callers must have already confirmed via `get`
    /// that no entry exists at `address` (upgrades are handled by the
    /// caller replacing the descriptor kind in place before re-registering
    /// its flags; the map itself only stores one descriptor per address).
    pub fn insert(&mut self, address: usize, access: Arc<AccessState>) {
        match &mut self.storage {
            Storage::Linear { addresses, accesses } => {
                addresses.push(address);
                accesses.push(access);
                if addresses.len() > ACCESS_LINEAR_CUTOFF {
                    self.promote();
                }
            }
            Storage::Hashed(map) => {
                map.insert(address, access);
            }
        }
    }

    fn promote(&mut self) {
        if let Storage::Linear { addresses, accesses } = &mut self.storage {
            let mut map = HashMap::with_capacity(addresses.len());
            for (address, access) in addresses.drain(..).zip(accesses.drain(..)) {
                map.insert(address, access);
            }
            self.storage = Storage::Hashed(map);
        }
    }

    pub fn len(&self) -> usize {
        match &self.storage {
            Storage::Linear { addresses, .. } => addresses.len(),
            Storage::Hashed(map) => map.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterates every declared access. Order is unspecified.
    pub fn for_all(&self) -> Box<dyn Iterator<Item = &Arc<AccessState>> + '_> {
        match &self.storage {
            Storage::Linear { accesses, .. } => Box::new(accesses.iter()),
            Storage::Hashed(map) => Box::new(map.values()),
        }
    }
}

impl Default for AccessMap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::AccessKind;
    use crate::task::TaskId;

    fn dummy(id: u64, addr: usize) -> Arc<AccessState> {
        AccessState::new(TaskId(id), addr, 8, AccessKind::Read, false, 0, None)
    }

    #[test]
    fn promotes_past_cutoff() {
        let mut map = AccessMap::new();
        for i in 0..ACCESS_LINEAR_CUTOFF {
            map.insert(i, dummy(1, i));
        }
        assert!(matches!(map.storage, Storage::Linear { .. }));
        map.insert(ACCESS_LINEAR_CUTOFF, dummy(1, ACCESS_LINEAR_CUTOFF));
        assert!(matches!(map.storage, Storage::Hashed(_)));
        assert_eq!(map.len(), ACCESS_LINEAR_CUTOFF + 1);
        assert!(map.get(3).is_some());
    }

    #[test]
    fn for_all_visits_every_linear_entry() {
        let mut map = AccessMap::new();
        for i in 0..5 {
            map.insert(i, dummy(1, i));
        }
        assert_eq!(map.for_all().count(), 5);
    }
}
