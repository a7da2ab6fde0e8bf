use std::collections::BTreeMap;
use std::ops::Bound;

use parking_lot::RwLock;

use crate::{KvStore, Result};

/// In-memory [`KvStore`] for tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryKv {
    map: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }
}

fn bounds(from: &[u8], to: &[u8]) -> (Bound<Vec<u8>>, Bound<Vec<u8>>) {
    (Bound::Included(from.to_vec()), Bound::Included(to.to_vec()))
}

impl KvStore for MemoryKv {
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.map.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.map.read().get(key).cloned())
    }

    fn scan(&self, from: &[u8], to: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        // BTreeMap::range panics on inverted bounds.
        if from > to {
            return Ok(Vec::new());
        }
        Ok(self
            .map
            .read()
            .range(bounds(from, to))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn last(&self, from: &[u8], to: &[u8]) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        if from > to {
            return Ok(None);
        }
        Ok(self
            .map
            .read()
            .range(bounds(from, to))
            .next_back()
            .map(|(k, v)| (k.clone(), v.clone())))
    }

    fn delete_range(&self, from: &[u8], to: &[u8]) -> Result<usize> {
        if from > to {
            return Ok(0);
        }
        let mut map = self.map.write();
        let doomed: Vec<Vec<u8>> = map.range(bounds(from, to)).map(|(k, _)| k.clone()).collect();
        for key in &doomed {
            map.remove(key);
        }
        Ok(doomed.len())
    }
}
