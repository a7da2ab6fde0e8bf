use std::sync::Arc;

use parking_lot::Mutex;

use crate::keys::LATEST_IDENTITY_KEY;
use crate::{KvStore, Result, StoreError};

/// Hands out strictly increasing notification identities.
///
/// Each value is persisted before it is returned, under a lock that allows a
/// single write in flight, so a restart resumes above every identity ever
/// handed out.
pub struct IdentityAllocator {
    kv: Arc<dyn KvStore>,
    last: Mutex<u32>,
}

impl IdentityAllocator {
    /// Resume from the persisted counter; a fresh store starts at 0.
    pub fn load(kv: Arc<dyn KvStore>) -> Result<Self> {
        let last = match kv.get(LATEST_IDENTITY_KEY)? {
            None => 0,
            Some(bytes) => {
                let raw: [u8; 4] =
                    bytes
                        .as_slice()
                        .try_into()
                        .map_err(|_| StoreError::Corrupt {
                            key: String::from_utf8_lossy(LATEST_IDENTITY_KEY).into_owned(),
                            reason: format!("expected 4 bytes, found {}", bytes.len()),
                        })?;
                u32::from_be_bytes(raw)
            }
        };
        tracing::info!(last_identity = last, "identity allocator loaded");
        Ok(Self {
            kv,
            last: Mutex::new(last),
        })
    }

    /// Allocate the next identity. On a persistence failure the counter does
    /// not advance and the caller must not send.
    pub fn next(&self) -> Result<u32> {
        let mut last = self.last.lock();
        let next = last.checked_add(1).ok_or(StoreError::IdentityExhausted)?;
        self.kv.put(LATEST_IDENTITY_KEY, &next.to_be_bytes())?;
        *last = next;
        Ok(next)
    }

    /// The most recently issued identity.
    pub fn last(&self) -> u32 {
        *self.last.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MemoryKv, SqliteKv};
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FlakyKv {
        inner: MemoryKv,
        down: AtomicBool,
    }

    impl KvStore for FlakyKv {
        fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
            if self.down.load(Ordering::SeqCst) {
                return Err(StoreError::Unavailable("disk gone".into()));
            }
            self.inner.put(key, value)
        }
        fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
            self.inner.get(key)
        }
        fn scan(&self, from: &[u8], to: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
            self.inner.scan(from, to)
        }
        fn last(&self, from: &[u8], to: &[u8]) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
            self.inner.last(from, to)
        }
        fn delete_range(&self, from: &[u8], to: &[u8]) -> Result<usize> {
            self.inner.delete_range(from, to)
        }
    }

    #[test]
    fn starts_at_one_on_empty_store() {
        let ids = IdentityAllocator::load(Arc::new(MemoryKv::new())).unwrap();
        assert_eq!(ids.last(), 0);
        assert_eq!(ids.next().unwrap(), 1);
        assert_eq!(ids.next().unwrap(), 2);
    }

    #[test]
    fn restart_never_reissues() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ids.db");
        let issued = {
            let kv = Arc::new(SqliteKv::open(&path).unwrap());
            let ids = IdentityAllocator::load(kv).unwrap();
            (0..50).map(|_| ids.next().unwrap()).collect::<Vec<_>>()
        };
        let kv = Arc::new(SqliteKv::open(&path).unwrap());
        let ids = IdentityAllocator::load(kv).unwrap();
        let after = ids.next().unwrap();
        assert!(issued.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(after, issued[issued.len() - 1] + 1);
    }

    #[test]
    fn concurrent_callers_get_distinct_values() {
        let ids = Arc::new(IdentityAllocator::load(Arc::new(MemoryKv::new())).unwrap());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let ids = ids.clone();
                std::thread::spawn(move || (0..250).map(|_| ids.next().unwrap()).collect::<Vec<_>>())
            })
            .collect();
        let mut all: Vec<u32> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), 1000);
        assert_eq!(ids.last(), 1000);
    }

    #[test]
    fn failed_persist_does_not_advance() {
        let kv = Arc::new(FlakyKv {
            inner: MemoryKv::new(),
            down: AtomicBool::new(false),
        });
        let ids = IdentityAllocator::load(kv.clone()).unwrap();
        assert_eq!(ids.next().unwrap(), 1);
        kv.down.store(true, Ordering::SeqCst);
        assert!(ids.next().is_err());
        kv.down.store(false, Ordering::SeqCst);
        assert_eq!(ids.next().unwrap(), 2);
    }

    #[test]
    fn exhausted_counter_errors() {
        let kv = Arc::new(MemoryKv::new());
        kv.put(LATEST_IDENTITY_KEY, &u32::MAX.to_be_bytes()).unwrap();
        let ids = IdentityAllocator::load(kv).unwrap();
        assert!(matches!(ids.next(), Err(StoreError::IdentityExhausted)));
    }

    #[test]
    fn corrupt_counter_is_reported() {
        let kv = Arc::new(MemoryKv::new());
        kv.put(LATEST_IDENTITY_KEY, b"xy").unwrap();
        assert!(matches!(
            IdentityAllocator::load(kv),
            Err(StoreError::Corrupt { .. })
        ));
    }
}
