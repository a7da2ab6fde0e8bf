use crate::Result;

/// An ordered byte-keyed store. Keys compare bytewise.
///
/// Calls are synchronous and expected to be short; every write is durable
/// once the call returns.
pub trait KvStore: Send + Sync {
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()>;

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Entries with `from <= key <= to`, in key order.
    fn scan(&self, from: &[u8], to: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;

    /// The greatest entry with `from <= key <= to`.
    fn last(&self, from: &[u8], to: &[u8]) -> Result<Option<(Vec<u8>, Vec<u8>)>>;

    /// Delete entries with `from <= key <= to`; returns how many were removed.
    fn delete_range(&self, from: &[u8], to: &[u8]) -> Result<usize>;
}
