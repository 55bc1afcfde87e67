use crate::error::{Result, SparrowError};
use crate::hash::key_hash;
use crate::table::shard::TableShard;
use crate::types::Key;
use std::io::{BufRead, Write};
use std::path::Path;

/// Values that can round-trip through the text dump format.
///
/// A dump record is one line, `<key>\t<fields...>`, with the fields
/// whitespace-separated. Implementations own the field layout.
pub trait DumpValue: Sized {
    /// Append this value's whitespace-separated fields to `out`.
    fn write_fields(&self, out: &mut String);

    /// Rebuild a value from the field portion of a record.
    fn parse_fields(fields: &str) -> Result<Self>;
}

/// Sharded storage for one server's slice of the global parameter table.
///
/// A key routes to `key_hash(key) % shard_num`; the shard count is fixed
/// at construction, so a key maps to the same shard for the lifetime of
/// the process. Reads take the owning shard's lock shared, writes take
/// it exclusive.
pub struct SparseTable<V> {
    shards: Vec<TableShard<V>>,
}

impl<V: Clone> SparseTable<V> {
    /// Create a table with `shard_num` independently locked shards.
    pub fn new(shard_num: usize) -> Result<Self> {
        if shard_num == 0 {
            return Err(SparrowError::InvalidConfig {
                name: "shard_num",
                value: 0,
            });
        }
        let shards = (0..shard_num).map(|_| TableShard::new()).collect();
        Ok(Self { shards })
    }

    pub fn shard_num(&self) -> usize {
        self.shards.len()
    }

    /// Shard owning `key`. Pure in `(key, shard_num)`.
    pub fn to_shard_id(&self, key: Key) -> usize {
        (key_hash(key) % self.shards.len() as u64) as usize
    }

    /// Look up a key, cloning the stored value out under the shared lock.
    pub fn find(&self, key: Key) -> Option<V> {
        self.shards[self.to_shard_id(key)].find(key)
    }

    /// Insert or overwrite under the owning shard's exclusive lock.
    pub fn assign(&self, key: Key, value: V) {
        self.shards[self.to_shard_id(key)].assign(key, value);
    }

    /// Mutate the stored value for `key` under the owning shard's
    /// exclusive lock. Returns `None` when the key has never been
    /// assigned.
    pub fn update<R>(&self, key: Key, f: impl FnOnce(&mut V) -> R) -> Option<R> {
        self.shards[self.to_shard_id(key)].update(key, f)
    }

    /// Total number of stored keys across all shards.
    pub fn size(&self) -> usize {
        self.shards.iter().map(|s| s.len()).sum()
    }

    /// Visit every entry, shard by shard, under each shard's shared lock.
    pub fn for_each(&self, mut f: impl FnMut(Key, &V)) {
        for shard in &self.shards {
            shard.for_each(&mut f);
        }
    }
}

impl<V: Clone + DumpValue> SparseTable<V> {
    /// Write every entry as a text record. Returns the record count.
    pub fn dump(&self, out: &mut dyn Write) -> Result<usize> {
        let mut written = 0usize;
        let mut line = String::new();
        for shard in &self.shards {
            let mut err = None;
            shard.for_each(|key, value| {
                if err.is_some() {
                    return;
                }
                line.clear();
                value.write_fields(&mut line);
                if let Err(e) = writeln!(out, "{key}\t{line}") {
                    err = Some(e);
                    return;
                }
                written += 1;
            });
            if let Some(e) = err {
                return Err(e.into());
            }
        }
        out.flush()?;
        Ok(written)
    }

    /// Dump to a file at `path`, creating or truncating it.
    pub fn dump_to_path(&self, path: impl AsRef<Path>) -> Result<usize> {
        let file = std::fs::File::create(path)?;
        let mut out = std::io::BufWriter::new(file);
        self.dump(&mut out)
    }

    /// Read dump records, assigning every key accepted by `owned`.
    ///
    /// Keys rejected by the predicate are silently skipped; that is what
    /// lets a re-sharded cluster load a consistent subset of an old dump.
    /// Returns the number of keys assigned.
    pub fn restore(
        &self,
        input: &mut dyn BufRead,
        owned: impl Fn(Key) -> bool,
    ) -> Result<usize> {
        let mut assigned = 0usize;
        for (idx, line) in input.lines().enumerate() {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            let lineno = idx + 1;
            let (key, fields) =
                line.split_once('\t')
                    .ok_or_else(|| SparrowError::DumpFormat {
                        line: lineno,
                        reason: "missing key/fields separator".into(),
                    })?;
            let key: Key = key.parse().map_err(|_| SparrowError::DumpFormat {
                line: lineno,
                reason: format!("bad key `{key}`"),
            })?;
            if !owned(key) {
                continue;
            }
            let value = V::parse_fields(fields)?;
            self.assign(key, value);
            assigned += 1;
        }
        Ok(assigned)
    }

    /// Restore from a dump file at `path`.
    pub fn restore_from_path(
        &self,
        path: impl AsRef<Path>,
        owned: impl Fn(Key) -> bool,
    ) -> Result<usize> {
        let file = std::fs::File::open(path)?;
        let mut input = std::io::BufReader::new(file);
        self.restore(&mut input, owned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    impl DumpValue for f32 {
        fn write_fields(&self, out: &mut String) {
            out.push_str(&self.to_string());
        }

        fn parse_fields(fields: &str) -> Result<Self> {
            fields.trim().parse().map_err(|_| SparrowError::DumpFormat {
                line: 0,
                reason: format!("bad f32 `{fields}`"),
            })
        }
    }

    #[test]
    fn test_zero_shards_rejected() {
        assert!(SparseTable::<f32>::new(0).is_err());
    }

    #[test]
    fn test_find_assign_roundtrip() {
        let table = SparseTable::new(4).unwrap();
        assert_eq!(table.find(9), None);
        table.assign(9, 1.5f32);
        assert_eq!(table.find(9), Some(1.5));
        table.assign(9, 2.5);
        assert_eq!(table.find(9), Some(2.5));
    }

    #[test]
    fn test_shard_routing_stable() {
        let table = SparseTable::<f32>::new(8).unwrap();
        for key in 0..100u64 {
            assert_eq!(table.to_shard_id(key), table.to_shard_id(key));
            assert!(table.to_shard_id(key) < 8);
        }
    }

    #[test]
    fn test_size_spans_shards() {
        let table = SparseTable::new(4).unwrap();
        for key in 0..100u64 {
            table.assign(key, key as f32);
        }
        assert_eq!(table.size(), 100);

        let mut seen = 0;
        table.for_each(|_, _| seen += 1);
        assert_eq!(seen, 100);
    }

    #[test]
    fn test_dump_restore_roundtrip() {
        let table = SparseTable::new(4).unwrap();
        for key in 0..50u64 {
            table.assign(key, key as f32 * 0.5);
        }

        let mut buf = Vec::new();
        let written = table.dump(&mut buf).unwrap();
        assert_eq!(written, 50);

        // Same shard configuration restores every record.
        let restored = SparseTable::new(4).unwrap();
        let n = restored
            .restore(&mut std::io::Cursor::new(&buf), |_| true)
            .unwrap();
        assert_eq!(n, 50);
        for key in 0..50u64 {
            assert_eq!(restored.find(key), table.find(key));
        }
    }

    #[test]
    fn test_restore_filters_foreign_keys() {
        let table = SparseTable::new(2).unwrap();
        for key in 0..40u64 {
            table.assign(key, 1.0f32);
        }
        let mut buf = Vec::new();
        table.dump(&mut buf).unwrap();

        let restored = SparseTable::new(2).unwrap();
        let n = restored
            .restore(&mut std::io::Cursor::new(&buf), |k| k % 2 == 0)
            .unwrap();
        assert_eq!(n, 20);
        assert_eq!(restored.size(), 20);
        assert_eq!(restored.find(3), None);
        assert_eq!(restored.find(4), Some(1.0));
    }

    #[test]
    fn test_restore_rejects_malformed_record() {
        let table = SparseTable::<f32>::new(2).unwrap();
        let mut bad = std::io::Cursor::new(b"not-a-record\n".to_vec());
        assert!(matches!(
            table.restore(&mut bad, |_| true),
            Err(SparrowError::DumpFormat { line: 1, .. })
        ));
    }

    #[test]
    fn test_dump_file_roundtrip() {
        let table = SparseTable::new(4).unwrap();
        for key in 0..10u64 {
            table.assign(key, key as f32);
        }
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("params.dump");

        let written = table.dump_to_path(&path).unwrap();
        assert_eq!(written, 10);

        let restored = SparseTable::new(4).unwrap();
        let n = restored.restore_from_path(&path, |_| true).unwrap();
        assert_eq!(n, 10);
        assert_eq!(restored.find(7), Some(7.0));
    }
}
