//! # Plugin Bus Store
//!
//! A per-plugin, thread-safe, file-backed key-value store with binary
//! serialization. Each entry tracks `created_at`/`updated_at`; `created_at`
//! is preserved across updates. A store can be constructed in a disabled
//! mode, in which every mutating call is a no-op and every read returns the
//! caller's default.

mod error;

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

pub use error::{StoreError, StoreResult};

fn now_ts() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// The on-disk envelope wrapping every stored value: timestamps plus the
/// msgpack-encoded value bytes. Keeping the value opaque here means `set`
/// doesn't need to know the type a previous `set` used for the same key in
/// order to preserve `created_at`.
#[derive(Debug, Serialize, Deserialize)]
struct StoredEntry {
    created_at: f64,
    updated_at: f64,
    value: Vec<u8>,
}

/// Per-plugin persistent key-value store, backed by a `sled` tree.
pub struct KvStore {
    tree: sled::Tree,
    plugin_id: String,
    enabled: bool,
    closed: AtomicBool,
}

impl KvStore {
    /// Opens (creating if necessary) the store at `path`, using a tree
    /// namespaced by `plugin_id` so multiple plugins can share one `sled`
    /// database file.
    pub fn open(path: impl AsRef<Path>, plugin_id: impl Into<String>, enabled: bool) -> StoreResult<Self> {
        let plugin_id = plugin_id.into();
        let db = sled::open(path)?;
        let tree = db.open_tree(plugin_id.as_bytes())?;
        Ok(Self {
            tree,
            plugin_id,
            enabled,
            closed: AtomicBool::new(false),
        })
    }

    /// Builds a store directly over an already-open tree. Useful when the
    /// host process shares a single `sled::Db` across plugins.
    pub fn from_tree(tree: sled::Tree, plugin_id: impl Into<String>, enabled: bool) -> Self {
        Self {
            tree,
            plugin_id: plugin_id.into(),
            enabled,
            closed: AtomicBool::new(false),
        }
    }

    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn read_entry(&self, key: &str) -> StoreResult<Option<StoredEntry>> {
        match self.tree.get(key)? {
            Some(bytes) => Ok(Some(rmp_serde::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Returns the value stored at `key`, or `default` if absent, disabled,
    /// or undecodable. Deserialization failures are logged and degrade to
    /// `default` rather than propagating.
    pub fn get<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        if !self.enabled {
            return default;
        }
        match self.read_entry(key) {
            Ok(Some(entry)) => match rmp_serde::from_slice::<T>(&entry.value) {
                Ok(value) => value,
                Err(err) => {
                    tracing::warn!(plugin_id = %self.plugin_id, key, error = %err, "failed to decode stored value; returning default");
                    default
                }
            },
            Ok(None) => default,
            Err(err) => {
                tracing::warn!(plugin_id = %self.plugin_id, key, error = %err, "store read error; returning default");
                default
            }
        }
    }

    /// Upserts `value` at `key`. `created_at` is preserved if the key
    /// already exists; `updated_at` always advances to now.
    pub fn set<T: Serialize>(&self, key: &str, value: &T) -> StoreResult<()> {
        if !self.enabled {
            tracing::warn!(plugin_id = %self.plugin_id, key, "store disabled; set() is a no-op");
            return Ok(());
        }
        let now = now_ts();
        let created_at = match self.read_entry(key)? {
            Some(existing) => existing.created_at,
            None => now,
        };
        let entry = StoredEntry {
            created_at,
            updated_at: now,
            value: rmp_serde::to_vec(value)?,
        };
        self.tree.insert(key, rmp_serde::to_vec(&entry)?)?;
        Ok(())
    }

    /// Deletes `key`, returning whether it was present. A no-op (returns
    /// `false`) when the store is disabled.
    pub fn delete(&self, key: &str) -> StoreResult<bool> {
        if !self.enabled {
            return Ok(false);
        }
        Ok(self.tree.remove(key)?.is_some())
    }

    pub fn exists(&self, key: &str) -> StoreResult<bool> {
        if !self.enabled {
            return Ok(false);
        }
        Ok(self.tree.contains_key(key)?)
    }

    /// Lists every key with the given prefix (`""` lists all keys).
    pub fn keys(&self, prefix: &str) -> StoreResult<Vec<String>> {
        if !self.enabled {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        for item in self.tree.scan_prefix(prefix) {
            let (key, _) = item?;
            out.push(String::from_utf8_lossy(&key).into_owned());
        }
        Ok(out)
    }

    /// Removes every entry, returning how many were removed.
    pub fn clear(&self) -> StoreResult<usize> {
        if !self.enabled {
            return Ok(0);
        }
        let count = self.tree.len();
        self.tree.clear()?;
        Ok(count)
    }

    pub fn count(&self) -> StoreResult<usize> {
        if !self.enabled {
            return Ok(0);
        }
        Ok(self.tree.len())
    }

    /// Decodes every entry as `T`, skipping (and logging) any that fail to
    /// decode. Returns the full key/value mapping.
    pub fn dump<T: DeserializeOwned>(&self) -> StoreResult<BTreeMap<String, T>> {
        let mut out = BTreeMap::new();
        if !self.enabled {
            return Ok(out);
        }
        for item in self.tree.iter() {
            let (key, bytes) = item?;
            let key = String::from_utf8_lossy(&key).into_owned();
            let entry: StoredEntry = match rmp_serde::from_slice(&bytes) {
                Ok(entry) => entry,
                Err(err) => {
                    tracing::warn!(plugin_id = %self.plugin_id, key, error = %err, "skipping undecodable entry in dump()");
                    continue;
                }
            };
            match rmp_serde::from_slice::<T>(&entry.value) {
                Ok(value) => {
                    out.insert(key, value);
                }
                Err(err) => {
                    tracing::warn!(plugin_id = %self.plugin_id, key, error = %err, "skipping undecodable entry in dump()");
                }
            }
        }
        Ok(out)
    }

    /// The `created_at`/`updated_at` pair for `key`, if present.
    pub fn timestamps(&self, key: &str) -> StoreResult<Option<(f64, f64)>> {
        Ok(self
            .read_entry(key)?
            .map(|entry| (entry.created_at, entry.updated_at)))
    }

    /// Flushes pending writes to disk. Safe to call more than once.
    pub fn close(&self) -> StoreResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.tree.flush()?;
        Ok(())
    }
}

impl Drop for KvStore {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize, PartialEq, Default)]
    struct Note {
        text: String,
    }

    fn open_store(enabled: bool) -> (KvStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = KvStore::open(dir.path(), "plugin-a", enabled).unwrap();
        (store, dir)
    }

    #[test]
    fn set_then_get_round_trips() {
        let (store, _dir) = open_store(true);
        store
            .set(
                "greeting",
                &Note {
                    text: "hi".to_string(),
                },
            )
            .unwrap();
        let got: Note = store.get("greeting", Note::default());
        assert_eq!(got.text, "hi");
    }

    #[test]
    fn created_at_is_stable_across_updates() {
        let (store, _dir) = open_store(true);
        store.set("k", &1u64).unwrap();
        let (created_first, updated_first) = store.timestamps("k").unwrap().unwrap();
        store.set("k", &2u64).unwrap();
        let (created_second, updated_second) = store.timestamps("k").unwrap().unwrap();
        assert_eq!(created_first, created_second);
        assert!(updated_second >= updated_first);
    }

    #[test]
    fn missing_key_returns_default() {
        let (store, _dir) = open_store(true);
        let got: u64 = store.get("missing", 42);
        assert_eq!(got, 42);
    }

    #[test]
    fn disabled_store_is_all_no_ops() {
        let (store, _dir) = open_store(false);
        store.set("k", &1u64).unwrap();
        assert!(!store.exists("k").unwrap());
        let got: u64 = store.get("k", 7);
        assert_eq!(got, 7);
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn delete_and_exists() {
        let (store, _dir) = open_store(true);
        store.set("k", &1u64).unwrap();
        assert!(store.exists("k").unwrap());
        assert!(store.delete("k").unwrap());
        assert!(!store.exists("k").unwrap());
        assert!(!store.delete("k").unwrap());
    }

    #[test]
    fn keys_filters_by_prefix() {
        let (store, _dir) = open_store(true);
        store.set("user:1", &1u64).unwrap();
        store.set("user:2", &2u64).unwrap();
        store.set("session:1", &3u64).unwrap();
        let mut keys = store.keys("user:").unwrap();
        keys.sort();
        assert_eq!(keys, vec!["user:1".to_string(), "user:2".to_string()]);
    }

    #[test]
    fn clear_returns_count_and_empties_store() {
        let (store, _dir) = open_store(true);
        store.set("a", &1u64).unwrap();
        store.set("b", &2u64).unwrap();
        assert_eq!(store.clear().unwrap(), 2);
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn dump_decodes_every_entry() {
        let (store, _dir) = open_store(true);
        store.set("a", &1u64).unwrap();
        store.set("b", &2u64).unwrap();
        let dumped: BTreeMap<String, u64> = store.dump().unwrap();
        assert_eq!(dumped.get("a"), Some(&1));
        assert_eq!(dumped.get("b"), Some(&2));
    }

    #[test]
    fn close_is_idempotent() {
        let (store, _dir) = open_store(true);
        store.close().unwrap();
        store.close().unwrap();
    }

    #[test]
    fn undecodable_value_degrades_to_default_on_get() {
        let (store, _dir) = open_store(true);
        store.set("k", &"not a number".to_string()).unwrap();
        let got: u64 = store.get("k", 99);
        assert_eq!(got, 99);
    }
}
