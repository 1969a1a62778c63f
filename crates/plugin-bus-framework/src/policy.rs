//! Handler-scope sync-call policy, cached against the plugin's own config
//! file modification time and re-read on change.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use parking_lot::Mutex;
use serde::Deserialize;

/// What happens when a synchronous bus call is attempted from inside a
/// running event handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncCallPolicy {
    /// Log and let the call proceed. The default.
    Warn,
    /// Fail the call immediately, before any IPC is attempted.
    Reject,
}

impl Default for SyncCallPolicy {
    fn default() -> Self {
        Self::Warn
    }
}

impl SyncCallPolicy {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "warn" => Some(Self::Warn),
            "reject" => Some(Self::Reject),
            _ => None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawPolicyConfig {
    sync_call_in_handler: Option<String>,
}

/// Reads `sync_call_in_handler` from a plugin's own TOML config file,
/// caching the parsed value against the file's mtime so a hot path doesn't
/// re-read and re-parse the file on every call.
pub struct PolicyCache {
    config_path: PathBuf,
    global_default: SyncCallPolicy,
    cached: Mutex<Option<(SystemTime, SyncCallPolicy)>>,
}

impl PolicyCache {
    pub fn new(config_path: impl Into<PathBuf>, global_default: SyncCallPolicy) -> Self {
        Self {
            config_path: config_path.into(),
            global_default,
            cached: Mutex::new(None),
        }
    }

    /// The policy currently in effect. Re-reads the config file only when
    /// its mtime has changed since the last read.
    pub fn current(&self) -> SyncCallPolicy {
        let mtime = std::fs::metadata(&self.config_path)
            .and_then(|meta| meta.modified())
            .ok();

        let mut cached = self.cached.lock();
        if let (Some(mtime), Some((cached_mtime, policy))) = (mtime, cached.as_ref()) {
            if mtime == *cached_mtime {
                return *policy;
            }
        }

        let policy = Self::read_from(&self.config_path).unwrap_or(self.global_default);
        if let Some(mtime) = mtime {
            *cached = Some((mtime, policy));
        }
        policy
    }

    fn read_from(path: &Path) -> Option<SyncCallPolicy> {
        let text = std::fs::read_to_string(path).ok()?;
        let raw: RawPolicyConfig = toml::from_str(&text).ok()?;
        raw.sync_call_in_handler.as_deref().and_then(SyncCallPolicy::parse)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn falls_back_to_global_default_when_config_is_missing() {
        let cache = PolicyCache::new("/nonexistent/plugin.toml", SyncCallPolicy::Reject);
        assert_eq!(cache.current(), SyncCallPolicy::Reject);
    }

    #[test]
    fn reads_policy_from_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plugin.toml");
        std::fs::write(&path, "sync_call_in_handler = \"reject\"\n").unwrap();
        let cache = PolicyCache::new(&path, SyncCallPolicy::Warn);
        assert_eq!(cache.current(), SyncCallPolicy::Reject);
    }

    #[test]
    fn picks_up_changes_after_mtime_advances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plugin.toml");
        std::fs::write(&path, "sync_call_in_handler = \"warn\"\n").unwrap();
        let cache = PolicyCache::new(&path, SyncCallPolicy::Warn);
        assert_eq!(cache.current(), SyncCallPolicy::Warn);

        // Advance mtime explicitly; some filesystems have coarse mtime granularity.
        std::thread::sleep(std::time::Duration::from_millis(10));
        let mut file = std::fs::OpenOptions::new().write(true).truncate(true).open(&path).unwrap();
        file.write_all(b"sync_call_in_handler = \"reject\"\n").unwrap();
        drop(file);
        let now = SystemTime::now();
        filetime_touch(&path, now);

        assert_eq!(cache.current(), SyncCallPolicy::Reject);
    }

    fn filetime_touch(path: &Path, time: SystemTime) {
        // Some filesystems only advance mtime on write; this best-effort nudge
        // keeps the test stable without pulling in a filetime dependency.
        let _ = std::fs::File::open(path).and_then(|f| f.set_modified(time));
    }
}
