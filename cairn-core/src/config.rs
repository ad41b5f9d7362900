//! # Cairn configuration
//!
//! A flat string key/value store. Keys are dotted paths such as
//! `upload.max_chunk_bytes`; typed views are taken from an immutable
//! [`ConfigSnapshot`] so readers never observe a half-applied update.
//!
//! ## Setting and reading values
//! ```rust
//! use cairn_core::CairnConfig;
//! let mut config = CairnConfig::new();
//!
//! config.set("upload.max_chunk_bytes", "1048576");
//!
//! let snapshot = config.snapshot();
//! assert_eq!(snapshot.get_u64("upload.max_chunk_bytes"), Some(1_048_576));
//! ```
//!
//! ## Environment overrides
//! [`CairnConfig::load_env`] copies every variable carrying the given prefix,
//! lower-casing it and turning `__` into `.`:
//!
//! ```bash
//! export CAIRN__UPLOAD__MAX_CHUNK_BYTES=8388608   # upload.max_chunk_bytes
//! ```

use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct CairnConfig {
    values: HashMap<String, String>,
}

impl CairnConfig {
    /// Create an empty config store.
    pub fn new() -> Self {
        Self {
            values: HashMap::new(),
        }
    }

    /// Set a configuration key to a string value.
    pub fn set<K, V>(&mut self, key: K, value: V)
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.values.insert(key.into(), value.into());
    }

    /// Get a configuration value by key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(|s| s.as_str())
    }

    /// Check whether a key is present.
    pub fn has(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Apply overrides from the process environment.
    ///
    /// `prefix` is matched verbatim, e.g. `"CAIRN__"`. Returns the number of
    /// keys that were set.
    pub fn load_env(&mut self, prefix: &str) -> usize {
        self.load_vars(prefix, std::env::vars())
    }

    /// Same as [`load_env`](Self::load_env) over an arbitrary variable list.
    pub fn load_vars<I>(&mut self, prefix: &str, vars: I) -> usize
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut applied = 0;
        for (key, value) in vars {
            if let Some(stripped) = key.strip_prefix(prefix) {
                let normalized = normalize_env_key(stripped);
                tracing::debug!(key = %normalized, "configuration override from environment");
                self.values.insert(normalized, value);
                applied += 1;
            }
        }
        applied
    }

    pub fn snapshot(&self) -> ConfigSnapshot {
        ConfigSnapshot::new(self.values.clone())
    }
}

fn normalize_env_key(raw: &str) -> String {
    raw.to_lowercase().replace("__", ".")
}

#[derive(Debug, Clone, Default)]
pub struct ConfigSnapshot {
    map: HashMap<String, String>,
}

impl ConfigSnapshot {
    pub(crate) fn new(map: HashMap<String, String>) -> Self {
        Self { map }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.map.get(key).map(|s| s.as_str())
    }

    pub fn get_string(&self, key: &str) -> Option<String> {
        self.map.get(key).cloned()
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.get(key).and_then(|v| v.trim().parse::<u64>().ok())
    }

    pub fn get_usize(&self, key: &str) -> Option<usize> {
        self.get(key).and_then(|v| v.trim().parse::<usize>().ok())
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(|v| v.trim().parse::<bool>().ok())
    }
}
